use crate::foundation::error::{CaptureError, CaptureResult};

/// Bytes per pixel for the RGBA8 format used on every surface and stream.
pub const BYTES_PER_PIXEL: usize = 4;

/// Index identity of a registered capture source.
///
/// Sources are registered once before a session starts; the id is the source's
/// position in the registration order and stays stable for the session.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct SourceId(pub u32);

/// Absolute 0-based frame index in session tick order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> CaptureResult<Self> {
        if num == 0 {
            return Err(CaptureError::config("Fps num must be > 0"));
        }
        if den == 0 {
            return Err(CaptureError::config("Fps den must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }
}

impl Default for Fps {
    /// 30 fps, the capture default.
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

/// Axis-aligned pixel rectangle with a bottom-left origin.
///
/// The composite surface, the staging buffer and every slice all share this
/// convention: `y` grows upward and row `r` of a rect maps to composite row
/// `y + r`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    /// Left edge in pixels.
    pub x: u32,
    /// Bottom edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Create a rect from origin and size.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive top edge.
    pub fn top(self) -> u32 {
        self.y + self.height
    }

    /// Byte length of this rect's pixels when tightly packed as RGBA8.
    pub fn area_bytes(self) -> usize {
        (self.width as usize) * (self.height as usize) * BYTES_PER_PIXEL
    }

    /// Return `true` when `other` lies entirely inside `self`.
    pub fn contains_rect(self, other: PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.top() <= self.top()
    }

    /// Return `true` when the two rects share any pixel.
    pub fn overlaps(self, other: PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.top()
            && other.y < self.top()
    }
}
