/// Convenience result type used across atlascap.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Top-level error taxonomy used by capture APIs.
///
/// Only configuration errors are fatal to a session, and only at session start.
/// Transfer, write, and process errors are contained to the tick, source, or
/// process they occurred in. Backpressure drops are reported as warnings and do
/// not appear here at all.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    /// Invalid session configuration (bad source set, unwritable sink directory).
    #[error("configuration error: {0}")]
    Config(String),

    /// Device-to-host readback failure for one tick's composite.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Failure writing or flushing a slice to a sink stream.
    #[error("write error: {0}")]
    Write(String),

    /// Encoder subprocess lifecycle failure (spawn, exit, termination).
    #[error("encoder process error: {0}")]
    Process(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptureError {
    /// Build a [`CaptureError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`CaptureError::Transfer`] value.
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    /// Build a [`CaptureError::Write`] value.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Build a [`CaptureError::Process`] value.
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            CaptureError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            CaptureError::transfer("x")
                .to_string()
                .contains("transfer error:")
        );
        assert!(CaptureError::write("x").to_string().contains("write error:"));
        assert!(
            CaptureError::process("x")
                .to_string()
                .contains("encoder process error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = CaptureError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
