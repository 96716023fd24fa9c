use crate::foundation::core::PixelRect;
use crate::foundation::error::{CaptureError, CaptureResult};

/// Substitute width for a source that reports a zero-sized native resolution.
pub const DEFAULT_SOURCE_WIDTH: u32 = 1280;
/// Substitute height for a source that reports a zero-sized native resolution.
pub const DEFAULT_SOURCE_HEIGHT: u32 = 720;

/// Grid packing of N source rectangles into one composite surface.
///
/// The grid uses uniform tiles sized to the largest source on each axis, so any
/// source fits any cell. Each source keeps its own native size inside its cell,
/// anchored at the cell's bottom-left corner; smaller sources leave unused
/// padding in their cell. Rows are assigned top-down in index order but
/// expressed in bottom-left-origin coordinates, so source 0 gets the highest
/// `y`. The layout is derived once per session and never changes mid-session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AtlasLayout {
    /// Composite surface width (`columns * tile_width`).
    pub width: u32,
    /// Composite surface height (`rows * tile_height`).
    pub height: u32,
    /// Uniform grid cell width (max source width).
    pub tile_width: u32,
    /// Uniform grid cell height (max source height).
    pub tile_height: u32,
    /// Grid column count (`ceil(sqrt(n))`).
    pub columns: u32,
    /// Grid row count (`ceil(n / columns)`).
    pub rows: u32,
    /// Per-source placement rectangle, indexed by source id.
    pub rects: Vec<PixelRect>,
}

impl AtlasLayout {
    /// Plan a layout for the given native `(width, height)` per source.
    ///
    /// A source reporting a zero dimension is planned at
    /// [`DEFAULT_SOURCE_WIDTH`]×[`DEFAULT_SOURCE_HEIGHT`] instead.
    pub fn plan(sizes: &[(u32, u32)]) -> CaptureResult<Self> {
        if sizes.is_empty() {
            return Err(CaptureError::config(
                "atlas layout requires at least one source",
            ));
        }

        let sizes: Vec<(u32, u32)> = sizes
            .iter()
            .map(|&(w, h)| {
                if w == 0 || h == 0 {
                    (DEFAULT_SOURCE_WIDTH, DEFAULT_SOURCE_HEIGHT)
                } else {
                    (w, h)
                }
            })
            .collect();

        let n = sizes.len() as u32;
        let columns = (f64::from(n)).sqrt().ceil() as u32;
        let rows = n.div_ceil(columns);

        let tile_width = sizes.iter().map(|&(w, _)| w).max().unwrap_or(0);
        let tile_height = sizes.iter().map(|&(_, h)| h).max().unwrap_or(0);

        let rects = sizes
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                let row = i as u32 / columns;
                let col = i as u32 % columns;
                PixelRect::new(
                    col * tile_width,
                    // Row 0 is the topmost cell; flip for the bottom-left origin.
                    (rows - 1 - row) * tile_height,
                    w,
                    h,
                )
            })
            .collect();

        Ok(Self {
            width: columns * tile_width,
            height: rows * tile_height,
            tile_width,
            tile_height,
            columns,
            rows,
            rects,
        })
    }

    /// Number of sources in this layout.
    pub fn source_count(&self) -> usize {
        self.rects.len()
    }

    /// Composite bounds as a rect at the origin.
    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint_and_contained(layout: &AtlasLayout) {
        let bounds = layout.bounds();
        for (i, &a) in layout.rects.iter().enumerate() {
            assert!(
                bounds.contains_rect(a),
                "rect {i} {a:?} escapes composite {bounds:?}"
            );
            for &b in &layout.rects[i + 1..] {
                assert!(!a.overlaps(b), "rects overlap: {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn empty_source_list_is_an_error() {
        assert!(AtlasLayout::plan(&[]).is_err());
    }

    #[test]
    fn single_source_fills_one_cell() {
        let l = AtlasLayout::plan(&[(800, 600)]).unwrap();
        assert_eq!((l.columns, l.rows), (1, 1));
        assert_eq!((l.width, l.height), (800, 600));
        assert_eq!(l.rects, vec![PixelRect::new(0, 0, 800, 600)]);
    }

    #[test]
    fn four_mixed_sources_match_reference_layout() {
        let l = AtlasLayout::plan(&[(640, 480), (640, 480), (320, 240), (320, 240)]).unwrap();
        assert_eq!((l.tile_width, l.tile_height), (640, 480));
        assert_eq!((l.columns, l.rows), (2, 2));
        assert_eq!((l.width, l.height), (1280, 960));
        assert_eq!(
            l.rects,
            vec![
                PixelRect::new(0, 480, 640, 480),
                PixelRect::new(640, 480, 640, 480),
                PixelRect::new(0, 0, 320, 240),
                PixelRect::new(640, 0, 320, 240),
            ]
        );
        assert_disjoint_and_contained(&l);
    }

    #[test]
    fn grid_shape_follows_ceil_sqrt() {
        for (n, cols, rows) in [
            (1u32, 1u32, 1u32),
            (2, 2, 1),
            (3, 2, 2),
            (4, 2, 2),
            (5, 3, 2),
            (9, 3, 3),
            (10, 4, 3),
        ] {
            let sizes = vec![(64, 48); n as usize];
            let l = AtlasLayout::plan(&sizes).unwrap();
            assert_eq!((l.columns, l.rows), (cols, rows), "n = {n}");
            assert_eq!((l.width, l.height), (cols * 64, rows * 48));
            assert_disjoint_and_contained(&l);
        }
    }

    #[test]
    fn rects_keep_native_sizes_in_uniform_tiles() {
        let sizes = [(100, 400), (300, 50), (20, 20), (300, 400), (7, 9)];
        let l = AtlasLayout::plan(&sizes).unwrap();
        assert_eq!((l.tile_width, l.tile_height), (300, 400));
        for (i, &(w, h)) in sizes.iter().enumerate() {
            assert_eq!((l.rects[i].width, l.rects[i].height), (w, h));
            // Anchored at the cell's bottom-left corner.
            assert!(l.rects[i].x.is_multiple_of(l.tile_width));
            assert!(l.rects[i].y.is_multiple_of(l.tile_height));
        }
        assert_disjoint_and_contained(&l);
    }

    #[test]
    fn zero_sized_source_falls_back_to_default_display_size() {
        let l = AtlasLayout::plan(&[(0, 0), (640, 0)]).unwrap();
        assert_eq!(
            l.rects[0],
            PixelRect::new(0, 0, DEFAULT_SOURCE_WIDTH, DEFAULT_SOURCE_HEIGHT)
        );
        assert_eq!(l.rects[1].width, DEFAULT_SOURCE_WIDTH);
        assert_eq!(l.tile_width, DEFAULT_SOURCE_WIDTH);
    }

    #[test]
    fn row_zero_occupies_the_top_of_the_composite() {
        let l = AtlasLayout::plan(&[(10, 10); 5]).unwrap();
        // 3 columns, 2 rows: sources 0..3 sit on the top row.
        assert_eq!(l.rects[0].y, l.tile_height);
        assert_eq!(l.rects[3].y, 0);
    }
}
