use crate::error::WatermarkError;
use crate::types::{PageGeometry, Pt, WatermarkSpec};

/// Larger side of a US Letter page, the size `max_tiles_per_page` is given for.
const CAP_REFERENCE_SIDE: f64 = 792.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLayout {
    pub gap: f32,
    pub line_factor: f32,
    pub overscan: f32,
    /// Tile limit for a letter-sized page; larger pages get a proportionally
    /// larger limit.
    pub max_tiles_per_page: usize,
    pub compensate_page_rotation: bool,
    pub cull_offpage: bool,
}

impl Default for TileLayout {
    fn default() -> Self {
        Self {
            gap: 40.0,
            line_factor: 6.0,
            overscan: 2.5,
            max_tiles_per_page: 200_000,
            compensate_page_rotation: true,
            cull_offpage: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub cos: f64,
    pub sin: f64,
}

impl Rotation {
    pub fn from_degrees(degrees: f64) -> Self {
        let radians = degrees.rem_euclid(360.0).to_radians();
        Self {
            cos: libm::cos(radians),
            sin: libm::sin(radians),
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.cos - y * self.sin, x * self.sin + y * self.cos)
    }

    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.cos + y * self.sin, -x * self.sin + y * self.cos)
    }

    /// `[a b c d]` of the text matrix that rotates glyphs by the same θ.
    pub fn text_matrix(&self) -> [f64; 4] {
        [self.cos, self.sin, -self.sin, self.cos]
    }

    pub fn is_identity(&self) -> bool {
        self.cos == 1.0 && self.sin == 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub step_x: f64,
    pub step_y: f64,
    pub half_extent: f64,
    pub rows: usize,
    pub cols: usize,
    pub rotation: Rotation,
    pub origin: (f64, f64),
    page_size: (f64, f64),
    /// Reach of one copy of the text from its insertion point.
    text_reach: f64,
    cull: bool,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point(&self, index: usize) -> Option<(f64, f64)> {
        if index >= self.len() {
            return None;
        }
        let row = index / self.cols;
        let col = index % self.cols;
        Some((
            -self.half_extent + col as f64 * self.step_x,
            -self.half_extent + row as f64 * self.step_y,
        ))
    }

    pub fn points(&self) -> TilePoints<'_> {
        TilePoints {
            grid: self,
            next: 0,
        }
    }

    /// Insertion points in page space: rotated, translated to the box origin
    /// and, when enabled, culled to tiles that can touch the page.
    pub fn placements(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points().filter_map(move |(x, y)| {
            let (rx, ry) = self.rotation.apply(x, y);
            if self.cull && !self.reaches_page(rx, ry) {
                return None;
            }
            Some((rx + self.origin.0, ry + self.origin.1))
        })
    }

    fn reaches_page(&self, x: f64, y: f64) -> bool {
        let r = self.text_reach;
        x >= -r && y >= -r && x <= self.page_size.0 + r && y <= self.page_size.1 + r
    }
}

#[derive(Debug, Clone)]
pub struct TilePoints<'a> {
    grid: &'a TileGrid,
    next: usize,
}

impl Iterator for TilePoints<'_> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.grid.point(self.next)?;
        self.next += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.grid.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for TilePoints<'_> {}

pub fn plan_tile_grid(
    geometry: &PageGeometry,
    spec: &WatermarkSpec,
    advance_width: Pt,
    layout: &TileLayout,
) -> Result<TileGrid, WatermarkError> {
    let invalid = |message: String| Err(WatermarkError::InvalidWatermarkSpec(message));
    if spec.text.is_empty() {
        return invalid("watermark text is empty".to_string());
    }
    if !spec.font_size.is_finite() || spec.font_size <= 0.0 {
        return invalid(format!("font size must be positive, got {}", spec.font_size));
    }
    if !spec.angle_degrees.is_finite() {
        return invalid(format!("angle must be finite, got {}", spec.angle_degrees));
    }
    let advance = advance_width.to_f32() as f64;
    if advance <= 0.0 {
        return invalid("measured text width is not positive".to_string());
    }
    if !(layout.gap.is_finite() && layout.gap >= 0.0)
        || !(layout.line_factor.is_finite() && layout.line_factor > 0.0)
        || !(layout.overscan.is_finite() && layout.overscan > 0.0)
    {
        return invalid(format!("unusable tile layout {layout:?}"));
    }
    let width = geometry.width.to_f32() as f64;
    let height = geometry.height.to_f32() as f64;
    if width <= 0.0 || height <= 0.0 {
        return invalid(format!("page size {width}x{height} is not positive"));
    }

    let font_size = spec.font_size as f64;
    let step_x = advance + layout.gap as f64;
    let step_y = font_size * layout.line_factor as f64;
    let half_extent = layout.overscan as f64 * geometry.larger_side() as f64;
    let rows = (2.0 * half_extent / step_y).floor() as usize + 1;
    let cols = (2.0 * half_extent / step_x).floor() as usize + 1;
    let tiles = rows.saturating_mul(cols);
    let limit = tile_limit(layout.max_tiles_per_page, geometry.larger_side() as f64);
    if tiles > limit {
        return invalid(format!(
            "{tiles} tiles on a {width}x{height} page exceeds the configured tile limit of {limit} \
             (max_tiles_per_page = {} at letter size)",
            layout.max_tiles_per_page
        ));
    }

    let mut angle = spec.angle_degrees as f64;
    if layout.compensate_page_rotation {
        angle += geometry.rotation as f64;
    }

    Ok(TileGrid {
        step_x,
        step_y,
        half_extent,
        rows,
        cols,
        rotation: Rotation::from_degrees(angle),
        origin: (geometry.origin_x as f64, geometry.origin_y as f64),
        page_size: (width, height),
        text_reach: advance + font_size,
        cull: layout.cull_offpage,
    })
}

fn tile_limit(max_tiles_per_page: usize, larger_side: f64) -> usize {
    let scale = (larger_side / CAP_REFERENCE_SIDE).powi(2).max(1.0);
    let limit = max_tiles_per_page as f64 * scale;
    if limit >= usize::MAX as f64 {
        usize::MAX
    } else {
        limit as usize
    }
}
