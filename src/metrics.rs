#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: u32,
    pub render_ms: f64,
    pub tile_count: usize,
    pub content_bytes: usize,
}

/// Outcome of one successful watermarking run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatermarkReport {
    pub pages: Vec<PageMetrics>,
    pub source_font_bytes: usize,
    pub subset_font_bytes: usize,
    pub retained_glyphs: usize,
    pub advance_width: f32,
    pub subset_ms: f64,
    pub total_ms: f64,
}

impl WatermarkReport {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn total_tiles(&self) -> usize {
        self.pages.iter().map(|p| p.tile_count).sum()
    }
}
