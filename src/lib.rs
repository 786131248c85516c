mod cff;
mod debug;
mod error;
mod ffi;
mod font;
mod glyph_report;
mod grid;
mod metrics;
mod pdf;
mod perf;
#[cfg(feature = "python")]
mod python;
mod render;
mod sfnt;
mod subset;
#[cfg(test)]
mod testing;
mod types;

use debug::DebugLogger;
pub use error::{WatermarkError, status};
pub use ffi::tilemark_add_watermark;
pub use font::{PlacedGlyph, TextMetrics};
pub use glyph_report::{
    BASELINE_CHARS, GlyphCoverageReport, MissingGlyph, RequiredChars, collect_required_chars,
};
pub use grid::{Rotation, TileGrid, TileLayout, TilePoints, plan_tile_grid};
pub use metrics::{PageMetrics, WatermarkReport};
pub use pdf::{EncodedPage, PageCanvas, PdfDocument, PdfPage, SaveOptions};
use perf::PerfLogger;
pub use render::{FontResourceHandle, PageRenderSummary, PageSurface, TextInstruction, render_page};
pub use sfnt::Tag;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
pub use subset::{OutlineKind, SubsetFont, SubsetOptions, subset_font};
pub use types::{Color, PageGeometry, Pt, WatermarkSpec};

pub const DEFAULT_FONT_RESOURCE: &str = "WmF";

pub struct Watermarker {
    layout: TileLayout,
    subset_options: SubsetOptions,
    save_options: SaveOptions,
    parallel: bool,
    font_resource_name: String,
    text_metrics: TextMetrics,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

pub struct WatermarkerBuilder {
    layout: TileLayout,
    subset_options: SubsetOptions,
    save_options: SaveOptions,
    parallel: bool,
    font_resource_name: String,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

struct DrawnPage {
    encoded: EncodedPage,
    tiles: usize,
    render_ms: f64,
}

impl Default for WatermarkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkerBuilder {
    pub fn new() -> Self {
        Self {
            layout: TileLayout::default(),
            subset_options: SubsetOptions::default(),
            save_options: SaveOptions::default(),
            parallel: true,
            font_resource_name: DEFAULT_FONT_RESOURCE.to_string(),
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn layout(mut self, layout: TileLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn gap(mut self, gap: f32) -> Self {
        self.layout.gap = gap;
        self
    }

    pub fn line_factor(mut self, factor: f32) -> Self {
        self.layout.line_factor = factor;
        self
    }

    pub fn overscan(mut self, overscan: f32) -> Self {
        self.layout.overscan = overscan;
        self
    }

    pub fn max_tiles_per_page(mut self, max: usize) -> Self {
        self.layout.max_tiles_per_page = max;
        self
    }

    pub fn cull_offpage_tiles(mut self, enabled: bool) -> Self {
        self.layout.cull_offpage = enabled;
        self
    }

    pub fn compensate_page_rotation(mut self, enabled: bool) -> Self {
        self.layout.compensate_page_rotation = enabled;
        self
    }

    pub fn subset_options(mut self, options: SubsetOptions) -> Self {
        self.subset_options = options;
        self
    }

    pub fn desubroutinize(mut self, enabled: bool) -> Self {
        self.subset_options.desubroutinize = enabled;
        self
    }

    pub fn drop_table(mut self, tag: Tag) -> Self {
        if !self.subset_options.drop_tables.contains(&tag) {
            self.subset_options.drop_tables.push(tag);
        }
        self
    }

    pub fn face_index(mut self, index: u32) -> Self {
        self.subset_options.face_index = index;
        self
    }

    pub fn save_options(mut self, options: SaveOptions) -> Self {
        self.save_options = options;
        self
    }

    // Plan and draw pages on the rayon pool. Commit and save stay sequential.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn font_resource_name(mut self, name: impl Into<String>) -> Self {
        self.font_resource_name = name.into();
        self
    }

    // JSONL event log: subset sizes, missing glyphs, per-page tiles, errors.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    // Per-span timings; a `_hot.log` summary is written next to it on drop.
    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Watermarker, WatermarkError> {
        let name = &self.font_resource_name;
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(WatermarkError::ResourceRegistration(format!(
                "'{name}' is not a usable font resource name"
            )));
        }
        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(Arc::new(PerfLogger::new(path)?)),
            None => None,
        };
        Ok(Watermarker {
            layout: self.layout,
            subset_options: self.subset_options,
            save_options: self.save_options,
            parallel: self.parallel,
            font_resource_name: self.font_resource_name,
            text_metrics: TextMetrics::new(),
            debug,
            perf,
        })
    }
}

impl Watermarker {
    pub fn builder() -> WatermarkerBuilder {
        WatermarkerBuilder::new()
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    // Watermarks every page of `input` and writes the result to `output`.
    // The `WatermarkSpec` is validated before any file is touched. `output` is only
    // written once every page has been drawn, and is never left half written.
    pub fn watermark(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        font: impl AsRef<Path>,
        spec: &WatermarkSpec,
    ) -> Result<WatermarkReport, WatermarkError> {
        let result = self.run(input.as_ref(), output.as_ref(), font.as_ref(), spec);
        if let Some(debug) = &self.debug {
            if let Err(err) = &result {
                debug.log_error("watermark", &err.to_string());
            }
            debug.emit_summary("watermark");
            debug.flush();
        }
        if let Some(perf) = &self.perf {
            perf.flush();
        }
        result
    }

    fn run(
        &self,
        input: &Path,
        output: &Path,
        font_path: &Path,
        spec: &WatermarkSpec,
    ) -> Result<WatermarkReport, WatermarkError> {
        let started = Instant::now();
        let perf = self.perf.as_deref();
        let spec = spec.normalized()?;
        if !input.is_file() {
            return Err(WatermarkError::InputNotFound(input.to_path_buf()));
        }
        let source = read_font(font_path)?;

        let required = collect_required_chars(&spec.text);
        let (subset, subset_ms) = perf::timed(perf, "font.subset", None, || {
            subset_font(&source, &required, &self.subset_options)
        });
        let subset = subset?;
        if let Some(debug) = &self.debug {
            debug.log_subset(source.len(), subset.bytes().len(), subset.retained_glyphs().len());
            for missing in subset.coverage().missing() {
                debug.log_missing_glyph(missing.ch, missing.mandatory);
            }
        }
        let advance = self
            .text_metrics
            .measure(&subset, &spec.text, spec.font_size)?;

        let (document, _) = perf::timed(perf, "pdf.open", None, || PdfDocument::open(input));
        let mut document = document?;
        let pages = document.pages();

        // At most `batch` drawn pages are held before they are committed.
        let batch = if self.parallel {
            rayon::current_num_threads().max(1) * 2
        } else {
            1
        };
        let mut page_metrics = Vec::with_capacity(pages.len());
        for chunk in pages.chunks(batch) {
            let drawn: Vec<Result<DrawnPage, WatermarkError>> = if self.parallel {
                use rayon::prelude::*;
                chunk
                    .par_iter()
                    .map(|page| self.draw_page(page, &subset, &spec, advance))
                    .collect()
            } else {
                chunk
                    .iter()
                    .map(|page| self.draw_page(page, &subset, &spec, advance))
                    .collect()
            };

            for (page, drawn) in chunk.iter().zip(drawn) {
                let drawn = drawn?;
                let (content_bytes, _) = perf::timed(perf, "page.commit", Some(page.number), || {
                    document.commit(page, drawn.encoded)
                });
                let content_bytes = content_bytes?;
                if let Some(debug) = &self.debug {
                    debug.log_page(
                        page.number,
                        page.geometry.width.to_f32(),
                        page.geometry.height.to_f32(),
                        drawn.tiles,
                    );
                }
                page_metrics.push(PageMetrics {
                    page_number: page.number,
                    render_ms: drawn.render_ms,
                    tile_count: drawn.tiles,
                    content_bytes,
                });
            }
        }

        let (saved, _) = perf::timed(perf, "pdf.save", None, || {
            document.save(output, self.save_options)
        });
        saved?;

        Ok(WatermarkReport {
            pages: page_metrics,
            source_font_bytes: source.len(),
            subset_font_bytes: subset.bytes().len(),
            retained_glyphs: subset.retained_glyphs().len(),
            advance_width: advance.to_f32(),
            subset_ms,
            total_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn draw_page(
        &self,
        page: &PdfPage,
        font: &SubsetFont,
        spec: &WatermarkSpec,
        advance: Pt,
    ) -> Result<DrawnPage, WatermarkError> {
        let (drawn, render_ms) =
            perf::timed(self.perf.as_deref(), "page.render", Some(page.number), || {
                let grid = plan_tile_grid(&page.geometry, spec, advance, &self.layout)?;
                let mut canvas = page.canvas();
                render_page(&mut canvas, &self.font_resource_name, font, &grid, spec)?;
                canvas.finish()
            });
        let encoded = drawn?;
        Ok(DrawnPage {
            tiles: encoded.draw_count(),
            encoded,
            render_ms,
        })
    }
}

fn read_font(path: &Path) -> Result<Vec<u8>, WatermarkError> {
    if !path.is_file() {
        return Err(WatermarkError::FontNotFound(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|err| {
        WatermarkError::FontLoad(format!("unable to read {}: {err}", path.display()))
    })
}

pub fn add_watermark(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    font: impl AsRef<Path>,
    author: &str,
    date: &str,
) -> i32 {
    let spec = WatermarkSpec::for_author(author, date);
    match watermark(input, output, font, &spec) {
        Ok(_) => status::OK,
        Err(err) => err.status_code(),
    }
}

pub fn watermark(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    font: impl AsRef<Path>,
    spec: &WatermarkSpec,
) -> Result<WatermarkReport, WatermarkError> {
    Watermarker::builder()
        .build()?
        .watermark(input, output, font, spec)
}
