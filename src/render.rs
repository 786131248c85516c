use crate::error::WatermarkError;
use crate::grid::{Rotation, TileGrid};
use crate::subset::SubsetFont;
use crate::types::{Color, WatermarkSpec};

/// Name under which a font is bound in a page's `/Font` resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontResourceHandle(String);

impl FontResourceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// One positioned, rotated, alpha-blended run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextInstruction<'a> {
    /// Insertion point in page space, already rotated.
    pub origin: (f64, f64),
    pub text: &'a str,
    pub font: &'a FontResourceHandle,
    pub font_size: f32,
    /// Applied to the glyphs around `origin`.
    pub rotation: Rotation,
    pub color: Color,
    pub alpha: f32,
}

/// Drawing target for one page.
pub trait PageSurface {
    /// Binds `font` into this page's own resources. Must succeed before any
    /// instruction references the returned handle.
    fn register_font(
        &mut self,
        name: &str,
        font: &SubsetFont,
    ) -> Result<FontResourceHandle, WatermarkError>;

    fn draw_text(&mut self, instruction: &TextInstruction<'_>);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRenderSummary {
    pub tiles: usize,
}

pub fn render_page<S: PageSurface + ?Sized>(
    surface: &mut S,
    resource_name: &str,
    font: &SubsetFont,
    grid: &TileGrid,
    spec: &WatermarkSpec,
) -> Result<PageRenderSummary, WatermarkError> {
    let handle = surface.register_font(resource_name, font)?;
    let mut tiles = 0usize;
    for origin in grid.placements() {
        surface.draw_text(&TextInstruction {
            origin,
            text: &spec.text,
            font: &handle,
            font_size: spec.font_size,
            rotation: grid.rotation,
            color: spec.color,
            alpha: spec.opacity,
        });
        tiles += 1;
    }
    Ok(PageRenderSummary { tiles })
}
