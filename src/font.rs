use crate::error::WatermarkError;
use crate::subset::SubsetFont;
use crate::types::Pt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use ttf_parser::GlyphId;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_digest: [u8; 32],
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct TextMetrics {
    cache: Mutex<TextWidthCache>,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TextMetrics {
    pub fn new() -> Self {
        Self::with_capacity(4_096)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(TextWidthCache::new(max_entries.max(1))),
        }
    }

    pub fn measure(&self, font: &SubsetFont, text: &str, font_size: f32) -> Result<Pt, WatermarkError> {
        let key = TextWidthKey {
            font_digest: *font.digest(),
            size_milli: Pt::from_f32(font_size).to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
        }

        let face = parse_face(font.bytes())?;
        let total_units: i64 = layout_glyphs(&face, text)
            .iter()
            .map(|glyph| glyph.advance as i64 + glyph.kern as i64)
            .sum();
        let units_per_em = font.units_per_em().max(1) as i64;
        let width = if total_units <= 0 {
            Pt::ZERO
        } else {
            Pt::from_f32(font_size).mul_ratio(total_units, units_per_em)
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, width);
        }
        Ok(width)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|cache| cache.map.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedGlyph {
    pub ch: char,
    pub gid: u16,
    pub advance: u16,
    pub kern: i16,
}

pub(crate) fn parse_face(data: &[u8]) -> Result<ttf_parser::Face<'_>, WatermarkError> {
    ttf_parser::Face::parse(data, 0)
        .map_err(|err| WatermarkError::FontLoad(format!("unable to parse font: {err}")))
}

// Maps `text` through the cmap one character at a time. Control characters
// are skipped; unmapped characters fall back to `.notdef`.
pub(crate) fn layout_glyphs(face: &ttf_parser::Face<'_>, text: &str) -> Vec<PlacedGlyph> {
    let kern_subtables = kern_subtables(face);
    let mut out = Vec::with_capacity(text.len());
    let mut prev: Option<u16> = None;
    for ch in text.chars().filter(|ch| !ch.is_control()) {
        let gid = glyph_index_for_char(face, ch).unwrap_or(0);
        let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
        let mut kern: i32 = 0;
        if let Some(prev_gid) = prev {
            for sub in &kern_subtables {
                if let Some(v) = sub.glyphs_kerning(GlyphId(prev_gid), GlyphId(gid)) {
                    kern = kern.saturating_add(v as i32);
                }
            }
        }
        out.push(PlacedGlyph {
            ch,
            gid,
            advance,
            kern: kern.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        });
        prev = Some(gid);
    }
    out
}

fn kern_subtables<'a>(face: &ttf_parser::Face<'a>) -> Vec<ttf_parser::kern::Subtable<'a>> {
    let Some(kern) = face.tables().kern else {
        return Vec::new();
    };
    kern.subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.has_cross_stream && !s.has_state_machine)
        .collect()
}

pub(crate) fn glyph_index_for_char(face: &ttf_parser::Face<'_>, ch: char) -> Option<u16> {
    if let Some(id) = face.glyph_index(ch) {
        return Some(id.0);
    }
    let (_, fallback) = select_symbol_subtable(face);
    let subtable = fallback?;
    let codepoint = ch as u32;
    subtable
        .glyph_index(codepoint)
        .or_else(|| subtable.glyph_index(codepoint + 0xF000))
        .map(|id| id.0)
}

fn select_symbol_subtable<'a>(
    face: &ttf_parser::Face<'a>,
) -> (bool, Option<ttf_parser::cmap::Subtable<'a>>) {
    let Some(cmap) = face.tables().cmap else {
        return (false, None);
    };
    let mut first = None;
    let mut symbol = None;
    let mut has_unicode = false;
    for subtable in cmap.subtables {
        if first.is_none() {
            first = Some(subtable);
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            symbol = Some(subtable);
        }
        if subtable.is_unicode() {
            has_unicode = true;
        }
    }
    if has_unicode {
        (false, None)
    } else {
        (symbol.is_some(), symbol.or(first))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FontMetrics {
    pub(crate) postscript_name: String,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) stem_v: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
    pub(crate) symbolic: bool,
}

impl FontMetrics {
    pub(crate) fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let (symbolic, _) = select_symbol_subtable(face);

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);
        let missing_width = face
            .glyph_hor_advance(GlyphId(0))
            .map(|adv| scale_u16(adv, units_per_em))
            .unwrap_or(0);

        Self {
            postscript_name: font_name(face),
            ascent,
            descent,
            cap_height,
            italic_angle,
            stem_v: 80,
            bbox,
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
            symbolic,
        }
    }

    pub(crate) fn flags(&self) -> i64 {
        let mut flags = if self.symbolic { 4 } else { 32 };
        if self.is_fixed_pitch {
            flags |= 1;
        }
        if self.italic_angle != 0 {
            flags |= 64;
        }
        flags
    }
}

pub(crate) fn glyph_width_1000(face: &ttf_parser::Face<'_>, gid: u16) -> u16 {
    let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
    scale_u16(advance, face.units_per_em())
}

fn scale_u16(value: u16, units_per_em: u16) -> u16 {
    let units = units_per_em.max(1) as i64;
    let scaled = ((value as i64) * 1000 + (units / 2)) / units;
    scaled.clamp(0, u16::MAX as i64) as u16
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_name(face: &ttf_parser::Face<'_>) -> String {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }
    let primary = post
        .or(full)
        .or(family)
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    let sanitized: String = primary
        .chars()
        .filter(|ch| ch.is_ascii_graphic() && !"()<>[]{}/%#".contains(*ch))
        .collect();
    if sanitized.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        sanitized
    }
}
