use crate::error::WatermarkError;
use crate::font::{FontMetrics, glyph_width_1000, layout_glyphs, parse_face};
use crate::render::{FontResourceHandle, PageSurface, TextInstruction};
use crate::subset::{OutlineKind, SubsetFont};
use crate::types::{PageGeometry, Pt};
use lopdf::content::{Content, Operation};
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject,
    ObjectId as LoObjectId, Stream as LoStream, StringFormat, dictionary,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MAX_INHERITANCE_DEPTH: usize = 64;

fn open_err(err: lopdf::Error) -> WatermarkError {
    WatermarkError::DocumentOpen(format!("pdf load error: {err}"))
}

fn resource_err(err: lopdf::Error) -> WatermarkError {
    WatermarkError::ResourceRegistration(format!("pdf resource error: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub compact: bool,
    pub compress: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compact: true,
            compress: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfPage {
    pub number: u32,
    pub id: LoObjectId,
    pub geometry: PageGeometry,
    font_names: BTreeSet<String>,
    ext_gstate_names: BTreeSet<String>,
}

impl PdfPage {
    pub fn canvas(&self) -> PageCanvas {
        PageCanvas {
            taken_fonts: self.font_names.clone(),
            taken_gstates: self.ext_gstate_names.clone(),
            ..PageCanvas::default()
        }
    }
}

pub struct PdfDocument {
    doc: LoDocument,
    fonts: HashMap<[u8; 32], LoObjectId>,
    ext_gstates: HashMap<u32, LoObjectId>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self, WatermarkError> {
        let doc = LoDocument::load(path).map_err(open_err)?;
        Self::from_lopdf(doc)
    }

    pub fn from_lopdf(doc: LoDocument) -> Result<Self, WatermarkError> {
        if doc.is_encrypted() {
            return Err(WatermarkError::DocumentOpen(
                "document is encrypted".to_string(),
            ));
        }
        if doc.get_pages().is_empty() {
            return Err(WatermarkError::DocumentOpen(
                "document has no pages".to_string(),
            ));
        }
        Ok(Self {
            doc,
            fonts: HashMap::new(),
            ext_gstates: HashMap::new(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    pub fn pages(&self) -> Vec<PdfPage> {
        self.doc
            .get_pages()
            .into_iter()
            .map(|(number, id)| {
                let resources = effective_resources(&self.doc, id);
                PdfPage {
                    number,
                    id,
                    geometry: page_geometry(&self.doc, id),
                    font_names: sub_dict_keys(&self.doc, &resources, b"Font"),
                    ext_gstate_names: sub_dict_keys(&self.doc, &resources, b"ExtGState"),
                }
            })
            .collect()
    }

    pub fn commit(&mut self, page: &PdfPage, encoded: EncodedPage) -> Result<usize, WatermarkError> {
        let body_len = encoded.content().len();
        let EncodedPage {
            binding,
            alphas,
            body,
            ..
        } = encoded;
        let Some(binding) = binding else {
            return Ok(0);
        };
        let font_id = self.embed_font(&binding.font)?;

        let mut resources = effective_resources(&self.doc, page.id);
        let mut fonts = sub_dict(&self.doc, &resources, b"Font");
        fonts.set(binding.resource_name.as_bytes().to_vec(), font_id);
        resources.set("Font", fonts);
        if !alphas.is_empty() {
            let mut states = sub_dict(&self.doc, &resources, b"ExtGState");
            for (name, alpha) in &alphas {
                let state_id = self.ext_gstate(*alpha);
                states.set(name.as_bytes().to_vec(), state_id);
            }
            resources.set("ExtGState", states);
        }

        let existing = self.existing_contents(page.id)?;
        let prefix_id = self
            .doc
            .add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
        let mut suffix = b"\nQ\n".to_vec();
        suffix.extend_from_slice(&body);
        let suffix_id = self.doc.add_object(LoStream::new(dictionary! {}, suffix));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(LoObject::Reference(prefix_id));
        contents.extend(existing);
        contents.push(LoObject::Reference(suffix_id));

        let page_mut = self
            .doc
            .get_object_mut(page.id)
            .and_then(LoObject::as_dict_mut)
            .map_err(resource_err)?;
        page_mut.set("Resources", resources);
        page_mut.set("Contents", contents);
        Ok(body_len)
    }

    // Writes to a temporary sibling and renames it over `path`. On failure
    // the temporary file is removed and `path` is left untouched.
    pub fn save(mut self, path: &Path, options: SaveOptions) -> Result<(), WatermarkError> {
        if options.compact {
            self.doc.prune_objects();
            self.doc.renumber_objects();
        }
        if options.compress {
            self.doc.compress();
        }
        let temp = temp_sibling(path);
        let result = write_document(&mut self.doc, &temp).and_then(|_| {
            fs::rename(&temp, path).map_err(|err| format!("rename failed: {err}"))
        });
        if let Err(message) = result {
            let _ = fs::remove_file(&temp);
            return Err(WatermarkError::Save(format!("{}: {message}", path.display())));
        }
        Ok(())
    }

    fn existing_contents(&self, page_id: LoObjectId) -> Result<Vec<LoObject>, WatermarkError> {
        let page = self
            .doc
            .get_object(page_id)
            .and_then(LoObject::as_dict)
            .map_err(resource_err)?;
        let items = match page.get(b"Contents") {
            Ok(LoObject::Reference(id)) => match self.doc.get_object(*id) {
                Ok(LoObject::Array(items)) => items.clone(),
                _ => vec![LoObject::Reference(*id)],
            },
            Ok(LoObject::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Ok(items)
    }

    fn ext_gstate(&mut self, alpha: f32) -> LoObjectId {
        if let Some(id) = self.ext_gstates.get(&alpha.to_bits()) {
            return *id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => LoObject::Real(alpha),
            "CA" => LoObject::Real(alpha),
        });
        self.ext_gstates.insert(alpha.to_bits(), id);
        id
    }

    fn embed_font(&mut self, font: &SubsetFont) -> Result<LoObjectId, WatermarkError> {
        if let Some(id) = self.fonts.get(font.digest()) {
            return Ok(*id);
        }
        let face = parse_face(font.bytes())
            .map_err(|err| WatermarkError::ResourceRegistration(err.to_string()))?;
        let metrics = FontMetrics::from_face(&face);
        let base_font = format!("{}+{}", font.subset_tag(), metrics.postscript_name);

        let (file_key, file_stream, cid_subtype) = match font.kind() {
            OutlineKind::TrueType => (
                "FontFile2",
                LoStream::new(
                    dictionary! { "Length1" => font.bytes().len() as i64 },
                    font.bytes().to_vec(),
                ),
                "CIDFontType2",
            ),
            OutlineKind::Cff => {
                if version_below(&self.doc.version, 1, 6) {
                    self.doc.version = "1.6".to_string();
                }
                (
                    "FontFile3",
                    LoStream::new(dictionary! { "Subtype" => "OpenType" }, font.bytes().to_vec()),
                    "CIDFontType0",
                )
            }
        };
        let file_id = self.doc.add_object(file_stream);

        let (x0, y0, x1, y1) = metrics.bbox;
        let descriptor_id = self.doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => LoObject::Name(base_font.clone().into_bytes()),
            "Flags" => metrics.flags(),
            "FontBBox" => vec![(x0 as i64).into(), (y0 as i64).into(), (x1 as i64).into(), (y1 as i64).into()],
            "ItalicAngle" => metrics.italic_angle as i64,
            "Ascent" => metrics.ascent as i64,
            "Descent" => metrics.descent as i64,
            "CapHeight" => metrics.cap_height as i64,
            "StemV" => metrics.stem_v as i64,
            "MissingWidth" => metrics.missing_width as i64,
            file_key => file_id,
        });

        let mut widths: BTreeMap<u16, u16> = BTreeMap::new();
        let mut unicode: BTreeMap<u16, String> = BTreeMap::new();
        for (ch, gid) in font.mapped_chars() {
            let code = font.code_for_gid(gid);
            widths.insert(code, glyph_width_1000(&face, gid));
            unicode.entry(code).or_insert_with(|| ch.to_string());
        }
        let mut w_array: Vec<LoObject> = Vec::with_capacity(widths.len() * 2);
        for (code, width) in &widths {
            w_array.push((*code as i64).into());
            w_array.push(vec![LoObject::from(*width as i64)].into());
        }

        let mut cid_font = dictionary! {
            "Type" => "Font",
            "Subtype" => cid_subtype,
            "BaseFont" => LoObject::Name(base_font.clone().into_bytes()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => LoObject::string_literal("Adobe"),
                "Ordering" => LoObject::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => metrics.missing_width as i64,
            "W" => w_array,
        };
        if font.kind() == OutlineKind::TrueType {
            cid_font.set("CIDToGIDMap", "Identity");
        }
        let cid_font_id = self.doc.add_object(cid_font);

        let to_unicode_id = self.doc.add_object(LoStream::new(
            dictionary! {},
            to_unicode_cmap(&unicode).into_bytes(),
        ));
        let type0_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => LoObject::Name(base_font.into_bytes()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![LoObject::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        });
        self.fonts.insert(*font.digest(), type0_id);
        Ok(type0_id)
    }
}

#[derive(Debug, Clone)]
struct FontBinding {
    resource_name: String,
    font: SubsetFont,
}

#[derive(Debug)]
pub struct EncodedPage {
    binding: Option<FontBinding>,
    alphas: Vec<(String, f32)>,
    body: Vec<u8>,
    draws: usize,
}

impl EncodedPage {
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    pub fn draw_count(&self) -> usize {
        self.draws
    }
}

#[derive(Debug, Default)]
pub struct PageCanvas {
    taken_fonts: BTreeSet<String>,
    taken_gstates: BTreeSet<String>,
    binding: Option<FontBinding>,
    alphas: Vec<(String, f32)>,
    runs: HashMap<String, LoObject>,
    operations: Vec<Operation>,
    draws: usize,
    failure: Option<WatermarkError>,
}

impl PageCanvas {
    pub fn draw_count(&self) -> usize {
        self.draws
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn finish(self) -> Result<EncodedPage, WatermarkError> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        let body = Content {
            operations: self.operations,
        }
        .encode()
        .map_err(|err| WatermarkError::ResourceRegistration(format!("content encode error: {err}")))?;
        Ok(EncodedPage {
            binding: self.binding,
            alphas: self.alphas,
            body,
            draws: self.draws,
        })
    }

    fn alpha_state(&mut self, alpha: f32) -> String {
        if let Some((name, _)) = self.alphas.iter().find(|(_, a)| a.to_bits() == alpha.to_bits()) {
            return name.clone();
        }
        let name = unique_name("GSwm", self.alphas.len(), &self.taken_gstates);
        self.taken_gstates.insert(name.clone());
        self.alphas.push((name.clone(), alpha));
        name
    }

    fn glyph_run(&mut self, text: &str) -> Result<LoObject, WatermarkError> {
        if let Some(run) = self.runs.get(text) {
            return Ok(run.clone());
        }
        let binding = self.binding.as_ref().ok_or_else(|| {
            WatermarkError::ResourceRegistration("text drawn before a font was registered".to_string())
        })?;
        let face = parse_face(binding.font.bytes())?;
        let units_per_em = binding.font.units_per_em().max(1) as f32;

        let mut items: Vec<LoObject> = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        for glyph in layout_glyphs(&face, text) {
            if glyph.kern != 0 && !pending.is_empty() {
                items.push(LoObject::String(std::mem::take(&mut pending), StringFormat::Hexadecimal));
                let adjust = -(glyph.kern as f32) * 1000.0 / units_per_em;
                items.push(LoObject::Real(Pt::quantize(adjust)));
            }
            pending.extend_from_slice(&binding.font.code_for_gid(glyph.gid).to_be_bytes());
        }
        if !pending.is_empty() {
            items.push(LoObject::String(pending, StringFormat::Hexadecimal));
        }
        let run = LoObject::Array(items);
        self.runs.insert(text.to_string(), run.clone());
        Ok(run)
    }
}

impl PageSurface for PageCanvas {
    fn register_font(
        &mut self,
        name: &str,
        font: &SubsetFont,
    ) -> Result<FontResourceHandle, WatermarkError> {
        if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(WatermarkError::ResourceRegistration(format!(
                "'{name}' is not a usable resource name"
            )));
        }
        parse_face(font.bytes()).map_err(|err| {
            WatermarkError::ResourceRegistration(format!("subset font rejected: {err}"))
        })?;
        if let Some(binding) = &self.binding {
            if binding.font.digest() == font.digest() {
                return Ok(FontResourceHandle::new(binding.resource_name.clone()));
            }
            return Err(WatermarkError::ResourceRegistration(
                "page canvas already holds a different font".to_string(),
            ));
        }
        let resource_name = if self.taken_fonts.contains(name) {
            unique_name(name, 1, &self.taken_fonts)
        } else {
            name.to_string()
        };
        self.taken_fonts.insert(resource_name.clone());
        self.binding = Some(FontBinding {
            resource_name: resource_name.clone(),
            font: font.clone(),
        });
        Ok(FontResourceHandle::new(resource_name))
    }

    fn draw_text(&mut self, instruction: &TextInstruction<'_>) {
        if self.failure.is_some() {
            return;
        }
        let run = match self.glyph_run(instruction.text) {
            Ok(run) => run,
            Err(err) => {
                self.failure = Some(err);
                return;
            }
        };
        let state = self.alpha_state(instruction.alpha);
        let [a, b, c, d] = instruction.rotation.text_matrix();
        let (x, y) = instruction.origin;
        let color = instruction.color;
        let ops = [
            Operation::new("q", vec![]),
            Operation::new("gs", vec![LoObject::Name(state.into_bytes())]),
            Operation::new("rg", vec![real(color.r as f64), real(color.g as f64), real(color.b as f64)]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    LoObject::Name(instruction.font.name().as_bytes().to_vec()),
                    real(instruction.font_size as f64),
                ],
            ),
            Operation::new("Tm", vec![real(a), real(b), real(c), real(d), real(x), real(y)]),
            Operation::new("TJ", vec![run]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ];
        self.operations.extend(ops);
        self.draws += 1;
    }
}

fn real(value: f64) -> LoObject {
    LoObject::Real(Pt::quantize(value as f32))
}

fn unique_name(base: &str, start: usize, taken: &BTreeSet<String>) -> String {
    let mut n = start;
    loop {
        let candidate = format!("{base}{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn version_below(version: &str, major: u32, minor: u32) -> bool {
    let mut parts = version.trim().split('.');
    let got_major = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let got_minor = parts.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    (got_major, got_minor) < (major, minor)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output.pdf");
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

fn write_document(doc: &mut LoDocument, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|err| format!("create failed: {err}"))?;
    let mut writer = BufWriter::new(file);
    doc.save_to(&mut writer)
        .map_err(|err| format!("write failed: {err}"))?;
    writer.flush().map_err(|err| format!("flush failed: {err}"))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|err| format!("sync failed: {err}"))
}

fn inherited<'a>(doc: &'a LoDocument, page_id: LoObjectId, key: &[u8]) -> Option<&'a LoObject> {
    let mut id = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        id = dict.get(b"Parent").and_then(LoObject::as_reference).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn obj_to_f32(doc: &LoDocument, obj: &LoObject) -> Option<f32> {
    let obj = resolve(doc, obj);
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

fn page_geometry(doc: &LoDocument, page_id: LoObjectId) -> PageGeometry {
    let rotation = inherited(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .unwrap_or(0) as i32;
    let parsed = [b"CropBox".as_slice(), b"MediaBox".as_slice()]
        .into_iter()
        .find_map(|key| {
            let arr = inherited(doc, page_id, key)?.as_array().ok()?;
            parse_box(doc, arr)
        });
    let geometry = match parsed {
        Some((x0, y0, width, height)) => PageGeometry::new(width, height).with_origin(x0, y0),
        None => PageGeometry::letter(),
    };
    geometry.with_rotation(rotation)
}

fn parse_box(doc: &LoDocument, arr: &[LoObject]) -> Option<(f32, f32, f32, f32)> {
    if arr.len() < 4 {
        return None;
    }
    let x0 = obj_to_f32(doc, &arr[0])?;
    let y0 = obj_to_f32(doc, &arr[1])?;
    let x1 = obj_to_f32(doc, &arr[2])?;
    let y1 = obj_to_f32(doc, &arr[3])?;
    let width = (x1 - x0).abs();
    let height = (y1 - y0).abs();
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some((x0.min(x1), y0.min(y1), width, height))
}

fn effective_resources(doc: &LoDocument, page_id: LoObjectId) -> LoDictionary {
    inherited(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_default()
}

fn sub_dict(doc: &LoDocument, resources: &LoDictionary, key: &[u8]) -> LoDictionary {
    match resources.get(key) {
        Ok(obj) => resolve(doc, obj).as_dict().ok().cloned().unwrap_or_default(),
        Err(_) => LoDictionary::new(),
    }
}

fn sub_dict_keys(doc: &LoDocument, resources: &LoDictionary, key: &[u8]) -> BTreeSet<String> {
    sub_dict(doc, resources, key)
        .iter()
        .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
        .collect()
}

fn to_unicode_cmap(glyph_map: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(&u16, &String)> = glyph_map.iter().collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (code, text) in chunk {
            let mut units = String::new();
            for unit in text.encode_utf16() {
                units.push_str(&format!("{unit:04X}"));
            }
            out.push_str(&format!("<{code:04X}> <{units}>\n"));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}
