use crate::cff;
use crate::error::WatermarkError;
use crate::font::glyph_index_for_char;
use crate::glyph_report::{GlyphCoverageReport, RequiredChars};
use crate::sfnt::{self, HEAD_LOCA_FORMAT_OFFSET, SfntBuilder, SfntTables, Tag};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Tables a subset can never be built without.
const PROTECTED_TABLES: [&Tag; 11] = [
    b"head", b"hhea", b"maxp", b"cmap", b"name", b"post", b"OS/2", b"glyf", b"loca", b"hmtx",
    b"CFF ",
];

const COMPOSITE_ARGS_ARE_WORDS: u16 = 0x0001;
const COMPOSITE_HAVE_SCALE: u16 = 0x0008;
const COMPOSITE_MORE_COMPONENTS: u16 = 0x0020;
const COMPOSITE_HAVE_XY_SCALE: u16 = 0x0040;
const COMPOSITE_HAVE_2X2: u16 = 0x0080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineKind {
    TrueType,
    Cff,
}

#[derive(Debug, Clone)]
pub struct SubsetOptions {
    /// Flatten CFF subroutines into each kept charstring.
    pub desubroutinize: bool,
    /// Extra tables to leave out. Structural tables are kept regardless.
    pub drop_tables: Vec<Tag>,
    pub face_index: u32,
}

impl Default for SubsetOptions {
    fn default() -> Self {
        Self {
            desubroutinize: true,
            drop_tables: Vec::new(),
            face_index: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubsetFont {
    bytes: Arc<[u8]>,
    kind: OutlineKind,
    units_per_em: u16,
    glyph_count: u16,
    retained: Arc<BTreeSet<u16>>,
    char_to_gid: Arc<BTreeMap<char, u16>>,
    coverage: GlyphCoverageReport,
    /// CID per glyph for CID-keyed CFF outlines.
    cids: Option<Arc<Vec<u16>>>,
    digest: [u8; 32],
}

impl SubsetFont {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> OutlineKind {
        self.kind
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    pub fn glyph_count(&self) -> u16 {
        self.glyph_count
    }

    pub fn retained_glyphs(&self) -> &BTreeSet<u16> {
        &self.retained
    }

    pub fn glyph_for_char(&self, ch: char) -> Option<u16> {
        self.char_to_gid.get(&ch).copied()
    }

    pub fn mapped_chars(&self) -> impl Iterator<Item = (char, u16)> + '_ {
        self.char_to_gid.iter().map(|(ch, gid)| (*ch, *gid))
    }

    pub fn coverage(&self) -> &GlyphCoverageReport {
        &self.coverage
    }

    /// Two-byte content stream code selecting `gid` under Identity-H.
    pub fn code_for_gid(&self, gid: u16) -> u16 {
        match &self.cids {
            Some(cids) => cids.get(gid as usize).copied().unwrap_or(0),
            None => gid,
        }
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn subset_tag(&self) -> String {
        self.digest[..6]
            .iter()
            .map(|b| (b'A' + b % 26) as char)
            .collect()
    }
}

pub fn subset_font(
    source: &[u8],
    required: &RequiredChars,
    options: &SubsetOptions,
) -> Result<SubsetFont, WatermarkError> {
    let face = ttf_parser::Face::parse(source, options.face_index)
        .map_err(|err| WatermarkError::FontLoad(format!("unable to parse font: {err}")))?;
    let tables = SfntTables::parse(source, options.face_index)?;

    let kind = if tables.get(b"glyf").is_some() {
        OutlineKind::TrueType
    } else if tables.get(b"CFF ").is_some() {
        OutlineKind::Cff
    } else if tables.get(b"CFF2").is_some() {
        return Err(WatermarkError::FontSubset(
            "CFF2 outlines are not supported".to_string(),
        ));
    } else {
        return Err(WatermarkError::FontLoad(
            "font has no glyf or CFF outlines".to_string(),
        ));
    };

    let mut coverage = GlyphCoverageReport::default();
    let mut char_to_gid = BTreeMap::new();
    for ch in required.all() {
        match glyph_index_for_char(&face, ch) {
            Some(gid) if gid != 0 => {
                char_to_gid.insert(ch, gid);
            }
            _ => coverage.record_missing(ch, required.is_mandatory(ch)),
        }
    }
    if !coverage.missing_mandatory().is_empty() {
        return Err(WatermarkError::FontSubset(format!(
            "font has no glyph for {}",
            coverage.describe_mandatory()
        )));
    }
    if char_to_gid.is_empty() {
        return Err(WatermarkError::FontSubset(
            "no required character maps to a glyph".to_string(),
        ));
    }

    let glyph_count = face.number_of_glyphs();
    let mut keep: BTreeSet<u16> = char_to_gid.values().copied().collect();
    keep.insert(0);

    let mut builder = SfntBuilder::new(tables.sfnt_version);
    for (tag, data) in &tables.tables {
        let protected = PROTECTED_TABLES.contains(&tag);
        if !protected && options.drop_tables.contains(tag) {
            continue;
        }
        builder.push(*tag, data.to_vec());
    }

    let mut cids = None;
    let retained = match kind {
        OutlineKind::TrueType => {
            let head = table(&tables, b"head")?;
            let loca = table(&tables, b"loca")?;
            let glyf = table(&tables, b"glyf")?;
            let long_loca = sfnt::read_i16(head, HEAD_LOCA_FORMAT_OFFSET)? != 0;
            let outlines = subset_glyf(glyf, loca, long_loca, glyph_count, &keep)?;
            if outlines.long_loca != long_loca {
                let mut head = head.to_vec();
                head[HEAD_LOCA_FORMAT_OFFSET..HEAD_LOCA_FORMAT_OFFSET + 2]
                    .copy_from_slice(&(outlines.long_loca as i16).to_be_bytes());
                builder.push(*b"head", head);
            }
            builder.push(*b"glyf", outlines.glyf);
            builder.push(*b"loca", outlines.loca);
            outlines.retained
        }
        OutlineKind::Cff => {
            let cff_table = table(&tables, b"CFF ")?;
            let subset = cff::subset_cff(cff_table, &keep, options.desubroutinize)?;
            cids = cff::cid_map(&subset.data)?.map(Arc::new);
            builder.push(*b"CFF ", subset.data);
            subset.retained
        }
    };

    let bytes = builder.build();
    let check = ttf_parser::Face::parse(&bytes, 0).map_err(|err| {
        WatermarkError::FontSubset(format!("subset font does not parse: {err}"))
    })?;
    if check.number_of_glyphs() != glyph_count {
        return Err(WatermarkError::FontSubset(
            "subset changed the glyph count".to_string(),
        ));
    }
    let units_per_em = check.units_per_em();

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(&bytes));
    Ok(SubsetFont {
        bytes: Arc::from(bytes),
        kind,
        units_per_em,
        glyph_count,
        retained: Arc::new(retained),
        char_to_gid: Arc::new(char_to_gid),
        coverage,
        cids,
        digest,
    })
}

fn table<'a>(tables: &SfntTables<'a>, tag: &Tag) -> Result<&'a [u8], WatermarkError> {
    tables.get(tag).ok_or_else(|| {
        WatermarkError::FontLoad(format!("missing '{}' table", sfnt::tag_str(tag)))
    })
}

struct GlyfSubset {
    glyf: Vec<u8>,
    loca: Vec<u8>,
    long_loca: bool,
    retained: BTreeSet<u16>,
}

fn subset_glyf(
    glyf: &[u8],
    loca: &[u8],
    long_loca: bool,
    glyph_count: u16,
    keep: &BTreeSet<u16>,
) -> Result<GlyfSubset, WatermarkError> {
    let offsets = read_loca(loca, long_loca, glyph_count)?;
    let glyph_data = |gid: u16| -> Result<&[u8], WatermarkError> {
        let start = offsets[gid as usize];
        let end = offsets[gid as usize + 1];
        if end < start || end > glyf.len() {
            return Err(WatermarkError::FontLoad(format!(
                "glyph {gid} has invalid loca bounds"
            )));
        }
        Ok(&glyf[start..end])
    };

    let mut retained = BTreeSet::new();
    let mut work: Vec<u16> = keep
        .iter()
        .copied()
        .filter(|gid| *gid < glyph_count)
        .collect();
    while let Some(gid) = work.pop() {
        if !retained.insert(gid) {
            continue;
        }
        for component in composite_components(glyph_data(gid)?)? {
            if component < glyph_count && !retained.contains(&component) {
                work.push(component);
            }
        }
    }

    let mut long = long_loca;
    loop {
        let align = if long { 4 } else { 2 };
        let mut out = Vec::new();
        let mut new_offsets = Vec::with_capacity(glyph_count as usize + 1);
        for gid in 0..glyph_count {
            new_offsets.push(out.len());
            if retained.contains(&gid) {
                out.extend_from_slice(glyph_data(gid)?);
                while out.len() % align != 0 {
                    out.push(0);
                }
            }
        }
        new_offsets.push(out.len());

        if !long && out.len() / 2 > u16::MAX as usize {
            long = true;
            continue;
        }
        let mut loca_out = Vec::with_capacity(new_offsets.len() * align);
        for offset in new_offsets {
            if long {
                loca_out.extend_from_slice(&(offset as u32).to_be_bytes());
            } else {
                loca_out.extend_from_slice(&((offset / 2) as u16).to_be_bytes());
            }
        }
        return Ok(GlyfSubset {
            glyf: out,
            loca: loca_out,
            long_loca: long,
            retained,
        });
    }
}

fn read_loca(loca: &[u8], long: bool, glyph_count: u16) -> Result<Vec<usize>, WatermarkError> {
    let count = glyph_count as usize + 1;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let offset = if long {
            sfnt::read_u32(loca, i * 4)? as usize
        } else {
            sfnt::read_u16(loca, i * 2)? as usize * 2
        };
        offsets.push(offset);
    }
    Ok(offsets)
}

/// Component glyph IDs of a composite `glyf` entry; empty for simple glyphs.
fn composite_components(glyph: &[u8]) -> Result<Vec<u16>, WatermarkError> {
    if glyph.len() < 10 || sfnt::read_i16(glyph, 0)? >= 0 {
        return Ok(Vec::new());
    }
    let mut components = Vec::new();
    let mut at = 10usize;
    loop {
        let flags = sfnt::read_u16(glyph, at)?;
        components.push(sfnt::read_u16(glyph, at + 2)?);
        at += 4;
        at += if flags & COMPOSITE_ARGS_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & COMPOSITE_HAVE_SCALE != 0 {
            at += 2;
        } else if flags & COMPOSITE_HAVE_XY_SCALE != 0 {
            at += 4;
        } else if flags & COMPOSITE_HAVE_2X2 != 0 {
            at += 8;
        }
        if flags & COMPOSITE_MORE_COMPONENTS == 0 {
            break;
        }
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph_report::collect_required_chars;
    use crate::testing::{TestFont, build_cff_font, CffFixture};

    fn latin_font() -> Vec<u8> {
        TestFont::latin().build()
    }

    #[test]
    fn subset_keeps_glyph_ids_and_cmap() {
        let source = latin_font();
        let required = collect_required_chars("Test 123");
        let subset = subset_font(&source, &required, &SubsetOptions::default()).expect("subset");

        let src_face = ttf_parser::Face::parse(&source, 0).unwrap();
        let face = ttf_parser::Face::parse(subset.bytes(), 0).unwrap();
        assert_eq!(face.number_of_glyphs(), src_face.number_of_glyphs());
        for ch in required.all() {
            let gid = face.glyph_index(ch).expect("mapped");
            assert_eq!(Some(gid), src_face.glyph_index(ch));
            assert_eq!(subset.glyph_for_char(ch), Some(gid.0));
        }
        let src_tables = SfntTables::parse(&source, 0).unwrap();
        let tables = SfntTables::parse(subset.bytes(), 0).unwrap();
        assert_eq!(tables.get(b"cmap"), src_tables.get(b"cmap"));
        assert_eq!(tables.get(b"name"), src_tables.get(b"name"));
        assert_eq!(tables.tables.len(), src_tables.tables.len());
    }

    #[test]
    fn subset_is_smaller_and_drops_unused_outlines() {
        let source = latin_font();
        let required = collect_required_chars("T");
        let subset = subset_font(&source, &required, &SubsetOptions::default()).expect("subset");
        assert!(subset.bytes().len() < source.len());

        let face = ttf_parser::Face::parse(subset.bytes(), 0).unwrap();
        let unused = face.glyph_index('Z').expect("cmap still maps Z");
        assert!(!subset.retained_glyphs().contains(&unused.0));
        assert!(face.glyph_bounding_box(unused).is_none());
        let kept = face.glyph_index('T').unwrap();
        assert!(face.glyph_bounding_box(kept).is_some());
        assert!(subset.retained_glyphs().contains(&0));
    }

    #[test]
    fn composite_components_are_retained() {
        let mut font = TestFont::latin();
        let base = font.gid_for('e');
        let accent = font.gid_for('-');
        font.add_composite('é', &[base, accent]);
        let source = font.build();
        let required = collect_required_chars("é");
        let subset = subset_font(&source, &required, &SubsetOptions::default()).expect("subset");
        assert!(subset.retained_glyphs().contains(&base));
        assert!(subset.retained_glyphs().contains(&accent));
        let face = ttf_parser::Face::parse(subset.bytes(), 0).unwrap();
        assert!(face.glyph_bounding_box(ttf_parser::GlyphId(base)).is_some());
    }

    #[test]
    fn missing_text_glyph_is_a_subset_error() {
        let source = latin_font();
        let required = collect_required_chars("机密");
        let err = subset_font(&source, &required, &SubsetOptions::default()).expect_err("cjk");
        match err {
            WatermarkError::FontSubset(message) => assert!(message.contains("U+673A")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_baseline_glyphs_are_tolerated() {
        let source = TestFont::with_chars("AB").build();
        let required = collect_required_chars("AB");
        let subset = subset_font(&source, &required, &SubsetOptions::default()).expect("subset");
        assert!(!subset.coverage().is_empty());
        assert!(subset.coverage().missing_mandatory().is_empty());
    }

    #[test]
    fn garbage_bytes_are_a_load_error() {
        let required = collect_required_chars("a");
        let err = subset_font(b"not a font", &required, &SubsetOptions::default())
            .expect_err("garbage");
        assert!(matches!(err, WatermarkError::FontLoad(_)));
    }

    #[test]
    fn drop_tables_never_removes_structural_tables() {
        let source = latin_font();
        let required = collect_required_chars("T");
        let options = SubsetOptions {
            drop_tables: vec![*b"cmap", *b"kern"],
            ..SubsetOptions::default()
        };
        let subset = subset_font(&source, &required, &options).expect("subset");
        let tables = SfntTables::parse(subset.bytes(), 0).unwrap();
        assert!(tables.get(b"cmap").is_some());
        assert!(tables.get(b"kern").is_none());
    }

    #[test]
    fn cff_fonts_subset_with_flattened_charstrings() {
        let fixture = CffFixture::subroutinized();
        let source = build_cff_font(&fixture, &[('A', 1), ('B', 2)]);
        let required = collect_required_chars("A");
        let subset = subset_font(&source, &required, &SubsetOptions::default()).expect("subset");
        assert_eq!(subset.kind(), OutlineKind::Cff);
        assert_eq!(subset.glyph_for_char('A'), Some(1));
        assert!(subset.retained_glyphs().contains(&1));
        assert!(!subset.retained_glyphs().contains(&2));
        assert_eq!(subset.glyph_count(), fixture.glyphs.len() as u16);
    }

    #[test]
    fn digest_and_tag_are_stable() {
        let source = latin_font();
        let required = collect_required_chars("Test");
        let a = subset_font(&source, &required, &SubsetOptions::default()).unwrap();
        let b = subset_font(&source, &required, &SubsetOptions::default()).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.subset_tag().len(), 6);
        assert!(a.subset_tag().chars().all(|c| c.is_ascii_uppercase()));
    }
}
