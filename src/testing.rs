//! Synthetic fonts and documents shared by the unit tests.

use crate::sfnt::SfntBuilder;
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const UNITS_PER_EM: u16 = 1000;
const ADVANCE: u16 = 500;
const LATIN: &str =
    " !,-.0123456789:ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique path in the system temp dir. The path itself is not created.
pub(crate) fn temp_path(tag: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "tilemark_{tag}_{}_{}_{seq}.{ext}",
        std::process::id(),
        nanos
    ))
}

/// Writes a PDF with one page per `(width, height)` MediaBox.
pub(crate) fn make_pdf(path: &Path, sizes: &[(f32, f32)]) {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<LoObject> = Vec::with_capacity(sizes.len());
    for (width, height) in sizes {
        let content_id = doc.add_object(LoStream::new(
            dictionary! {},
            b"0 0 m 10 10 l S".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), LoObject::Real(*width), LoObject::Real(*height)],
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save fixture pdf");
}

#[derive(Debug, Clone)]
struct TestGlyph {
    ch: Option<char>,
    components: Vec<u16>,
}

/// TrueType font builder. Every glyph advances 500 of 1000 units; outlines
/// are a single box except for the space and composite glyphs.
#[derive(Debug, Clone)]
pub(crate) struct TestFont {
    glyphs: Vec<TestGlyph>,
    kern_pairs: Vec<(u16, u16, i16)>,
}

impl TestFont {
    pub fn latin() -> Self {
        Self::with_chars(LATIN)
    }

    pub fn with_chars(chars: &str) -> Self {
        let mut glyphs = vec![TestGlyph {
            ch: None,
            components: Vec::new(),
        }];
        glyphs.extend(chars.chars().map(|ch| TestGlyph {
            ch: Some(ch),
            components: Vec::new(),
        }));
        Self {
            glyphs,
            kern_pairs: Vec::new(),
        }
    }

    pub fn gid_for(&self, ch: char) -> u16 {
        self.glyphs
            .iter()
            .position(|g| g.ch == Some(ch))
            .expect("character in test font") as u16
    }

    pub fn add_composite(&mut self, ch: char, components: &[u16]) {
        self.glyphs.push(TestGlyph {
            ch: Some(ch),
            components: components.to_vec(),
        });
    }

    pub fn add_kern_pair(&mut self, left: u16, right: u16, value: i16) {
        self.kern_pairs.push((left, right, value));
    }

    pub fn build(&self) -> Vec<u8> {
        let count = self.glyphs.len() as u16;
        let mut glyf = Vec::new();
        let mut loca = Vec::new();
        for glyph in &self.glyphs {
            loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());
            if !glyph.components.is_empty() {
                glyf.extend(composite_glyph(&glyph.components));
            } else if glyph.ch != Some(' ') {
                glyf.extend(box_glyph());
            }
            while glyf.len() % 4 != 0 {
                glyf.push(0);
            }
        }
        loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());

        let mapping: Vec<(u32, u16)> = self
            .glyphs
            .iter()
            .enumerate()
            .filter_map(|(gid, g)| g.ch.map(|ch| (ch as u32, gid as u16)))
            .collect();

        let mut builder = SfntBuilder::new(0x0001_0000);
        builder.push(*b"head", head_table(1));
        builder.push(*b"hhea", hhea_table(count));
        builder.push(*b"maxp", maxp_table(count, true));
        builder.push(*b"OS/2", os2_table());
        builder.push(*b"hmtx", hmtx_table(count));
        builder.push(*b"cmap", cmap_table(&mapping));
        builder.push(*b"loca", loca);
        builder.push(*b"glyf", glyf);
        builder.push(*b"name", name_table());
        builder.push(*b"post", post_table());
        if !self.kern_pairs.is_empty() {
            builder.push(*b"kern", kern_table(&self.kern_pairs));
        }
        builder.build()
    }
}

fn box_glyph() -> Vec<u8> {
    let mut out = Vec::new();
    for v in [1i16, 100, 0, 400, 700] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&3u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&[1, 1, 1, 1]);
    for dx in [100i16, 300, 0, -300] {
        out.extend_from_slice(&dx.to_be_bytes());
    }
    for dy in [0i16, 0, 700, 0] {
        out.extend_from_slice(&dy.to_be_bytes());
    }
    out
}

fn composite_glyph(components: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in [-1i16, 100, 0, 400, 700] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    for (idx, gid) in components.iter().enumerate() {
        // ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES, plus MORE_COMPONENTS.
        let mut flags: u16 = 0x0003;
        if idx + 1 < components.len() {
            flags |= 0x0020;
        }
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&gid.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
    }
    out
}

fn head_table(loca_format: i16) -> Vec<u8> {
    let mut out = Vec::with_capacity(54);
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
    out.extend_from_slice(&0x000Bu16.to_be_bytes());
    out.extend_from_slice(&UNITS_PER_EM.to_be_bytes());
    out.extend_from_slice(&[0; 16]);
    for v in [100i16, 0, 400, 700] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&8u16.to_be_bytes());
    out.extend_from_slice(&2i16.to_be_bytes());
    out.extend_from_slice(&loca_format.to_be_bytes());
    out.extend_from_slice(&0i16.to_be_bytes());
    out
}

fn hhea_table(metrics: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
    for v in [800i16, -200, 0] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&ADVANCE.to_be_bytes());
    for v in [100i16, 100, 400, 1, 0, 0, 0, 0, 0, 0, 0] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&metrics.to_be_bytes());
    out
}

fn maxp_table(glyphs: u16, truetype: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if truetype {
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        out.extend_from_slice(&glyphs.to_be_bytes());
        out.extend_from_slice(&[0; 26]);
    } else {
        out.extend_from_slice(&0x0000_5000u32.to_be_bytes());
        out.extend_from_slice(&glyphs.to_be_bytes());
    }
    out
}

fn hmtx_table(glyphs: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(glyphs as usize * 4);
    for _ in 0..glyphs {
        out.extend_from_slice(&ADVANCE.to_be_bytes());
        out.extend_from_slice(&100i16.to_be_bytes());
    }
    out
}

fn os2_table() -> Vec<u8> {
    let mut out = vec![0u8; 96];
    let mut put = |at: usize, v: i16| out[at..at + 2].copy_from_slice(&v.to_be_bytes());
    put(0, 4);
    put(2, ADVANCE as i16);
    put(4, 400);
    put(6, 5);
    put(62, 0x40);
    put(64, 0x20);
    put(66, 0x7A);
    put(68, 800);
    put(70, -200);
    put(74, 800);
    put(76, 200);
    put(86, 500);
    put(88, 700);
    out
}

fn post_table() -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&0x0003_0000u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(-100i16).to_be_bytes());
    out.extend_from_slice(&50i16.to_be_bytes());
    out.extend_from_slice(&[0; 20]);
    out
}

fn name_table() -> Vec<u8> {
    let records: [(u16, &str); 4] = [
        (1, "Tilemark Test"),
        (2, "Regular"),
        (4, "Tilemark Test Regular"),
        (6, "TilemarkTest-Regular"),
    ];
    let mut strings = Vec::new();
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    out.extend_from_slice(&(6 + 12 * records.len() as u16).to_be_bytes());
    for (name_id, text) in records {
        let encoded: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        for v in [3u16, 1, 0x0409, name_id, encoded.len() as u16, strings.len() as u16] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        strings.extend(encoded);
    }
    out.extend(strings);
    out
}

/// Windows Unicode BMP cmap with one format 4 segment per character.
fn cmap_table(mapping: &[(u32, u16)]) -> Vec<u8> {
    let mut mapping: Vec<(u16, u16)> = mapping
        .iter()
        .map(|(code, gid)| (*code as u16, *gid))
        .collect();
    mapping.sort_unstable();
    let mut segments: Vec<(u16, u16)> = mapping
        .iter()
        .map(|(code, gid)| (*code, gid.wrapping_sub(*code)))
        .collect();
    segments.push((0xFFFF, 1));

    let seg_count = segments.len() as u16;
    let mut entry_selector = 0u16;
    while (1u32 << (entry_selector + 1)) <= seg_count as u32 {
        entry_selector += 1;
    }
    let search_range = 2 * (1u16 << entry_selector);
    let range_shift = 2 * seg_count - search_range;

    let mut sub = Vec::new();
    for v in [
        4u16,
        16 + 8 * seg_count,
        0,
        2 * seg_count,
        search_range,
        entry_selector,
        range_shift,
    ] {
        sub.extend_from_slice(&v.to_be_bytes());
    }
    for (code, _) in &segments {
        sub.extend_from_slice(&code.to_be_bytes());
    }
    sub.extend_from_slice(&0u16.to_be_bytes());
    for (code, _) in &segments {
        sub.extend_from_slice(&code.to_be_bytes());
    }
    for (_, delta) in &segments {
        sub.extend_from_slice(&delta.to_be_bytes());
    }
    for _ in &segments {
        sub.extend_from_slice(&0u16.to_be_bytes());
    }

    let mut out = Vec::new();
    for v in [0u16, 1, 3, 1] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&12u32.to_be_bytes());
    out.extend(sub);
    out
}

/// Version 0 `kern` table with a single horizontal format 0 subtable.
fn kern_table(pairs: &[(u16, u16, i16)]) -> Vec<u8> {
    let mut pairs = pairs.to_vec();
    pairs.sort_by_key(|(l, r, _)| ((*l as u32) << 16) | *r as u32);
    let n = pairs.len() as u16;
    let mut entry_selector = 0u16;
    while (1u32 << (entry_selector + 1)) <= n as u32 {
        entry_selector += 1;
    }
    let search_range = 6 * (1u16 << entry_selector);
    let range_shift = (6 * n).saturating_sub(search_range);

    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(14 + 6 * n).to_be_bytes());
    out.push(0);
    out.push(1);
    for v in [n, search_range, entry_selector, range_shift] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    for (left, right, value) in pairs {
        out.extend_from_slice(&left.to_be_bytes());
        out.extend_from_slice(&right.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

/// Hand-assembled CFF program with the charstrings it should flatten to.
#[derive(Debug, Clone)]
pub(crate) struct CffFixture {
    pub glyphs: Vec<Vec<u8>>,
    pub global_subrs: Vec<Vec<u8>>,
    /// Local subrs per font dict; name-keyed fonts have exactly one set.
    pub local_subrs: Vec<Vec<Vec<u8>>>,
    /// SIDs, or CIDs for CID-keyed fonts, indexed by glyph ID.
    pub charset: Vec<u16>,
    pub cids: Vec<u16>,
    pub fd_select: Option<Vec<u8>>,
    flat: Vec<Vec<u8>>,
}

impl CffFixture {
    /// Glyphs calling one local and one global subr (bias 107, index byte 32).
    pub fn subroutinized() -> Self {
        Self {
            glyphs: vec![
                vec![149, 149, 21, 32, 10, 14],
                vec![189, 139, 21, 32, 29, 32, 10, 14],
                vec![139, 139, 21, 32, 10, 14],
                vec![139, 139, 21, 159, 139, 5, 14],
            ],
            global_subrs: vec![vec![139, 159, 5, 11]],
            local_subrs: vec![vec![vec![149, 149, 5, 11]]],
            charset: vec![0, 34, 35, 36],
            cids: Vec::new(),
            fd_select: None,
            flat: vec![
                vec![149, 149, 21, 149, 149, 5, 14],
                vec![189, 139, 21, 139, 159, 5, 149, 149, 5, 14],
                vec![139, 139, 21, 149, 149, 5, 14],
                vec![139, 139, 21, 159, 139, 5, 14],
            ],
        }
    }

    /// `A`, `acute` and an `Aacute` built with `0 0 65 194 endchar`.
    pub fn with_seac() -> Self {
        let glyphs = vec![
            vec![14],
            vec![139, 139, 21, 149, 139, 5, 14],
            vec![139, 189, 21, 149, 139, 5, 14],
            vec![139, 139, 204, 247, 86, 14],
        ];
        Self {
            flat: glyphs.clone(),
            glyphs,
            global_subrs: Vec::new(),
            local_subrs: vec![Vec::new()],
            charset: vec![0, 34, 125, 200],
            cids: Vec::new(),
            fd_select: None,
        }
    }

    /// Two font dicts whose local subr 0 draws different lines.
    pub fn cid_keyed() -> Self {
        let cids = vec![0, 10, 20, 21];
        Self {
            glyphs: vec![
                vec![14],
                vec![139, 139, 21, 32, 10, 14],
                vec![139, 139, 21, 32, 10, 14],
                vec![139, 139, 21, 32, 29, 14],
            ],
            global_subrs: vec![vec![139, 159, 5, 11]],
            local_subrs: vec![vec![vec![149, 149, 5, 11]], vec![vec![159, 159, 5, 11]]],
            charset: cids.clone(),
            cids,
            fd_select: Some(vec![0, 0, 1, 1]),
            flat: vec![
                vec![14],
                vec![139, 139, 21, 149, 149, 5, 14],
                vec![139, 139, 21, 159, 159, 5, 14],
                vec![139, 139, 21, 139, 159, 5, 14],
            ],
        }
    }

    pub fn flattened(&self, gid: usize) -> Vec<u8> {
        self.flat[gid].clone()
    }
}

fn cff_index(items: &[Vec<u8>]) -> Vec<u8> {
    if items.is_empty() {
        return vec![0, 0];
    }
    let total: usize = items.iter().map(Vec::len).sum();
    let off_size = if total + 1 <= 0xff { 1 } else { 2 };
    let mut out = Vec::new();
    out.extend_from_slice(&(items.len() as u16).to_be_bytes());
    out.push(off_size as u8);
    let mut offset = 1usize;
    let mut offsets = vec![offset];
    for item in items {
        offset += item.len();
        offsets.push(offset);
    }
    for value in offsets {
        let bytes = (value as u32).to_be_bytes();
        out.extend_from_slice(&bytes[4 - off_size..]);
    }
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn int5(value: usize) -> [u8; 5] {
    let b = (value as i32).to_be_bytes();
    [29, b[0], b[1], b[2], b[3]]
}

fn private_block(subrs: &[Vec<u8>]) -> (usize, Vec<u8>) {
    // defaultWidthX 0
    let mut dict = vec![139, 20];
    if subrs.is_empty() {
        return (dict.len(), dict);
    }
    dict.extend_from_slice(&int5(8));
    dict.push(19);
    let dict_len = dict.len();
    dict.extend(cff_index(subrs));
    (dict_len, dict)
}

struct TopOffsets {
    charset: usize,
    charstrings: usize,
    private: (usize, usize),
    fd_array: usize,
    fd_select: usize,
}

fn top_dict(fixture: &CffFixture, at: &TopOffsets) -> Vec<u8> {
    let mut out = Vec::new();
    if fixture.fd_select.is_some() {
        out.extend_from_slice(&int5(391));
        out.extend_from_slice(&int5(392));
        out.extend_from_slice(&int5(0));
        out.extend_from_slice(&[12, 30]);
    }
    out.extend_from_slice(&int5(at.charset));
    out.push(15);
    out.extend_from_slice(&int5(at.charstrings));
    out.push(17);
    if fixture.fd_select.is_some() {
        out.extend_from_slice(&int5(fixture.glyphs.len()));
        out.extend_from_slice(&[12, 34]);
        out.extend_from_slice(&int5(at.fd_array));
        out.extend_from_slice(&[12, 36]);
        out.extend_from_slice(&int5(at.fd_select));
        out.extend_from_slice(&[12, 37]);
    } else {
        out.extend_from_slice(&int5(at.private.0));
        out.extend_from_slice(&int5(at.private.1));
        out.push(18);
    }
    out
}

/// Serializes `fixture` as a standalone `CFF ` table.
pub(crate) fn build_cff_table(fixture: &CffFixture) -> Vec<u8> {
    let header = [1u8, 0, 4, 1];
    let name_index = cff_index(&[b"TilemarkCff".to_vec()]);
    let strings: Vec<Vec<u8>> = if fixture.fd_select.is_some() {
        vec![b"Adobe".to_vec(), b"Identity".to_vec()]
    } else {
        Vec::new()
    };
    let string_index = cff_index(&strings);
    let global_index = cff_index(&fixture.global_subrs);
    let mut charset = vec![0u8];
    for sid in &fixture.charset[1..] {
        charset.extend_from_slice(&sid.to_be_bytes());
    }
    let charstrings = cff_index(&fixture.glyphs);

    let mut at = TopOffsets {
        charset: 0,
        charstrings: 0,
        private: (0, 0),
        fd_array: 0,
        fd_select: 0,
    };
    let top_len = cff_index(&[top_dict(fixture, &at)]).len();
    let mut offset =
        header.len() + name_index.len() + top_len + string_index.len() + global_index.len();
    at.charset = offset;
    offset += charset.len();
    at.charstrings = offset;
    offset += charstrings.len();

    let mut tail = Vec::new();
    tail.extend_from_slice(&charset);
    tail.extend_from_slice(&charstrings);
    match &fixture.fd_select {
        None => {
            let (dict_len, block) = private_block(&fixture.local_subrs[0]);
            at.private = (dict_len, offset);
            tail.extend(block);
        }
        Some(fds) => {
            at.fd_select = offset;
            tail.push(0);
            tail.extend_from_slice(fds);
            offset += 1 + fds.len();

            let blocks: Vec<(usize, Vec<u8>)> = fixture
                .local_subrs
                .iter()
                .map(|subrs| private_block(subrs))
                .collect();
            // Each font dict is `size offset Private`, 11 bytes.
            let fd_array_len = cff_index(&vec![vec![0u8; 11]; blocks.len()]).len();
            at.fd_array = offset;
            let mut private_at = offset + fd_array_len;
            let mut font_dicts = Vec::with_capacity(blocks.len());
            for (dict_len, block) in &blocks {
                let mut dict = Vec::with_capacity(11);
                dict.extend_from_slice(&int5(*dict_len));
                dict.extend_from_slice(&int5(private_at));
                dict.push(18);
                font_dicts.push(dict);
                private_at += block.len();
            }
            tail.extend(cff_index(&font_dicts));
            for (_, block) in blocks {
                tail.extend(block);
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(&header);
    out.extend(name_index);
    out.extend(cff_index(&[top_dict(fixture, &at)]));
    out.extend(string_index);
    out.extend(global_index);
    out.extend(tail);
    out
}

/// OpenType/CFF font around `fixture`, with a cmap built from `mapping`.
pub(crate) fn build_cff_font(fixture: &CffFixture, mapping: &[(char, u16)]) -> Vec<u8> {
    let count = fixture.glyphs.len() as u16;
    let mapping: Vec<(u32, u16)> = mapping.iter().map(|(ch, gid)| (*ch as u32, *gid)).collect();
    let mut builder = SfntBuilder::new(0x4F54_544F);
    builder.push(*b"CFF ", build_cff_table(fixture));
    builder.push(*b"head", head_table(0));
    builder.push(*b"hhea", hhea_table(count));
    builder.push(*b"maxp", maxp_table(count, false));
    builder.push(*b"OS/2", os2_table());
    builder.push(*b"hmtx", hmtx_table(count));
    builder.push(*b"cmap", cmap_table(&mapping));
    builder.push(*b"name", name_table());
    builder.push(*b"post", post_table());
    builder.build()
}
