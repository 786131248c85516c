use crate::error::WatermarkError;
use std::collections::BTreeSet;

const OP_CHARSET: u16 = 15;
const OP_ENCODING: u16 = 16;
const OP_CHARSTRINGS: u16 = 17;
const OP_PRIVATE: u16 = 18;
const OP_SUBRS: u16 = 19;
const OP_CHARSTRING_TYPE: u16 = 0x0c06;
const OP_ROS: u16 = 0x0c1e;
const OP_FD_ARRAY: u16 = 0x0c24;
const OP_FD_SELECT: u16 = 0x0c25;

const CS_ENDCHAR: u8 = 14;
const MAX_SUBR_DEPTH: u8 = 10;

fn malformed(message: impl Into<String>) -> WatermarkError {
    WatermarkError::FontLoad(format!("malformed CFF table: {}", message.into()))
}

#[derive(Debug)]
pub(crate) struct CffSubset {
    pub data: Vec<u8>,
    /// Requested glyphs plus `seac` components pulled in by them.
    pub retained: BTreeSet<u16>,
}

/// Rewrites a `CFF ` table keeping only the outlines of `keep`.
pub(crate) fn subset_cff(
    data: &[u8],
    keep: &BTreeSet<u16>,
    desubroutinize: bool,
) -> Result<CffSubset, WatermarkError> {
    let font = CffFont::parse(data)?;
    let glyph_count = font.charstrings.len();

    let mut retained: BTreeSet<u16> = BTreeSet::new();
    let mut work: Vec<u16> = keep
        .iter()
        .copied()
        .filter(|gid| (*gid as usize) < glyph_count)
        .collect();
    work.push(0);
    let mut outlines: Vec<Option<Vec<u8>>> = vec![None; glyph_count];
    let seac_lookup = font.seac_lookup(data)?;

    while let Some(gid) = work.pop() {
        if !retained.insert(gid) {
            continue;
        }
        let (global, local) = font.subrs_for(gid);
        let mut flat = Flattener::new(global, local);
        flat.run(font.charstrings[gid as usize], 0)?;
        flat.finish();
        if let Some((base, accent)) = flat.seac {
            for code in [base, accent] {
                if let Some(component) = seac_lookup.as_ref().and_then(|l| l.gid_for_code(code)) {
                    work.push(component);
                }
            }
        }
        outlines[gid as usize] = Some(if desubroutinize {
            flat.out
        } else {
            font.charstrings[gid as usize].to_vec()
        });
    }

    let charstrings: Vec<Vec<u8>> = outlines
        .into_iter()
        .map(|outline| outline.unwrap_or_else(|| vec![CS_ENDCHAR]))
        .collect();
    let data = font.write(&charstrings, desubroutinize)?;
    Ok(CffSubset { data, retained })
}

/// Per-glyph CIDs for CID-keyed fonts, `None` when the font is name-keyed.
pub(crate) fn cid_map(data: &[u8]) -> Result<Option<Vec<u16>>, WatermarkError> {
    let font = CffFont::parse(data)?;
    if font.top.get(OP_ROS).is_none() {
        return Ok(None);
    }
    let offset = font
        .top
        .int(OP_CHARSET)
        .ok_or_else(|| malformed("CID font without charset"))?;
    let sids = parse_charset(data, offset as usize, font.charstrings.len())?;
    Ok(Some(sids))
}

struct CffFont<'a> {
    header: &'a [u8],
    name_index: &'a [u8],
    string_index: &'a [u8],
    global_subrs_raw: &'a [u8],
    global_subrs: Vec<&'a [u8]>,
    top: Dict,
    charstrings: Vec<&'a [u8]>,
    charset_raw: Option<&'a [u8]>,
    encoding_raw: Option<&'a [u8]>,
    keyed: Keyed<'a>,
}

enum Keyed<'a> {
    Name(PrivateDict<'a>),
    Cid {
        fd_select_raw: &'a [u8],
        fd_for_gid: Vec<u8>,
        font_dicts: Vec<(Dict, PrivateDict<'a>)>,
    },
}

struct PrivateDict<'a> {
    dict: Dict,
    subrs_raw: Option<&'a [u8]>,
    subrs: Vec<&'a [u8]>,
}

impl<'a> CffFont<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, WatermarkError> {
        let header_size = *data.get(2).ok_or_else(|| malformed("missing header"))? as usize;
        if data.first() != Some(&1) || header_size < 4 || header_size > data.len() {
            return Err(malformed("unsupported CFF header"));
        }
        let name_end = index_end(data, header_size)?;
        let (top_dicts, top_end) = parse_index(data, name_end)?;
        if top_dicts.len() != 1 {
            return Err(malformed("font sets with several fonts are not supported"));
        }
        let top = Dict::parse(top_dicts[0])?;
        let string_end = index_end(data, top_end)?;
        let (global_subrs, global_end) = parse_index(data, string_end)?;

        if let Some(kind) = top.int(OP_CHARSTRING_TYPE) {
            if kind != 2 {
                return Err(malformed(format!("charstring type {kind} is not supported")));
            }
        }
        let charstrings_offset = top
            .int(OP_CHARSTRINGS)
            .ok_or_else(|| malformed("missing CharStrings"))? as usize;
        let (charstrings, _) = parse_index(data, charstrings_offset)?;
        if charstrings.is_empty() {
            return Err(malformed("empty CharStrings"));
        }
        let glyph_count = charstrings.len();

        let charset_raw = match top.int(OP_CHARSET) {
            Some(offset) if offset > 2 => {
                let offset = offset as usize;
                let len = charset_len(data, offset, glyph_count)?;
                Some(slice(data, offset, len)?)
            }
            _ => None,
        };
        let encoding_raw = match top.int(OP_ENCODING) {
            Some(offset) if offset > 1 => {
                let offset = offset as usize;
                let len = encoding_len(data, offset)?;
                Some(slice(data, offset, len)?)
            }
            _ => None,
        };

        let keyed = if top.get(OP_ROS).is_some() {
            let fd_select_offset = top
                .int(OP_FD_SELECT)
                .ok_or_else(|| malformed("CID font without FDSelect"))?
                as usize;
            let (fd_select_raw, fd_for_gid) = parse_fd_select(data, fd_select_offset, glyph_count)?;
            let fd_array_offset = top
                .int(OP_FD_ARRAY)
                .ok_or_else(|| malformed("CID font without FDArray"))?
                as usize;
            let (raw_dicts, _) = parse_index(data, fd_array_offset)?;
            let mut font_dicts = Vec::with_capacity(raw_dicts.len());
            for raw in raw_dicts {
                let dict = Dict::parse(raw)?;
                let private = PrivateDict::parse(data, &dict)?;
                font_dicts.push((dict, private));
            }
            if let Some(max_fd) = fd_for_gid.iter().max() {
                if *max_fd as usize >= font_dicts.len() {
                    return Err(malformed("FDSelect references a missing font dict"));
                }
            }
            Keyed::Cid {
                fd_select_raw,
                fd_for_gid,
                font_dicts,
            }
        } else {
            Keyed::Name(PrivateDict::parse(data, &top)?)
        };

        Ok(Self {
            header: &data[..header_size],
            name_index: &data[header_size..name_end],
            string_index: &data[top_end..string_end],
            global_subrs_raw: &data[string_end..global_end],
            global_subrs,
            top,
            charstrings,
            charset_raw,
            encoding_raw,
            keyed,
        })
    }

    fn subrs_for(&self, gid: u16) -> (&[&'a [u8]], &[&'a [u8]]) {
        let local: &[&[u8]] = match &self.keyed {
            Keyed::Name(private) => &private.subrs,
            Keyed::Cid {
                fd_for_gid,
                font_dicts,
                ..
            } => fd_for_gid
                .get(gid as usize)
                .and_then(|fd| font_dicts.get(*fd as usize))
                .map(|(_, private)| private.subrs.as_slice())
                .unwrap_or(&[]),
        };
        (&self.global_subrs, local)
    }

    fn seac_lookup(&self, data: &[u8]) -> Result<Option<SeacLookup>, WatermarkError> {
        if !matches!(self.keyed, Keyed::Name(_)) {
            return Ok(None);
        }
        let sids = match self.top.int(OP_CHARSET) {
            None | Some(0) => (0..self.charstrings.len() as u16).collect(),
            Some(1) | Some(2) => return Ok(None),
            Some(offset) => parse_charset(data, offset as usize, self.charstrings.len())?,
        };
        Ok(Some(SeacLookup { sids }))
    }

    /// Serializes the font with new charstrings. Offsets in rewritten dicts
    /// are always 5-byte integers so dict sizes do not depend on layout.
    fn write(&self, charstrings: &[Vec<u8>], desubroutinize: bool) -> Result<Vec<u8>, WatermarkError> {
        let global_subrs: Vec<u8> = if desubroutinize {
            write_index::<&[u8]>(&[])
        } else {
            self.global_subrs_raw.to_vec()
        };
        let charstrings_index = write_index(charstrings);

        let mut top = self.top.clone();
        top.set_offset(OP_CHARSTRINGS, &[0]);
        if self.charset_raw.is_some() {
            top.set_offset(OP_CHARSET, &[0]);
        }
        if self.encoding_raw.is_some() {
            top.set_offset(OP_ENCODING, &[0]);
        }
        match &self.keyed {
            Keyed::Name(_) => top.set_offset(OP_PRIVATE, &[0, 0]),
            Keyed::Cid { .. } => {
                top.set_offset(OP_FD_SELECT, &[0]);
                top.set_offset(OP_FD_ARRAY, &[0]);
            }
        }
        let top_index_len = write_index(&[top.encode()]).len();

        let mut offset = self.header.len()
            + self.name_index.len()
            + top_index_len
            + self.string_index.len()
            + global_subrs.len();
        let mut tail: Vec<u8> = Vec::new();

        if let Some(charset) = self.charset_raw {
            top.set_offset(OP_CHARSET, &[offset as i32]);
            tail.extend_from_slice(charset);
            offset += charset.len();
        }
        if let Some(encoding) = self.encoding_raw {
            top.set_offset(OP_ENCODING, &[offset as i32]);
            tail.extend_from_slice(encoding);
            offset += encoding.len();
        }
        top.set_offset(OP_CHARSTRINGS, &[offset as i32]);
        tail.extend_from_slice(&charstrings_index);
        offset += charstrings_index.len();

        match &self.keyed {
            Keyed::Name(private) => {
                let block = private.write(desubroutinize);
                top.set_offset(OP_PRIVATE, &[block.dict_len as i32, offset as i32]);
                tail.extend_from_slice(&block.bytes);
            }
            Keyed::Cid {
                fd_select_raw,
                font_dicts,
                ..
            } => {
                top.set_offset(OP_FD_SELECT, &[offset as i32]);
                tail.extend_from_slice(fd_select_raw);
                offset += fd_select_raw.len();

                let privates: Vec<PrivateBlock> = font_dicts
                    .iter()
                    .map(|(_, private)| private.write(desubroutinize))
                    .collect();
                let mut dicts: Vec<Dict> = font_dicts.iter().map(|(d, _)| d.clone()).collect();
                for dict in &mut dicts {
                    dict.set_offset(OP_PRIVATE, &[0, 0]);
                }
                let fd_array_len = write_index(
                    &dicts.iter().map(Dict::encode).collect::<Vec<_>>(),
                )
                .len();
                let fd_array_offset = offset;
                let mut private_offset = fd_array_offset + fd_array_len;
                for (dict, block) in dicts.iter_mut().zip(&privates) {
                    dict.set_offset(OP_PRIVATE, &[block.dict_len as i32, private_offset as i32]);
                    private_offset += block.bytes.len();
                }
                top.set_offset(OP_FD_ARRAY, &[fd_array_offset as i32]);
                tail.extend_from_slice(&write_index(
                    &dicts.iter().map(Dict::encode).collect::<Vec<_>>(),
                ));
                for block in privates {
                    tail.extend_from_slice(&block.bytes);
                }
            }
        }

        let top_index = write_index(&[top.encode()]);
        if top_index.len() != top_index_len {
            return Err(WatermarkError::FontSubset(
                "CFF top dict changed size during layout".to_string(),
            ));
        }

        let mut out = Vec::with_capacity(offset + tail.len());
        out.extend_from_slice(self.header);
        out.extend_from_slice(self.name_index);
        out.extend_from_slice(&top_index);
        out.extend_from_slice(self.string_index);
        out.extend_from_slice(&global_subrs);
        out.extend_from_slice(&tail);
        Ok(out)
    }
}

struct PrivateBlock {
    dict_len: usize,
    bytes: Vec<u8>,
}

impl<'a> PrivateDict<'a> {
    fn parse(data: &'a [u8], owner: &Dict) -> Result<Self, WatermarkError> {
        let Some(operands) = owner.get(OP_PRIVATE) else {
            return Ok(Self {
                dict: Dict::default(),
                subrs_raw: None,
                subrs: Vec::new(),
            });
        };
        if operands.len() != 2 {
            return Err(malformed("Private operator needs size and offset"));
        }
        let size = operands[0].value as usize;
        let start = operands[1].value as usize;
        let dict = Dict::parse(slice(data, start, size)?)?;
        let (subrs_raw, subrs) = match dict.int(OP_SUBRS) {
            Some(rel) => {
                let at = start + rel as usize;
                let (items, end) = parse_index(data, at)?;
                (Some(&data[at..end]), items)
            }
            None => (None, Vec::new()),
        };
        Ok(Self {
            dict,
            subrs_raw,
            subrs,
        })
    }

    fn write(&self, desubroutinize: bool) -> PrivateBlock {
        let mut dict = self.dict.clone();
        let subrs = if desubroutinize { None } else { self.subrs_raw };
        match subrs {
            Some(raw) => {
                dict.set_offset(OP_SUBRS, &[0]);
                let dict_len = dict.encode().len();
                dict.set_offset(OP_SUBRS, &[dict_len as i32]);
                let mut bytes = dict.encode();
                bytes.extend_from_slice(raw);
                PrivateBlock { dict_len, bytes }
            }
            None => {
                dict.remove(OP_SUBRS);
                let bytes = dict.encode();
                PrivateBlock {
                    dict_len: bytes.len(),
                    bytes,
                }
            }
        }
    }
}

struct SeacLookup {
    sids: Vec<u16>,
}

impl SeacLookup {
    fn gid_for_code(&self, code: u8) -> Option<u16> {
        let sid = standard_encoding_sid(code)?;
        self.sids
            .iter()
            .position(|s| *s == sid)
            .map(|gid| gid as u16)
    }
}

#[derive(Debug, Clone)]
struct Operand {
    raw: Vec<u8>,
    value: f64,
}

impl Operand {
    fn int5(value: i32) -> Self {
        let mut raw = vec![29];
        raw.extend_from_slice(&value.to_be_bytes());
        Self {
            raw,
            value: value as f64,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Dict {
    entries: Vec<(u16, Vec<Operand>)>,
}

impl Dict {
    fn parse(data: &[u8]) -> Result<Self, WatermarkError> {
        let mut entries = Vec::new();
        let mut operands = Vec::new();
        let mut i = 0usize;
        while i < data.len() {
            let b0 = data[i];
            let (len, value) = match b0 {
                0..=21 => {
                    let op = if b0 == 12 {
                        let b1 = *data.get(i + 1).ok_or_else(|| malformed("truncated dict"))?;
                        i += 2;
                        0x0c00 | b1 as u16
                    } else {
                        i += 1;
                        b0 as u16
                    };
                    entries.push((op, std::mem::take(&mut operands)));
                    continue;
                }
                28 => (3, read_i16_at(data, i + 1)? as f64),
                29 => (5, read_i32_at(data, i + 1)? as f64),
                30 => real_operand(data, i)?,
                32..=246 => (1, b0 as f64 - 139.0),
                247..=250 => {
                    let b1 = *data.get(i + 1).ok_or_else(|| malformed("truncated dict"))?;
                    (2, (b0 as f64 - 247.0) * 256.0 + b1 as f64 + 108.0)
                }
                251..=254 => {
                    let b1 = *data.get(i + 1).ok_or_else(|| malformed("truncated dict"))?;
                    (2, -(b0 as f64 - 251.0) * 256.0 - b1 as f64 - 108.0)
                }
                _ => return Err(malformed(format!("reserved dict byte {b0}"))),
            };
            let raw = slice(data, i, len)?.to_vec();
            operands.push(Operand { raw, value });
            i += len;
        }
        Ok(Self { entries })
    }

    fn get(&self, op: u16) -> Option<&[Operand]> {
        self.entries
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, operands)| operands.as_slice())
    }

    fn int(&self, op: u16) -> Option<i64> {
        self.get(op)
            .and_then(|operands| operands.last())
            .map(|operand| operand.value as i64)
    }

    fn set_offset(&mut self, op: u16, values: &[i32]) {
        let operands: Vec<Operand> = values.iter().map(|v| Operand::int5(*v)).collect();
        match self.entries.iter_mut().find(|(o, _)| *o == op) {
            Some(entry) => entry.1 = operands,
            None => self.entries.push((op, operands)),
        }
    }

    fn remove(&mut self, op: u16) {
        self.entries.retain(|(o, _)| *o != op);
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (op, operands) in &self.entries {
            for operand in operands {
                out.extend_from_slice(&operand.raw);
            }
            if *op >= 0x0c00 {
                out.push(12);
                out.push((*op & 0xff) as u8);
            } else {
                out.push(*op as u8);
            }
        }
        out
    }
}

fn real_operand(data: &[u8], start: usize) -> Result<(usize, f64), WatermarkError> {
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        let byte = *data.get(i).ok_or_else(|| malformed("unterminated real"))?;
        i += 1;
        for nibble in [byte >> 4, byte & 0x0f] {
            match nibble {
                0..=9 => text.push((b'0' + nibble) as char),
                0xa => text.push('.'),
                0xb => text.push('E'),
                0xc => text.push_str("E-"),
                0xe => text.push('-'),
                0xf => {
                    let value = text.parse::<f64>().unwrap_or(0.0);
                    return Ok((i - start, value));
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Return,
    End,
}

/// Walks a Type 2 charstring, inlining `callsubr`/`callgsubr` and dropping
/// `return`, so the output is a standalone program.
struct Flattener<'s, 'a> {
    global: &'s [&'a [u8]],
    local: &'s [&'a [u8]],
    out: Vec<u8>,
    pending: Vec<u8>,
    marks: Vec<usize>,
    values: Vec<f64>,
    stems: usize,
    seac: Option<(u8, u8)>,
}

impl<'s, 'a> Flattener<'s, 'a> {
    fn new(global: &'s [&'a [u8]], local: &'s [&'a [u8]]) -> Self {
        Self {
            global,
            local,
            out: Vec::new(),
            pending: Vec::new(),
            marks: Vec::new(),
            values: Vec::new(),
            stems: 0,
            seac: None,
        }
    }

    fn run(&mut self, code: &[u8], depth: u8) -> Result<Flow, WatermarkError> {
        let mut i = 0usize;
        while i < code.len() {
            let b0 = code[i];
            match b0 {
                28 => {
                    let value = read_i16_at(code, i + 1)? as f64;
                    self.push_operand(slice(code, i, 3)?, value);
                    i += 3;
                }
                32..=246 => {
                    self.push_operand(&code[i..i + 1], b0 as f64 - 139.0);
                    i += 1;
                }
                247..=250 => {
                    let b1 = *code.get(i + 1).ok_or_else(|| malformed("truncated charstring"))?;
                    self.push_operand(&code[i..i + 2], (b0 as f64 - 247.0) * 256.0 + b1 as f64 + 108.0);
                    i += 2;
                }
                251..=254 => {
                    let b1 = *code.get(i + 1).ok_or_else(|| malformed("truncated charstring"))?;
                    self.push_operand(&code[i..i + 2], -(b0 as f64 - 251.0) * 256.0 - b1 as f64 - 108.0);
                    i += 2;
                }
                255 => {
                    let fixed = read_i32_at(code, i + 1)? as f64 / 65536.0;
                    self.push_operand(slice(code, i, 5)?, fixed);
                    i += 5;
                }
                10 | 29 => {
                    if depth >= MAX_SUBR_DEPTH {
                        return Err(malformed("subroutine nesting too deep"));
                    }
                    let index = self.pop_operand().ok_or_else(|| {
                        WatermarkError::FontSubset(
                            "charstring computes a subroutine index; cannot flatten".to_string(),
                        )
                    })?;
                    let subrs = if b0 == 10 { self.local } else { self.global };
                    let biased = index as i64 + subr_bias(subrs.len());
                    let subr = usize::try_from(biased)
                        .ok()
                        .and_then(|idx| subrs.get(idx).copied())
                        .ok_or_else(|| malformed(format!("subroutine {biased} out of range")))?;
                    if self.run(subr, depth + 1)? == Flow::End {
                        return Ok(Flow::End);
                    }
                    i += 1;
                }
                11 => return Ok(Flow::Return),
                CS_ENDCHAR => {
                    if self.values.len() >= 4 {
                        let n = self.values.len();
                        self.seac = Some((self.values[n - 2] as u8, self.values[n - 1] as u8));
                    }
                    self.flush(&[CS_ENDCHAR]);
                    return Ok(Flow::End);
                }
                1 | 3 | 18 | 23 => {
                    self.stems += self.values.len() / 2;
                    self.flush(&[b0]);
                    i += 1;
                }
                19 | 20 => {
                    // Pending operands before a mask are an implicit vstem list.
                    self.stems += self.values.len() / 2;
                    let mask_len = self.stems.div_ceil(8);
                    let op = slice(code, i, 1 + mask_len)?.to_vec();
                    self.flush(&op);
                    i += 1 + mask_len;
                }
                12 => {
                    let op = slice(code, i, 2)?.to_vec();
                    self.flush(&op);
                    i += 2;
                }
                _ => {
                    self.flush(&[b0]);
                    i += 1;
                }
            }
        }
        Ok(Flow::Return)
    }

    fn push_operand(&mut self, raw: &[u8], value: f64) {
        self.marks.push(self.pending.len());
        self.pending.extend_from_slice(raw);
        self.values.push(value);
    }

    fn pop_operand(&mut self) -> Option<f64> {
        let mark = self.marks.pop()?;
        self.pending.truncate(mark);
        self.values.pop()
    }

    fn flush(&mut self, op: &[u8]) {
        self.out.append(&mut self.pending);
        self.out.extend_from_slice(op);
        self.marks.clear();
        self.values.clear();
    }

    fn finish(&mut self) {
        self.out.append(&mut self.pending);
        self.marks.clear();
        self.values.clear();
    }
}

fn subr_bias(count: usize) -> i64 {
    if count < 1240 {
        107
    } else if count < 33900 {
        1131
    } else {
        32768
    }
}

fn parse_index(data: &[u8], offset: usize) -> Result<(Vec<&[u8]>, usize), WatermarkError> {
    let count = read_u16_at(data, offset)? as usize;
    if count == 0 {
        return Ok((Vec::new(), offset + 2));
    }
    let off_size = *data
        .get(offset + 2)
        .ok_or_else(|| malformed("truncated INDEX"))? as usize;
    if !(1..=4).contains(&off_size) {
        return Err(malformed(format!("invalid INDEX offset size {off_size}")));
    }
    let offsets_start = offset + 3;
    let mut offsets = Vec::with_capacity(count + 1);
    for i in 0..=count {
        let bytes = slice(data, offsets_start + i * off_size, off_size)?;
        let value = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        offsets.push(value);
    }
    let data_start = offsets_start + (count + 1) * off_size - 1;
    let mut items = Vec::with_capacity(count);
    for pair in offsets.windows(2) {
        if pair[1] < pair[0] || pair[0] == 0 {
            return Err(malformed("INDEX offsets are not ascending"));
        }
        items.push(slice(data, data_start + pair[0], pair[1] - pair[0])?);
    }
    Ok((items, data_start + offsets[count]))
}

fn index_end(data: &[u8], offset: usize) -> Result<usize, WatermarkError> {
    parse_index(data, offset).map(|(_, end)| end)
}

fn write_index<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    if items.is_empty() {
        return vec![0, 0];
    }
    let total: usize = items.iter().map(|item| item.as_ref().len()).sum();
    let off_size: usize = match total + 1 {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    let mut out = Vec::with_capacity(3 + (items.len() + 1) * off_size + total);
    out.extend_from_slice(&(items.len() as u16).to_be_bytes());
    out.push(off_size as u8);
    let mut offset = 1usize;
    let push_offset = |out: &mut Vec<u8>, value: usize| {
        let bytes = (value as u32).to_be_bytes();
        out.extend_from_slice(&bytes[4 - off_size..]);
    };
    push_offset(&mut out, offset);
    for item in items {
        offset += item.as_ref().len();
        push_offset(&mut out, offset);
    }
    for item in items {
        out.extend_from_slice(item.as_ref());
    }
    out
}

fn charset_len(data: &[u8], offset: usize, glyph_count: usize) -> Result<usize, WatermarkError> {
    let format = *data.get(offset).ok_or_else(|| malformed("truncated charset"))?;
    let remaining = glyph_count.saturating_sub(1);
    match format {
        0 => Ok(1 + 2 * remaining),
        1 | 2 => {
            let range_len = if format == 1 { 3 } else { 4 };
            let mut covered = 0usize;
            let mut at = offset + 1;
            while covered < remaining {
                let left = if format == 1 {
                    *data.get(at + 2).ok_or_else(|| malformed("truncated charset"))? as usize
                } else {
                    read_u16_at(data, at + 2)? as usize
                };
                covered += left + 1;
                at += range_len;
            }
            Ok(at - offset)
        }
        _ => Err(malformed(format!("unknown charset format {format}"))),
    }
}

/// SIDs (or CIDs for CID-keyed fonts) indexed by glyph ID.
fn parse_charset(data: &[u8], offset: usize, glyph_count: usize) -> Result<Vec<u16>, WatermarkError> {
    let format = *data.get(offset).ok_or_else(|| malformed("truncated charset"))?;
    let mut sids = Vec::with_capacity(glyph_count);
    sids.push(0u16);
    let mut at = offset + 1;
    while sids.len() < glyph_count {
        match format {
            0 => {
                sids.push(read_u16_at(data, at)?);
                at += 2;
            }
            1 | 2 => {
                let first = read_u16_at(data, at)?;
                let left = if format == 1 {
                    *data.get(at + 2).ok_or_else(|| malformed("truncated charset"))? as u16
                } else {
                    read_u16_at(data, at + 2)?
                };
                at += if format == 1 { 3 } else { 4 };
                for k in 0..=left {
                    if sids.len() == glyph_count {
                        break;
                    }
                    sids.push(first.wrapping_add(k));
                }
            }
            _ => return Err(malformed(format!("unknown charset format {format}"))),
        }
    }
    Ok(sids)
}

fn encoding_len(data: &[u8], offset: usize) -> Result<usize, WatermarkError> {
    let format = *data.get(offset).ok_or_else(|| malformed("truncated encoding"))?;
    let count = *data.get(offset + 1).ok_or_else(|| malformed("truncated encoding"))? as usize;
    let mut len = match format & 0x7f {
        0 => 2 + count,
        1 => 2 + count * 2,
        other => return Err(malformed(format!("unknown encoding format {other}"))),
    };
    if format & 0x80 != 0 {
        let supplements = *data.get(offset + len).ok_or_else(|| malformed("truncated encoding"))? as usize;
        len += 1 + supplements * 3;
    }
    Ok(len)
}

fn parse_fd_select(
    data: &[u8],
    offset: usize,
    glyph_count: usize,
) -> Result<(&[u8], Vec<u8>), WatermarkError> {
    let format = *data.get(offset).ok_or_else(|| malformed("truncated FDSelect"))?;
    match format {
        0 => {
            let raw = slice(data, offset, 1 + glyph_count)?;
            Ok((raw, raw[1..].to_vec()))
        }
        3 => {
            let ranges = read_u16_at(data, offset + 1)? as usize;
            let len = 1 + 2 + ranges * 3 + 2;
            let raw = slice(data, offset, len)?;
            let mut fds = vec![0u8; glyph_count];
            for r in 0..ranges {
                let at = offset + 3 + r * 3;
                let first = read_u16_at(data, at)? as usize;
                let fd = data[at + 2];
                let next = read_u16_at(data, at + 3)? as usize;
                for gid in first..next.min(glyph_count) {
                    fds[gid] = fd;
                }
            }
            Ok((raw, fds))
        }
        _ => Err(malformed(format!("unknown FDSelect format {format}"))),
    }
}

/// Standard Encoding code to standard string ID, as used by `seac`.
fn standard_encoding_sid(code: u8) -> Option<u16> {
    let sid = match code {
        32..=126 => code as u16 - 31,
        161..=175 => code as u16 - 65,
        177..=180 => code as u16 - 66,
        182..=189 => code as u16 - 67,
        191 => 123,
        193..=200 => code as u16 - 69,
        202 | 203 => code as u16 - 70,
        205..=207 => code as u16 - 71,
        208 => 137,
        225 => 138,
        227 => 139,
        232..=235 => code as u16 - 92,
        241 => 144,
        245 => 145,
        248..=251 => code as u16 - 102,
        _ => return None,
    };
    Some(sid)
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], WatermarkError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| malformed("offset out of bounds"))
}

fn read_u16_at(data: &[u8], offset: usize) -> Result<u16, WatermarkError> {
    slice(data, offset, 2).map(|s| u16::from_be_bytes([s[0], s[1]]))
}

fn read_i16_at(data: &[u8], offset: usize) -> Result<i16, WatermarkError> {
    read_u16_at(data, offset).map(|v| v as i16)
}

fn read_i32_at(data: &[u8], offset: usize) -> Result<i32, WatermarkError> {
    slice(data, offset, 4).map(|s| i32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}
