use crate::error::WatermarkError;

pub type Tag = [u8; 4];

const TTC_TAG: Tag = *b"ttcf";
const HEAD_CHECKSUM_MAGIC: u32 = 0xB1B0_AFBA;
/// Byte offset of `checksumAdjustment` inside `head`.
const HEAD_CHECKSUM_OFFSET: usize = 8;
/// Byte offset of `indexToLocFormat` inside `head`.
pub(crate) const HEAD_LOCA_FORMAT_OFFSET: usize = 50;

#[derive(Debug, Clone)]
pub(crate) struct SfntTables<'a> {
    pub sfnt_version: u32,
    pub tables: Vec<(Tag, &'a [u8])>,
}

impl<'a> SfntTables<'a> {
    /// Parses the table directory of face `index` (collections are resolved).
    pub fn parse(data: &'a [u8], index: u32) -> Result<Self, WatermarkError> {
        let mut base = 0usize;
        if read_tag(data, 0)? == TTC_TAG {
            let num_fonts = read_u32(data, 8)?;
            if index >= num_fonts {
                return Err(WatermarkError::FontLoad(format!(
                    "collection has {num_fonts} faces, face {index} requested"
                )));
            }
            base = read_u32(data, 12 + 4 * index as usize)? as usize;
        }
        let sfnt_version = read_u32(data, base)?;
        let num_tables = read_u16(data, base + 4)? as usize;
        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let record = base + 12 + i * 16;
            let tag = read_tag(data, record)?;
            let offset = read_u32(data, record + 8)? as usize;
            let length = read_u32(data, record + 12)? as usize;
            let end = offset
                .checked_add(length)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    WatermarkError::FontLoad(format!(
                        "table '{}' extends past end of font data",
                        tag_str(&tag)
                    ))
                })?;
            tables.push((tag, &data[offset..end]));
        }
        Ok(Self {
            sfnt_version,
            tables,
        })
    }

    pub fn get(&self, tag: &Tag) -> Option<&'a [u8]> {
        self.tables
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, data)| *data)
    }
}

/// Table set being assembled into a new font file.
#[derive(Debug, Default)]
pub(crate) struct SfntBuilder {
    sfnt_version: u32,
    tables: Vec<(Tag, Vec<u8>)>,
}

impl SfntBuilder {
    pub fn new(sfnt_version: u32) -> Self {
        Self {
            sfnt_version,
            tables: Vec::new(),
        }
    }

    pub fn push(&mut self, tag: Tag, data: Vec<u8>) {
        self.tables.retain(|(t, _)| *t != tag);
        self.tables.push((tag, data));
    }

    /// Serializes the font: tables sorted by tag, 4-byte aligned, checksums
    /// and `head.checksumAdjustment` recomputed.
    pub fn build(mut self) -> Vec<u8> {
        self.tables.sort_by(|a, b| a.0.cmp(&b.0));
        for (tag, data) in &mut self.tables {
            if tag == b"head" && data.len() >= HEAD_CHECKSUM_OFFSET + 4 {
                data[HEAD_CHECKSUM_OFFSET..HEAD_CHECKSUM_OFFSET + 4].fill(0);
            }
        }

        let num_tables = self.tables.len() as u16;
        let mut entry_selector = 0u16;
        while (1u32 << (entry_selector + 1)) <= num_tables as u32 {
            entry_selector += 1;
        }
        let search_range = (1u16 << entry_selector) * 16;
        let range_shift = (num_tables * 16).saturating_sub(search_range);

        let header_len = 12 + 16 * self.tables.len();
        let mut out = Vec::with_capacity(
            header_len + self.tables.iter().map(|(_, d)| d.len() + 3).sum::<usize>(),
        );
        out.extend_from_slice(&self.sfnt_version.to_be_bytes());
        out.extend_from_slice(&num_tables.to_be_bytes());
        out.extend_from_slice(&search_range.to_be_bytes());
        out.extend_from_slice(&entry_selector.to_be_bytes());
        out.extend_from_slice(&range_shift.to_be_bytes());

        let mut offset = header_len;
        let mut head_offset = None;
        for (tag, data) in &self.tables {
            out.extend_from_slice(tag);
            out.extend_from_slice(&checksum(data).to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            if tag == b"head" {
                head_offset = Some(offset);
            }
            offset += padded_len(data.len());
        }
        for (_, data) in &self.tables {
            out.extend_from_slice(data);
            out.resize(out.len() + padded_len(data.len()) - data.len(), 0);
        }

        if let Some(head_offset) = head_offset {
            let adjustment = HEAD_CHECKSUM_MAGIC.wrapping_sub(checksum(&out));
            let at = head_offset + HEAD_CHECKSUM_OFFSET;
            if at + 4 <= out.len() {
                out[at..at + 4].copy_from_slice(&adjustment.to_be_bytes());
            }
        }
        out
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

pub(crate) fn checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}

pub(crate) fn tag_str(tag: &Tag) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

fn truncated() -> WatermarkError {
    WatermarkError::FontLoad("font data is truncated".to_string())
}

fn read_tag(data: &[u8], offset: usize) -> Result<Tag, WatermarkError> {
    data.get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(truncated)
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Result<u16, WatermarkError> {
    data.get(offset..offset + 2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
        .ok_or_else(truncated)
}

pub(crate) fn read_i16(data: &[u8], offset: usize) -> Result<i16, WatermarkError> {
    read_u16(data, offset).map(|v| v as i16)
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32, WatermarkError> {
    data.get(offset..offset + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or_else(truncated)
}
