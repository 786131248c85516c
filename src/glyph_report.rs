use std::collections::{BTreeMap, BTreeSet};

/// Characters always kept in the subset so digits and separators in
/// surrounding UI text never render as missing-glyph boxes.
pub const BASELINE_CHARS: &str = " 0123456789-:,";

/// The set of characters a font subset must be able to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredChars {
    mandatory: BTreeSet<char>,
    supplemental: BTreeSet<char>,
}

impl RequiredChars {
    pub fn is_mandatory(&self, ch: char) -> bool {
        self.mandatory.contains(&ch)
    }

    /// Union of text and baseline characters, in code point order.
    pub fn all(&self) -> BTreeSet<char> {
        self.mandatory.union(&self.supplemental).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.mandatory.len() + self.supplemental.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory.is_empty() && self.supplemental.is_empty()
    }
}

pub fn collect_required_chars(text: &str) -> RequiredChars {
    let mandatory: BTreeSet<char> = text.chars().filter(|ch| !ch.is_control()).collect();
    let supplemental = BASELINE_CHARS
        .chars()
        .filter(|ch| !mandatory.contains(ch))
        .collect();
    RequiredChars {
        mandatory,
        supplemental,
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlyphCoverageReport {
    missing: BTreeMap<u32, MissingGlyph>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingGlyph {
    pub codepoint: u32,
    pub ch: char,
    pub mandatory: bool,
}

impl GlyphCoverageReport {
    pub fn record_missing(&mut self, ch: char, mandatory: bool) {
        let codepoint = ch as u32;
        let entry = self.missing.entry(codepoint).or_insert(MissingGlyph {
            codepoint,
            ch,
            mandatory,
        });
        entry.mandatory |= mandatory;
    }

    pub fn missing(&self) -> Vec<MissingGlyph> {
        self.missing.values().cloned().collect()
    }

    pub fn missing_mandatory(&self) -> Vec<MissingGlyph> {
        self.missing.values().filter(|m| m.mandatory).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Short human-readable list such as `'致' (U+81F4), '密' (U+5BC6)`.
    pub fn describe_mandatory(&self) -> String {
        self.missing_mandatory()
            .iter()
            .map(|m| format!("'{}' (U+{:04X})", m.ch, m.codepoint))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_unions_text_with_baseline() {
        let required = collect_required_chars("Test 123");
        let all = required.all();
        for ch in "Tes 123".chars().chain(BASELINE_CHARS.chars()) {
            assert!(all.contains(&ch), "missing {ch:?}");
        }
        // T e s t ' ' 1 2 3 plus 0 4 5 6 7 8 9 - : ,
        assert_eq!(all.len(), 18);
        assert_eq!(required.len(), all.len());
        assert!(required.is_mandatory('T'));
        assert!(!required.is_mandatory('9'));
    }

    #[test]
    fn collect_deduplicates_and_skips_controls() {
        let required = collect_required_chars("aa\n\taa");
        assert!(required.is_mandatory('a'));
        assert!(!required.is_mandatory('\n'));
        assert!(!required.all().contains(&'\t'));
        assert_eq!(required.all().len(), BASELINE_CHARS.chars().count() + 1);
    }

    #[test]
    fn coverage_report_upgrades_to_mandatory() {
        let mut report = GlyphCoverageReport::default();
        report.record_missing('密', false);
        report.record_missing('密', true);
        report.record_missing('9', false);
        assert_eq!(report.missing().len(), 2);
        assert_eq!(report.describe_mandatory(), "'密' (U+5BC6)");
    }
}
