use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSONL event log for one watermarking run. Cheap to clone across page workers.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: BufWriter<File>,
    counters: HashMap<String, u64>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: BufWriter::new(file),
                counters: HashMap::new(),
            })),
        })
    }

    pub fn log_json(&self, json: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn log_subset(&self, source_bytes: usize, subset_bytes: usize, kept_glyphs: usize) {
        self.log_json(&format!(
            "{{\"type\":\"debug.subset\",\"source_bytes\":{},\"subset_bytes\":{},\"kept_glyphs\":{}}}",
            source_bytes, subset_bytes, kept_glyphs
        ));
    }

    pub fn log_missing_glyph(&self, ch: char, mandatory: bool) {
        self.log_json(&format!(
            "{{\"type\":\"debug.missing_glyph\",\"codepoint\":\"U+{:04X}\",\"mandatory\":{}}}",
            ch as u32, mandatory
        ));
        self.increment("glyphs.missing", 1);
    }

    pub fn log_page(&self, page_number: u32, width: f32, height: f32, tiles: usize) {
        self.log_json(&format!(
            "{{\"type\":\"debug.page\",\"page\":{},\"width\":{:.3},\"height\":{:.3},\"tiles\":{}}}",
            page_number, width, height, tiles
        ));
        self.increment("pages", 1);
        self.increment("tiles", tiles as u64);
    }

    pub fn log_error(&self, context: &str, message: &str) {
        self.log_json(&format!(
            "{{\"type\":\"debug.error\",\"context\":\"{}\",\"message\":\"{}\"}}",
            json_escape(context),
            json_escape(message)
        ));
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let mut counts_json = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts_json.push(',');
                }
                counts_json.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts_json.push('}');
            let json = format!(
                "{{\"type\":\"debug.summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts_json
            );
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(ch),
        }
    }
    out
}
