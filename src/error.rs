use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum WatermarkError {
    InputNotFound(PathBuf),
    FontNotFound(PathBuf),
    FontLoad(String),
    FontSubset(String),
    InvalidWatermarkSpec(String),
    DocumentOpen(String),
    ResourceRegistration(String),
    Save(String),
    Encoding(String),
    Io(std::io::Error),
}

/// Process-level status codes returned across the C and Python boundaries.
pub mod status {
    pub const OK: i32 = 0;
    pub const INPUT_NOT_FOUND: i32 = 1;
    pub const FONT_NOT_FOUND: i32 = 2;
    pub const FONT_FAILURE: i32 = 3;
    pub const SAVE_FAILURE: i32 = 4;
    pub const INVALID_ENCODING: i32 = 5;
    pub const INVALID_SPEC: i32 = 6;
    pub const DOCUMENT_OPEN_FAILURE: i32 = 7;
    pub const RESOURCE_FAILURE: i32 = 8;
    pub const IO_FAILURE: i32 = 9;
}

impl WatermarkError {
    pub fn status_code(&self) -> i32 {
        match self {
            WatermarkError::InputNotFound(_) => status::INPUT_NOT_FOUND,
            WatermarkError::FontNotFound(_) => status::FONT_NOT_FOUND,
            WatermarkError::FontLoad(_) | WatermarkError::FontSubset(_) => status::FONT_FAILURE,
            WatermarkError::Save(_) => status::SAVE_FAILURE,
            WatermarkError::Encoding(_) => status::INVALID_ENCODING,
            WatermarkError::InvalidWatermarkSpec(_) => status::INVALID_SPEC,
            WatermarkError::DocumentOpen(_) => status::DOCUMENT_OPEN_FAILURE,
            WatermarkError::ResourceRegistration(_) => status::RESOURCE_FAILURE,
            WatermarkError::Io(_) => status::IO_FAILURE,
        }
    }
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkError::InputNotFound(path) => {
                write!(f, "input document not found: {}", path.display())
            }
            WatermarkError::FontNotFound(path) => {
                write!(f, "font file not found: {}", path.display())
            }
            WatermarkError::FontLoad(message) => write!(f, "font load error: {}", message),
            WatermarkError::FontSubset(message) => write!(f, "font subset error: {}", message),
            WatermarkError::InvalidWatermarkSpec(message) => {
                write!(f, "invalid watermark spec: {}", message)
            }
            WatermarkError::DocumentOpen(message) => {
                write!(f, "document open error: {}", message)
            }
            WatermarkError::ResourceRegistration(message) => {
                write!(f, "resource registration error: {}", message)
            }
            WatermarkError::Save(message) => write!(f, "save error: {}", message),
            WatermarkError::Encoding(message) => write!(f, "invalid argument encoding: {}", message),
            WatermarkError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for WatermarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatermarkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WatermarkError {
    fn from(value: std::io::Error) -> Self {
        WatermarkError::Io(value)
    }
}

impl From<std::str::Utf8Error> for WatermarkError {
    fn from(value: std::str::Utf8Error) -> Self {
        WatermarkError::Encoding(value.to_string())
    }
}
