//! Library error type shared by the store, transcoder, sink and library.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("photo already exists: {0}")]
    DuplicatePhoto(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conversion failed for {filename}: {reason}")]
    ConversionFailed { filename: String, reason: String },

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn conversion(filename: impl Into<String>, reason: impl ToString) -> Self {
        Error::ConversionFailed {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_message() {
        let err = Error::conversion("a.jpg", "truncated header");
        assert_eq!(err.to_string(), "conversion failed for a.jpg: truncated header");
    }
}
