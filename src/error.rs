//! Error types for xl.meta operations.
//!
//! Decoding internally uses `anyhow` for context-rich messages; everything
//! leaving the crate is converted into [`Error`] so callers can tell routine
//! misses (`FileNotFound`, `VersionNotFound`) apart from integrity loss
//! (`CorruptMetadata`).

use thiserror::Error;

/// Result type alias for xl.meta operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Negative total size handed to the part-size partitioner.
    #[error("invalid argument")]
    InvalidArgument,

    #[error("part size cannot be zero or negative")]
    PartSizeZero,

    #[error("part index must be at least 1")]
    PartSizeIndex,

    /// Buffer failed structural validation. Never repaired in place.
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("file not found")]
    FileNotFound,

    #[error("maximum number of versions exceeded (limit {max})")]
    MaxVersionsExceeded { max: usize },

    #[error("invalid erasure parameters: data {data}, parity {parity}")]
    InvalidErasure { data: i32, parity: i32 },

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Configuration document could not be parsed.
    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to encode metadata: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a decode failure, keeping the full context chain.
    pub(crate) fn corrupt(err: anyhow::Error) -> Self {
        Self::CorruptMetadata(format!("{:#}", err))
    }

    pub(crate) fn encode(err: anyhow::Error) -> Self {
        Self::Encode(format!("{:#}", err))
    }

    /// Expected, non-fatal miss produced by normal operation.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound | Self::VersionNotFound(_))
    }

    /// The metadata is unreadable and has to be healed from another replica.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptMetadata(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_kinds() {
        assert!(Error::FileNotFound.is_not_found());
        assert!(Error::VersionNotFound("null".into()).is_not_found());
        assert!(!Error::CorruptMetadata("x".into()).is_not_found());
    }

    #[test]
    fn test_config_error_is_routine() {
        let err = Error::Config("expected value".into());
        assert!(!err.is_corrupt());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "invalid config: expected value");
    }

    #[test]
    fn test_corrupt_keeps_context_chain() {
        let inner = anyhow::anyhow!("truncated uint32").context("failed to read CRC");
        let err = Error::corrupt(inner);
        assert!(err.is_corrupt());
        let msg = err.to_string();
        assert!(msg.contains("failed to read CRC"), "{}", msg);
        assert!(msg.contains("truncated uint32"), "{}", msg);
    }

    #[test]
    fn test_max_versions_message() {
        let err = Error::MaxVersionsExceeded { max: 10 };
        assert!(err.to_string().contains("limit 10"));
    }
}
