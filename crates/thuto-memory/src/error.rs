use std::time::Duration;

/// Coarse classification of [`MemoryError`] used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-correctable; persisted state is untouched.
    Input,
    /// The affected subject's index refuses writes until rebuilt.
    Consistency,
    /// Retry later or fix configuration.
    Resource,
    Timeout,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt file {path}: {reason}")]
    CorruptFile { path: String, reason: String },

    #[error("cannot decode {path}: {reason}")]
    Encoding { path: String, reason: String },

    #[error("invalid chunk config: overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidChunkConfig { chunk_size: usize, overlap: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("dimension mismatch in subject {subject}: index has {expected}, got {actual}")]
    DimensionMismatch {
        subject: String,
        expected: usize,
        actual: usize,
    },

    #[error("corrupt index for subject {subject}: {reason}")]
    CorruptIndex { subject: String, reason: String },

    #[error("writes to subject {subject} are halted until rebuild: {reason}")]
    WritesHalted { subject: String, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(#[from] thuto_embed::EmbedError),

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_)
            | Self::CorruptFile { .. }
            | Self::Encoding { .. }
            | Self::InvalidChunkConfig { .. }
            | Self::InvalidArgument(_)
            | Self::FileTooLarge { .. } => ErrorKind::Input,
            Self::DimensionMismatch { .. } | Self::CorruptIndex { .. } | Self::WritesHalted { .. } => {
                ErrorKind::Consistency
            }
            Self::Embedding(_) | Self::UnknownSubject(_) => ErrorKind::Resource,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corrupt_file(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::CorruptFile {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt_index(subject: &str, reason: impl ToString) -> Self {
        Self::CorruptIndex {
            subject: subject.to_owned(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
