use thiserror::Error;

/// Library-wide error taxonomy for argument validation, model/profile state,
/// and file-format failures.
///
/// Per-target scoring failures are not represented here: a pipeline stage
/// that cannot score a particular target simply emits no [`crate::alignment::Hit`]
/// for it and the target is still tallied in the search counters, per the
/// pipeline's error-handling policy.
#[derive(Debug, Error)]
pub enum PHmmError {
    #[error("alphabet mismatch: expected {expected}, found {found}")]
    AlphabetMismatch { expected: String, found: String },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("model has no {selector} cutoffs")]
    MissingCutoffs { selector: &'static str },

    #[error("profile used before configure()")]
    Unconfigured,

    #[error("model size mismatch: {a} != {b}")]
    ModelSizeMismatch { a: usize, b: usize },

    #[error("cannot build a model with no match columns")]
    EmptyModel,

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("endian mismatch in binary file")]
    EndianMismatch,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PHmmError>;
