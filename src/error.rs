//! Structured error type shared by every public operation.
//!
//! Unlike a bare `thiserror` enum, [`Error`] carries the full diagnostic
//! envelope the core is required to surface: which component and operation
//! failed, an optional underlying cause, free-form metadata, a timestamp, and
//! two policy flags (`retryable`, `recoverable`) that callers and recovery
//! policies can act on without string-matching the message.

use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Result type alias for `annidx` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error taxonomy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A vector crossing a public boundary did not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension supplied.
        actual: usize,
    },

    /// Insertion of an id already present in the index.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// Lookup (delete, etc.) of an id that is not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation that requires a non-empty index was attempted on an empty one.
    #[error("index is empty")]
    Empty,

    /// Operation requires a trained quantizer/coarse index and none is available.
    #[error("not trained")]
    NotTrained,

    /// Quantizer or coarse-index training failed.
    #[error("training failed: {0}")]
    TrainingFailed(String),

    /// Vector compression failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Vector decompression failed.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// A persisted file failed integrity validation.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// A persisted file declares a format version this build cannot read.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// The operation was canceled via its `CancellationToken`.
    #[error("canceled")]
    Canceled,

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    IoError(String),

    /// Memory-mapping specific failure.
    #[error("memory mapping error: {0}")]
    MemoryMappingError(String),

    /// The index has been closed.
    #[error("closed")]
    Closed,
}

/// A structured, contextful error returned from every public operation.
#[derive(Debug)]
pub struct Error {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// Component that raised the error (e.g. `"hnsw"`, `"ivfpq"`, `"quantizer"`).
    pub component: &'static str,
    /// Operation being performed (e.g. `"insert"`, `"search"`, `"save_to_disk"`).
    pub operation: &'static str,
    /// Free-form diagnostic metadata.
    pub metadata: Vec<(String, String)>,
    /// Underlying cause, if any.
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// When the error was created.
    pub timestamp: SystemTime,
    /// Whether re-invoking the same operation might succeed.
    pub retryable: bool,
    /// Whether a recovery policy may retry with reduced complexity.
    pub recoverable: bool,
}

impl Error {
    /// Creates a new error with default policy flags (non-retryable, non-recoverable).
    #[must_use]
    pub fn new(kind: ErrorKind, component: &'static str, operation: &'static str) -> Self {
        let (retryable, recoverable) = default_policy(&kind);
        Self {
            kind,
            component,
            operation,
            metadata: Vec::new(),
            cause: None,
            timestamp: SystemTime::now(),
            retryable,
            recoverable,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attaches a metadata key/value pair.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Overrides the retryable flag.
    #[must_use]
    pub const fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Overrides the recoverable flag.
    #[must_use]
    pub const fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

/// Conservative default retry/recover policy by kind; callers may override.
fn default_policy(kind: &ErrorKind) -> (bool, bool) {
    match kind {
        ErrorKind::Canceled | ErrorKind::IoError(_) => (true, false),
        ErrorKind::TrainingFailed(_) => (true, true),
        ErrorKind::CorruptFile(_)
        | ErrorKind::UnsupportedVersion(_)
        | ErrorKind::Closed
        | ErrorKind::DuplicateId(_)
        | ErrorKind::DimensionMismatch { .. }
        | ErrorKind::InvalidConfig(_)
        | ErrorKind::NotFound(_)
        | ErrorKind::Empty
        | ErrorKind::NotTrained
        | ErrorKind::CompressionFailed(_)
        | ErrorKind::DecompressionFailed(_)
        | ErrorKind::MemoryMappingError(_) => (false, false),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}] {}", self.component, self.operation, self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError(err.to_string()), "io", "io").with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_component_and_operation() {
        let err = Error::new(ErrorKind::Empty, "hnsw", "search");
        assert_eq!(err.to_string(), "[hnsw::search] index is empty");
    }

    #[test]
    fn io_error_is_retryable_not_recoverable() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: Error = io.into();
        assert!(err.retryable);
        assert!(!err.recoverable);
    }

    #[test]
    fn training_failed_is_recoverable() {
        let err = Error::new(ErrorKind::TrainingFailed("no data".into()), "quantizer", "train");
        assert!(err.recoverable);
    }

    #[test]
    fn metadata_and_cause_builders_chain() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::new(ErrorKind::CorruptFile("bad magic".into()), "hnsw", "load")
            .with_cause(cause)
            .with_metadata("path", "/tmp/index.bin");
        assert_eq!(err.metadata[0].0, "path");
        assert!(err.cause.is_some());
    }
}
