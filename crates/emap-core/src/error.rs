use thiserror::Error;

/// Error taxonomy for the disaggregation engine.
///
/// Variant groups line up with the kinds in the error handling design:
/// configuration errors are fatal at startup, input data errors are
/// usually recoverable per-row, invariant violations are always fatal,
/// I/O errors are fatal unless explicitly noted by the caller, and
/// cancellation is a clean (non-error) abort path.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input data: {0}")]
    InputDataError(String),

    #[error("Point emissions ({point_sum}) exceed national total ({total}) for {key}")]
    PointExceedsTotal { key: String, point_sum: f64, total: f64 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Duplicate emission key in collection: {0}")]
    DuplicateKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
