use thiserror::Error;

/// Failures surfaced by the trainer. All of them are fatal: nothing in the
/// training loop can recover from a bad shape, a broken corpus file, or an
/// undersized dataset, so they are reported instead of propagated as NaNs
/// or silent no-ops.
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("malformed data: {0}")]
    Format(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
