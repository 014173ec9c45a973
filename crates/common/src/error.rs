use thiserror::Error;

/// Errors shared by the workspace crates
#[derive(Error, Debug)]
pub enum CommonError {
    /// Hex decoding errors
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Fixed-size value with the wrong byte length
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CommonError>;
