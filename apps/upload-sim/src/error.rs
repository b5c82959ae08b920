//! Simulator error types.

/// Errors produced while running a simulated upload.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid upload options: {0}")]
    Options(#[from] chunkflow_protocol::OptionsError),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkflow_transfer::TransferError),

    #[error("invalid simulator config: {0}")]
    Config(String),

    #[error("usage: {0}")]
    Usage(String),
}
