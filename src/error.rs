//! Handler error taxonomy.
//!
//! Every handler returns `Result<Value, HandlerError>`. The dispatcher maps
//! each variant to exactly one JSON-RPC error code, so cancellation, bad
//! parameters, and collaborator failures are distinguishable on the wire
//! without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The task's cancellation flag was observed at a progress report.
    #[error("task cancelled")]
    Cancelled,

    /// The request's params were missing or of the wrong shape.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A collaborator (external tool or library) failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// True for the dedicated cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HandlerError::Cancelled)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidParams(e.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        HandlerError::Other(e.into())
    }
}

impl From<mupdf::Error> for HandlerError {
    fn from(e: mupdf::Error) -> Self {
        HandlerError::Other(anyhow::anyhow!("mupdf: {e}"))
    }
}

impl From<image::ImageError> for HandlerError {
    fn from(e: image::ImageError) -> Self {
        HandlerError::Other(anyhow::anyhow!("image: {e}"))
    }
}
