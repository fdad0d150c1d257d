use thiserror::Error;

use crate::kospel::FormatError;

/// Failures that end a run with a non-zero exit.
///
/// Everything recoverable (stale session, missing registers, absent cache or
/// log) is handled inside the workflow and never surfaces here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid register value: {0}")]
    Format(#[from] FormatError),

    #[error("could not append to log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
}
