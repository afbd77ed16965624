use thiserror::Error;

/// Error taxonomy for the generation/stitching pipeline.
///
/// Per-scene failures (`Generation`, `Timeout`, `Download`) are recorded in
/// the run outcomes and never abort sibling scenes. `Validation` and `Stitch`
/// are fatal to the whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("scene {sequence_index}: generation failed after {attempts} attempts: {reason}")]
    Generation {
        sequence_index: u32,
        attempts: u32,
        reason: String,
    },

    #[error("scene {sequence_index}: generation exceeded the {budget_secs}s time budget")]
    Timeout {
        sequence_index: u32,
        budget_secs: u64,
    },

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("stitch failed: {0}")]
    Stitch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
