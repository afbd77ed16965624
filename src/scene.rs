use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn default_gender() -> String {
    "none".to_string()
}

/// One second of the video timeline, as produced by the script agent.
///
/// `sec` is the scene's identity: 1-based, unique and contiguous within a
/// batch. `url` stays empty until generation succeeds; the stitcher never
/// mutates a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub sec: u32,
    #[serde(rename = "scene")]
    pub description: String,
    #[serde(default)]
    pub dialog: String,
    #[serde(default)]
    pub non_dialog: String,
    #[serde(default = "default_gender")]
    pub gender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Scene {
    /// Stable content fingerprint of the scene description.
    ///
    /// Usable as a cache/dedup key by callers and for unique temp-file
    /// naming. Generation itself never consults a cache.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.description.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Top-level envelope returned by the script agent: `{"script": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(rename = "script")]
    pub scenes: Vec<Scene>,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Checks the batch invariants: non-empty, and `sec` values unique and
/// contiguous starting at 1.
pub fn validate_batch(scenes: &[Scene]) -> Result<()> {
    if scenes.is_empty() {
        return Err(PipelineError::Validation(
            "scene list is empty".to_string(),
        ));
    }

    let mut indices: Vec<u32> = scenes.iter().map(|s| s.sec).collect();
    indices.sort_unstable();

    for (pos, sec) in indices.iter().enumerate() {
        let expected = pos as u32 + 1;
        if *sec == expected {
            continue;
        }
        if pos > 0 && *sec == indices[pos - 1] {
            return Err(PipelineError::Validation(format!(
                "duplicate scene index {}",
                sec
            )));
        }
        return Err(PipelineError::Validation(format!(
            "scene indices must be contiguous starting at 1 (expected {}, found {})",
            expected, sec
        )));
    }

    Ok(())
}
