use crate::error::Result;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

fn default_base_url() -> String {
    "https://ltx-video.com/api/video/gen".to_string()
}

fn default_model() -> String {
    "epiCRealism".to_string()
}

fn default_steps() -> u32 {
    4
}

fn default_max_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated_videos")
}

/// Tunables for a pipeline run. Every field has a default, so a missing
/// config file still yields a working pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the external clip-generation service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub guidance: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Upper bound on generation jobs in flight at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Total generation attempts per scene (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Hard wall-clock budget for one scene's generation, retries included.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            guidance: String::new(),
            steps: default_steps(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            job_timeout_secs: default_job_timeout_secs(),
            temp_dir: default_temp_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl PipelineConfig {
    /// Loads config from a JSON file, falling back to defaults when the file
    /// does not exist. A present-but-malformed file is an error.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}
