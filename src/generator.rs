use crate::api::ltx::{LtxClient, session_hash};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::scene::Scene;
use async_trait::async_trait;
use tracing::{debug, info};

/// Seam between the orchestrator and the clip-producing backend.
#[async_trait]
pub trait GenerateClip: Send + Sync {
    /// Resolves a scene to a remote clip URL, or fails after exhausting
    /// retries.
    async fn generate(&self, scene: &Scene) -> Result<String, PipelineError>;
}

/// Generates one clip per scene against the external queue/event-stream
/// service, with per-attempt correlation tokens and exponential backoff.
pub struct ClipGenerator {
    api: LtxClient,
    model: String,
    guidance: String,
    steps: u32,
    policy: RetryPolicy,
}

impl ClipGenerator {
    /// The client is shared with other pipeline components; each generate
    /// call gets its own session hash and event-stream subscription, so
    /// concurrent calls do not cross-talk.
    pub fn new(client: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            api: LtxClient::new(client, config.base_url.clone()),
            model: config.model.clone(),
            guidance: config.guidance.clone(),
            steps: config.steps,
            policy: config.retry_policy(),
        }
    }

    async fn attempt(&self, scene: &Scene) -> anyhow::Result<String> {
        let hash = session_hash();
        debug!(
            sequence_index = scene.sec,
            session_hash = %hash,
            "submitting generation request"
        );
        self.api
            .submit(&hash, &scene.description, &self.model, &self.guidance, self.steps)
            .await?;
        info!(sequence_index = scene.sec, "clip generation queued");
        self.api.await_completion(&hash).await
    }
}

#[async_trait]
impl GenerateClip for ClipGenerator {
    async fn generate(&self, scene: &Scene) -> Result<String, PipelineError> {
        let url = retry_with_backoff(&self.policy, "clip generation", |_attempt| {
            self.attempt(scene)
        })
        .await
        .map_err(|(err, attempts)| PipelineError::Generation {
            sequence_index: scene.sec,
            attempts,
            reason: err.to_string(),
        })?;

        info!(sequence_index = scene.sec, url = %url, "clip generated");
        Ok(url)
    }
}
