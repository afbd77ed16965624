use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::generator::{ClipGenerator, GenerateClip};
use crate::scene::{self, Scene};
use crate::stitcher::{ClipSource, MergeClips, Stitcher};
use anyhow::Context;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Per-scene result, one entry per input scene in input order.
#[derive(Debug, Clone, Serialize)]
pub struct SceneOutcome {
    pub sequence_index: u32,
    pub clip_url: Option<String>,
    pub error: Option<String>,
}

/// Final result of one pipeline run. Immutable after construction;
/// serializable so a transport layer can hand it straight to callers.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub succeeded: bool,
    pub output_path: Option<PathBuf>,
    pub outcomes: Vec<SceneOutcome>,
    pub error: Option<String>,
}

impl PipelineResult {
    fn failed(outcomes: Vec<SceneOutcome>, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output_path: None,
            outcomes,
            error: Some(error.into()),
        }
    }
}

/// Owns the generation fan-out and the ordered merge for one deliverable.
///
/// Construct once and reuse across runs; the HTTP connection pool is shared
/// between the generator and the stitcher. Dropping the pipeline releases
/// pooled connections.
pub struct VideoPipeline {
    config: PipelineConfig,
    generator: Arc<dyn GenerateClip>,
    stitcher: Arc<dyn MergeClips>,
}

impl VideoPipeline {
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        let generator = Arc::new(ClipGenerator::new(client.clone(), &config));
        let stitcher = Arc::new(Stitcher::new(client));
        Ok(Self::with_components(config, generator, stitcher))
    }

    /// Assembles a pipeline from explicit components. Tests use this to
    /// substitute fakes behind the trait seams.
    pub fn with_components(
        config: PipelineConfig,
        generator: Arc<dyn GenerateClip>,
        stitcher: Arc<dyn MergeClips>,
    ) -> Self {
        Self {
            config,
            generator,
            stitcher,
        }
    }

    /// Runs the whole pipeline: validate, generate with bounded concurrency,
    /// aggregate in scene order, stitch, clean up.
    ///
    /// Per-scene failures are recorded in the outcomes and never escape this
    /// method; the returned result carries the run-level verdict.
    pub async fn generate_and_stitch(
        &self,
        scenes: Vec<Scene>,
        output: Option<PathBuf>,
    ) -> PipelineResult {
        if let Err(err) = scene::validate_batch(&scenes) {
            let message = err.to_string();
            let outcomes = scenes
                .iter()
                .map(|s| SceneOutcome {
                    sequence_index: s.sec,
                    clip_url: None,
                    error: Some(format!("batch rejected: {}", message)),
                })
                .collect();
            return PipelineResult::failed(outcomes, message);
        }

        let workdir = self.config.temp_dir.join(run_dir_name());
        if let Err(err) = fs::create_dir_all(&workdir).await {
            let message = format!("failed to create working directory: {}", err);
            let outcomes = scenes
                .iter()
                .map(|s| SceneOutcome {
                    sequence_index: s.sec,
                    clip_url: None,
                    error: Some(message.clone()),
                })
                .collect();
            return PipelineResult::failed(outcomes, message);
        }

        let result = self.run(scenes, output, &workdir).await;
        cleanup_workdir(&workdir).await;
        result
    }

    async fn run(
        &self,
        scenes: Vec<Scene>,
        output: Option<PathBuf>,
        workdir: &Path,
    ) -> PipelineResult {
        let total = scenes.len();
        info!(
            scenes = total,
            max_workers = self.config.max_workers,
            "starting generation fan-out"
        );

        let outcomes = self.generate_all(scenes).await;

        let mut sources: Vec<ClipSource> = outcomes
            .iter()
            .filter_map(|(scene, result)| {
                result.as_ref().ok().map(|url| ClipSource {
                    sequence_index: scene.sec,
                    url: url.clone(),
                    fingerprint: scene.fingerprint(),
                })
            })
            .collect();
        sources.sort_by_key(|s| s.sequence_index);

        let outcomes: Vec<SceneOutcome> = outcomes
            .into_iter()
            .map(|(scene, result)| SceneOutcome {
                sequence_index: scene.sec,
                clip_url: result.as_ref().ok().cloned(),
                error: result.err().map(|e| e.to_string()),
            })
            .collect();

        info!(
            succeeded = sources.len(),
            total,
            "generation finished"
        );

        if sources.is_empty() {
            return PipelineResult::failed(outcomes, "no scenes generated successfully");
        }

        let output_path = output.unwrap_or_else(|| self.default_output_path());
        match self.stitcher.stitch(&sources, workdir, &output_path).await {
            Ok(path) => {
                info!(output = %path.display(), "pipeline run complete");
                PipelineResult {
                    succeeded: true,
                    output_path: Some(path),
                    outcomes,
                    error: None,
                }
            }
            Err(err) => PipelineResult::failed(outcomes, err.to_string()),
        }
    }

    /// Fan-out with bounded concurrency; fan-in preserving input order. One
    /// scene's failure never aborts its siblings.
    async fn generate_all(
        &self,
        scenes: Vec<Scene>,
    ) -> Vec<(Scene, Result<String, PipelineError>)> {
        let limiter = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let job_timeout = self.config.job_timeout();
        let budget_secs = self.config.job_timeout_secs;

        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<(Scene, Result<String, PipelineError>)>> =
            scenes.iter().map(|_| None).collect();

        for (pos, scene) in scenes.into_iter().enumerate() {
            let limiter = Arc::clone(&limiter);
            let generator = Arc::clone(&self.generator);
            tasks.spawn(async move {
                let permit = limiter.acquire_owned().await;
                let result = match permit {
                    Ok(_permit) => {
                        match tokio::time::timeout(job_timeout, generator.generate(&scene)).await {
                            Ok(result) => result,
                            Err(_) => Err(PipelineError::Timeout {
                                sequence_index: scene.sec,
                                budget_secs,
                            }),
                        }
                    }
                    Err(err) => Err(PipelineError::Generation {
                        sequence_index: scene.sec,
                        attempts: 0,
                        reason: format!("worker limiter closed: {}", err),
                    }),
                };
                (pos, scene, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pos, scene, result)) => {
                    if let Err(err) = &result {
                        warn!(sequence_index = scene.sec, %err, "scene failed");
                    }
                    slots[pos] = Some((scene, result));
                }
                Err(err) => {
                    warn!(%err, "generation task aborted");
                }
            }
        }

        slots.into_iter().flatten().collect()
    }

    fn default_output_path(&self) -> PathBuf {
        let name = format!("generated_video_{}.mp4", Utc::now().format("%Y%m%d_%H%M%S"));
        self.config.output_dir.join(name)
    }
}

fn run_dir_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("clipweave_run_{}_{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Best-effort removal of the per-run working directory. A file still held
/// by the encoder is logged and skipped, not raised.
async fn cleanup_workdir(workdir: &Path) {
    if !workdir.exists() {
        return;
    }

    for entry in WalkDir::new(workdir).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "skipping unreadable temp entry");
                continue;
            }
        };
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        };
        if let Err(err) = removed {
            warn!(path = %path.display(), %err, "could not delete temp entry");
        }
    }

    if let Err(err) = fs::remove_dir(workdir).await {
        warn!(path = %workdir.display(), %err, "could not delete working directory");
    }
}
