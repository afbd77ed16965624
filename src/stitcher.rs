use crate::error::PipelineError;
use crate::ffmpeg;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One successfully generated clip, in scene order.
#[derive(Debug, Clone)]
pub struct ClipSource {
    pub sequence_index: u32,
    pub url: String,
    /// Scene content fingerprint; keeps temp-file names unique per clip.
    pub fingerprint: String,
}

/// Seam between the orchestrator and the merge backend.
#[async_trait]
pub trait MergeClips: Send + Sync {
    /// Downloads the sources into `workdir` and concatenates the survivors,
    /// in source order, into `output`. The caller owns `workdir` cleanup.
    async fn stitch(
        &self,
        sources: &[ClipSource],
        workdir: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError>;
}

pub struct Stitcher {
    client: reqwest::Client,
}

impl Stitcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Downloads every source concurrently. Individual failures are logged
    /// and excluded; the returned paths follow the original source order,
    /// never download-completion order.
    async fn fetch_clips(
        &self,
        sources: &[ClipSource],
        workdir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut tasks = JoinSet::new();
        for (pos, source) in sources.iter().enumerate() {
            let client = self.client.clone();
            let url = source.url.clone();
            let dest = workdir.join(clip_file_name(source));
            tasks.spawn(async move {
                let result = download_clip(&client, &url, &dest).await;
                (pos, dest, result)
            });
        }

        let mut fetched: Vec<Option<PathBuf>> = vec![None; sources.len()];
        while let Some(joined) = tasks.join_next().await {
            let (pos, dest, result) = joined.map_err(|e| PipelineError::Stitch(e.to_string()))?;
            match result {
                Ok(()) => fetched[pos] = Some(dest),
                Err(err) => {
                    warn!(url = %sources[pos].url, %err, "clip download failed, excluding");
                }
            }
        }

        let ordered: Vec<PathBuf> = fetched.into_iter().flatten().collect();
        if ordered.is_empty() {
            return Err(PipelineError::Stitch(
                "no clips could be downloaded".to_string(),
            ));
        }
        info!(
            fetched = ordered.len(),
            requested = sources.len(),
            "clip downloads finished"
        );
        Ok(ordered)
    }

    /// Drops downloaded files that ffprobe cannot open.
    async fn probe_clips(&self, paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, PipelineError> {
        let mut usable = Vec::with_capacity(paths.len());
        for path in paths {
            match ffmpeg::ffprobe_duration_seconds(&path).await {
                Ok(duration) => {
                    info!(path = %path.display(), duration, "clip opened");
                    usable.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "clip failed to open, excluding");
                }
            }
        }
        if usable.is_empty() {
            return Err(PipelineError::Stitch(
                "no downloaded clip could be opened".to_string(),
            ));
        }
        Ok(usable)
    }
}

#[async_trait]
impl MergeClips for Stitcher {
    async fn stitch(
        &self,
        sources: &[ClipSource],
        workdir: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if sources.is_empty() {
            return Err(PipelineError::Stitch(
                "no clip sources to stitch".to_string(),
            ));
        }

        let fetched = self.fetch_clips(sources, workdir).await?;
        let usable = self.probe_clips(fetched).await?;

        let list_path = workdir.join("concat_list.txt");
        fs::write(&list_path, concat_list(&usable)).await?;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        info!(clips = usable.len(), output = %output.display(), "concatenating clips");
        let ok = ffmpeg::ffmpeg_concat_videos(&list_path, output)
            .await
            .map_err(|e| PipelineError::Stitch(e.to_string()))?;
        if !ok {
            return Err(PipelineError::Stitch(format!(
                "ffmpeg produced no output at {}",
                output.display()
            )));
        }

        Ok(output.to_path_buf())
    }
}

fn clip_file_name(source: &ClipSource) -> String {
    let tag = source.fingerprint.get(..8).unwrap_or(&source.fingerprint);
    format!("clip_{:04}_{}.mp4", source.sequence_index, tag)
}

fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.display()))
        .collect()
}

async fn download_clip(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(), PipelineError> {
    let download_err = |reason: String| PipelineError::Download {
        url: url.to_string(),
        reason,
    };

    let mut resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_err(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(download_err(format!("HTTP {}", resp.status().as_u16())));
    }

    let mut file = fs::File::create(dest).await?;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| download_err(e.to_string()))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}
