//! Thin wrappers over the ffmpeg/ffprobe binaries. The encode step runs in a
//! child process, off the async scheduler.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let status = cmd.status().await.context("Command execution failed")?;
    if !status.success() {
        return Err(anyhow::anyhow!("Command failed: {:?}", args));
    }

    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Probes a media file's duration; also serves as the decode check for
/// downloaded clips, since an unreadable file has no duration.
pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.0 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Concatenates the clips named in `list_txt` (ffmpeg concat demuxer format)
/// into one continuous H.264/AAC mp4.
pub async fn ffmpeg_concat_videos(list_txt: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}
