use anyhow::{Context, Result};
use clipweave::config::PipelineConfig;
use clipweave::ffmpeg;
use clipweave::pipeline::VideoPipeline;
use clipweave::scene::Script;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(script_path) = args.next() else {
        eprintln!("usage: clipweave <script.json> [output.mp4]");
        std::process::exit(2);
    };
    let output = args.next().map(PathBuf::from);

    if !ffmpeg::check_ffmpeg().await {
        eprintln!("[WARNING] FFmpeg not found in PATH. Please install FFmpeg.");
    }

    let config = PipelineConfig::load_or_default("config.json").await?;

    let raw = tokio::fs::read_to_string(&script_path)
        .await
        .with_context(|| format!("Failed to read script: {}", script_path))?;
    let script = Script::from_json(&raw)?;

    let pipeline = VideoPipeline::new(config)?;
    let result = pipeline.generate_and_stitch(script.scenes, output).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.succeeded {
        std::process::exit(1);
    }
    Ok(())
}
