pub mod api;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod generator;
pub mod pipeline;
pub mod retry;
pub mod scene;
pub mod stitcher;
