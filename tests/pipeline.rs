use async_trait::async_trait;
use clipweave::config::PipelineConfig;
use clipweave::error::PipelineError;
use clipweave::generator::GenerateClip;
use clipweave::pipeline::VideoPipeline;
use clipweave::scene::Scene;
use clipweave::stitcher::{ClipSource, MergeClips};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn scene(sec: u32) -> Scene {
    Scene {
        sec,
        description: format!("second {} of the story", sec),
        dialog: String::new(),
        non_dialog: String::new(),
        gender: "none".to_string(),
        url: None,
    }
}

#[derive(Default)]
struct FakeGenerator {
    fail: HashSet<u32>,
    slow: HashSet<u32>,
    slow_for: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[async_trait]
impl GenerateClip for FakeGenerator {
    async fn generate(&self, scene: &Scene) -> Result<String, PipelineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.slow.contains(&scene.sec) {
            tokio::time::sleep(self.slow_for).await;
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&scene.sec) {
            return Err(PipelineError::Generation {
                sequence_index: scene.sec,
                attempts: 3,
                reason: "synthetic transport failure".to_string(),
            });
        }
        Ok(format!("https://cdn.example/clip_{}.mp4", scene.sec))
    }
}

#[derive(Default)]
struct RecordingStitcher {
    calls: Mutex<Vec<Vec<u32>>>,
    fail: bool,
}

impl RecordingStitcher {
    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MergeClips for RecordingStitcher {
    async fn stitch(
        &self,
        sources: &[ClipSource],
        workdir: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        self.calls
            .lock()
            .unwrap()
            .push(sources.iter().map(|s| s.sequence_index).collect());
        // Leave droppings behind so cleanup has something to do.
        std::fs::write(workdir.join("clip_0001_deadbeef.mp4"), b"x").unwrap();
        if self.fail {
            return Err(PipelineError::Stitch("synthetic encode failure".to_string()));
        }
        Ok(output.to_path_buf())
    }
}

struct Harness {
    pipeline: VideoPipeline,
    generator: Arc<FakeGenerator>,
    stitcher: Arc<RecordingStitcher>,
    temp: TempDir,
}

fn harness(generator: FakeGenerator, stitcher: RecordingStitcher) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.temp_dir = temp.path().to_path_buf();
    config.output_dir = temp.path().join("out");
    harness_with_config(config, generator, stitcher, temp)
}

fn harness_with_config(
    config: PipelineConfig,
    generator: FakeGenerator,
    stitcher: RecordingStitcher,
    temp: TempDir,
) -> Harness {
    let generator = Arc::new(generator);
    let stitcher = Arc::new(stitcher);
    let pipeline = VideoPipeline::with_components(
        config,
        Arc::clone(&generator) as Arc<dyn GenerateClip>,
        Arc::clone(&stitcher) as Arc<dyn MergeClips>,
    );
    Harness {
        pipeline,
        generator,
        stitcher,
        temp,
    }
}

fn temp_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            // The output dir is a deliberate side effect, not run temp state.
            e.as_ref().unwrap().file_name() != "out"
        })
        .count()
}

#[tokio::test]
async fn outcomes_cover_every_scene_and_clip_order_is_restored() {
    let h = harness(
        FakeGenerator {
            fail: HashSet::from([3]),
            slow: HashSet::from([1]),
            slow_for: Duration::from_millis(120),
            ..Default::default()
        },
        RecordingStitcher::default(),
    );

    // Deliberately out of order on input; scene 1 finishes last.
    let scenes = vec![scene(2), scene(1), scene(4), scene(3)];
    let result = h.pipeline.generate_and_stitch(scenes, None).await;

    assert!(result.succeeded);
    assert!(result.output_path.is_some());
    assert_eq!(result.outcomes.len(), 4);

    let indices: HashSet<u32> = result.outcomes.iter().map(|o| o.sequence_index).collect();
    assert_eq!(indices, HashSet::from([1, 2, 3, 4]));

    let failed: Vec<u32> = result
        .outcomes
        .iter()
        .filter(|o| o.error.is_some())
        .map(|o| o.sequence_index)
        .collect();
    assert_eq!(failed, vec![3]);

    let calls = h.stitcher.calls.lock().unwrap();
    assert_eq!(*calls, vec![vec![1, 2, 4]]);
}

#[tokio::test]
async fn all_scenes_failing_skips_the_stitcher() {
    let h = harness(
        FakeGenerator {
            fail: HashSet::from([1, 2, 3]),
            ..Default::default()
        },
        RecordingStitcher::default(),
    );

    let result = h
        .pipeline
        .generate_and_stitch(vec![scene(1), scene(2), scene(3)], None)
        .await;

    assert!(!result.succeeded);
    assert!(result.output_path.is_none());
    assert_eq!(result.outcomes.len(), 3);
    assert!(result.outcomes.iter().all(|o| o.error.is_some()));
    assert!(result.error.unwrap().contains("no scenes"));
    assert_eq!(h.stitcher.call_count(), 0);
}

#[tokio::test]
async fn empty_batch_is_rejected_before_any_work() {
    let h = harness(FakeGenerator::default(), RecordingStitcher::default());

    let result = h.pipeline.generate_and_stitch(Vec::new(), None).await;

    assert!(!result.succeeded);
    assert!(result.error.unwrap().contains("empty"));
    assert_eq!(h.stitcher.call_count(), 0);
}

#[tokio::test]
async fn duplicate_indices_are_rejected_with_per_scene_outcomes() {
    let h = harness(FakeGenerator::default(), RecordingStitcher::default());

    let result = h
        .pipeline
        .generate_and_stitch(vec![scene(1), scene(2), scene(2)], None)
        .await;

    assert!(!result.succeeded);
    assert_eq!(result.outcomes.len(), 3);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.error.as_deref().unwrap().contains("batch rejected")));
    assert_eq!(h.stitcher.call_count(), 0);
}

#[tokio::test]
async fn stitch_failure_fails_the_run_but_keeps_outcomes() {
    let h = harness(
        FakeGenerator::default(),
        RecordingStitcher {
            fail: true,
            ..Default::default()
        },
    );

    let result = h
        .pipeline
        .generate_and_stitch(vec![scene(1), scene(2)], None)
        .await;

    assert!(!result.succeeded);
    assert!(result.output_path.is_none());
    assert_eq!(result.outcomes.len(), 2);
    assert!(result.error.unwrap().contains("encode failure"));
    assert_eq!(h.stitcher.call_count(), 1);
}

#[tokio::test]
async fn workdir_is_removed_on_success_and_on_failure() {
    let success = harness(FakeGenerator::default(), RecordingStitcher::default());
    let result = success
        .pipeline
        .generate_and_stitch(vec![scene(1), scene(2)], None)
        .await;
    assert!(result.succeeded);
    assert_eq!(temp_entries(success.temp.path()), 0);

    let failure = harness(
        FakeGenerator::default(),
        RecordingStitcher {
            fail: true,
            ..Default::default()
        },
    );
    let result = failure
        .pipeline
        .generate_and_stitch(vec![scene(1)], None)
        .await;
    assert!(!result.succeeded);
    assert_eq!(temp_entries(failure.temp.path()), 0);
}

#[tokio::test]
async fn generation_respects_the_worker_limit() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.temp_dir = temp.path().to_path_buf();
    config.output_dir = temp.path().join("out");
    config.max_workers = 2;

    let h = harness_with_config(
        config,
        FakeGenerator {
            slow: HashSet::from([1, 2, 3, 4, 5, 6]),
            slow_for: Duration::from_millis(50),
            ..Default::default()
        },
        RecordingStitcher::default(),
        temp,
    );

    let scenes = (1..=6).map(scene).collect();
    let result = h.pipeline.generate_and_stitch(scenes, None).await;

    assert!(result.succeeded);
    assert!(h.generator.peak_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn a_timed_out_scene_fails_alone() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.temp_dir = temp.path().to_path_buf();
    config.output_dir = temp.path().join("out");
    config.job_timeout_secs = 1;

    let h = harness_with_config(
        config,
        FakeGenerator {
            slow: HashSet::from([2]),
            slow_for: Duration::from_millis(1_500),
            ..Default::default()
        },
        RecordingStitcher::default(),
        temp,
    );

    let result = h
        .pipeline
        .generate_and_stitch(vec![scene(1), scene(2), scene(3)], None)
        .await;

    assert!(result.succeeded);
    let timed_out = result
        .outcomes
        .iter()
        .find(|o| o.sequence_index == 2)
        .unwrap();
    assert!(timed_out.clip_url.is_none());
    assert!(timed_out.error.as_deref().unwrap().contains("time budget"));

    let calls = h.stitcher.calls.lock().unwrap();
    assert_eq!(*calls, vec![vec![1, 3]]);
}
