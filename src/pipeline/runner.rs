//! Episode runner: drives one episode through synthesis, analysis,
//! validation and artifact writes.
//!
//! ```text
//! pending -> preprocess_failed
//!         -> skipped_gemini
//!         -> gemini_failed
//!         -> parse_failed
//!         -> ok
//! ```
//!
//! Every failure ends in a terminal [`ProcessingOutcome`]; nothing escapes
//! to the caller. A panic after synthesis keeps whatever the outcome already
//! recorded and is classified by the stage it happened in.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::PromptConfig;
use crate::llm::build_prompt;
use crate::media::{EpisodeMedia, FrameSynthesizer};
use crate::scheduler::{EpisodeJob, EpisodeStatus, ProcessingOutcome};
use crate::storage::ArtifactStore;
use crate::utils::panic_message;
use crate::validation::parse_model_response;

use super::context::WorkerContext;

/// Post-synthesis stage an episode is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Building the client or calling it.
    Analysis,
    /// Persisting, parsing and writing the response.
    Validation,
}

impl Stage {
    /// Status for a panic raised during this stage.
    fn failure_status(self) -> EpisodeStatus {
        match self {
            Stage::Analysis => EpisodeStatus::GeminiFailed,
            Stage::Validation => EpisodeStatus::ParseFailed,
        }
    }
}

/// Runs single episodes. Shared by all workers of a pool.
pub struct EpisodeRunner {
    synthesizer: Arc<dyn FrameSynthesizer>,
    artifacts: ArtifactStore,
    prompt: PromptConfig,
    skip_analysis: bool,
}

impl EpisodeRunner {
    pub fn new(
        synthesizer: Arc<dyn FrameSynthesizer>,
        artifacts: ArtifactStore,
        prompt: PromptConfig,
        skip_analysis: bool,
    ) -> Self {
        Self {
            synthesizer,
            artifacts,
            prompt,
            skip_analysis,
        }
    }

    /// Returns true when episodes stop after synthesis.
    pub fn skips_analysis(&self) -> bool {
        self.skip_analysis
    }

    /// Processes one episode to a terminal outcome.
    pub async fn process_episode(&self, ctx: &mut WorkerContext, job: &EpisodeJob) -> ProcessingOutcome {
        let started = Instant::now();
        ctx.begin_episode();

        info!(
            worker_id = %ctx.worker_id(),
            chunk_id = %job.chunk_id,
            episode_id = %job.episode_id,
            "Processing episode"
        );

        let mut outcome = ProcessingOutcome::pending(job, ctx.worker_id());

        let media = match self.synthesize(job).await {
            Ok(Some(media)) => media,
            Ok(None) => {
                outcome.warn("Preprocess failed or no frames.");
                return outcome
                    .finish(EpisodeStatus::PreprocessFailed)
                    .with_duration(started.elapsed());
            }
            Err(message) => {
                error!(episode_id = %job.episode_id, error = %message, "Frame synthesis panicked");
                outcome.error(format!("Frame synthesis panicked: {message}"));
                return outcome
                    .finish(EpisodeStatus::PreprocessFailed)
                    .with_duration(started.elapsed());
            }
        };
        outcome.frame_count = Some(media.frame_count);

        let mut stage = Stage::Analysis;
        let run = self.analyze_and_store(ctx, &media, &mut outcome, &mut stage);
        let result = AssertUnwindSafe(run).catch_unwind().await;
        let status = match result {
            Ok(status) => status,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    episode_id = %job.episode_id,
                    stage = ?stage,
                    error = %message,
                    "Episode processing panicked"
                );
                outcome.error(format!("Episode processing panicked: {message}"));
                stage.failure_status()
            }
        };
        media.discard();

        outcome.finish(status).with_duration(started.elapsed())
    }

    /// Runs synthesis on the blocking pool. `Err` carries a panic message.
    async fn synthesize(&self, job: &EpisodeJob) -> Result<Option<EpisodeMedia>, String> {
        let synthesizer = Arc::clone(&self.synthesizer);
        let key = job.key();
        tokio::task::spawn_blocking(move || synthesizer.synthesize(&key))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                }
            })
    }

    async fn analyze_and_store(
        &self,
        ctx: &mut WorkerContext,
        media: &EpisodeMedia,
        outcome: &mut ProcessingOutcome,
        stage: &mut Stage,
    ) -> EpisodeStatus {
        let episode_id = media.episode_id.as_str();

        if self.skip_analysis {
            info!(
                episode_id = %episode_id,
                frame_count = media.frame_count,
                "Analysis disabled, stopping after synthesis"
            );
            return EpisodeStatus::SkippedGemini;
        }

        let prompt = build_prompt(&self.prompt, Some(media.frame_count));
        let raw_text = match self.call_analysis(ctx, media, &prompt).await {
            Ok(text) => text,
            Err(message) => {
                warn!(episode_id = %episode_id, error = %message, "Analysis call failed");
                outcome.error(format!("Gemini call failed: {message}"));
                return EpisodeStatus::GeminiFailed;
            }
        };
        *stage = Stage::Validation;

        match self.artifacts.persist_raw(episode_id, &raw_text).await {
            Ok(path) => outcome.raw_path = Some(path),
            Err(e) => {
                error!(episode_id = %episode_id, error = %e, "Failed to persist raw response");
                outcome.error(format!("Failed to write raw response: {e}"));
            }
        }

        let parsed = parse_model_response(episode_id, media.frame_count, &raw_text);
        outcome.warnings.extend(parsed.warnings);
        outcome.errors.extend(parsed.errors);

        let Some(record) = parsed.episode else {
            return EpisodeStatus::ParseFailed;
        };

        match self.artifacts.write_episode_output(episode_id, &record).await {
            Ok(path) => {
                debug!(
                    episode_id = %episode_id,
                    segments = record.segments.len(),
                    last_frame = ?record.last_frame(),
                    max_frame = media.frame_count,
                    path = %path.display(),
                    "Episode record written"
                );
                outcome.json_path = Some(path);
                EpisodeStatus::Ok
            }
            Err(e) => {
                error!(episode_id = %episode_id, error = %e, "Failed to write episode record");
                outcome.error(format!("Failed to write episode output: {e}"));
                EpisodeStatus::ParseFailed
            }
        }
    }

    /// Obtains the worker's client and calls it. Errors and panics both
    /// come back as a message.
    async fn call_analysis(
        &self,
        ctx: &mut WorkerContext,
        media: &EpisodeMedia,
        prompt: &str,
    ) -> Result<String, String> {
        let service = ctx.service().map_err(|e| e.to_string())?;
        let call = service.analyze_episode(&media.video_path, prompt);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

impl std::fmt::Debug for EpisodeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeRunner")
            .field("artifacts", &self.artifacts)
            .field("skip_analysis", &self.skip_analysis)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::discovery::EpisodeKey;
    use crate::error::AnalysisError;
    use crate::llm::AnalysisService;
    use crate::pipeline::context::{service_factory, ServiceFactory};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct FixedSynthesizer {
        scratch: PathBuf,
        frame_count: Option<u32>,
    }

    impl FrameSynthesizer for FixedSynthesizer {
        fn synthesize(&self, key: &EpisodeKey) -> Option<EpisodeMedia> {
            let frame_count = self.frame_count?;
            let video_path = self.scratch.join(format!("episode_{}.mp4", key.episode_id));
            std::fs::write(&video_path, b"video").ok()?;
            Some(EpisodeMedia {
                chunk_id: key.chunk_id.clone(),
                episode_id: key.episode_id.clone(),
                video_path,
                frame_count,
            })
        }
    }

    struct PanickingSynthesizer;

    impl FrameSynthesizer for PanickingSynthesizer {
        fn synthesize(&self, _key: &EpisodeKey) -> Option<EpisodeMedia> {
            panic!("decoder exploded");
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
        Panic,
    }

    struct ScriptedService(Reply);

    #[async_trait]
    impl AnalysisService for ScriptedService {
        async fn analyze_episode(&self, video: &Path, prompt: &str) -> Result<String, AnalysisError> {
            assert!(video.exists());
            assert!(prompt.contains("Max valid frame index for this episode:"));
            match self.0 {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail => Err(AnalysisError::RequestFailed("connection reset".into())),
                Reply::Panic => panic!("client bug"),
            }
        }
    }

    fn factory(reply: fn() -> Reply) -> ServiceFactory {
        service_factory(move || Ok(Box::new(ScriptedService(reply())) as Box<dyn AnalysisService>))
    }

    fn runner(tmp: &TempDir, frames: Option<u32>, skip: bool) -> EpisodeRunner {
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let output = OutputConfig {
            dir: tmp.path().join("out"),
            filename_pattern: "episode_{episode_id}.json".to_string(),
        };
        EpisodeRunner::new(
            Arc::new(FixedSynthesizer {
                scratch,
                frame_count: frames,
            }),
            ArtifactStore::new(output),
            PromptConfig::default(),
            skip,
        )
    }

    fn job() -> EpisodeJob {
        EpisodeJob::new(0, &EpisodeKey::new("chunk-000", "000007"))
    }

    const GOOD: &str = r#"Sure: {"overall_summary": "picks cube", "skill_score": 2,
        "segments": [{"start_frame": 1, "end_frame": 9, "action": "reach"}]}"#;

    #[tokio::test]
    async fn test_ok_path_writes_both_artifacts() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Text(GOOD)));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::Ok);
        assert_eq!(outcome.frame_count, Some(5));
        assert!(outcome.raw_path.as_ref().unwrap().exists());
        let json_path = outcome.json_path.as_ref().unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(written["segments"][0]["end_frame"], 5);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("end_frame clipped to 5")));
        // scratch video removed
        assert!(!tmp.path().join("scratch/episode_000007.mp4").exists());
    }

    #[tokio::test]
    async fn test_analysis_error_leaves_no_artifacts() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Fail));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::GeminiFailed);
        assert!(outcome.errors[0].starts_with("Gemini call failed:"));
        assert!(outcome.json_path.is_none());
        assert!(outcome.raw_path.is_none());
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_analysis_panic_is_contained() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Panic));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::GeminiFailed);
        assert!(outcome.errors[0].contains("client bug"));
    }

    #[tokio::test]
    async fn test_panic_building_client_keeps_partial_outcome() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let factory = service_factory(|| panic!("factory bug"));
        let mut ctx = WorkerContext::new("worker-0", factory);

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::GeminiFailed);
        assert_eq!(outcome.frame_count, Some(5));
        assert_eq!(outcome.worker_id, "worker-0");
        assert!(outcome.errors[0].starts_with("Episode processing panicked:"));
        assert!(outcome.errors[0].contains("factory bug"));
        assert!(!tmp.path().join("scratch/episode_000007.mp4").exists());
    }

    #[test]
    fn test_stage_failure_status() {
        assert_eq!(Stage::Analysis.failure_status(), EpisodeStatus::GeminiFailed);
        assert_eq!(Stage::Validation.failure_status(), EpisodeStatus::ParseFailed);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_gemini_failure() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let factory = service_factory(|| Err(AnalysisError::MissingApiKey));
        let mut ctx = WorkerContext::new("worker-0", factory);

        let outcome = runner.process_episode(&mut ctx, &job()).await;
        assert_eq!(outcome.status, EpisodeStatus::GeminiFailed);
    }

    #[tokio::test]
    async fn test_unparsable_response_keeps_raw_text() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), false);
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Text("I cannot help.")));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::ParseFailed);
        let raw = std::fs::read_to_string(outcome.raw_path.as_ref().unwrap()).unwrap();
        assert_eq!(raw, "I cannot help.");
        assert!(outcome.json_path.is_none());
        assert_eq!(outcome.errors, vec!["No JSON object found in model response.".to_string()]);
    }

    #[tokio::test]
    async fn test_skip_analysis() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, Some(5), true);
        let factory = service_factory(|| panic!("client must not be built"));
        let mut ctx = WorkerContext::new("worker-0", factory);

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::SkippedGemini);
        assert_eq!(outcome.frame_count, Some(5));
        assert!(!ctx.has_service());
        assert!(runner.skips_analysis());
    }

    #[tokio::test]
    async fn test_no_frames_is_preprocess_failure() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp, None, false);
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Text(GOOD)));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::PreprocessFailed);
        assert_eq!(outcome.warnings, vec!["Preprocess failed or no frames.".to_string()]);
        assert!(outcome.frame_count.is_none());
        assert_eq!(ctx.episodes_handled(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_panic_is_preprocess_failure() {
        let tmp = TempDir::new().unwrap();
        let runner = EpisodeRunner::new(
            Arc::new(PanickingSynthesizer),
            ArtifactStore::new(OutputConfig {
                dir: tmp.path().to_path_buf(),
                filename_pattern: "episode_{episode_id}.json".to_string(),
            }),
            PromptConfig::default(),
            false,
        );
        let mut ctx = WorkerContext::new("worker-0", factory(|| Reply::Text(GOOD)));

        let outcome = runner.process_episode(&mut ctx, &job()).await;

        assert_eq!(outcome.status, EpisodeStatus::PreprocessFailed);
        assert!(outcome.errors[0].contains("decoder exploded"));
    }
}
