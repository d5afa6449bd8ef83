//! Pipeline runner that executes stages in sequence.
//!
//! For each stage the scheduler wires the process runner's lines through
//! the stage's parser, maps local progress into the stage's slice of the
//! global scale, and sequences transitions. It is the only component
//! allowed to reclassify a raw failure into a fallback success via the
//! retry policy; every run resolves to exactly one `PipelineRunResult`.

use parking_lot::Mutex;

use super::errors::PipelineError;
use super::events::{ProgressBus, ProgressEvent, Subscription};
use super::stage::{validate_ranges, Stage};
use crate::cancel::{CancelHandle, CancellationController};
use crate::config::Settings;
use crate::progress::StageParser;
use crate::retry::{FallbackMetadata, RetryPolicy};
use crate::runner::{self, Transcript};

/// Scheduler state machine:
/// `Idle → Running(i) → {Running(i+1) | Failed | Cancelled} → AllSucceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(usize),
    Failed,
    Cancelled,
    AllSucceeded,
}

/// The single terminal outcome of a run.
///
/// `cancelled` takes priority over both success and failure; a
/// fallback-applied retry is a successful, not a failed, outcome.
#[derive(Debug)]
pub struct PipelineRunResult {
    pub success: bool,
    pub cancelled: bool,
    /// A recoverable failure was replayed with adjusted arguments and
    /// the replay succeeded.
    pub fallback_applied: bool,
    /// Diagnostic metadata extracted while matching a retry rule; kept
    /// even if the replay then failed.
    pub detected_metadata: Option<FallbackMetadata>,
    pub error: Option<PipelineError>,
}

/// Pipeline that runs a sequence of stages, each one external process.
///
/// Stages run strictly sequentially; at most one child process is live
/// per pipeline instance at any time. Independent pipeline instances may
/// run concurrently with fully independent state.
///
/// Configure with the builder methods before taking cancel handles or
/// subscriptions, then call [`run`](Self::run).
pub struct Pipeline {
    stages: Vec<Stage>,
    retry: RetryPolicy,
    settings: Settings,
    bus: ProgressBus,
    cancel: CancellationController,
    state: Mutex<RunState>,
}

enum Attempt {
    SpawnFailed(std::io::Error),
    Exited { code: i32, transcript: Transcript },
}

impl Pipeline {
    /// Create a new empty pipeline with default settings and the
    /// built-in fixed-shape retry policy.
    pub fn new() -> Self {
        let settings = Settings::default();
        Self {
            stages: Vec::new(),
            retry: RetryPolicy::default(),
            cancel: CancellationController::new(settings.grace_period()),
            settings,
            bus: ProgressBus::new(),
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Add a stage (builder pattern).
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Add several stages in order.
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the settings. Rebuilds the cancellation controller, so
    /// call this before handing out cancel handles.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.cancel = CancellationController::new(settings.grace_period());
        self.settings = settings;
        self
    }

    /// Attach a progress listener. Dropping the returned subscription
    /// detaches it.
    pub fn on_progress<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Get a cancellation handle.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.handle()
    }

    /// Current scheduler state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run the pipeline to its single terminal outcome.
    ///
    /// Global progress reported along the way is monotonically
    /// non-decreasing; 100 is emitted exactly once, by the final
    /// `Complete` event on full success.
    pub async fn run(&self) -> PipelineRunResult {
        if let Err(error) = validate_ranges(&self.stages) {
            return self.finish_failed("Pipeline", error, None, 0);
        }

        let total = self.stages.len();
        let mut high_water: u8 = 0;
        let mut fallback_applied = false;
        let mut detected: Option<FallbackMetadata> = None;

        for (i, stage) in self.stages.iter().enumerate() {
            if self.cancel.is_requested() {
                return self.finish_cancelled(detected);
            }
            self.set_state(RunState::Running(i));
            let last_stage = i + 1 == total;

            tracing::info!(stage = %stage.name, "Starting stage");
            self.emit_running(
                stage,
                stage.range.offset,
                &format!("Starting {}", stage.name),
                &mut high_water,
            );

            match self.run_stage(stage, &stage.args, last_stage, &mut high_water).await {
                Attempt::SpawnFailed(source) => {
                    let error = PipelineError::spawn(&stage.name, &stage.program, source);
                    return self.finish_failed(&stage.name, error, detected, high_water);
                }
                Attempt::Exited { code: 0, .. } => continue,
                Attempt::Exited { code, transcript } => {
                    if self.cancel.is_requested() {
                        return self.finish_cancelled(detected);
                    }

                    let plan = self.retry.evaluate(&stage.name, &stage.args, &transcript.text());
                    let Some(plan) = plan else {
                        let error = self.exit_error(stage, code, &transcript);
                        return self.finish_failed(&stage.name, error, detected, high_water);
                    };

                    // One replay per stage, with the rule's adjusted
                    // arguments. A successful replay is a success.
                    tracing::warn!(
                        stage = %stage.name,
                        rule = %plan.metadata.rule,
                        "Recoverable failure, retrying with adjusted arguments"
                    );
                    detected = Some(plan.metadata.clone());
                    self.emit_running(
                        stage,
                        high_water,
                        &format!("Retrying {}", stage.name),
                        &mut high_water,
                    );

                    match self.run_stage(stage, &plan.args, last_stage, &mut high_water).await {
                        Attempt::SpawnFailed(source) => {
                            let error = PipelineError::spawn(&stage.name, &stage.program, source);
                            return self.finish_failed(&stage.name, error, detected, high_water);
                        }
                        Attempt::Exited { code: 0, .. } => {
                            fallback_applied = true;
                        }
                        Attempt::Exited { code, transcript } => {
                            if self.cancel.is_requested() {
                                return self.finish_cancelled(detected);
                            }
                            let error = self.exit_error(stage, code, &transcript);
                            return self.finish_failed(&stage.name, error, detected, high_water);
                        }
                    }
                }
            }
        }

        // A cancel during the final stage can race a clean exit (tools
        // that trap the termination signal and exit 0); cancellation
        // still wins over that success.
        if self.cancel.is_requested() {
            return self.finish_cancelled(detected);
        }

        self.set_state(RunState::AllSucceeded);
        self.bus.emit(&ProgressEvent::complete("Complete", "Pipeline finished"));
        tracing::info!("Pipeline completed successfully");
        PipelineRunResult {
            success: true,
            cancelled: false,
            fallback_applied,
            detected_metadata: detected,
            error: None,
        }
    }

    /// Run one stage invocation: spawn, register the handle, drain lines
    /// through the parser, wait for exit, clear the handle.
    async fn run_stage(
        &self,
        stage: &Stage,
        args: &[String],
        last_stage: bool,
        high_water: &mut u8,
    ) -> Attempt {
        let spec = stage.launch_spec(args);
        tracing::debug!(
            stage = %stage.name,
            program = %spec.program,
            args = ?spec.args,
            "Spawning stage process"
        );

        let mut process = match runner::spawn(&spec) {
            Ok(process) => process,
            Err(source) => return Attempt::SpawnFailed(source),
        };
        self.cancel.register(process.handle);

        let mut parser = StageParser::new(stage.rules.clone());
        let mut transcript = Transcript::new();

        while let Some(line) = process.lines.recv().await {
            tracing::debug!(stage = %stage.name, "{}", line.text);
            transcript.record(&line.text);
            if let Some(update) = parser.feed(&line.text) {
                let global = stage.range.clamped(update.percent, last_stage);
                self.emit_running(stage, global, &update.message, high_water);
            }
        }

        let code = match process.wait().await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(stage = %stage.name, "Failed to reap stage process: {}", e);
                -1
            }
        };
        self.cancel.clear();

        Attempt::Exited { code, transcript }
    }

    /// Emit a running-progress event, clamped against the run's high
    /// water mark so global progress never regresses.
    fn emit_running(&self, stage: &Stage, global: u8, message: &str, high_water: &mut u8) {
        let global = global.max(*high_water);
        *high_water = global;
        self.bus.emit(&ProgressEvent::installing(&stage.name, global, message));
    }

    fn exit_error(&self, stage: &Stage, code: i32, transcript: &Transcript) -> PipelineError {
        PipelineError::stage_exit(
            &stage.name,
            code,
            transcript.excerpt(self.settings.output.excerpt_lines),
        )
    }

    fn finish_cancelled(&self, detected: Option<FallbackMetadata>) -> PipelineRunResult {
        self.set_state(RunState::Cancelled);
        tracing::info!("Pipeline cancelled");
        PipelineRunResult {
            success: false,
            cancelled: true,
            fallback_applied: false,
            detected_metadata: detected,
            error: Some(PipelineError::Cancelled),
        }
    }

    fn finish_failed(
        &self,
        stage: &str,
        error: PipelineError,
        detected: Option<FallbackMetadata>,
        high_water: u8,
    ) -> PipelineRunResult {
        self.set_state(RunState::Failed);
        tracing::error!(stage = %stage, "{}", error);
        self.bus
            .emit(&ProgressEvent::error(stage, high_water, &error.to_string()));
        PipelineRunResult {
            success: false,
            cancelled: false,
            fallback_applied: false,
            detected_metadata: detected,
            error: Some(error),
        }
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProgressRange;

    #[test]
    fn pipeline_builds_correctly() {
        let pipeline = Pipeline::new()
            .with_stage(Stage::new("Install", "pip", ProgressRange::new(0, 30)))
            .with_stage(Stage::new("Convert", "converter", ProgressRange::new(30, 70)));

        assert_eq!(pipeline.stage_count(), 2);
        assert_eq!(pipeline.stage_names(), vec!["Install", "Convert"]);
        assert_eq!(pipeline.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn invalid_ranges_fail_before_spawning() {
        let pipeline = Pipeline::new()
            .with_stage(Stage::new("a", "true", ProgressRange::new(0, 60)))
            .with_stage(Stage::new("b", "true", ProgressRange::new(50, 50)));

        let result = pipeline.run().await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(PipelineError::InvalidStages(_))));
        assert_eq!(pipeline.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn empty_pipeline_completes_at_100() {
        let pipeline = Pipeline::new();
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let _sub = pipeline.on_progress(move |event| sink.lock().push(event.clone()));

        let result = pipeline.run().await;
        assert!(result.success);
        assert_eq!(pipeline.state(), RunState::AllSucceeded);

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].percent, 100);
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::*;
    use crate::pipeline::{ProgressEventKind, ProgressRange};
    use crate::progress::ParseRule;
    use crate::retry::{RetryRule, FIXED_SHAPE_SIGNATURE};

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("mdg_core=debug")
            .with_test_writer()
            .try_init();
    }

    fn shell_stage(name: &str, range: ProgressRange, script: &str) -> Stage {
        Stage::new(name, "sh", range).with_args(["-c", script])
    }

    fn event_collector(
        pipeline: &Pipeline,
    ) -> (Arc<Mutex<Vec<ProgressEvent>>>, crate::pipeline::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = pipeline.on_progress(move |event| sink.lock().push(event.clone()));
        (seen, sub)
    }

    #[tokio::test]
    async fn three_stage_pipeline_succeeds_with_monotonic_progress() {
        init_logging();
        let done_rule = || vec![ParseRule::checkpoint(r"^done$", 100, "Done")];
        let pipeline = Pipeline::new()
            .with_stage(
                shell_stage("Install", ProgressRange::new(0, 10), "echo done").with_rules(done_rule()),
            )
            .with_stage(
                shell_stage("Convert", ProgressRange::new(10, 80), "echo done").with_rules(done_rule()),
            )
            .with_stage(
                shell_stage("Encode", ProgressRange::new(90, 10), "echo done").with_rules(done_rule()),
            );
        let (seen, _sub) = event_collector(&pipeline);

        let result = pipeline.run().await;

        assert!(result.success);
        assert!(!result.cancelled);
        assert!(!result.fallback_applied);
        assert!(result.error.is_none());
        assert_eq!(pipeline.state(), RunState::AllSucceeded);

        let events = seen.lock();
        let mut last = 0;
        for event in events.iter() {
            assert!(event.percent >= last, "progress regressed at {:?}", event);
            last = event.percent;
        }
        let final_event = events.last().unwrap();
        assert_eq!(final_event.kind, ProgressEventKind::Complete);
        assert_eq!(final_event.percent, 100);
        // 100 appears exactly once, on the completion event.
        assert_eq!(events.iter().filter(|e| e.percent == 100).count(), 1);
    }

    #[tokio::test]
    async fn recognized_failure_triggers_single_fallback_retry() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().display().to_string();

        let s1 = format!("echo run >> {d}/s1");
        let s2 = format!(
            "echo run >> {d}/s2; \
             if [ \"$1\" = \"--fail\" ]; then \
               echo \"E build: input {FIXED_SHAPE_SIGNATURE} [1x3x224x224]\" >&2; exit 1; \
             fi"
        );
        let s3 = format!("echo run >> {d}/s3");

        let policy = RetryPolicy::none().with_rule(
            RetryRule::new("fixed-shape", FIXED_SHAPE_SIGNATURE)
                .strip_flag("--fail")
                .with_shape_pattern(r"\[(?P<shape>\d+(?:x\d+)+)\]"),
        );

        let pipeline = Pipeline::new()
            .with_retry_policy(policy)
            .with_stage(shell_stage("Install", ProgressRange::new(0, 10), &s1))
            .with_stage(
                Stage::new("Convert", "sh", ProgressRange::new(10, 80))
                    .with_args(["-c", &s2, "sh", "--fail"]),
            )
            .with_stage(shell_stage("Encode", ProgressRange::new(90, 10), &s3));

        let result = pipeline.run().await;

        assert!(result.success, "fallback retry is a successful outcome");
        assert!(result.fallback_applied);
        let metadata = result.detected_metadata.unwrap();
        assert_eq!(metadata.detected_shape.as_deref(), Some("1x3x224x224"));

        let runs = |file: &str| {
            std::fs::read_to_string(dir.path().join(file))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        };
        assert_eq!(runs("s1"), 1, "stage 1 invoked exactly once");
        assert_eq!(runs("s2"), 2, "stage 2 invoked exactly twice");
        assert_eq!(runs("s3"), 1, "stage 3 invoked exactly once");
    }

    #[tokio::test]
    async fn unrecognized_failure_aborts_with_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().display().to_string();
        let pipeline = Pipeline::new()
            .with_stage(shell_stage(
                "Convert",
                ProgressRange::new(0, 50),
                "echo unexpected operator >&2; exit 3",
            ))
            .with_stage(shell_stage(
                "Encode",
                ProgressRange::new(50, 50),
                &format!("echo run >> {d}/after"),
            ));
        let (seen, _sub) = event_collector(&pipeline);

        let result = pipeline.run().await;

        assert!(!result.success);
        assert!(!result.cancelled);
        match result.error {
            Some(PipelineError::StageExit {
                ref stage,
                exit_code,
                ref excerpt,
            }) => {
                assert_eq!(stage, "Convert");
                assert_eq!(exit_code, 3);
                assert!(excerpt.contains("unexpected operator"));
            }
            other => panic!("expected StageExit, got {:?}", other),
        }
        assert_eq!(pipeline.state(), RunState::Failed);
        assert!(!dir.path().join("after").exists(), "later stages must not run");
        assert_eq!(
            seen.lock().last().unwrap().kind,
            ProgressEventKind::Error
        );
    }

    #[tokio::test]
    async fn missing_executable_is_fatal_and_never_retried() {
        let pipeline = Pipeline::new().with_stage(Stage::new(
            "Install",
            "mdg-no-such-tool",
            ProgressRange::new(0, 100),
        ));

        let result = pipeline.run().await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(PipelineError::Spawn { .. })));
    }

    #[tokio::test]
    async fn cancel_interrupts_running_stage_within_grace_bound() {
        let pipeline = Arc::new(Pipeline::new().with_stage(shell_stage(
            "Sleep",
            ProgressRange::new(0, 100),
            "sleep 10",
        )));
        let handle = pipeline.cancel_handle();

        let started = Instant::now();
        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        handle.cancel(); // idempotent

        let result = task.await.unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "cancel must finish within the graceful/forced bound"
        );
        assert_eq!(pipeline.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_wins_over_clean_exit_of_final_stage() {
        // A tool that traps the termination signal and exits 0 must not
        // turn a cancelled run into a success.
        let pipeline = Arc::new(Pipeline::new().with_stage(shell_stage(
            "Encode",
            ProgressRange::new(0, 100),
            "trap 'exit 0' TERM; sleep 10 & wait $!",
        )));
        let handle = pipeline.cancel_handle();

        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run().await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(result.cancelled);
        assert!(!result.success);
        assert!(matches!(result.error, Some(PipelineError::Cancelled)));
        assert_eq!(pipeline.state(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_before_run_skips_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path().display().to_string();
        let pipeline = Pipeline::new().with_stage(shell_stage(
            "Install",
            ProgressRange::new(0, 100),
            &format!("echo run >> {d}/s1"),
        ));

        pipeline.cancel_handle().cancel();
        let result = pipeline.run().await;

        assert!(result.cancelled);
        assert!(!dir.path().join("s1").exists());
    }
}
