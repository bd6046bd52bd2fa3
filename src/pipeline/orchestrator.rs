//! Session orchestrator.
//!
//! Drives one session through transcription, topic extraction, the optional
//! analysis and gap review passes and the per-topic fan-out, persisting every
//! artifact as it goes. Stages whose artifact already exists are skipped,
//! which makes `resume` idempotent.

use super::fanout::SharedContext;
use super::{
    invoke_stage, read_artifact, read_text_artifact, write_artifact, PipelineConfig, TopicFanOut,
};
use crate::artifact_store::{ArtifactKey, ArtifactStore, FsArtifactStore};
use crate::config::{Prompts, Settings};
use crate::error::{Result, StudycastError};
use crate::session::{
    dedupe_topics, Session, SessionId, SessionReport, SessionStatus, Stage, StageError,
};
use crate::stages::StageClients;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Runs sessions end to end.
pub struct SessionOrchestrator {
    clients: StageClients,
    store: Arc<dyn ArtifactStore>,
    fanout: TopicFanOut,
    config: PipelineConfig,
}

impl SessionOrchestrator {
    /// Create an orchestrator from configuration.
    pub fn new(settings: &Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let clients = StageClients::from_settings(settings, &prompts)?;
        let store = Arc::new(FsArtifactStore::new(settings.sessions_dir())?);

        Ok(Self::with_components(
            clients,
            store,
            PipelineConfig::from_settings(settings),
        ))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        clients: StageClients,
        store: Arc<dyn ArtifactStore>,
        config: PipelineConfig,
    ) -> Self {
        let fanout = TopicFanOut::new(clients.clone(), store.clone(), config.clone());
        Self {
            clients,
            store,
            fanout,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        self.store.clone()
    }

    /// Register a new session for `audio_ref` without running it.
    pub async fn create_session(&self, audio_ref: &str) -> Result<Session> {
        let session = Session::new(SessionId::new(), audio_ref);
        self.store.save_session(&session).await?;
        info!(session_id = %session.id, audio_ref, "Session created");
        Ok(session)
    }

    /// Create and run a session to completion.
    pub async fn run_session(&self, audio_ref: &str, cancel: &CancellationToken) -> Result<Session> {
        let session = self.create_session(audio_ref).await?;
        Ok(self.execute(session, cancel).await)
    }

    /// Run a registered session to a terminal state.
    pub async fn run(&self, session_id: &SessionId, cancel: &CancellationToken) -> Result<Session> {
        let session = self.status(session_id).await?;
        Ok(self.execute(session, cancel).await)
    }

    /// Re-run an existing session, skipping every stage whose artifact exists.
    pub async fn resume(&self, session_id: &SessionId, cancel: &CancellationToken) -> Result<Session> {
        let mut session = self.status(session_id).await?;
        info!(session_id = %session_id, previous = %session.status, "Resuming session");
        session.error = None;
        session.topic_results.clear();
        Ok(self.execute(session, cancel).await)
    }

    /// Latest persisted snapshot, including partial topic results.
    pub async fn status(&self, session_id: &SessionId) -> Result<Session> {
        load_session(self.store.as_ref(), session_id).await
    }

    pub async fn report(&self, session_id: &SessionId) -> Result<SessionReport> {
        Ok(self.status(session_id).await?.report())
    }

    /// Raw artifact bytes, or `None` if not produced (yet).
    pub async fn artifact(
        &self,
        session_id: &SessionId,
        stage: Stage,
        topic: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        load_artifact(self.store.as_ref(), session_id, stage, topic).await
    }

    #[instrument(skip(self, session, cancel), fields(session_id = %session.id))]
    async fn execute(&self, mut session: Session, cancel: &CancellationToken) -> Session {
        if let Err(error) = self.run_session_stages(&mut session, cancel).await {
            error!(stage = %error.stage, %error, "Session failed");
            session.fail(error);
            self.snapshot(&session).await;
            return session;
        }

        if session.topics.is_empty() {
            info!("No topics extracted; nothing to narrate");
            session.transition_to(SessionStatus::Completed);
            self.snapshot(&session).await;
            return session;
        }

        session.transition_to(SessionStatus::ProcessingTopics);
        self.snapshot(&session).await;

        let session_id = session.id.clone();
        let topics = session.topics.clone();
        let summary = session.performance_summary.clone();
        let gap_review = session.gap_review.clone();
        let shared = SharedContext {
            session_id: &session_id,
            topics: &topics,
            performance_summary: summary.as_deref(),
            gap_review: gap_review.as_deref(),
        };

        let mut results = std::pin::pin!(self.fanout.stream_topics(shared, cancel));
        while let Some(result) = results.next().await {
            session.record_topic_result(result);
            self.snapshot(&session).await;
        }

        self.finish(&mut session);
        self.snapshot(&session).await;
        session
    }

    /// Transcription, topic extraction, performance analysis and gap review.
    /// The retriever is warmed before anything retrieves.
    async fn run_session_stages(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StageError> {
        session.transition_to(SessionStatus::Transcribing);
        self.snapshot(session).await;
        let transcript = self.transcript(session, cancel).await?;
        session.transcript = Some(transcript);

        session.transition_to(SessionStatus::ExtractingTopics);
        self.snapshot(session).await;
        session.topics = self.topics(session, cancel).await?;
        session.performance_summary = self.performance_summary(session, cancel).await?;

        if !session.topics.is_empty() {
            self.warm_retriever(cancel).await?;
        }
        session.gap_review = self.gap_review(session, cancel).await?;

        Ok(())
    }

    /// Build shared retrieval state without a deadline, so a slow first index
    /// build is not charged to the first topics. A failure only means the
    /// topics build it themselves.
    async fn warm_retriever(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StageError> {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StageError::cancelled(Stage::FactRetrieval)),
            outcome = self.clients.retriever.warm() => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match outcome {
                    Ok(()) => debug!(elapsed_ms, "Retriever ready"),
                    Err(e) => warn!(%e, elapsed_ms, "Could not prepare retriever; topics will retry"),
                }
                Ok(())
            }
        }
    }

    async fn transcript(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, StageError> {
        let key = ArtifactKey::session(&session.id, Stage::Transcription);
        if let Some(transcript) = read_text_artifact(self.store.as_ref(), &key).await? {
            debug!("Reusing persisted transcript");
            return Ok(transcript);
        }

        let transcript = invoke_stage(
            Stage::Transcription,
            self.config.timeouts.transcription,
            cancel,
            self.clients.transcriber.transcribe(&session.audio_ref),
        )
        .await?;
        if transcript.trim().is_empty() {
            return Err(StageError::failed(Stage::Transcription, "empty transcript"));
        }

        write_artifact(self.store.as_ref(), &key, transcript.as_bytes()).await?;
        info!(chars = transcript.len(), "Transcript ready");
        Ok(transcript)
    }

    async fn topics(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<String>, StageError> {
        let key = ArtifactKey::session(&session.id, Stage::TopicExtraction);
        if let Some(bytes) = read_artifact(self.store.as_ref(), &key).await? {
            debug!("Reusing persisted topic list");
            return serde_json::from_slice(&bytes).map_err(|e| {
                StageError::failed(Stage::TopicExtraction, format!("corrupt topic list: {}", e))
            });
        }

        let transcript = session.transcript.as_deref().unwrap_or_default();
        let extracted = invoke_stage(
            Stage::TopicExtraction,
            self.config.timeouts.extraction,
            cancel,
            self.clients.extractor.extract_topics(transcript),
        )
        .await?;

        let mut topics = dedupe_topics(&extracted);
        if self.config.max_topics > 0 && topics.len() > self.config.max_topics {
            debug!(
                kept = self.config.max_topics,
                dropped = topics.len() - self.config.max_topics,
                "Capping topic list"
            );
            topics.truncate(self.config.max_topics);
        }

        let encoded = serde_json::to_vec(&topics)
            .map_err(|e| StageError::failed(Stage::TopicExtraction, e))?;
        write_artifact(self.store.as_ref(), &key, &encoded).await?;
        info!(count = topics.len(), "Topics extracted");
        Ok(topics)
    }

    /// Student performance summary. Failures degrade to no summary; only
    /// cancellation propagates.
    async fn performance_summary(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<String>, StageError> {
        let Some(analyzer) = &self.clients.analyzer else {
            return Ok(None);
        };
        if session.topics.is_empty() {
            return Ok(None);
        }

        let key = ArtifactKey::session(&session.id, Stage::PerformanceAnalysis);
        if let Some(summary) = self.persisted_text(&key).await {
            return Ok(Some(summary));
        }

        let transcript = session.transcript.as_deref().unwrap_or_default();
        let outcome = invoke_stage(
            Stage::PerformanceAnalysis,
            self.config.timeouts.analysis,
            cancel,
            analyzer.analyze(transcript, &session.topics),
        )
        .await;
        self.keep_optional(&key, outcome).await
    }

    /// Grounded explanations of the gaps in the performance summary. Skipped
    /// without a summary; degrades like the summary does.
    async fn gap_review(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<String>, StageError> {
        let Some(reviewer) = &self.clients.gap_reviewer else {
            return Ok(None);
        };
        let Some(summary) = session.performance_summary.as_deref() else {
            return Ok(None);
        };

        let key = ArtifactKey::session(&session.id, Stage::GapReview);
        if let Some(review) = self.persisted_text(&key).await {
            return Ok(Some(review));
        }

        let transcript = session.transcript.as_deref().unwrap_or_default();
        let outcome = invoke_stage(
            Stage::GapReview,
            self.config.timeouts.gap_review,
            cancel,
            reviewer.review(transcript, &session.topics, summary),
        )
        .await;
        self.keep_optional(&key, outcome).await
    }

    async fn persisted_text(&self, key: &ArtifactKey) -> Option<String> {
        match read_text_artifact(self.store.as_ref(), key).await {
            Ok(text) => text,
            Err(e) => {
                warn!(stage = %key.stage, %e, "Could not read persisted artifact");
                None
            }
        }
    }

    /// Outcome of an optional session-level stage: a non-empty answer is
    /// persisted, anything else but cancellation becomes `None`.
    async fn keep_optional(
        &self,
        key: &ArtifactKey,
        outcome: std::result::Result<String, StageError>,
    ) -> std::result::Result<Option<String>, StageError> {
        let stage = key.stage;
        match outcome {
            Ok(text) if !text.trim().is_empty() => {
                if let Err(e) = write_artifact(self.store.as_ref(), key, text.as_bytes()).await {
                    warn!(%stage, %e, "Could not persist artifact");
                }
                info!(%stage, chars = text.len(), "Optional stage ready");
                Ok(Some(text))
            }
            Ok(_) => {
                warn!(%stage, "Stage returned nothing; continuing without it");
                Ok(None)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(%e, "Optional stage failed; continuing without it");
                Ok(None)
            }
        }
    }

    /// Decide the terminal state once every topic has reported.
    fn finish(&self, session: &mut Session) {
        let total = session.topics.len();
        let failed = session.failed_topic_count();
        let narrated = session.narrated_count();

        let cancelled = session
            .ordered_results()
            .filter_map(|(_, result)| result.and_then(|r| r.error.clone()))
            .find(StageError::is_cancelled);

        if let Some(error) = cancelled {
            warn!(narrated, total, "Session cancelled during topic processing");
            session.fail(error);
            return;
        }

        if self.config.fail_on_total_topic_failure && failed == total {
            error!(total, "Every topic failed");
            session.transition_to(SessionStatus::Failed);
            return;
        }

        if failed > 0 {
            warn!(
                failed,
                narrated,
                total,
                "AggregationPartialFailure: some topics could not be narrated"
            );
        }
        info!(narrated, total, "Session completed");
        session.transition_to(SessionStatus::Completed);
    }

    /// Persist the snapshot; status queries are best effort.
    async fn snapshot(&self, session: &Session) {
        if let Err(e) = self.store.save_session(session).await {
            warn!(session_id = %session.id, %e, "Could not save session snapshot");
        }
    }
}

/// Load a session snapshot from `store`.
pub async fn load_session(store: &dyn ArtifactStore, session_id: &SessionId) -> Result<Session> {
    store
        .load_session(session_id)
        .await?
        .ok_or_else(|| StudycastError::SessionNotFound(session_id.to_string()))
}

/// Read one artifact from `store`; `topic` selects a per-topic artifact.
pub async fn load_artifact(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    stage: Stage,
    topic: Option<&str>,
) -> Result<Option<Vec<u8>>> {
    let key = match topic {
        Some(topic) => ArtifactKey::topic(session_id, stage, topic),
        None => ArtifactKey::session(session_id, stage),
    };
    key.validate()?;
    store.get(&key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::MemoryArtifactStore;
    use crate::pipeline::testing::MockStages;
    use crate::pipeline::StageTimeouts;
    use crate::session::{SessionOutcome, StageErrorKind};
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_concurrent_topics: 3,
            max_topics: 0,
            fail_on_total_topic_failure: false,
            include_previous_facts: true,
            timeouts: StageTimeouts::uniform(Duration::from_secs(5)),
        }
    }

    fn orchestrator(mocks: &Arc<MockStages>, config: PipelineConfig) -> SessionOrchestrator {
        SessionOrchestrator::with_components(
            mocks.clients(),
            Arc::new(MemoryArtifactStore::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_cardiac_and_renal_session_with_one_failed_script() {
        let mocks = Arc::new(
            MockStages::new(
                "We reviewed cardiac output and renal physiology.",
                &["cardiac output", "renal physiology"],
            )
            .failing(Stage::ScriptGeneration, "renal physiology"),
        );
        let orchestrator = orchestrator(&mocks, config());

        let session = orchestrator
            .run_session("session.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.error.is_none());
        assert_eq!(session.topic_results.len(), 2);

        let cardiac = &session.topic_results["cardiac output"];
        assert!(cardiac.is_success());
        let renal = &session.topic_results["renal physiology"];
        assert_eq!(renal.failed_step(), Some(Stage::ScriptGeneration));
        assert!(renal.facts.is_some());
        assert!(renal.audio_ref.is_none());

        let report = session.report();
        assert_eq!(
            report.headline(),
            "Session completed with 1 of 2 topics successfully narrated"
        );
        assert_eq!(
            report.failed_topics().collect::<Vec<_>>(),
            vec![("renal physiology", Stage::ScriptGeneration)]
        );

        let store = orchestrator.store();
        let audio = store
            .get(&ArtifactKey::topic(&session.id, Stage::AudioSynthesis, "cardiac output"))
            .await
            .unwrap();
        assert!(audio.is_some());
        let persisted = orchestrator.status(&session.id).await.unwrap();
        assert_eq!(persisted.status, SessionStatus::Completed);
        assert_eq!(persisted.topic_results.len(), 2);
    }

    #[tokio::test]
    async fn test_transcription_failure_stops_the_session() {
        let mocks = Arc::new(
            MockStages::new("unused", &["pH"]).failing(Stage::Transcription, "*"),
        );
        let orchestrator = orchestrator(&mocks, config());

        let session = orchestrator
            .run_session("broken.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        let error = session.error.as_ref().unwrap();
        assert_eq!(error.stage, Stage::Transcription);
        assert_eq!(error.kind, StageErrorKind::Failed);
        assert!(session.topic_results.is_empty());
        assert_eq!(mocks.calls(Stage::TopicExtraction), 0);
        assert_eq!(mocks.calls(Stage::FactRetrieval), 0);
        assert!(matches!(
            session.report().outcome,
            SessionOutcome::FailedBeforeTopics {
                stage: Stage::Transcription,
                ..
            }
        ));
        assert!(session
            .report()
            .headline()
            .starts_with("Session failed before any topics were processed (transcription:"));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported_as_that_stage() {
        let mocks = Arc::new(
            MockStages::new("transcript", &["pH"]).failing(Stage::TopicExtraction, "*"),
        );
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error.unwrap().stage, Stage::TopicExtraction);
        assert!(session.transcript.is_some());
    }

    #[tokio::test]
    async fn test_zero_topics_completes_without_fan_out() {
        let mocks = Arc::new(MockStages::new("small talk only", &[]));
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.topic_results.is_empty());
        assert_eq!(mocks.calls(Stage::FactRetrieval), 0);
        assert_eq!(mocks.calls(Stage::PerformanceAnalysis), 0);
        assert_eq!(mocks.calls(Stage::GapReview), 0);
        assert!(mocks.warms().is_empty());
        assert_eq!(
            session.report().headline(),
            "Session completed with 0 of 0 topics successfully narrated"
        );
    }

    #[tokio::test]
    async fn test_topics_are_deduplicated_and_capped() {
        let mocks = Arc::new(MockStages::new(
            "transcript",
            &["pH", " PH ", "renal", "", "cardiac", "lungs"],
        ));
        let mut config = config();
        config.max_topics = 3;
        let session = orchestrator(&mocks, config)
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.topics, vec!["pH", "renal", "cardiac"]);
        assert_eq!(session.topic_results.len(), 3);
    }

    #[tokio::test]
    async fn test_resume_does_not_repeat_completed_work() {
        let mocks = Arc::new(
            MockStages::new("transcript", &["a", "b"]).failing(Stage::AudioSynthesis, "b"),
        );
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let first = SessionOrchestrator::with_components(mocks.clients(), store.clone(), config());
        let session = first
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.narrated_count(), 1);
        let calls_after_first = mocks.total_calls();

        // Same artifacts, healthy stages.
        let healthy = Arc::new(MockStages::new("transcript", &["a", "b"]));
        let second = SessionOrchestrator::with_components(healthy.clients(), store, config());
        let resumed = second
            .resume(&session.id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resumed.status, SessionStatus::Completed);
        assert_eq!(resumed.narrated_count(), 2);
        assert_eq!(healthy.calls(Stage::Transcription), 0);
        assert_eq!(healthy.calls(Stage::TopicExtraction), 0);
        assert_eq!(healthy.calls(Stage::PerformanceAnalysis), 0);
        assert_eq!(healthy.calls(Stage::GapReview), 0);
        assert_eq!(healthy.calls(Stage::FactRetrieval), 0);
        assert_eq!(healthy.calls(Stage::ScriptGeneration), 0);
        assert_eq!(healthy.calls(Stage::AudioSynthesis), 1);
        assert_eq!(mocks.total_calls(), calls_after_first);
    }

    #[tokio::test]
    async fn test_resume_of_completed_session_invokes_nothing() {
        let mocks = Arc::new(MockStages::new("transcript", &["a", "b", "c"]));
        let orchestrator = orchestrator(&mocks, config());
        let session = orchestrator
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();
        let calls = mocks.total_calls();

        let resumed = orchestrator
            .resume(&session.id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resumed.status, SessionStatus::Completed);
        assert_eq!(resumed.narrated_count(), 3);
        assert_eq!(mocks.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_resume_unknown_session_is_not_found() {
        let mocks = Arc::new(MockStages::new("t", &[]));
        let result = orchestrator(&mocks, config())
            .resume(&SessionId::new(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(StudycastError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_persisted_artifacts() {
        let mocks = Arc::new(
            MockStages::new("transcript", &["fast", "slow"])
                .hanging(Stage::ScriptGeneration, "slow"),
        );
        let mut config = config();
        config.timeouts = StageTimeouts::uniform(Duration::from_secs(7200));
        let orchestrator = orchestrator(&mocks, config);
        let token = CancellationToken::new();

        let canceller = token.clone();
        let watcher = mocks.clone();
        tokio::spawn(async move {
            // Cancel once the slow topic is stuck in script generation.
            while watcher.calls(Stage::ScriptGeneration) < 2
                || watcher.calls(Stage::AudioSynthesis) < 1
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            canceller.cancel();
        });

        let session = orchestrator.run_session("a.mp3", &token).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.as_ref().unwrap().is_cancelled());
        assert!(session.topic_results["fast"].is_success());
        let slow = &session.topic_results["slow"];
        assert!(slow.error.as_ref().unwrap().is_cancelled());
        assert!(slow.facts.is_some());

        let store = orchestrator.store();
        assert!(store
            .exists(&ArtifactKey::session(&session.id, Stage::Transcription))
            .await
            .unwrap());
        assert!(store
            .exists(&ArtifactKey::topic(&session.id, Stage::FactRetrieval, "slow"))
            .await
            .unwrap());
        assert!(store
            .exists(&ArtifactKey::topic(&session.id, Stage::AudioSynthesis, "fast"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fails_at_transcription() {
        let mocks = Arc::new(MockStages::new("t", &["a"]));
        let token = CancellationToken::new();
        token.cancel();
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &token)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        let error = session.error.unwrap();
        assert_eq!(error.stage, Stage::Transcription);
        assert!(error.is_cancelled());
        assert_eq!(mocks.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_completed_for_any_number_of_topic_failures() {
        let names = ["a", "b", "c", "d"];
        for failures in 0..=names.len() {
            let mut mocks = MockStages::new("t", &names);
            for topic in &names[..failures] {
                mocks = mocks.failing(Stage::FactRetrieval, topic);
            }
            let mocks = Arc::new(mocks);
            let session = orchestrator(&mocks, config())
                .run_session("a.mp3", &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(session.status, SessionStatus::Completed, "{} failures", failures);
            assert_eq!(session.topic_results.len(), names.len());
            assert_eq!(session.failed_topic_count(), failures);
            assert_eq!(session.narrated_count(), names.len() - failures);
        }
    }

    #[tokio::test]
    async fn test_total_topic_failure_can_fail_the_session() {
        let mocks = Arc::new(
            MockStages::new("t", &["a", "b"])
                .failing(Stage::FactRetrieval, "a")
                .failing(Stage::FactRetrieval, "b"),
        );
        let mut config = config();
        config.fail_on_total_topic_failure = true;
        let session = orchestrator(&mocks, config)
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.is_none());
        assert!(session.report().headline().contains("all topics failed"));
    }

    #[tokio::test]
    async fn test_analysis_failure_degrades_gracefully() {
        let mocks = Arc::new(
            MockStages::new("t", &["a"]).failing(Stage::PerformanceAnalysis, "*"),
        );
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.performance_summary.is_none());
        assert!(session.topic_results["a"].is_success());
        assert_eq!(mocks.context_for("a").unwrap().performance_summary, None);
        // Nothing to review without a summary.
        assert_eq!(mocks.calls(Stage::GapReview), 0);
        assert!(session.gap_review.is_none());
    }

    #[tokio::test]
    async fn test_retriever_warmed_once_before_any_retrieval() {
        let mocks = Arc::new(MockStages::new("t", &["a", "b", "c"]));
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(mocks.warms(), vec![0]);
        assert_eq!(mocks.calls(Stage::FactRetrieval), 3);
    }

    #[tokio::test]
    async fn test_warm_failure_leaves_topics_to_retrieve_on_their_own() {
        let mocks = Arc::new(MockStages::new("t", &["a", "b"]).failing_warm());
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.narrated_count(), 2);
        assert_eq!(mocks.warms().len(), 1);
    }

    #[tokio::test]
    async fn test_gap_review_reaches_script_generation() {
        let mocks = Arc::new(MockStages::new("t", &["a", "b"]));
        let orchestrator = orchestrator(&mocks, config());
        let session = orchestrator
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        let review = session.gap_review.clone().unwrap();
        assert!(review.starts_with("Gaps explained for: Student is solid"));
        assert_eq!(mocks.calls(Stage::GapReview), 1);
        for topic in ["a", "b"] {
            let context = mocks.context_for(topic).unwrap();
            assert_eq!(context.gap_review.as_deref(), Some(review.as_str()));
        }

        let persisted = orchestrator
            .artifact(&session.id, Stage::GapReview, None)
            .await
            .unwrap();
        assert_eq!(persisted.as_deref(), Some(review.as_bytes()));
        assert_eq!(
            orchestrator.status(&session.id).await.unwrap().gap_review,
            Some(review)
        );
    }

    #[tokio::test]
    async fn test_gap_review_failure_degrades_gracefully() {
        let mocks = Arc::new(MockStages::new("t", &["a"]).failing(Stage::GapReview, "*"));
        let orchestrator = orchestrator(&mocks, config());
        let session = orchestrator
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.performance_summary.is_some());
        assert!(session.gap_review.is_none());
        assert!(session.topic_results["a"].is_success());
        let context = mocks.context_for("a").unwrap();
        assert!(context.performance_summary.is_some());
        assert_eq!(context.gap_review, None);
        assert!(orchestrator
            .artifact(&session.id, Stage::GapReview, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_gap_review_times_out_without_failing_the_session() {
        let mocks = Arc::new(MockStages::new("t", &["a"]).hanging(Stage::GapReview, "*"));
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.gap_review.is_none());
        assert!(session.topic_results["a"].is_success());
    }

    #[tokio::test]
    async fn test_summary_reaches_script_generation() {
        let mocks = Arc::new(MockStages::new("t", &["a", "b"]));
        let mut config = config();
        config.max_concurrent_topics = 1;
        let session = orchestrator(&mocks, config)
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        let summary = session.performance_summary.clone().unwrap();
        let context = mocks.context_for("b").unwrap();
        assert_eq!(context.performance_summary, Some(summary));
        assert_eq!(context.previous_topic.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_timeout_is_classified() {
        let mocks = Arc::new(MockStages::new("t", &["a"]).hanging(Stage::Transcription, "*"));
        let session = orchestrator(&mocks, config())
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        let error = session.error.unwrap();
        assert_eq!(error.stage, Stage::Transcription);
        assert_eq!(error.kind, StageErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_artifact_lookup() {
        let mocks = Arc::new(MockStages::new("the transcript", &["pH"]));
        let orchestrator = orchestrator(&mocks, config());
        let session = orchestrator
            .run_session("a.mp3", &CancellationToken::new())
            .await
            .unwrap();

        let transcript = orchestrator
            .artifact(&session.id, Stage::Transcription, None)
            .await
            .unwrap();
        assert_eq!(transcript.as_deref(), Some("the transcript".as_bytes()));
        assert!(orchestrator
            .artifact(&session.id, Stage::FactRetrieval, Some("unknown"))
            .await
            .unwrap()
            .is_none());
        assert!(orchestrator
            .artifact(&session.id, Stage::FactRetrieval, None)
            .await
            .is_err());
    }
}
