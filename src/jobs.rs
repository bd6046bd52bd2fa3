//! Background job queue for session runs.
//!
//! Decouples "start a session" requests from execution: callers get a
//! session id back immediately while a fixed pool of tokio workers drains
//! the queue. Every queued or running session holds a cancellation token.

use crate::error::{Result, StudycastError};
use crate::pipeline::SessionOrchestrator;
use crate::session::{Session, SessionId, SessionReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Run,
    Resume,
}

struct Job {
    session_id: SessionId,
    kind: JobKind,
    cancel: CancellationToken,
}

/// Handle to the queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    orchestrator: Arc<SessionOrchestrator>,
    sender: mpsc::UnboundedSender<Job>,
    active: Arc<RwLock<HashMap<SessionId, CancellationToken>>>,
}

impl JobQueue {
    /// Start `workers` worker tasks on the current runtime.
    pub fn new(orchestrator: Arc<SessionOrchestrator>, workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let active = Arc::new(RwLock::new(HashMap::new()));

        for worker in 0..workers.max(1) {
            let receiver = receiver.clone();
            let orchestrator = orchestrator.clone();
            let active = active.clone();
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        debug!(worker, "Job queue closed");
                        break;
                    };
                    run_job(worker, &orchestrator, &active, job).await;
                }
            });
        }

        Self {
            orchestrator,
            sender,
            active,
        }
    }

    /// Register a session for `audio_ref` and queue it. Returns immediately.
    pub async fn start_session(&self, audio_ref: &str) -> Result<SessionId> {
        let session = self.orchestrator.create_session(audio_ref).await?;
        self.enqueue(session.id.clone(), JobKind::Run).await?;
        Ok(session.id)
    }

    /// Queue a re-run of an existing session.
    pub async fn resume_session(&self, session_id: &SessionId) -> Result<()> {
        self.orchestrator.status(session_id).await?;
        self.enqueue(session_id.clone(), JobKind::Resume).await
    }

    pub async fn session_status(&self, session_id: &SessionId) -> Result<Session> {
        self.orchestrator.status(session_id).await
    }

    pub async fn report(&self, session_id: &SessionId) -> Result<SessionReport> {
        self.orchestrator.report(session_id).await
    }

    /// Request cancellation. Returns false if the session is not queued or
    /// running (already terminal).
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<bool> {
        if let Some(token) = self.active.read().await.get(session_id) {
            info!(session_id = %session_id, "Cancelling session");
            token.cancel();
            return Ok(true);
        }
        self.orchestrator.status(session_id).await?;
        Ok(false)
    }

    /// Whether the session is queued or running.
    pub async fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.read().await.contains_key(session_id)
    }

    pub fn orchestrator(&self) -> &Arc<SessionOrchestrator> {
        &self.orchestrator
    }

    async fn enqueue(&self, session_id: SessionId, kind: JobKind) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.write().await;
            if active.contains_key(&session_id) {
                return Err(StudycastError::Queue(format!(
                    "Session {} is already queued or running",
                    session_id
                )));
            }
            active.insert(session_id.clone(), cancel.clone());
        }

        debug!(session_id = %session_id, ?kind, "Queueing session");
        let job = Job {
            session_id: session_id.clone(),
            kind,
            cancel,
        };
        if self.sender.send(job).is_err() {
            self.active.write().await.remove(&session_id);
            return Err(StudycastError::Queue("No workers are running".to_string()));
        }
        Ok(())
    }
}

async fn run_job(
    worker: usize,
    orchestrator: &SessionOrchestrator,
    active: &RwLock<HashMap<SessionId, CancellationToken>>,
    job: Job,
) {
    debug!(worker, session_id = %job.session_id, kind = ?job.kind, "Job started");
    let outcome = match job.kind {
        JobKind::Run => orchestrator.run(&job.session_id, &job.cancel).await,
        JobKind::Resume => orchestrator.resume(&job.session_id, &job.cancel).await,
    };
    active.write().await.remove(&job.session_id);

    match outcome {
        Ok(session) => info!(
            worker,
            session_id = %session.id,
            status = %session.status,
            "Job finished"
        ),
        Err(e) => warn!(worker, session_id = %job.session_id, %e, "Job could not run"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::MemoryArtifactStore;
    use crate::pipeline::testing::MockStages;
    use crate::pipeline::{PipelineConfig, StageTimeouts};
    use crate::session::{SessionStatus, Stage};
    use std::time::Duration;

    fn queue(mocks: &Arc<MockStages>) -> JobQueue {
        let config = PipelineConfig {
            max_concurrent_topics: 2,
            max_topics: 0,
            fail_on_total_topic_failure: false,
            include_previous_facts: true,
            timeouts: StageTimeouts::uniform(Duration::from_secs(3600)),
        };
        let orchestrator = SessionOrchestrator::with_components(
            mocks.clients(),
            Arc::new(MemoryArtifactStore::new()),
            config,
        );
        JobQueue::new(Arc::new(orchestrator), 2)
    }

    async fn wait_for<F>(queue: &JobQueue, id: &SessionId, done: F) -> Session
    where
        F: Fn(&Session) -> bool,
    {
        for _ in 0..500 {
            let session = queue.session_status(id).await.unwrap();
            if done(&session) {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} never reached the expected state", id);
    }

    #[tokio::test]
    async fn test_started_session_runs_in_background() {
        let mocks = Arc::new(MockStages::new("transcript", &["a", "b"]));
        let queue = queue(&mocks);

        let id = queue.start_session("study.mp3").await.unwrap();
        let session = wait_for(&queue, &id, |s| s.status.is_terminal()).await;

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.narrated_count(), 2);

        let report = queue.report(&id).await.unwrap();
        assert_eq!(
            report.headline(),
            "Session completed with 2 of 2 topics successfully narrated"
        );
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let mocks = Arc::new(
            MockStages::new("transcript", &["a"]).hanging(Stage::Transcription, "*"),
        );
        let queue = queue(&mocks);

        let id = queue.start_session("study.mp3").await.unwrap();
        wait_for(&queue, &id, |s| s.status == SessionStatus::Transcribing).await;

        assert!(queue.cancel_session(&id).await.unwrap());
        let session = wait_for(&queue, &id, |s| s.status.is_terminal()).await;

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_finished_or_unknown_session() {
        let mocks = Arc::new(MockStages::new("transcript", &[]));
        let queue = queue(&mocks);

        let id = queue.start_session("study.mp3").await.unwrap();
        wait_for(&queue, &id, |s| s.status.is_terminal()).await;
        // The worker drops the token right after the final snapshot.
        for _ in 0..100 {
            if !queue.is_active(&id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!queue.cancel_session(&id).await.unwrap());
        assert!(matches!(
            queue.cancel_session(&SessionId::new()).await,
            Err(StudycastError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_unknown_session_is_rejected() {
        let mocks = Arc::new(MockStages::new("transcript", &[]));
        let queue = queue(&mocks);
        assert!(matches!(
            queue.resume_session(&SessionId::new()).await,
            Err(StudycastError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_queues_a_rerun() {
        let mocks = Arc::new(
            MockStages::new("transcript", &["a"]).failing(Stage::Transcription, "*"),
        );
        let queue = queue(&mocks);
        let id = queue.start_session("study.mp3").await.unwrap();
        let failed = wait_for(&queue, &id, |s| s.status.is_terminal()).await;
        assert_eq!(failed.status, SessionStatus::Failed);
        while queue.is_active(&id).await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        queue.resume_session(&id).await.unwrap();
        for _ in 0..500 {
            if mocks.calls(Stage::Transcription) == 2 && !queue.is_active(&id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mocks.calls(Stage::Transcription), 2);
        let session = queue.session_status(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }
}
