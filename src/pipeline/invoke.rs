//! Uniform stage invocation with a deadline and a cancellation check.

use crate::error::StudycastError;
use crate::session::{Stage, StageError};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run one stage call, bounded by `timeout` and abandoned on cancellation.
///
/// Every outcome other than success is classified as a [`StageError`] of
/// `stage`: the client's own error, an elapsed deadline, or cancellation.
/// A token that is already cancelled prevents the call from starting.
pub async fn invoke_stage<T, F>(
    stage: Stage,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StudycastError>>,
{
    if cancel.is_cancelled() {
        return Err(StageError::cancelled(stage));
    }

    let started = Instant::now();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(%stage, "Stage abandoned on cancellation");
            Err(StageError::cancelled(stage))
        }
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(Ok(value)) => {
                debug!(%stage, elapsed_ms = started.elapsed().as_millis() as u64, "Stage finished");
                Ok(value)
            }
            Ok(Err(e)) => Err(StageError::failed(stage, e)),
            Err(_) => Err(StageError::timed_out(stage, timeout)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StageErrorKind;

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let token = CancellationToken::new();
        let value = invoke_stage(Stage::FactRetrieval, Duration::from_secs(1), &token, async {
            Ok::<_, StudycastError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_client_error_is_classified_as_stage_failure() {
        let token = CancellationToken::new();
        let err = invoke_stage(Stage::ScriptGeneration, Duration::from_secs(1), &token, async {
            Err::<(), _>(StudycastError::Generation("model overloaded".to_string()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.stage, Stage::ScriptGeneration);
        assert_eq!(err.kind, StageErrorKind::Failed);
        assert!(err.message.contains("model overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_a_timeout_of_that_stage() {
        let token = CancellationToken::new();
        let err = invoke_stage(Stage::AudioSynthesis, Duration::from_secs(5), &token, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, StudycastError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.stage, Stage::AudioSynthesis);
        assert_eq!(err.kind, StageErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_the_call() {
        let token = CancellationToken::new();
        token.cancel();
        let called = std::sync::atomic::AtomicBool::new(false);
        let err = invoke_stage(Stage::Transcription, Duration::from_secs(1), &token, async {
            called.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, StudycastError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_inflight_call() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = invoke_stage(Stage::FactRetrieval, Duration::from_secs(30), &token, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, StudycastError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
