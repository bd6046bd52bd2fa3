//! Human-facing session summaries.

use super::{Session, SessionStatus, Stage, StageError};
use serde::Serialize;

/// Overall outcome of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Still running.
    InProgress { status: SessionStatus },
    /// A session-level stage broke before any topic was processed.
    FailedBeforeTopics { stage: Stage, cause: String },
    /// The session was stopped during topic processing.
    FailedDuringTopics {
        cause: String,
        narrated: usize,
        total: usize,
    },
    /// Transcript and topics succeeded; `narrated` of `total` topics have audio.
    Completed { narrated: usize, total: usize },
}

/// Per-topic outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TopicOutcome {
    Narrated { audio_ref: String },
    Failed { step: Stage, cause: String },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicLine {
    pub topic: String,
    #[serde(flatten)]
    pub outcome: TopicOutcome,
}

/// Point-in-time report for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
    pub topics: Vec<TopicLine>,
}

impl SessionReport {
    pub fn from_session(session: &Session) -> Self {
        let topics: Vec<TopicLine> = session
            .ordered_results()
            .map(|(topic, result)| {
                let outcome = match result {
                    Some(r) => match (&r.error, &r.audio_ref) {
                        (Some(err), _) => TopicOutcome::Failed {
                            step: err.stage,
                            cause: describe(err),
                        },
                        (None, Some(audio)) => TopicOutcome::Narrated {
                            audio_ref: audio.clone(),
                        },
                        (None, None) => TopicOutcome::Pending,
                    },
                    None => TopicOutcome::Pending,
                };
                TopicLine {
                    topic: topic.to_string(),
                    outcome,
                }
            })
            .collect();

        let narrated = session.narrated_count();
        let total = session.topics.len();

        let outcome = match (session.status, &session.error) {
            (SessionStatus::Completed, _) => SessionOutcome::Completed { narrated, total },
            (SessionStatus::Failed, Some(err)) if err.stage.is_session_level() => {
                SessionOutcome::FailedBeforeTopics {
                    stage: err.stage,
                    cause: describe(err),
                }
            }
            (SessionStatus::Failed, Some(err)) => SessionOutcome::FailedDuringTopics {
                cause: describe(err),
                narrated,
                total,
            },
            (SessionStatus::Failed, None) => SessionOutcome::FailedDuringTopics {
                cause: "all topics failed".to_string(),
                narrated,
                total,
            },
            (status, _) => SessionOutcome::InProgress { status },
        };

        Self {
            session_id: session.id.to_string(),
            outcome,
            topics,
        }
    }

    /// Topics that errored, with the step that broke.
    pub fn failed_topics(&self) -> impl Iterator<Item = (&str, Stage)> {
        self.topics.iter().filter_map(|line| match &line.outcome {
            TopicOutcome::Failed { step, .. } => Some((line.topic.as_str(), *step)),
            _ => None,
        })
    }

    /// One-line headline for the session.
    pub fn headline(&self) -> String {
        match &self.outcome {
            SessionOutcome::InProgress { status } => format!("Session is {}", status),
            SessionOutcome::FailedBeforeTopics { stage, cause } => format!(
                "Session failed before any topics were processed ({}: {})",
                stage, cause
            ),
            SessionOutcome::FailedDuringTopics {
                cause,
                narrated,
                total,
            } => format!(
                "Session failed during topic processing ({}); {} of {} topics narrated",
                cause, narrated, total
            ),
            SessionOutcome::Completed { narrated, total } => format!(
                "Session completed with {} of {} topics successfully narrated",
                narrated, total
            ),
        }
    }
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.headline())?;
        for line in &self.topics {
            match &line.outcome {
                TopicOutcome::Narrated { audio_ref } => {
                    writeln!(f, "  [ok]      {} -> {}", line.topic, audio_ref)?
                }
                TopicOutcome::Failed { step, cause } => {
                    writeln!(f, "  [failed]  {} ({} broke: {})", line.topic, step, cause)?
                }
                TopicOutcome::Pending => writeln!(f, "  [pending] {}", line.topic)?,
            }
        }
        Ok(())
    }
}

fn describe(err: &StageError) -> String {
    format!("{}: {}", err.kind, err.message)
}
