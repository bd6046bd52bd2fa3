//! Per-topic fan-out: facts → script → audio for every topic, concurrently.

use super::{invoke_stage, read_text_artifact, write_artifact, PipelineConfig};
use crate::artifact_store::{ArtifactKey, ArtifactStore};
use crate::session::{SessionId, Stage, StageError, TopicResult};
use crate::stages::{GenerationContext, StageClients};
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Runs the per-topic sub-pipelines of one session.
///
/// At most `max_concurrent_topics` topics are in flight at once; steps inside
/// a topic are strictly sequential. A failing step only stops its own topic.
pub struct TopicFanOut {
    clients: StageClients,
    store: Arc<dyn ArtifactStore>,
    config: PipelineConfig,
}

/// Inputs shared by every topic of a session.
#[derive(Debug, Clone, Copy)]
pub struct SharedContext<'a> {
    pub session_id: &'a SessionId,
    /// All topics in display order.
    pub topics: &'a [String],
    pub performance_summary: Option<&'a str>,
    pub gap_review: Option<&'a str>,
}

impl TopicFanOut {
    pub fn new(clients: StageClients, store: Arc<dyn ArtifactStore>, config: PipelineConfig) -> Self {
        Self {
            clients,
            store,
            config,
        }
    }

    /// Results as topics finish, in completion order.
    pub fn stream_topics<'a>(
        &'a self,
        shared: SharedContext<'a>,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = TopicResult> + 'a {
        stream::iter(shared.topics.iter().enumerate())
            .map(move |(i, topic)| {
                let previous = i.checked_sub(1).map(|p| shared.topics[p].as_str());
                self.process_topic(shared, topic, previous, cancel)
            })
            .buffer_unordered(self.config.max_concurrent_topics.max(1))
    }

    /// Run every topic and wait for all of them: one entry per topic.
    pub async fn process_topics(
        &self,
        shared: SharedContext<'_>,
        cancel: &CancellationToken,
    ) -> HashMap<String, TopicResult> {
        self.stream_topics(shared, cancel)
            .map(|result| (result.topic.clone(), result))
            .collect()
            .await
    }

    /// Run one topic's sub-pipeline. Never fails: errors land in the result.
    #[instrument(skip(self, shared, cancel), fields(session_id = %shared.session_id))]
    pub async fn process_topic(
        &self,
        shared: SharedContext<'_>,
        topic: &str,
        previous_topic: Option<&str>,
        cancel: &CancellationToken,
    ) -> TopicResult {
        let mut result = TopicResult::new(topic);

        match self
            .run_steps(&mut result, shared, previous_topic, cancel)
            .await
        {
            Ok(()) => info!(topic, "Topic narrated"),
            Err(error) if error.is_cancelled() => {
                debug!(topic, step = %error.stage, "Topic stopped by cancellation");
                result.fail(error);
            }
            Err(error) => {
                warn!(topic, step = %error.stage, %error, "Topic failed");
                result.fail(error);
            }
        }

        result
    }

    async fn run_steps(
        &self,
        result: &mut TopicResult,
        shared: SharedContext<'_>,
        previous_topic: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let session_id = shared.session_id;
        let topic = result.topic.clone();
        let store = self.store.as_ref();
        let timeouts = &self.config.timeouts;

        // Facts
        let facts_key = ArtifactKey::topic(session_id, Stage::FactRetrieval, &topic);
        let facts = match read_text_artifact(store, &facts_key).await? {
            Some(facts) => {
                debug!(topic = %topic, "Reusing persisted facts");
                facts
            }
            None => {
                let facts = invoke_stage(
                    Stage::FactRetrieval,
                    timeouts.retrieval,
                    cancel,
                    self.clients.retriever.retrieve_facts(&topic),
                )
                .await?;
                if facts.trim().is_empty() {
                    return Err(StageError::failed(Stage::FactRetrieval, "no facts returned"));
                }
                write_artifact(store, &facts_key, facts.as_bytes()).await?;
                facts
            }
        };
        result.record_facts(facts.clone());

        // Script
        let script_key = ArtifactKey::topic(session_id, Stage::ScriptGeneration, &topic);
        let script = match read_text_artifact(store, &script_key).await? {
            Some(script) => {
                debug!(topic = %topic, "Reusing persisted script");
                script
            }
            None => {
                let context = self
                    .generation_context(shared, previous_topic)
                    .await;
                let script = invoke_stage(
                    Stage::ScriptGeneration,
                    timeouts.generation,
                    cancel,
                    self.clients
                        .generator
                        .generate_script(&topic, &facts, &context),
                )
                .await?;
                if script.trim().is_empty() {
                    return Err(StageError::failed(
                        Stage::ScriptGeneration,
                        "empty script returned",
                    ));
                }
                write_artifact(store, &script_key, script.as_bytes()).await?;
                script
            }
        };
        result.record_script(script.clone());

        // Audio
        let audio_key = ArtifactKey::topic(session_id, Stage::AudioSynthesis, &topic);
        let audio_present = store
            .exists(&audio_key)
            .await
            .map_err(|e| StageError::failed(Stage::AudioSynthesis, e))?;
        let audio_ref = if audio_present {
            debug!(topic = %topic, "Reusing persisted audio");
            store.locate(&audio_key)
        } else {
            let audio = invoke_stage(
                Stage::AudioSynthesis,
                timeouts.synthesis,
                cancel,
                self.clients.synthesizer.synthesize(&script),
            )
            .await?;
            if audio.is_empty() {
                return Err(StageError::failed(Stage::AudioSynthesis, "no audio returned"));
            }
            write_artifact(store, &audio_key, &audio).await?;
            store.locate(&audio_key)
        };
        result.record_audio(audio_ref);

        Ok(())
    }

    /// Shared context plus the previous topic, and its facts if they are
    /// already persisted. Topics run concurrently, so they may not be.
    async fn generation_context(
        &self,
        shared: SharedContext<'_>,
        previous_topic: Option<&str>,
    ) -> GenerationContext {
        let previous_facts = match previous_topic {
            Some(previous) if self.config.include_previous_facts => {
                let key = ArtifactKey::topic(shared.session_id, Stage::FactRetrieval, previous);
                self.store.get_text(&key).await.ok().flatten()
            }
            _ => None,
        };

        GenerationContext {
            performance_summary: shared.performance_summary.map(str::to_string),
            gap_review: shared.gap_review.map(str::to_string),
            previous_topic: previous_topic.map(str::to_string),
            previous_facts,
        }
    }
}
