//! In-memory stage clients for pipeline tests.

use crate::error::{Result, StudycastError};
use crate::session::Stage;
use crate::stages::{
    AudioSynthesizer, FactRetriever, GapReviewer, GenerationContext, PerformanceAnalyzer,
    ScriptGenerator, StageClients, TopicExtractor, Transcriber,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable stand-in for every stage.
///
/// Topic steps can be made to fail or hang per topic; session-level stages
/// per stage (the topic is ignored for them).
pub(crate) struct MockStages {
    transcript: String,
    topics: Vec<String>,
    summary: String,
    failures: HashSet<(Stage, String)>,
    hangs: HashSet<(Stage, String)>,
    delay: Duration,
    warm_fails: bool,
    calls: Mutex<HashMap<Stage, usize>>,
    /// Fact retrievals seen by each `warm` call.
    warms: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    contexts: Mutex<HashMap<String, GenerationContext>>,
}

const SESSION_WIDE: &str = "*";

impl MockStages {
    pub(crate) fn new(transcript: &str, topics: &[&str]) -> Self {
        Self {
            transcript: transcript.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            summary: "Student is solid on definitions, shaky on mechanisms".to_string(),
            failures: HashSet::new(),
            hangs: HashSet::new(),
            delay: Duration::ZERO,
            warm_fails: false,
            calls: Mutex::new(HashMap::new()),
            warms: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Make `stage` fail for `topic` (any topic for session-level stages).
    pub(crate) fn failing(mut self, stage: Stage, topic: &str) -> Self {
        self.failures.insert((stage, Self::scope(stage, topic)));
        self
    }

    /// Make `stage` never answer for `topic`.
    pub(crate) fn hanging(mut self, stage: Stage, topic: &str) -> Self {
        self.hangs.insert((stage, Self::scope(stage, topic)));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make retriever warm-up fail; retrieval itself keeps working.
    pub(crate) fn failing_warm(mut self) -> Self {
        self.warm_fails = true;
        self
    }

    pub(crate) fn clients(self: &Arc<Self>) -> StageClients {
        StageClients {
            transcriber: self.clone(),
            extractor: self.clone(),
            analyzer: Some(self.clone()),
            gap_reviewer: Some(self.clone()),
            retriever: self.clone(),
            generator: self.clone(),
            synthesizer: self.clone(),
        }
    }

    pub(crate) fn calls(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&stage)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Fact retrieval counts at each warm-up, in call order.
    pub(crate) fn warms(&self) -> Vec<usize> {
        self.warms.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn context_for(&self, topic: &str) -> Option<GenerationContext> {
        self.contexts.lock().unwrap().get(topic).cloned()
    }

    fn scope(stage: Stage, topic: &str) -> String {
        if stage.is_session_level() {
            SESSION_WIDE.to_string()
        } else {
            topic.to_string()
        }
    }

    async fn step(&self, stage: Stage, topic: &str) -> Result<()> {
        *self.calls.lock().unwrap().entry(stage).or_insert(0) += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let key = (stage, Self::scope(stage, topic));
        if self.hangs.contains(&key) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures.contains(&key) {
            let message = format!("{} unavailable for '{}'", stage, topic);
            return Err(match stage {
                Stage::Transcription => StudycastError::Transcription(message),
                Stage::TopicExtraction => StudycastError::Extraction(message),
                Stage::PerformanceAnalysis => StudycastError::Analysis(message),
                Stage::GapReview => StudycastError::GapReview(message),
                Stage::FactRetrieval => StudycastError::Retrieval(message),
                Stage::ScriptGeneration => StudycastError::Generation(message),
                Stage::AudioSynthesis => StudycastError::Synthesis(message),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transcriber for MockStages {
    async fn transcribe(&self, _audio_ref: &str) -> Result<String> {
        self.step(Stage::Transcription, SESSION_WIDE).await?;
        Ok(self.transcript.clone())
    }
}

#[async_trait]
impl TopicExtractor for MockStages {
    async fn extract_topics(&self, _transcript: &str) -> Result<Vec<String>> {
        self.step(Stage::TopicExtraction, SESSION_WIDE).await?;
        Ok(self.topics.clone())
    }
}

#[async_trait]
impl PerformanceAnalyzer for MockStages {
    async fn analyze(&self, _transcript: &str, _topics: &[String]) -> Result<String> {
        self.step(Stage::PerformanceAnalysis, SESSION_WIDE).await?;
        Ok(self.summary.clone())
    }
}

#[async_trait]
impl GapReviewer for MockStages {
    async fn review(&self, _transcript: &str, _topics: &[String], summary: &str) -> Result<String> {
        self.step(Stage::GapReview, SESSION_WIDE).await?;
        Ok(format!("Gaps explained for: {}", summary))
    }
}

#[async_trait]
impl FactRetriever for MockStages {
    async fn retrieve_facts(&self, topic: &str) -> Result<String> {
        self.step(Stage::FactRetrieval, topic).await?;
        Ok(format!("facts about {}", topic))
    }

    async fn warm(&self) -> Result<()> {
        let seen = self.calls(Stage::FactRetrieval);
        self.warms.lock().unwrap().push(seen);
        if self.warm_fails {
            return Err(StudycastError::Retrieval("index unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptGenerator for MockStages {
    async fn generate_script(
        &self,
        topic: &str,
        facts: &str,
        context: &GenerationContext,
    ) -> Result<String> {
        self.contexts
            .lock()
            .unwrap()
            .insert(topic.to_string(), context.clone());
        self.step(Stage::ScriptGeneration, topic).await?;
        Ok(format!("Today we cover {}. {}", topic, facts))
    }
}

#[async_trait]
impl AudioSynthesizer for MockStages {
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>> {
        let topic = script
            .strip_prefix("Today we cover ")
            .and_then(|rest| rest.split_once(". "))
            .map(|(topic, _)| topic.to_string())
            .unwrap_or_default();
        self.step(Stage::AudioSynthesis, &topic).await?;
        Ok(format!("ID3 {}", script).into_bytes())
    }
}
