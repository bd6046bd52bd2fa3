//! Chat-completion backed stages: topic extraction, performance analysis,
//! gap review and script generation.

use super::{
    FactRetriever, GapReviewer, GenerationContext, PerformanceAnalyzer, ScriptGenerator,
    TopicExtractor,
};
use crate::config::Prompts;
use crate::error::{Result, StudycastError};
use crate::openai::create_client_with_timeout;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Thin wrapper over one chat model.
struct ChatModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl ChatModel {
    fn new(model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            temperature,
        })
    }

    /// Run a single system + user exchange; `err` classifies failures.
    async fn complete(
        &self,
        system: &str,
        user: String,
        err: fn(String) -> StudycastError,
    ) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system.to_string())
                .build()
                .map_err(|e| err(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| err(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(|e| err(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| err(format!("{} request failed: {}", self.model, e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        Ok(content)
    }
}

/// Parse a "one topic per line" model reply.
///
/// Bullets, numbering, surrounding quotes and a leading "Topics:" header are
/// stripped. Duplicates are left for the caller to resolve.
pub fn parse_topic_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches(['-', '*', '•']).trim_start();
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            let line = if digits > 0 && line[digits..].starts_with(['.', ')']) {
                line[digits + 1..].trim_start()
            } else {
                line
            };
            line.trim_matches(['"', '\'', '`']).trim().to_string()
        })
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("topics:"))
        .collect()
}

/// LLM topic extractor.
pub struct LlmTopicExtractor {
    chat: ChatModel,
    prompts: Prompts,
}

impl LlmTopicExtractor {
    pub fn new(model: &str, prompts: Prompts, timeout: Duration) -> Result<Self> {
        Ok(Self {
            chat: ChatModel::new(model, 0.2, timeout)?,
            prompts,
        })
    }
}

#[async_trait]
impl TopicExtractor for LlmTopicExtractor {
    #[instrument(skip(self, transcript), fields(chars = transcript.len()))]
    async fn extract_topics(&self, transcript: &str) -> Result<Vec<String>> {
        let mut vars = HashMap::new();
        vars.insert("transcript".to_string(), transcript.to_string());
        let user = self
            .prompts
            .render_with_custom(&self.prompts.extraction.user, &vars);

        let reply = self
            .chat
            .complete(&self.prompts.extraction.system, user, StudycastError::Extraction)
            .await?;

        let topics = parse_topic_lines(&reply);
        debug!("Extracted {} topics", topics.len());
        Ok(topics)
    }
}

/// LLM student performance analyzer.
pub struct LlmPerformanceAnalyzer {
    chat: ChatModel,
    prompts: Prompts,
}

impl LlmPerformanceAnalyzer {
    pub fn new(model: &str, prompts: Prompts, timeout: Duration) -> Result<Self> {
        Ok(Self {
            chat: ChatModel::new(model, 0.2, timeout)?,
            prompts,
        })
    }
}

#[async_trait]
impl PerformanceAnalyzer for LlmPerformanceAnalyzer {
    #[instrument(skip(self, transcript, topics), fields(topics = topics.len()))]
    async fn analyze(&self, transcript: &str, topics: &[String]) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("transcript".to_string(), transcript.to_string());
        vars.insert("topics".to_string(), bullet_list(topics));
        let user = self
            .prompts
            .render_with_custom(&self.prompts.analysis.user, &vars);

        let summary = self
            .chat
            .complete(&self.prompts.analysis.system, user, StudycastError::Analysis)
            .await?;

        if summary.is_empty() {
            return Err(StudycastError::Analysis("Empty summary from LLM".to_string()));
        }
        Ok(summary)
    }
}

fn bullet_list(topics: &[String]) -> String {
    topics
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// LLM gap review, grounded on the configured fact retriever.
///
/// The performance summary is the retrieval query, so the reference context
/// follows the gaps rather than the topic names.
pub struct LlmGapReviewer {
    chat: ChatModel,
    prompts: Prompts,
    retriever: Arc<dyn FactRetriever>,
}

impl LlmGapReviewer {
    pub fn new(
        model: &str,
        temperature: f32,
        prompts: Prompts,
        retriever: Arc<dyn FactRetriever>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            chat: ChatModel::new(model, temperature, timeout)?,
            prompts,
            retriever,
        })
    }

    fn render_user_prompt(
        &self,
        transcript: &str,
        topics: &[String],
        summary: &str,
        facts: &str,
    ) -> String {
        let mut vars = HashMap::new();
        vars.insert("transcript".to_string(), transcript.to_string());
        vars.insert("topics".to_string(), bullet_list(topics));
        vars.insert("performance".to_string(), summary.to_string());
        vars.insert("facts".to_string(), facts.to_string());
        self.prompts
            .render_with_custom(&self.prompts.gap_review.user, &vars)
    }
}

#[async_trait]
impl GapReviewer for LlmGapReviewer {
    #[instrument(skip_all, fields(topics = topics.len()))]
    async fn review(&self, transcript: &str, topics: &[String], summary: &str) -> Result<String> {
        let facts = self
            .retriever
            .retrieve_facts(summary)
            .await
            .map_err(|e| StudycastError::GapReview(format!("No reference context: {}", e)))?;

        let user = self.render_user_prompt(transcript, topics, summary, &facts);
        let review = self
            .chat
            .complete(&self.prompts.gap_review.system, user, StudycastError::GapReview)
            .await?;

        if review.is_empty() {
            return Err(StudycastError::GapReview(
                "Empty gap review from LLM".to_string(),
            ));
        }
        debug!("Gap review is {} words", review.split_whitespace().count());
        Ok(review)
    }
}

/// LLM narration script writer.
pub struct LlmScriptGenerator {
    chat: ChatModel,
    prompts: Prompts,
}

impl LlmScriptGenerator {
    pub fn new(model: &str, temperature: f32, prompts: Prompts, timeout: Duration) -> Result<Self> {
        Ok(Self {
            chat: ChatModel::new(model, temperature, timeout)?,
            prompts,
        })
    }

    fn render_user_prompt(&self, topic: &str, facts: &str, context: &GenerationContext) -> String {
        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), topic.to_string());
        vars.insert("facts".to_string(), facts.to_string());
        vars.insert(
            "performance".to_string(),
            context
                .performance_summary
                .clone()
                .unwrap_or_else(|| "(no performance notes available)".to_string()),
        );
        vars.insert(
            "gap_review".to_string(),
            context
                .gap_review
                .as_ref()
                .map(|r| {
                    format!(
                        "\nExplanations of the student's gaps (weave these in):\n{}\n",
                        r
                    )
                })
                .unwrap_or_default(),
        );
        vars.insert(
            "previous_topic".to_string(),
            context
                .previous_topic
                .clone()
                .unwrap_or_else(|| "(this is the first topic)".to_string()),
        );
        vars.insert(
            "previous_facts".to_string(),
            context
                .previous_facts
                .as_ref()
                .map(|f| format!("Facts covered in the previous segment:\n{}\n", f))
                .unwrap_or_default(),
        );
        self.prompts.render_with_custom(&self.prompts.script.user, &vars)
    }
}

#[async_trait]
impl ScriptGenerator for LlmScriptGenerator {
    #[instrument(skip(self, facts, context))]
    async fn generate_script(
        &self,
        topic: &str,
        facts: &str,
        context: &GenerationContext,
    ) -> Result<String> {
        if facts.trim().is_empty() {
            return Err(StudycastError::Generation(format!(
                "No facts supplied for '{}'",
                topic
            )));
        }

        let user = self.render_user_prompt(topic, facts, context);
        let script = self
            .chat
            .complete(&self.prompts.script.system, user, StudycastError::Generation)
            .await?;

        if script.is_empty() {
            return Err(StudycastError::Generation("Empty script from LLM".to_string()));
        }

        debug!(
            "Script for '{}' is {} words",
            topic,
            script.split_whitespace().count()
        );
        Ok(script)
    }
}
