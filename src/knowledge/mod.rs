//! Local knowledge base used to ground narration scripts.
//!
//! Reference notes (`.txt`/`.md`) under the knowledge directory are split into
//! paragraph passages and embedded once; the vectors are cached as JSON next
//! to the application data and refreshed per file when it changes.

mod embedding;
mod index;

pub use embedding::{Embedder, OpenAIEmbedder};
pub use index::{chunk_paragraphs, cosine_similarity, KnowledgeIndex, Passage, ScoredPassage};

use crate::config::RetrievalSettings;
use crate::error::{Result, StudycastError};
use crate::stages::FactRetriever;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Fact retriever backed by embedding search over local notes.
pub struct KnowledgeBaseRetriever {
    embedder: Arc<dyn Embedder>,
    knowledge_dir: PathBuf,
    cache_path: PathBuf,
    top_k: usize,
    min_score: f32,
    index: OnceCell<KnowledgeIndex>,
}

impl KnowledgeBaseRetriever {
    pub fn from_settings(
        settings: &RetrievalSettings,
        knowledge_dir: PathBuf,
        cache_path: PathBuf,
    ) -> Result<Self> {
        let embedder = OpenAIEmbedder::with_config(
            &settings.embedding_model,
            settings.dimensions,
            Duration::from_secs(settings.timeout_seconds),
        )?;
        Ok(Self::with_embedder(
            Arc::new(embedder),
            knowledge_dir,
            cache_path,
            settings.top_k,
            settings.min_score,
        ))
    }

    pub fn with_embedder(
        embedder: Arc<dyn Embedder>,
        knowledge_dir: PathBuf,
        cache_path: PathBuf,
        top_k: usize,
        min_score: f32,
    ) -> Self {
        Self {
            embedder,
            knowledge_dir,
            cache_path,
            top_k,
            min_score,
            index: OnceCell::new(),
        }
    }

    /// The index, built on first use. A failed build is retried next call.
    pub async fn index(&self) -> Result<&KnowledgeIndex> {
        self.index
            .get_or_try_init(|| {
                KnowledgeIndex::build(&self.knowledge_dir, &self.cache_path, self.embedder.as_ref())
            })
            .await
    }
}

#[async_trait]
impl FactRetriever for KnowledgeBaseRetriever {
    async fn warm(&self) -> Result<()> {
        let index = self.index().await?;
        debug!("Knowledge index warm with {} passages", index.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve_facts(&self, topic: &str) -> Result<String> {
        let index = self.index().await?;
        if index.is_empty() {
            return Err(StudycastError::Retrieval(format!(
                "Knowledge base at {} has no notes",
                self.knowledge_dir.display()
            )));
        }

        let query = self.embedder.embed(topic).await?;
        let hits = index.search(&query, self.top_k, self.min_score);
        if hits.is_empty() {
            return Err(StudycastError::Retrieval(format!(
                "No grounding content found for '{}'",
                topic
            )));
        }

        debug!(
            "{} passages for '{}' (best score {:.3})",
            hits.len(),
            topic,
            hits[0].score
        );

        Ok(hits
            .iter()
            .map(|h| format!("[{}] {}", h.passage.source, h.passage.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::index::tests::KeywordEmbedder;
    use super::*;
    use crate::pipeline::invoke_stage;
    use crate::session::{Stage, StageErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn retriever(dir: &std::path::Path) -> KnowledgeBaseRetriever {
        KnowledgeBaseRetriever::with_embedder(
            Arc::new(KeywordEmbedder::new(vec!["cardiac", "renal", "ph"])),
            dir.join("notes"),
            dir.join("index.json"),
            3,
            0.5,
        )
    }

    /// Keyword embedder that takes `delay` per request.
    struct SlowEmbedder {
        inner: KeywordEmbedder,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.embed_batch(texts).await
        }

        fn model(&self) -> &str {
            "keywords"
        }
    }

    fn slow_retriever(dir: &std::path::Path) -> (Arc<SlowEmbedder>, KnowledgeBaseRetriever) {
        std::fs::create_dir_all(dir.join("notes")).unwrap();
        std::fs::write(
            dir.join("notes/cardio.md"),
            "Cardiac output is HR x SV.",
        )
        .unwrap();
        std::fs::write(dir.join("notes/renal.md"), "Renal clearance of creatinine.").unwrap();

        let embedder = Arc::new(SlowEmbedder {
            inner: KeywordEmbedder::new(vec!["cardiac", "renal"]),
            delay: Duration::from_secs(40),
            calls: AtomicUsize::new(0),
        });
        let retriever = KnowledgeBaseRetriever::with_embedder(
            embedder.clone(),
            dir.join("notes"),
            dir.join("index.json"),
            3,
            0.5,
        );
        (embedder, retriever)
    }

    async fn retrieve_within_deadline(
        retriever: &KnowledgeBaseRetriever,
        topic: &str,
    ) -> std::result::Result<String, crate::session::StageError> {
        invoke_stage(
            Stage::FactRetrieval,
            Duration::from_secs(60),
            &CancellationToken::new(),
            retriever.retrieve_facts(topic),
        )
        .await
    }

    #[tokio::test]
    async fn test_retrieves_matching_passages_with_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(
            dir.path().join("notes/cardio.md"),
            "Cardiac output is HR x SV.\n\nStarling's law links preload and stroke volume.",
        )
        .unwrap();

        let facts = retriever(dir.path())
            .retrieve_facts("cardiac output")
            .await
            .unwrap();
        assert!(facts.starts_with("[cardio.md] Cardiac output"));
    }

    #[tokio::test]
    async fn test_no_hit_is_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/renal.txt"), "Renal clearance.").unwrap();

        let result = retriever(dir.path()).retrieve_facts("cardiac output").await;
        assert!(matches!(result, Err(StudycastError::Retrieval(_))));
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_is_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = retriever(dir.path()).retrieve_facts("renal").await;
        assert!(matches!(result, Err(StudycastError::Retrieval(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_builds_index_outside_the_retrieval_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (embedder, retriever) = slow_retriever(dir.path());

        // Two files at 40s each: longer than one retrieval deadline.
        retriever.warm().await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("index.json").exists());

        let facts = retrieve_within_deadline(&retriever, "cardiac output")
            .await
            .unwrap();
        assert!(facts.contains("Cardiac output"));
        let facts = retrieve_within_deadline(&retriever, "renal clearance")
            .await
            .unwrap();
        assert!(facts.contains("creatinine"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_cut_short_by_deadline_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (embedder, retriever) = slow_retriever(dir.path());

        // First file embedded and cached, second cut off.
        let first = retrieve_within_deadline(&retriever, "cardiac output").await;
        assert_eq!(first.unwrap_err().kind, StageErrorKind::TimedOut);
        assert!(dir.path().join("index.json").exists());

        // Second file finishes and is cached; the query embedding is cut off.
        let second = retrieve_within_deadline(&retriever, "cardiac output").await;
        assert_eq!(second.unwrap_err().kind, StageErrorKind::TimedOut);

        // Index comes entirely from the cache; only the query is embedded.
        let calls_before = embedder.calls.load(Ordering::SeqCst);
        let third = retrieve_within_deadline(&retriever, "cardiac output")
            .await
            .unwrap();
        assert!(third.contains("Cardiac output"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_before + 1);
    }
}
