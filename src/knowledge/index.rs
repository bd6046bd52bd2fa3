//! On-disk knowledge index: paragraph passages with embeddings.

use super::embedding::Embedder;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Target passage size in characters.
pub const PASSAGE_CHARS: usize = 1200;

const SOURCE_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// One embedded passage of reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    /// File name the passage came from, relative to the knowledge directory.
    pub source: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Passages of one source file, keyed for cache reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedFile {
    path: String,
    modified: u64,
    passages: Vec<Passage>,
}

/// Searchable set of passages built from a knowledge directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeIndex {
    model: String,
    files: Vec<IndexedFile>,
}

/// A passage with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredPassage<'a> {
    pub passage: &'a Passage,
    pub score: f32,
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Group paragraphs into passages of roughly `max_chars`.
///
/// Paragraphs are never split; one longer than `max_chars` becomes its own
/// passage.
pub fn chunk_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut passages = Vec::new();
    let mut current = String::new();

    for paragraph in text
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
    {
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            passages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        passages.push(current);
    }
    passages
}

async fn modified_secs(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(files);
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

impl KnowledgeIndex {
    /// Build the index for `dir`, reusing cached vectors for unchanged files.
    ///
    /// The cache is rewritten after every newly embedded file, so a build
    /// that is interrupted part way still keeps the work it finished.
    pub async fn build(dir: &Path, cache_path: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let cached = Self::load_cache(cache_path, embedder.model()).await;
        let mut reusable: HashMap<(String, u64), IndexedFile> = cached
            .files
            .into_iter()
            .map(|f| ((f.path.clone(), f.modified), f))
            .collect();

        let mut index = Self {
            model: embedder.model().to_string(),
            files: Vec::new(),
        };
        let mut embedded = 0;

        for path in source_files(dir).await? {
            let source = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let modified = modified_secs(&path).await;

            if let Some(file) = reusable.remove(&(source.clone(), modified)) {
                index.files.push(file);
                continue;
            }

            let text = tokio::fs::read_to_string(&path).await?;
            let chunks = chunk_paragraphs(&text, PASSAGE_CHARS);
            if chunks.is_empty() {
                continue;
            }

            let embeddings = embedder.embed_batch(&chunks).await?;
            embedded += chunks.len();

            let passages = chunks
                .into_iter()
                .zip(embeddings)
                .map(|(text, embedding)| Passage {
                    source: source.clone(),
                    text,
                    embedding,
                })
                .collect();

            index.files.push(IndexedFile {
                path: source,
                modified,
                passages,
            });
            debug!("Embedded {}", path.display());

            // Entries not visited yet stay in the cache until they are.
            let progress = Self {
                model: index.model.clone(),
                files: index
                    .files
                    .iter()
                    .chain(reusable.values())
                    .cloned()
                    .collect(),
            };
            if let Err(e) = progress.save_cache(cache_path).await {
                warn!("Could not write knowledge index cache: {}", e);
            }
        }

        // Leftovers are deleted or since-modified files.
        if embedded > 0 || !reusable.is_empty() {
            if let Err(e) = index.save_cache(cache_path).await {
                warn!("Could not write knowledge index cache: {}", e);
            }
        }

        info!(
            "Knowledge index ready: {} passages ({} newly embedded)",
            index.len(),
            embedded
        );
        Ok(index)
    }

    async fn load_cache(path: &Path, model: &str) -> Self {
        let Ok(content) = tokio::fs::read(path).await else {
            return Self::default();
        };
        match serde_json::from_slice::<Self>(&content) {
            Ok(index) if index.model == model => index,
            Ok(_) => {
                debug!("Embedding model changed; discarding index cache");
                Self::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable index cache {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Replace the cache file; readers never see a half-written one.
    async fn save_cache(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.iter().map(|f| f.passages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best `top_k` passages scoring at least `min_score`, best first.
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Vec<ScoredPassage<'_>> {
        let mut results: Vec<ScoredPassage> = self
            .files
            .iter()
            .flat_map(|f| f.passages.iter())
            .map(|passage| ScoredPassage {
                passage,
                score: cosine_similarity(query, &passage.embedding),
            })
            .filter(|r| r.score >= min_score)
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }
}
