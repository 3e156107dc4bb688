//! Knowledge retrieval. The engine only needs ranked passages for a query;
//! the bundled implementation is a lexical scorer over fixed-size chunks of
//! local documents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    pub score: f64,
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `top_k` passages, highest score first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// Retriever with nothing indexed; every query yields no context.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyRetriever;

#[async_trait]
impl KnowledgeRetriever for EmptyRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug)]
struct Chunk {
    text: String,
    source: String,
    terms: HashSet<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LexicalRetriever {
    chunks: Vec<Chunk>,
}

impl LexicalRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file in `paths`; directories contribute their regular files.
    pub async fn from_paths(paths: &[PathBuf], chunk_size: usize) -> Result<Self> {
        let mut retriever = Self::new();
        for path in paths {
            for file in expand_path(path).await? {
                let content = tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read knowledge file {}", file.display()))?;
                let source = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string());
                retriever.add_document(&source, &content, chunk_size);
            }
        }

        info!(
            event_name = "agent.retrieval.loaded",
            chunks = retriever.len(),
            "knowledge base loaded"
        );
        Ok(retriever)
    }

    pub fn add_document(&mut self, source: &str, content: &str, chunk_size: usize) {
        for text in chunk_text(content, chunk_size) {
            if text.trim().is_empty() {
                continue;
            }
            self.chunks.push(Chunk {
                text: text.to_string(),
                source: source.to_string(),
                terms: terms(text),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        let query_terms = terms(query);
        if query_terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<Passage> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let matched = query_terms.iter().filter(|term| chunk.terms.contains(*term)).count();
                (matched > 0).then(|| Passage {
                    text: chunk.text.clone(),
                    source: chunk.source.clone(),
                    score: matched as f64 / query_terms.len() as f64,
                })
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl KnowledgeRetriever for LexicalRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        Ok(self.search(query, top_k))
    }
}

/// Renders passages as the context block handed to responders.
pub fn render_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(index, passage)| {
            format!("[Source {} - Score: {:.2}]\n{}\n", index + 1, passage.score, passage.text)
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Splits on character boundaries so multi-byte text never panics.
fn chunk_text(content: &str, chunk_size: usize) -> Vec<&str> {
    let size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (index, _) in content.char_indices() {
        if count == size {
            chunks.push(&content[start..index]);
            start = index;
            count = 0;
        }
        count += 1;
    }
    if start < content.len() {
        chunks.push(&content[start..]);
    }
    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

async fn expand_path(path: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("knowledge path {} is not readable", path.display()))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("failed to list knowledge directory {}", path.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{chunk_text, render_context, KnowledgeRetriever, LexicalRetriever, Passage};

    #[test]
    fn chunks_respect_char_boundaries() {
        let chunks = chunk_text("añoñú", 2);
        assert_eq!(chunks, vec!["añ", "oñ", "ú"]);
        assert_eq!(chunk_text("", 1000), Vec::<&str>::new());
    }

    #[test]
    fn search_ranks_by_fraction_of_query_terms() {
        let mut retriever = LexicalRetriever::new();
        retriever.add_document(
            "pricing.txt",
            "The professional plan includes pre-saves and advanced analytics.",
            1000,
        );
        retriever.add_document(
            "royalties.txt",
            "Royalties are paid monthly via bank transfer.",
            1000,
        );

        let results = retriever.search("professional plan analytics royalties", 3);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "pricing.txt");
        assert!((results[0].score - 0.75).abs() < 1e-9);
        assert!((results[1].score - 0.25).abs() < 1e-9);

        assert!(retriever.search("weather", 3).is_empty());
        assert!(retriever.search("a b", 3).is_empty());
    }

    #[test]
    fn context_rendering_numbers_sources_and_separates_blocks() {
        let rendered = render_context(&[
            Passage { text: "first".to_string(), source: "a".to_string(), score: 1.0 },
            Passage { text: "second".to_string(), source: "b".to_string(), score: 0.333 },
        ]);
        assert_eq!(
            rendered,
            "[Source 1 - Score: 1.00]\nfirst\n\n---\n[Source 2 - Score: 0.33]\nsecond\n"
        );
        assert_eq!(render_context(&[]), "");
    }

    #[tokio::test]
    async fn loads_documents_from_directory() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("faq.md"), "Releases go live on Spotify within 72 hours.")
            .expect("write faq");
        fs::write(dir.path().join("plans.md"), "Premium includes a dedicated manager.")
            .expect("write plans");

        let retriever = LexicalRetriever::from_paths(&[dir.path().to_path_buf()], 1000)
            .await
            .expect("load knowledge");
        assert_eq!(retriever.len(), 2);

        let passages = retriever.retrieve("when does spotify go live", 3).await.expect("retrieve");
        assert_eq!(passages.first().map(|passage| passage.source.as_str()), Some("faq.md"));
    }
}
