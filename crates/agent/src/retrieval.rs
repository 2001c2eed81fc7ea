use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use siteguard_core::domain::{Citation, RuleSnippet};
use siteguard_core::errors::CollaboratorError;

const MAX_CHUNK_CHARS: usize = 1000;
const EXCERPT_CHARS: usize = 200;
const RULE_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

const QUERY_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "are", "was", "this", "that", "from", "into", "onto", "any", "all",
    "site", "what", "when", "which",
];

/// Returns rule snippets ranked by relevance, numbered from 1 in rank order.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RuleSnippet>, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDocument {
    pub document_id: String,
    pub text: String,
}

impl RuleDocument {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), text: text.into() }
    }
}

#[derive(Clone, Debug)]
struct Chunk {
    document_id: String,
    text: String,
    terms: BTreeSet<String>,
}

/// Term-overlap retriever over paragraph chunks of local rule documents.
#[derive(Clone, Debug, Default)]
pub struct KeywordRetriever {
    chunks: Vec<Chunk>,
}

impl KeywordRetriever {
    pub fn new(documents: impl IntoIterator<Item = RuleDocument>) -> Self {
        let chunks = documents
            .into_iter()
            .flat_map(|document| {
                chunk_text(&document.text)
                    .into_iter()
                    .map(|text| Chunk { document_id: document.document_id.clone(), terms: terms(&text), text })
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { chunks }
    }

    /// Loads every Markdown or text file directly under `dir`, in file name order.
    pub async fn from_dir(dir: &Path) -> io::Result<Self> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_rule_file = path
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| RULE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()));
            if is_rule_file && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = fs::read_to_string(&path).await?;
            let document_id = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            documents.push(RuleDocument { document_id, text });
        }

        let retriever = Self::new(documents);
        debug!(
            event_name = "retrieval.index.loaded",
            dir = %dir.display(),
            chunks = retriever.chunk_count(),
            "rule documents indexed"
        );
        Ok(retriever)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RuleSnippet>, CollaboratorError> {
        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &Chunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let overlap = chunk.terms.intersection(&query_terms).count();
                (overlap > 0).then(|| (overlap as f64 / query_terms.len() as f64, chunk))
            })
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(rank, (relevance, chunk))| {
                let excerpt: String = chunk.text.chars().take(EXCERPT_CHARS).collect();
                RuleSnippet::new(
                    chunk.text.clone(),
                    Citation::new(rank + 1, chunk.document_id.clone(), excerpt, relevance),
                )
            })
            .collect())
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .filter(|word| !QUERY_STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// Splits on blank lines; paragraphs longer than the chunk limit are packed
/// sentence by sentence.
fn chunk_text(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|paragraph| !paragraph.is_empty()) {
        if paragraph.chars().count() <= MAX_CHUNK_CHARS {
            chunks.push(paragraph.to_string());
            continue;
        }

        let mut current = String::new();
        for sentence in paragraph.split_inclusive(". ") {
            if !current.is_empty() && current.chars().count() + sentence.chars().count() > MAX_CHUNK_CHARS {
                chunks.push(current.trim().to_string());
                current.clear();
            }
            current.push_str(sentence);
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
    }
    chunks
}
