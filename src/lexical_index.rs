//! LexicalIndex (C3): an in-memory BM25 inverted index built from the
//! chunk store.
//!
//! Tokenization additionally splits `camelCase`/`snake_case` identifiers
//! the way the teacher's `nl::tokenize_identifier` does, but no stemming
//! or stopword removal is applied — identifiers must match literally.

use std::collections::HashMap;

use crate::chunk::Metadata;

pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;

/// Splits text into lowercase tokens, treating non-alphanumeric runs as
/// boundaries and additionally splitting `camelCase`/`snake_case` so that
/// `getUserAuth` tokenizes as `{get, user, auth}`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        tokens.extend(split_camel_case(raw));
    }
    tokens
}

fn split_camel_case(word: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = word.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && !current.is_empty() {
            let prev_lower = chars[i - 1].is_lowercase() || chars[i - 1].is_numeric();
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            if prev_lower || (next_lower && current.chars().last().map(|l| l.is_uppercase()).unwrap_or(false)) {
                tokens.push(current.to_lowercase());
                current = String::new();
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current.to_lowercase());
    }
    tokens
}

struct Document {
    chunk_id: String,
    term_counts: HashMap<String, u32>,
    length: u32,
    metadata: Metadata,
}

/// A BM25 hit.
#[derive(Debug, Clone)]
pub struct LexicalResult {
    pub chunk_id: String,
    pub score: f32,
}

/// An in-memory BM25 index. Corpus statistics are computed once at build
/// and never mutated — rebuild to reflect a changed corpus.
pub struct LexicalIndex {
    documents: Vec<Document>,
    document_frequency: HashMap<String, u32>,
    average_length: f32,
    k1: f32,
    b: f32,
}

/// Source record the index is built from.
pub struct LexicalSource {
    pub chunk_id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl LexicalIndex {
    pub fn build(sources: Vec<LexicalSource>) -> Self {
        Self::build_with_params(sources, DEFAULT_K1, DEFAULT_B)
    }

    pub fn build_with_params(sources: Vec<LexicalSource>, k1: f32, b: f32) -> Self {
        let mut documents = Vec::with_capacity(sources.len());
        let mut document_frequency: HashMap<String, u32> = HashMap::new();
        let mut total_length: u64 = 0;

        for source in sources {
            let tokens = tokenize(&source.content);
            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len() as u64;
            documents.push(Document {
                chunk_id: source.chunk_id,
                term_counts,
                length: tokens.len() as u32,
                metadata: source.metadata,
            });
        }

        let average_length = if documents.is_empty() {
            0.0
        } else {
            total_length as f32 / documents.len() as f32
        };

        LexicalIndex {
            documents,
            document_frequency,
            average_length,
            k1,
            b,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns up to `k` chunk ids with raw, non-negative, unbounded BM25
    /// scores. Empty query yields an empty result, not an error. Ties are
    /// broken by insertion order.
    pub fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<&dyn Fn(&Metadata) -> bool>,
    ) -> Vec<LexicalResult> {
        let query_terms = tokenize(text);
        if query_terms.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let n = self.documents.len() as f32;
        let mut scores: Vec<(f32, usize)> = Vec::new();

        for (idx, doc) in self.documents.iter().enumerate() {
            if let Some(f) = filter {
                if !f(&doc.metadata) {
                    continue;
                }
            }
            let mut score = 0.0f32;
            for term in &query_terms {
                let Some(&tf) = doc.term_counts.get(term) else {
                    continue;
                };
                let df = *self.document_frequency.get(term).unwrap_or(&0) as f32;
                if df == 0.0 {
                    continue;
                }
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let tf = tf as f32;
                let denom = tf
                    + self.k1 * (1.0 - self.b + self.b * (doc.length as f32 / self.average_length.max(1.0)));
                score += idf * (tf * (self.k1 + 1.0)) / denom.max(f32::EPSILON);
            }
            if score > 0.0 {
                scores.push((score, idx));
            }
        }

        // Stable sort preserves insertion order as the tie-break.
        scores.sort_by(|a, b| b.0.total_cmp(&a.0));
        scores.truncate(k);

        scores
            .into_iter()
            .map(|(score, idx)| LexicalResult {
                chunk_id: self.documents[idx].chunk_id.clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, content: &str) -> LexicalSource {
        LexicalSource {
            chunk_id: id.to_string(),
            content: content.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn tokenize_splits_camel_and_snake_case() {
        assert_eq!(
            tokenize("getUserAuth"),
            vec!["get", "user", "auth"]
        );
        assert_eq!(tokenize("user_auth_token"), vec!["user", "auth", "token"]);
    }

    #[test]
    fn tokenize_lowercases_and_drops_punctuation() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn empty_query_returns_empty_not_error() {
        let index = LexicalIndex::build(vec![source("a", "fn authenticate_user() {}")]);
        let out = index.query("", 5, None);
        assert!(out.is_empty());
    }

    #[test]
    fn finds_matching_document() {
        let index = LexicalIndex::build(vec![
            source("a", "fn authenticate_user_with_token() -> bool"),
            source("b", "fn render_widget_tree() -> Html"),
        ]);
        let out = index.query("authenticate user token", 5, None);
        assert_eq!(out[0].chunk_id, "a");
        assert!(out[0].score > 0.0);
    }

    #[test]
    fn scores_are_non_negative() {
        let index = LexicalIndex::build(vec![
            source("a", "auth token validation"),
            source("b", "unrelated widget rendering"),
        ]);
        for result in index.query("auth token", 5, None) {
            assert!(result.score >= 0.0);
        }
    }

    #[test]
    fn corpus_stats_fixed_at_build_time() {
        let index = LexicalIndex::build(vec![source("a", "auth token")]);
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }
}
