//! ContextAssembler (C10): packs ranked `SearchHit`s into a token-budgeted
//! context block with citations, deduping near-identical line ranges and
//! ordering by one of three strategies.

use crate::fusion::SearchHit;

/// Coarse token estimator: `ceil(char_count / 4)`. Callers needing a real
/// tokenizer can substitute one; this is the default used when none is
/// injected.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingStrategy {
    /// Highest-scoring hit first.
    Relevance,
    /// File path, then line range ascending.
    Chronological,
    /// Highest score first and last, descending toward the middle — keeps
    /// the strongest evidence at both ends of the context window.
    Sandwich,
}

/// One chunk admitted into the assembled context, with its citation index.
#[derive(Debug, Clone)]
pub struct Source {
    pub citation: usize,
    pub chunk_id: String,
    pub file_path: String,
    pub line_range: crate::chunk::LineRange,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub sources: Vec<Source>,
    pub total_tokens: usize,
    pub deduplicated_count: usize,
    pub dropped_count: usize,
}

/// Overlap fraction above which two hits from the same file are
/// considered duplicates; the higher-scoring one wins.
const DEDUP_OVERLAP_THRESHOLD: f32 = 0.5;

pub struct ContextAssembler {
    token_budget: usize,
    ordering: OrderingStrategy,
}

impl ContextAssembler {
    pub fn new(token_budget: usize, ordering: OrderingStrategy) -> Self {
        ContextAssembler {
            token_budget,
            ordering,
        }
    }

    fn dedup(&self, mut hits: Vec<SearchHit>) -> (Vec<SearchHit>, usize) {
        // Highest score first so the kept copy of each duplicate pair is
        // always the better-scoring one.
        hits.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));

        let mut kept: Vec<SearchHit> = Vec::with_capacity(hits.len());
        let mut deduplicated = 0;
        'outer: for hit in hits {
            for existing in &kept {
                if existing.file_path == hit.file_path
                    && existing.line_range.overlap_fraction(&hit.line_range) >= DEDUP_OVERLAP_THRESHOLD
                {
                    deduplicated += 1;
                    continue 'outer;
                }
            }
            kept.push(hit);
        }
        (kept, deduplicated)
    }

    fn order(&self, mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
        match self.ordering {
            OrderingStrategy::Relevance => {
                hits.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
                hits
            }
            OrderingStrategy::Chronological => {
                hits.sort_by(|a, b| {
                    a.file_path
                        .cmp(&b.file_path)
                        .then_with(|| a.line_range.start.cmp(&b.line_range.start))
                });
                hits
            }
            OrderingStrategy::Sandwich => {
                hits.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
                let mut front = Vec::with_capacity(hits.len());
                let mut back = Vec::new();
                for (i, hit) in hits.into_iter().enumerate() {
                    if i % 2 == 0 {
                        front.push(hit);
                    } else {
                        back.push(hit);
                    }
                }
                back.reverse();
                front.extend(back);
                front
            }
        }
    }

    /// Packs `hits` into a token-budgeted, ordered, deduplicated context.
    /// A single oversized hit is truncated at the nearest line boundary
    /// rather than dropped outright; every subsequent hit that doesn't fit
    /// is simply dropped and counted.
    pub fn assemble(&self, hits: Vec<SearchHit>) -> AssembledContext {
        let (deduped, deduplicated_count) = self.dedup(hits);
        let ordered = self.order(deduped);

        let mut sources = Vec::new();
        let mut total_tokens = 0usize;
        let mut dropped_count = 0usize;

        for hit in ordered {
            let tokens = estimate_tokens(&hit.content);
            if total_tokens + tokens <= self.token_budget {
                total_tokens += tokens;
                sources.push(Source {
                    citation: sources.len() + 1,
                    chunk_id: hit.chunk_id,
                    file_path: hit.file_path,
                    line_range: hit.line_range,
                    content: hit.content,
                    truncated: false,
                });
                continue;
            }

            // Only the first hit that doesn't fit gets a truncation
            // attempt; if there's no room at all (sources is empty and
            // the budget is effectively zero), it's dropped instead.
            if sources.is_empty() {
                let remaining = self.token_budget.saturating_sub(total_tokens);
                if remaining > 0 {
                    let truncated_content = truncate_at_line_boundary(&hit.content, remaining);
                    if !truncated_content.is_empty() {
                        total_tokens += estimate_tokens(&truncated_content);
                        let end_line =
                            hit.line_range.start + truncated_content.lines().count() as u32;
                        sources.push(Source {
                            citation: 1,
                            chunk_id: hit.chunk_id,
                            file_path: hit.file_path,
                            line_range: crate::chunk::LineRange::new(
                                hit.line_range.start,
                                end_line.max(hit.line_range.start + 1),
                            ),
                            content: truncated_content,
                            truncated: true,
                        });
                        continue;
                    }
                }
            }
            dropped_count += 1;
        }

        AssembledContext {
            sources,
            total_tokens,
            deduplicated_count,
            dropped_count,
        }
    }
}

/// Truncates `content` to at most `token_budget` estimated tokens, cutting
/// only at a line boundary so partial lines are never emitted.
fn truncate_at_line_boundary(content: &str, token_budget: usize) -> String {
    let mut kept = String::new();
    for line in content.lines() {
        let candidate = if kept.is_empty() {
            line.to_string()
        } else {
            format!("{kept}\n{line}")
        };
        if estimate_tokens(&candidate) > token_budget {
            break;
        }
        kept = candidate;
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::LineRange;
    use std::collections::BTreeMap;

    fn hit(id: &str, file: &str, range: (u32, u32), score: f32, content: &str) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            content: content.to_string(),
            file_path: file.to_string(),
            line_range: LineRange::new(range.0, range.1),
            project_id: "p".into(),
            dense_score: None,
            lexical_score: None,
            fused_score: score,
            reranked_score: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn assembles_within_budget_with_sequential_citations() {
        let assembler = ContextAssembler::new(1000, OrderingStrategy::Relevance);
        let hits = vec![
            hit("a", "a.rs", (1, 5), 0.9, "fn a() {}"),
            hit("b", "b.rs", (1, 5), 0.5, "fn b() {}"),
        ];
        let ctx = assembler.assemble(hits);
        assert_eq!(ctx.sources.len(), 2);
        assert_eq!(ctx.sources[0].citation, 1);
        assert_eq!(ctx.sources[1].citation, 2);
        assert_eq!(ctx.sources[0].chunk_id, "a");
    }

    #[test]
    fn dedup_keeps_higher_scoring_overlapping_hit() {
        let assembler = ContextAssembler::new(1000, OrderingStrategy::Relevance);
        let hits = vec![
            hit("low", "a.rs", (1, 10), 0.3, "low score body"),
            hit("high", "a.rs", (1, 10), 0.9, "high score body"),
        ];
        let ctx = assembler.assemble(hits);
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.sources[0].chunk_id, "high");
        assert_eq!(ctx.deduplicated_count, 1);
    }

    #[test]
    fn non_overlapping_same_file_hits_both_kept() {
        let assembler = ContextAssembler::new(1000, OrderingStrategy::Relevance);
        let hits = vec![
            hit("a", "x.rs", (1, 5), 0.9, "fn a() {}"),
            hit("b", "x.rs", (100, 105), 0.8, "fn b() {}"),
        ];
        let ctx = assembler.assemble(hits);
        assert_eq!(ctx.sources.len(), 2);
        assert_eq!(ctx.deduplicated_count, 0);
    }

    #[test]
    fn chronological_orders_by_file_then_line() {
        let assembler = ContextAssembler::new(1000, OrderingStrategy::Chronological);
        let hits = vec![
            hit("b", "b.rs", (1, 5), 0.9, "fn b() {}"),
            hit("a1", "a.rs", (50, 60), 0.1, "fn a1() {}"),
            hit("a0", "a.rs", (1, 5), 0.2, "fn a0() {}"),
        ];
        let ctx = assembler.assemble(hits);
        let ids: Vec<_> = ctx.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "a1", "b"]);
    }

    #[test]
    fn drops_hits_that_exceed_remaining_budget() {
        let assembler = ContextAssembler::new(5, OrderingStrategy::Relevance);
        let big_content = "x".repeat(400); // ~100 tokens, exceeds budget
        let hits = vec![hit("a", "a.rs", (1, 5), 0.9, &big_content)];
        let ctx = assembler.assemble(hits);
        // Truncated rather than dropped, since it's the first/only hit.
        assert_eq!(ctx.sources.len(), 1);
        assert!(ctx.sources[0].truncated);
    }

    #[test]
    fn second_oversized_hit_is_dropped_not_truncated() {
        let assembler = ContextAssembler::new(20, OrderingStrategy::Relevance);
        let hits = vec![
            hit("a", "a.rs", (1, 2), 0.9, "short"),
            hit("b", "b.rs", (1, 2), 0.8, &"y".repeat(400)),
        ];
        let ctx = assembler.assemble(hits);
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.sources[0].chunk_id, "a");
        assert_eq!(ctx.dropped_count, 1);
    }

    #[test]
    fn truncation_never_splits_a_line() {
        let content = "line one\nline two\nline three\nline four";
        let truncated = truncate_at_line_boundary(content, 4); // ~16 chars
        for line in truncated.lines() {
            assert!(content.lines().any(|l| l == line));
        }
    }
}
