//! AdaptiveClassifier (C9): classifies a query so retrieval effort can be
//! scaled to its shape, independent of (and evaluated before) routing.
//!
//! Classification always runs first; `force_rag` can later override a
//! low-confidence routing method, but it never un-skips a `Simple`
//! classification's retrieval action (§9 Open Questions resolution).

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Simple,
    Factual,
    Complex,
    FollowUp,
}

/// What the retriever should do in response to a classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalAction {
    /// No retrieval at all — the query doesn't need the codebase.
    Skip,
    /// Retrieve at the caller-configured `final_k`.
    Normal { final_k: usize },
    /// Retrieve more aggressively: `final_k * 1.5`, rounded up.
    Expanded { final_k: usize },
    /// Augment with conversation context; falls back to `Factual`'s action
    /// if no conversation context is available.
    WithConversationContext { final_k: usize },
}

static SIMPLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|thanks|thank you|ok|okay|bye|good\s*(morning|afternoon|evening))\b")
        .unwrap()
});

static FOLLOW_UP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(also|additionally|and what about|what about|again|furthermore|moreover)\b")
        .unwrap()
});

static COMPLEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(why|how does|explain|compare|design|architecture|trade[- ]?off|walk me through)\b")
        .unwrap()
});

static FACTUAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(what|where|which|who|when|does|is|are)\b").unwrap()
});

pub struct AdaptiveClassifier;

impl AdaptiveClassifier {
    pub fn new() -> Self {
        AdaptiveClassifier
    }

    /// `has_conversation_context` indicates whether prior turns exist for
    /// `FollowUp` to draw on.
    pub fn classify(&self, query: &str, has_conversation_context: bool) -> QueryClass {
        let trimmed = query.trim();
        if trimmed.is_empty() || SIMPLE_RE.is_match(trimmed) {
            return QueryClass::Simple;
        }
        if has_conversation_context && FOLLOW_UP_RE.is_match(trimmed) {
            return QueryClass::FollowUp;
        }
        if COMPLEX_RE.is_match(trimmed) {
            return QueryClass::Complex;
        }
        if FACTUAL_RE.is_match(trimmed) {
            return QueryClass::Factual;
        }
        QueryClass::Factual
    }

    /// Maps a classification to the retrieval action the caller should
    /// take. `force_rag` has already been consumed by the router by the
    /// time this runs and must NOT be passed here — `Simple`'s `Skip`
    /// action is unconditional.
    pub fn retrieval_action(&self, class: QueryClass, configured_final_k: usize) -> RetrievalAction {
        match class {
            QueryClass::Simple => RetrievalAction::Skip,
            QueryClass::Factual => RetrievalAction::Normal {
                final_k: configured_final_k,
            },
            QueryClass::Complex => RetrievalAction::Expanded {
                final_k: (configured_final_k as f32 * 1.5).ceil() as usize,
            },
            QueryClass::FollowUp => RetrievalAction::WithConversationContext {
                final_k: configured_final_k,
            },
        }
    }
}

impl Default for AdaptiveClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_classifies_as_simple() {
        let c = AdaptiveClassifier::new();
        assert_eq!(c.classify("hi there", false), QueryClass::Simple);
        assert_eq!(c.classify("thanks!", false), QueryClass::Simple);
    }

    #[test]
    fn empty_query_classifies_as_simple() {
        let c = AdaptiveClassifier::new();
        assert_eq!(c.classify("   ", false), QueryClass::Simple);
    }

    #[test]
    fn wh_question_classifies_as_factual() {
        let c = AdaptiveClassifier::new();
        assert_eq!(c.classify("what does authenticate() return?", false), QueryClass::Factual);
    }

    #[test]
    fn why_question_classifies_as_complex() {
        let c = AdaptiveClassifier::new();
        assert_eq!(
            c.classify("why does the retry loop back off exponentially?", false),
            QueryClass::Complex
        );
    }

    #[test]
    fn follow_up_requires_conversation_context() {
        let c = AdaptiveClassifier::new();
        assert_eq!(c.classify("what about the error case?", true), QueryClass::FollowUp);
        // Without context, the same text falls through to factual/complex instead.
        assert_ne!(c.classify("what about the error case?", false), QueryClass::FollowUp);
    }

    #[test]
    fn simple_always_skips_regardless_of_force_rag() {
        let c = AdaptiveClassifier::new();
        let action = c.retrieval_action(QueryClass::Simple, 10);
        assert_eq!(action, RetrievalAction::Skip);
    }

    #[test]
    fn complex_expands_final_k_by_1_5_rounded_up() {
        let c = AdaptiveClassifier::new();
        let action = c.retrieval_action(QueryClass::Complex, 7);
        assert_eq!(action, RetrievalAction::Expanded { final_k: 11 });
    }

    #[test]
    fn factual_uses_configured_final_k_unchanged() {
        let c = AdaptiveClassifier::new();
        let action = c.retrieval_action(QueryClass::Factual, 10);
        assert_eq!(action, RetrievalAction::Normal { final_k: 10 });
    }

    #[test]
    fn follow_up_requests_conversation_context() {
        let c = AdaptiveClassifier::new();
        let action = c.retrieval_action(QueryClass::FollowUp, 10);
        assert_eq!(action, RetrievalAction::WithConversationContext { final_k: 10 });
    }
}
