//! QueryRouter (C8): decides which project(s) receive a query.
//!
//! Method precedence: explicit → heuristic name match → current-project
//! context hint → language-model fallback → fallback-all, with a
//! force-RAG override that only ever replaces a low-confidence method,
//! never the project set.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunk::Project;
use crate::lm::{LanguageModelProvider, RoutingCandidate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingMethod {
    Explicit,
    Heuristic,
    Context,
    Llm,
    FallbackAll,
    ForceRag,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub project_ids: Vec<String>,
    pub confidence: f32,
    pub method: RoutingMethod,
}

static PRONOUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i|me|my|mine|we|us|our|you|your|this|here|it)\b").unwrap()
});

fn contains_whole_word(query: &str, word: &str) -> bool {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(word));
    Regex::new(&pattern)
        .map(|re| re.is_match(query))
        .unwrap_or(false)
}

pub struct QueryRouter {
    lm: Option<Arc<dyn LanguageModelProvider>>,
    force_rag: bool,
}

impl QueryRouter {
    pub fn new(lm: Option<Arc<dyn LanguageModelProvider>>, force_rag: bool) -> Self {
        QueryRouter { lm, force_rag }
    }

    /// `explicit_project` is the caller-named project, if any.
    /// `current_project` is the project currently "in focus", used for the
    /// context-hint method.
    pub async fn route(
        &self,
        query: &str,
        projects: &[Project],
        explicit_project: Option<&str>,
        current_project: Option<&str>,
    ) -> RoutingDecision {
        let mut decision = self
            .route_inner(query, projects, explicit_project, current_project)
            .await;

        if self.force_rag && decision.confidence < 0.5 && decision.method != RoutingMethod::Explicit
        {
            decision.method = RoutingMethod::ForceRag;
        }
        decision
    }

    async fn route_inner(
        &self,
        query: &str,
        projects: &[Project],
        explicit_project: Option<&str>,
        current_project: Option<&str>,
    ) -> RoutingDecision {
        if let Some(explicit) = explicit_project {
            return RoutingDecision {
                project_ids: vec![explicit.to_string()],
                confidence: 1.0,
                method: RoutingMethod::Explicit,
            };
        }

        let matched: Vec<&Project> = projects
            .iter()
            .filter(|p| contains_whole_word(query, &p.name))
            .collect();
        if matched.len() == 1 {
            return RoutingDecision {
                project_ids: vec![matched[0].id.clone()],
                confidence: 0.9,
                method: RoutingMethod::Heuristic,
            };
        }
        if matched.len() > 1 {
            return RoutingDecision {
                project_ids: matched.into_iter().map(|p| p.id.clone()).collect(),
                confidence: 0.85,
                method: RoutingMethod::Heuristic,
            };
        }

        if let Some(current) = current_project {
            if PRONOUN_RE.is_match(query) {
                return RoutingDecision {
                    project_ids: vec![current.to_string()],
                    confidence: 0.7,
                    method: RoutingMethod::Context,
                };
            }
        }

        if let Some(lm) = &self.lm {
            let candidates: Vec<RoutingCandidate> = projects
                .iter()
                .map(|p| RoutingCandidate {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    description: p.description.clone(),
                    tags: p.tags.clone(),
                })
                .collect();
            if let Ok(decision) = lm.route_query(query, &candidates).await {
                if decision.confidence >= 0.4 && !decision.project_ids.is_empty() {
                    return RoutingDecision {
                        project_ids: decision.project_ids,
                        confidence: decision.confidence,
                        method: RoutingMethod::Llm,
                    };
                }
            }
        }

        RoutingDecision {
            project_ids: projects.iter().map(|p| p.id.clone()).collect(),
            confidence: 0.3,
            method: RoutingMethod::FallbackAll,
        }
    }
}
