//! Configuration file support for corpusquery.
//!
//! Config files are loaded in order (later overrides earlier):
//! 1. `~/.config/corpusquery/config.toml` (user defaults)
//! 2. `.corpusquery.toml` in project root (project overrides)
//!
//! CLI flags override all config file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_rrf_k() -> f32 {
    60.0
}

fn default_bm25_k1() -> f32 {
    1.2
}

fn default_bm25_b() -> f32 {
    0.75
}

fn default_ef_search() -> usize {
    100
}

fn default_final_k() -> usize {
    10
}

fn default_lm_timeout_secs() -> u64 {
    30
}

fn default_first_embed_timeout_secs() -> u64 {
    120
}

fn default_reranker_timeout_secs() -> u64 {
    10
}

fn default_trace_sampling_rate() -> f32 {
    0.1
}

/// Configuration options loaded from config files.
///
/// # Example
///
/// ```toml
/// # ~/.config/corpusquery/config.toml or .corpusquery.toml
/// final_k = 10
/// rrf_k = 60.0
/// bm25_k1 = 1.2
/// bm25_b = 0.75
/// ef_search = 100
/// trace_sampling_rate = 0.1
/// force_rag = false
/// ```
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Default result count for search/ask (overridden by `-k`).
    pub final_k: Option<usize>,
    /// Reciprocal Rank Fusion constant.
    pub rrf_k: Option<f32>,
    /// BM25 term-frequency saturation constant.
    pub bm25_k1: Option<f32>,
    /// BM25 length-normalization constant.
    pub bm25_b: Option<f32>,
    /// HNSW search-time candidate list size.
    pub ef_search: Option<usize>,
    /// Language-model capability timeout, in seconds.
    pub lm_timeout_secs: Option<u64>,
    /// Timeout for the first embedding call issued against a fresh
    /// provider (model load can dominate latency the first time).
    pub first_embed_timeout_secs: Option<u64>,
    /// Reranker capability timeout, in seconds.
    pub reranker_timeout_secs: Option<u64>,
    /// Fraction of queries recorded by the trace recorder, in `[0, 1]`.
    pub trace_sampling_rate: Option<f32>,
    /// Forces low-confidence routing decisions to the `force-rag` method.
    /// Never un-skips a `Simple` classification.
    pub force_rag: Option<bool>,
}

impl Config {
    /// Loads configuration from user and project config files.
    pub fn load(project_root: &Path) -> Self {
        let user_config = dirs::config_dir()
            .map(|d| d.join("corpusquery/config.toml"))
            .and_then(|p| Self::load_file(&p))
            .unwrap_or_default();

        let project_config =
            Self::load_file(&project_root.join(".corpusquery.toml")).unwrap_or_default();

        let merged = user_config.override_with(project_config);
        tracing::debug!(
            final_k = ?merged.final_k,
            rrf_k = ?merged.rrf_k,
            ef_search = ?merged.ef_search,
            force_rag = ?merged.force_rag,
            "effective config after merge"
        );
        merged
    }

    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                Some(config)
            }
            Err(e) => {
                tracing::warn!("failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    fn override_with(self, other: Self) -> Self {
        Config {
            final_k: other.final_k.or(self.final_k),
            rrf_k: other.rrf_k.or(self.rrf_k),
            bm25_k1: other.bm25_k1.or(self.bm25_k1),
            bm25_b: other.bm25_b.or(self.bm25_b),
            ef_search: other.ef_search.or(self.ef_search),
            lm_timeout_secs: other.lm_timeout_secs.or(self.lm_timeout_secs),
            first_embed_timeout_secs: other
                .first_embed_timeout_secs
                .or(self.first_embed_timeout_secs),
            reranker_timeout_secs: other.reranker_timeout_secs.or(self.reranker_timeout_secs),
            trace_sampling_rate: other.trace_sampling_rate.or(self.trace_sampling_rate),
            force_rag: other.force_rag.or(self.force_rag),
        }
    }

    // ===== Accessors with defaults =====

    pub fn final_k_or_default(&self) -> usize {
        self.final_k.unwrap_or_else(default_final_k)
    }

    pub fn rrf_k_or_default(&self) -> f32 {
        self.rrf_k.unwrap_or_else(default_rrf_k)
    }

    pub fn bm25_k1_or_default(&self) -> f32 {
        self.bm25_k1.unwrap_or_else(default_bm25_k1)
    }

    pub fn bm25_b_or_default(&self) -> f32 {
        self.bm25_b.unwrap_or_else(default_bm25_b)
    }

    pub fn ef_search_or_default(&self) -> usize {
        self.ef_search.unwrap_or_else(default_ef_search)
    }

    pub fn lm_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.lm_timeout_secs.unwrap_or_else(default_lm_timeout_secs))
    }

    pub fn first_embed_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.first_embed_timeout_secs
                .unwrap_or_else(default_first_embed_timeout_secs),
        )
    }

    pub fn reranker_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.reranker_timeout_secs
                .unwrap_or_else(default_reranker_timeout_secs),
        )
    }

    pub fn trace_sampling_rate_or_default(&self) -> f32 {
        self.trace_sampling_rate
            .unwrap_or_else(default_trace_sampling_rate)
    }

    pub fn force_rag_or_default(&self) -> bool {
        self.force_rag.unwrap_or(false)
    }
}

/// Writes `config` to `path`, restricting permissions on Unix since
/// values here can reveal project structure.
pub fn write_config(path: &Path, config: &Config) -> anyhow::Result<()> {
    std::fs::write(path, toml::to_string_pretty(config)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigPaths {
    pub user: Option<PathBuf>,
    pub project: Option<PathBuf>,
}
