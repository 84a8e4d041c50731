use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{McosError, Result};

/// Top-level configuration (`mcos.toml` + `MCOS_*` env overrides), one field
/// per knob named in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McosConfig {
    /// Max turns per session in C1 (default 200).
    #[serde(default = "default_session_turn_cap")]
    pub session_turn_cap: usize,
    /// Inactivity before C1 eviction, in seconds (default 24h).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Per-chat minimum between vector uploads, in seconds (default 60s).
    #[serde(default = "default_upload_cooldown_secs")]
    pub upload_cooldown_secs: u64,
    /// Uncovered turns before `job:summarize` fires (default 6).
    #[serde(default = "default_summary_trigger")]
    pub summary_trigger: usize,
    /// Hard ceiling on an assembled context, in estimated tokens (default 6000).
    #[serde(default = "default_context_token_cap")]
    pub context_token_cap: usize,
    /// Default `topK` for C4 retrieval (default 10).
    #[serde(default = "default_retrieval_topk")]
    pub retrieval_topk: usize,
    /// Minimum similarity score retained from a C4 query (default 0.5).
    #[serde(default = "default_retrieval_min_score")]
    pub retrieval_min_score: f32,
    /// Max inflight embedding calls (default 8).
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    /// Max concurrent `EndChat` flushes in `SaveAll` (default 4).
    #[serde(default = "default_flush_concurrency")]
    pub flush_concurrency: usize,
    /// Job queue depth at which `job:vector-upload` arrivals are coalesced (default 10000).
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: usize,
    /// Embedding vector dimension; must match the vector store's index (default 768).
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for McosConfig {
    fn default() -> Self {
        Self {
            session_turn_cap: default_session_turn_cap(),
            session_ttl_secs: default_session_ttl_secs(),
            upload_cooldown_secs: default_upload_cooldown_secs(),
            summary_trigger: default_summary_trigger(),
            context_token_cap: default_context_token_cap(),
            retrieval_topk: default_retrieval_topk(),
            retrieval_min_score: default_retrieval_min_score(),
            embed_concurrency: default_embed_concurrency(),
            flush_concurrency: default_flush_concurrency(),
            queue_high_water: default_queue_high_water(),
            embed_dim: default_embed_dim(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_session_turn_cap() -> usize {
    200
}
fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_upload_cooldown_secs() -> u64 {
    60
}
fn default_summary_trigger() -> usize {
    6
}
fn default_context_token_cap() -> usize {
    6000
}
fn default_retrieval_topk() -> usize {
    10
}
fn default_retrieval_min_score() -> f32 {
    0.5
}
fn default_embed_concurrency() -> usize {
    8
}
fn default_flush_concurrency() -> usize {
    4
}
fn default_queue_high_water() -> usize {
    10_000
}
fn default_embed_dim() -> usize {
    768
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.mcos/mcos.db")
}

impl McosConfig {
    /// Load config from a TOML file with `MCOS_*` env var overrides.
    ///
    /// Checks, in order: an explicit path argument, then `~/.mcos/mcos.toml`.
    /// Missing file is not an error — every field has a spec-mandated default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: McosConfig = Figment::from(figment::providers::Serialized::defaults(
            McosConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("MCOS_").split("_"))
        .extract()
        .map_err(|e| McosError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.mcos/mcos.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = McosConfig::default();
        assert_eq!(c.session_turn_cap, 200);
        assert_eq!(c.session_ttl_secs, 86_400);
        assert_eq!(c.upload_cooldown_secs, 60);
        assert_eq!(c.summary_trigger, 6);
        assert_eq!(c.context_token_cap, 6000);
        assert_eq!(c.retrieval_topk, 10);
        assert_eq!(c.retrieval_min_score, 0.5);
        assert_eq!(c.embed_concurrency, 8);
        assert_eq!(c.flush_concurrency, 4);
        assert_eq!(c.queue_high_water, 10_000);
        assert_eq!(c.embed_dim, 768);
    }

    #[test]
    fn load_with_missing_file_uses_defaults() {
        let c = McosConfig::load(Some("/nonexistent/path/mcos.toml")).expect("load");
        assert_eq!(c.context_token_cap, 6000);
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("MCOS_UPLOAD_COOLDOWN_SECS", "120");
        let c = McosConfig::load(Some("/nonexistent/path/mcos.toml")).expect("load");
        std::env::remove_var("MCOS_UPLOAD_COOLDOWN_SECS");
        assert_eq!(c.upload_cooldown_secs, 120);
    }
}
