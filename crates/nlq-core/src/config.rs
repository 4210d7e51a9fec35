//! Pipeline configuration.
//!
//! Sources and precedence (highest wins):
//! 1. Environment variables (`NLQ_*`)
//! 2. Local config file (`config.local.json`, optional)
//! 3. Base config file (`config.json`, optional)
//! 4. Built-in defaults
//!
//! Lists replace outright across layers; maps deep-merge key by key; a
//! `null` value in a local layer leaves the base key untouched rather than
//! deleting it (there is no tombstone value).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embed_model: String,
    pub timeout_seconds: u64,
    pub num_ctx: u32,
    pub system_prompt: String,
    pub embed_cache_size: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "HridaAI/hrida-t2sql:latest".to_string(),
            embed_model: "nomic-embed-text:latest".to_string(),
            timeout_seconds: 90,
            num_ctx: 0,
            system_prompt: String::new(),
            embed_cache_size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/nlq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub sequential_candidates: bool,
    pub k_default: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sequential_candidates: false,
            k_default: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub fk_expansion_delta: f32,
    pub max_tables: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.3,
            fk_expansion_delta: 0.15,
            max_tables: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinHintFormat {
    Edges,
    Paths,
    Both,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    pub join_hint_format: JoinHintFormat,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { join_hint_format: JoinHintFormat::Edges }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    pub default_timeout_seconds: u64,
    pub max_rows_cap: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            max_rows_cap: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairConfig {
    pub max_attempts: u32,
    pub confidence_floor: f32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            confidence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralConfig {
    pub denylist: Vec<String>,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub const DEFAULT_DENYLIST: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "CREATE", "COPY", "VACUUM", "REINDEX", "CLUSTER", "LISTEN", "NOTIFY", "SET",
    "RESET", "LOCK", "CALL", "DO", "EXECUTE", "PREPARE", "DEALLOCATE",
    "PG_SLEEP", "PG_READ_FILE", "PG_LS_DIR", "LO_IMPORT", "LO_EXPORT",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub format: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalSettings,
    pub prompt: PromptConfig,
    pub repair: RepairConfig,
    pub structural: StructuralConfig,
    pub executor: ExecutorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with env > local-file > base-file > defaults
    /// precedence. `base_path`/`local_path` are optional; a missing file is
    /// not an error.
    pub fn load(base_path: Option<&Path>, local_path: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())
            .map_err(|e| PipelineError::Internal(e.to_string()))?;

        if let Some(path) = base_path {
            if let Some(layer) = read_json_layer(path)? {
                deep_merge(&mut merged, &layer);
            }
        }
        if let Some(path) = local_path {
            if let Some(layer) = read_json_layer(path)? {
                deep_merge(&mut merged, &layer);
            }
        }

        apply_env_overrides(&mut merged);

        serde_json::from_value(merged).map_err(|e| PipelineError::Internal(e.to_string()))
    }
}

fn read_json_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::Internal(e.to_string()))?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|e| PipelineError::Internal(e.to_string()))?;
    Ok(Some(value))
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; arrays and
/// scalars from `overlay` replace the corresponding value in `base`
/// outright. A `null` in `overlay` is skipped, leaving `base`'s value.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            if !overlay_value.is_null() {
                *base_slot = overlay_value.clone();
            }
        }
    }
}

/// `NLQ_LLM__BASE_URL`-style env vars, `__` separating nested keys.
fn apply_env_overrides(merged: &mut Value) {
    let prefix = "NLQ_";
    let overrides: HashMap<String, String> = env::vars()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .map(|rest| (rest.to_ascii_lowercase(), v))
        })
        .collect();

    for (path, raw) in overrides {
        let segments: Vec<&str> = path.split("__").collect();
        set_path(merged, &segments, &raw);
    }
}

fn set_path(value: &mut Value, segments: &[&str], raw: &str) {
    if segments.is_empty() {
        return;
    }
    if segments.len() == 1 {
        if let Value::Object(map) = value {
            map.insert(segments[0].to_string(), coerce_scalar(raw));
        }
        return;
    }
    if let Value::Object(map) = value {
        let entry = map
            .entry(segments[0].to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        set_path(entry, &segments[1..], raw);
    }
}

fn coerce_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_serde() {
        let cfg = Config::default();
        let value = serde_json::to_value(&cfg).unwrap();
        let back: Config = serde_json::from_value(value).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn local_layer_overrides_base_layer() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        let base = serde_json::json!({ "repair": { "max_attempts": 5 } });
        let local = serde_json::json!({ "repair": { "max_attempts": 7 } });
        deep_merge(&mut merged, &base);
        deep_merge(&mut merged, &local);
        let cfg: Config = serde_json::from_value(merged).unwrap();
        assert_eq!(cfg.repair.max_attempts, 7);
    }

    #[test]
    fn null_in_local_layer_does_not_delete_base_key() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        let base = serde_json::json!({ "llm": { "model": "custom-model" } });
        let local = serde_json::json!({ "llm": { "model": null } });
        deep_merge(&mut merged, &base);
        deep_merge(&mut merged, &local);
        let cfg: Config = serde_json::from_value(merged).unwrap();
        assert_eq!(cfg.llm.model, "custom-model");
    }

    #[test]
    fn lists_replace_rather_than_append() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        let overlay = serde_json::json!({ "structural": { "denylist": ["DROP"] } });
        deep_merge(&mut merged, &overlay);
        let cfg: Config = serde_json::from_value(merged).unwrap();
        assert_eq!(cfg.structural.denylist, vec!["DROP".to_string()]);
    }

    #[test]
    fn env_override_sets_nested_path() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        set_path(&mut merged, &["repair", "max_attempts"], "4");
        let cfg: Config = serde_json::from_value(merged).unwrap();
        assert_eq!(cfg.repair.max_attempts, 4);
    }
}
