//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_POOL__MAX_INSTANCES=4`).
//! `Settings` is the typed view; every field has a default so an empty
//! configuration is valid.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::types::Language;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Wrap an already assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        let settings = self.settings()?;
        if matches!(env, "prod" | "production") && settings.embedding.provider == "hash" {
            return Err(Error::InvalidConfig("the hash embedder is for development and tests only".into()).into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retrieval: RetrievalSettings,
    pub storage: StorageSettings,
    pub embedding: EmbeddingSettings,
    pub pool: PoolSettings,
    pub executor: ExecutorSettings,
    pub generation: GenerationParams,
    pub prompt: PromptSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.pool.max_instances == 0 {
            return Err(Error::InvalidConfig("pool.max_instances must be at least 1".into()));
        }
        if self.pool.max_acquire_attempts == 0 {
            return Err(Error::InvalidConfig("pool.max_acquire_attempts must be at least 1".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance_score) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.min_relevance_score must be within [0, 1], got {}",
                self.retrieval.min_relevance_score
            )));
        }
        if self.embedding.dim == 0 || self.storage.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding dimension must be positive".into()));
        }
        if self.executor.overall_timeout_secs == 0 || self.executor.pause_timeout_ms == 0 || self.executor.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("executor timeouts and poll interval must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub language: Language,
    pub collection: String,
    pub top_k: usize,
    pub min_relevance_score: f32,
    pub max_chars_per_fragment: Option<usize>,
    pub important_phrases: Vec<String>,
    /// Filler words removed in addition to the bundled stop-word list, keyed by language code.
    pub extra_stop_words: HashMap<String, Vec<String>>,
}

impl RetrievalSettings {
    pub fn extra_stop_words_for(&self, language: Language) -> Vec<String> {
        self.extra_stop_words.get(language.code()).cloned().unwrap_or_default()
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        let english_fillers = [
            "how", "what", "where", "when", "why", "which", "who", "whom", "do", "does", "did", "can", "could",
            "should", "would", "i", "me", "my", "you", "your", "we", "our", "please", "tell", "explain",
        ];
        let mut extra_stop_words = HashMap::new();
        extra_stop_words.insert("en".to_string(), english_fillers.iter().map(|s| s.to_string()).collect());
        Self {
            language: Language::English,
            collection: "default".to_string(),
            top_k: 5,
            min_relevance_score: 0.35,
            max_chars_per_fragment: Some(1200),
            important_phrases: ["how to win", "how to play", "game setup", "end of the game"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_stop_words,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub lancedb_dir: String,
    pub table: String,
    pub embedding_dim: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { lancedb_dir: "data/lancedb".to_string(), table: "fragments".to_string(), embedding_dim: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub dim: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self { Self { provider: "hash".to_string(), dim: 1024 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_instances: usize,
    /// Consecutive failed generations after which a slot is marked unhealthy.
    pub max_consecutive_failures: u32,
    /// Upper bound on slot-search rounds inside a single acquire.
    pub max_acquire_attempts: usize,
}

impl Default for PoolSettings {
    fn default() -> Self { Self { max_instances: 2, max_consecutive_failures: 3, max_acquire_attempts: 8 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub executable: String,
    pub model: String,
    pub overall_timeout_secs: u64,
    pub pause_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Marker after which process output counts as answer text. `None` means from the first byte.
    pub assistant_marker: Option<String>,
    pub end_markers: Vec<String>,
    pub extra_args: Vec<String>,
}

impl ExecutorSettings {
    pub fn overall_timeout(&self) -> Duration { Duration::from_secs(self.overall_timeout_secs) }
    pub fn pause_timeout(&self) -> Duration { Duration::from_millis(self.pause_timeout_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            executable: "llama-cli".to_string(),
            model: "models/model.gguf".to_string(),
            overall_timeout_secs: 180,
            pause_timeout_ms: 2500,
            poll_interval_ms: 100,
            assistant_marker: Some("<|im_start|>assistant".to_string()),
            end_markers: ["<|im_end|>", "<|endoftext|>", "<|eot_id|>", "[end of text]", "</s>"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_args: vec!["-no-cnv".to_string()],
        }
    }
}

/// Sampling parameters passed through to the inference executable untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: u32,
    pub context_size: u32,
    pub threads: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            context_size: 4096,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub system: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            system: "You are a helpful offline assistant. Answer the question using only the provided context. \
                     If the context does not contain the answer, say so."
                .to_string(),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().expect("defaults validate");
    }

    #[test]
    fn zero_instances_rejected() {
        let mut s = Settings::default();
        s.pool.max_instances = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut s = Settings::default();
        s.retrieval.min_relevance_score = 1.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/srv/app");
        assert_eq!(resolve_with_base(base, "/opt/model.gguf"), PathBuf::from("/opt/model.gguf"));
        assert_eq!(resolve_with_base(base, "models/m.gguf"), PathBuf::from("/srv/app/models/m.gguf"));
    }
}
