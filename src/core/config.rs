//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::models::LanguagePair;
use crate::core::prompt::GenerationSettings;

/// Prefix for layered environment overrides (`WORDBOOK_MAX_RETRIES`, ...)
const ENV_PREFIX: &str = "WORDBOOK";

/// Worker pool pacing and checkpoint cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Concurrent workers
    pub workers: usize,
    /// Completed units, across all workers, between checkpoints
    pub checkpoint_every: usize,
    /// Pause after each checkpoint
    pub pacing_pause_ms: u64,
    /// Delay between units on one worker
    pub inter_unit_delay_ms: u64,
    /// Start offset between consecutive workers
    pub stagger_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            checkpoint_every: 10,
            pacing_pause_ms: 5000,
            inter_unit_delay_ms: 200,
            stagger_ms: 500,
        }
    }
}

impl ConcurrencyConfig {
    /// No pauses at all; used by tests and dry runs
    pub fn unpaced(workers: usize) -> Self {
        Self {
            workers,
            pacing_pause_ms: 0,
            inter_unit_delay_ms: 0,
            stagger_ms: 0,
            ..Default::default()
        }
    }

    /// `pacing_pause_ms` as a `Duration`
    pub fn pacing_pause(&self) -> Duration {
        Duration::from_millis(self.pacing_pause_ms)
    }

    /// `inter_unit_delay_ms` as a `Duration`
    pub fn inter_unit_delay(&self) -> Duration {
        Duration::from_millis(self.inter_unit_delay_ms)
    }

    /// `stagger_ms` as a `Duration`
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

/// Configuration for translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Key sent as `x-goog-api-key`
    pub api_key: String,
    /// Base URL; the model name is appended per request
    pub api_endpoint: String,
    /// Model tried first for every unit
    pub primary_model: String,
    /// Tried in order once the primary model is exhausted
    pub rollback_models: Vec<String>,
    /// Attempts on the primary model
    pub max_retries: u32,
    /// Attempts on each rollback model
    pub rollback_attempts: u32,
    /// Sleep between consecutive calls for one unit
    pub retry_delay_ms: u64,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Response length cap
    pub max_output_tokens: u32,
    /// Written `de-en`
    pub language_pair: String,
    /// Directory for SQL, journal and error log
    pub output_dir: PathBuf,
    /// Existing database used to skip units already translated
    pub database_path: Option<PathBuf>,
    /// Worker count and pacing
    pub concurrency: ConcurrencyConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
            api_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            primary_model: "models/gemini-1.5-flash".to_string(),
            rollback_models: vec![],
            max_retries: 5,
            rollback_attempts: 3,
            retry_delay_ms: 5000,
            timeout_ms: 60000,
            temperature: 0.1,
            top_p: 0.95,
            max_output_tokens: 4096,
            language_pair: "de-en".to_string(),
            output_dir: PathBuf::from("output"),
            database_path: None,
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl TranslatorConfig {
    /// Layered load: defaults, then an optional file, then `WORDBOOK_*` variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rollback_models"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        info!(
            "Loaded configuration: primary={}, {} rollback model(s), {} worker(s)",
            config.primary_model,
            config.rollback_models.len(),
            config.concurrency.workers
        );
        Ok(config)
    }

    /// Load from a JSON or YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.primary_model.trim().is_empty() {
            return Err(anyhow::anyhow!("primary_model is required"));
        }

        if self.rollback_models.iter().any(|m| m == &self.primary_model) {
            return Err(anyhow::anyhow!(
                "rollback_models must not repeat the primary model {}",
                self.primary_model
            ));
        }

        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("max_retries must be greater than 0"));
        }

        if self.concurrency.workers == 0 {
            return Err(anyhow::anyhow!("concurrency.workers must be greater than 0"));
        }

        if self.concurrency.checkpoint_every == 0 {
            return Err(anyhow::anyhow!(
                "concurrency.checkpoint_every must be greater than 0"
            ));
        }

        self.language_pair()?;

        if self.rollback_models.is_empty() {
            warn!("No rollback models configured");
        }

        Ok(())
    }

    /// Parsed language pair
    pub fn language_pair(&self) -> anyhow::Result<LanguagePair> {
        Ok(self.language_pair.parse::<LanguagePair>()?)
    }

    /// Generation parameters for request bodies
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature,
            top_p: self.top_p,
            max_output_tokens: self.max_output_tokens,
        }
    }

    /// `retry_delay_ms` as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "yaml" || ext == "yml"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = TranslatorConfig {
            rollback_models: vec!["models/gemini-1.5-pro".to_string()],
            ..Default::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_workers() {
        let config = TranslatorConfig {
            concurrency: ConcurrencyConfig {
                workers: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_primary_in_rollback() {
        let config = TranslatorConfig {
            rollback_models: vec!["models/gemini-1.5-flash".to_string()],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordbook.yaml");

        let config = TranslatorConfig {
            api_key: "k".to_string(),
            rollback_models: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = TranslatorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_layered_load_reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordbook.json");
        std::fs::write(
            &path,
            r#"{"primary_model": "models/custom", "concurrency": {"workers": 2}}"#,
        )
        .unwrap();

        let config = TranslatorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.primary_model, "models/custom");
        assert_eq!(config.concurrency.workers, 2);
        assert_eq!(config.concurrency.checkpoint_every, 10);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_only_prefixed_variables_override() {
        std::env::set_var("WORDBOOK_TIMEOUT_MS", "1234");
        std::env::set_var("API_ENDPOINT", "http://unprefixed.test");

        let config = TranslatorConfig::load(None).unwrap();

        std::env::remove_var("WORDBOOK_TIMEOUT_MS");
        std::env::remove_var("API_ENDPOINT");

        assert_eq!(config.timeout_ms, 1234);
        assert_eq!(
            config.api_endpoint,
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }
}
