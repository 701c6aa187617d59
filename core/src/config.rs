use crate::assembly::DeckFormat;
use serde::{Deserialize, Serialize};
use slide_chatgpt::DEFAULT_BASE_URL;
use slide_common::AspectRatio;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {source}")]
    ParseError {
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to parse TOML config: {source}")]
    TomlParseError {
        #[source]
        source: toml::de::Error,
    },
    #[error("Missing required setting: {field}")]
    MissingField { field: &'static str },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Credentials and model identifiers for the OpenAI-compatible provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Model (or endpoint id) used for content planning.
    pub llm_endpoint: String,
    /// Model (or endpoint id) used for background images.
    pub image_endpoint: String,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            llm_endpoint: String::new(),
            image_endpoint: String::new(),
            temperature: 0.7,
        }
    }
}

// Keeps the key out of debug logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("llm_endpoint", &self.llm_endpoint)
            .field("image_endpoint", &self.image_endpoint)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_slides: u32,
    /// Synthesis calls in flight for a single job.
    pub concurrency_cap: usize,
    /// Synthesis calls in flight across all jobs; unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_concurrency_cap: Option<usize>,
    pub image_call_timeout_ms: u64,
    pub planning_timeout_ms: u64,
    pub synthesis_stage_timeout_ms: u64,
    /// Total attempts per slide, first call included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// A job fails when more than this fraction of requested slides is missing.
    pub max_missing_ratio: f64,
    pub aspect_ratio: AspectRatio,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_slides: 20,
            concurrency_cap: 3,
            global_concurrency_cap: None,
            image_call_timeout_ms: 300_000,
            planning_timeout_ms: 120_000,
            synthesis_stage_timeout_ms: 1_800_000,
            max_attempts: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_missing_ratio: 0.5,
            aspect_ratio: AspectRatio::Widescreen,
        }
    }
}

impl PipelineConfig {
    pub fn image_call_timeout(&self) -> Duration {
        Duration::from_millis(self.image_call_timeout_ms)
    }

    pub fn planning_timeout(&self) -> Duration {
        Duration::from_millis(self.planning_timeout_ms)
    }

    pub fn synthesis_stage_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_stage_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long a terminal job stays queryable.
    pub window_secs: u64,
    /// Upper bound on retained terminal jobs; oldest are evicted first.
    pub max_jobs: usize,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_jobs: 256,
            sweep_interval_secs: 60,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub pipeline: PipelineConfig,
    pub retention: RetentionConfig,
    /// Where the CLI writes finished decks.
    pub output_dir: PathBuf,
    pub output_format: DeckFormat,
}

impl Config {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut config: Config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParseError { source: e })?
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError { source: e })?
        };
        if config.output_dir.as_os_str().is_empty() {
            config.output_dir = PathBuf::from("output");
        }
        Ok(config)
    }

    /// Load configuration with default fallback
    pub fn load_with_fallback() -> Self {
        let config_paths = [
            ".slide/config.toml",
            ".slide/config.json",
            "slide.config.toml",
            "slide.config.json",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                match Self::load_from_file(path) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from {path}");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {path}: {e}");
                    }
                }
            }
        }

        tracing::info!("Using default configuration");
        Self::with_defaults()
    }

    pub fn with_defaults() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            ..Self::default()
        }
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ARK_API_KEY").filter(|k| !k.is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("ARK_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(endpoint) = lookup("LLM_ENDPOINT") {
            self.provider.llm_endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("IMAGE_ENDPOINT") {
            self.provider.image_endpoint = endpoint;
        }
        if let Some(dir) = lookup("SLIDE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "SLIDE_OUTPUT_FORMAT", &mut self.output_format);

        let pipeline = &mut self.pipeline;
        override_parsed(&lookup, "SLIDE_MAX_SLIDES", &mut pipeline.max_slides);
        override_parsed(&lookup, "SLIDE_CONCURRENCY", &mut pipeline.concurrency_cap);
        // 0 lifts the global cap.
        let mut global = pipeline.global_concurrency_cap.unwrap_or(0);
        override_parsed(&lookup, "SLIDE_GLOBAL_CONCURRENCY", &mut global);
        pipeline.global_concurrency_cap = (global > 0).then_some(global);
        override_parsed(&lookup, "SLIDE_IMAGE_TIMEOUT_MS", &mut pipeline.image_call_timeout_ms);
        override_parsed(&lookup, "SLIDE_PLANNING_TIMEOUT_MS", &mut pipeline.planning_timeout_ms);
        override_parsed(
            &lookup,
            "SLIDE_SYNTHESIS_TIMEOUT_MS",
            &mut pipeline.synthesis_stage_timeout_ms,
        );
        override_parsed(&lookup, "SLIDE_MAX_ATTEMPTS", &mut pipeline.max_attempts);
        override_parsed(&lookup, "SLIDE_MAX_MISSING_RATIO", &mut pipeline.max_missing_ratio);

        override_parsed(&lookup, "SLIDE_RETENTION_SECS", &mut self.retention.window_secs);
        override_parsed(&lookup, "SLIDE_MAX_RETAINED_JOBS", &mut self.retention.max_jobs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.max_slides == 0 {
            return Err(invalid("pipeline.max_slides", "must be at least 1"));
        }
        if p.concurrency_cap == 0 {
            return Err(invalid("pipeline.concurrency_cap", "must be at least 1"));
        }
        if p.global_concurrency_cap == Some(0) {
            return Err(invalid("pipeline.global_concurrency_cap", "must be at least 1"));
        }
        if p.max_attempts == 0 {
            return Err(invalid("pipeline.max_attempts", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&p.max_missing_ratio) {
            return Err(invalid("pipeline.max_missing_ratio", "must be in [0, 1)"));
        }
        if p.backoff_base_ms > p.backoff_max_ms {
            return Err(invalid("pipeline.backoff_base_ms", "exceeds backoff_max_ms"));
        }
        for (field, value) in [
            ("pipeline.image_call_timeout_ms", p.image_call_timeout_ms),
            ("pipeline.planning_timeout_ms", p.planning_timeout_ms),
            ("pipeline.synthesis_stage_timeout_ms", p.synthesis_stage_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(invalid("retention.sweep_interval_secs", "must be positive"));
        }
        Ok(())
    }

    /// Provider settings required by the live collaborators.
    pub fn require_provider(&self) -> Result<(&str, &ProviderConfig), ConfigError> {
        let key = self
            .provider
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingField { field: "ARK_API_KEY" })?;
        if self.provider.llm_endpoint.is_empty() {
            return Err(ConfigError::MissingField { field: "LLM_ENDPOINT" });
        }
        if self.provider.image_endpoint.is_empty() {
            return Err(ConfigError::MissingField { field: "IMAGE_ENDPOINT" });
        }
        Ok((key, &self.provider))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring invalid value for {key}: {raw:?}"),
    }
}
