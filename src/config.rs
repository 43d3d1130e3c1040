use crate::error::{RelayError, Result};
use crate::jobs::PollPolicy;
use crate::providers::{Credential, ProviderPreset, GENERIC_OPENAI};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub provider: ProviderConfig,
    /// Canonical model name -> provider model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How long a finished job stays queryable.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// A job may poll for at most a week.
pub const MAX_POLL_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

fn default_port() -> u16 {
    4333
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    30
}

fn default_initial_interval_ms() -> u64 {
    1_500
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_poll_timeout_secs() -> u64 {
    10 * 60
}

fn default_http_timeout_secs() -> u64 {
    300
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            poll: PollConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff_factor: default_backoff_factor(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            backoff_factor: self.backoff_factor,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl RelayConfig {
    /// Minimal config for a named provider with every other setting defaulted.
    pub fn for_provider(name: impl Into<String>) -> Self {
        Self {
            port: default_port(),
            provider: ProviderConfig {
                name: name.into(),
                base_url: None,
                api_key_env: None,
            },
            models: HashMap::new(),
            jobs: JobsConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(RelayError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn validate(&self) -> Result<()> {
        let poll = &self.jobs.poll;
        if !poll.backoff_factor.is_finite() || poll.backoff_factor < 1.0 {
            return Err(RelayError::config(
                "jobs.poll.backoff_factor must be a finite number >= 1.0",
            ));
        }
        if poll.timeout_secs > MAX_POLL_TIMEOUT_SECS {
            return Err(RelayError::config(format!(
                "jobs.poll.timeout_secs must not exceed {MAX_POLL_TIMEOUT_SECS}"
            )));
        }
        if poll.max_interval_ms < poll.initial_interval_ms {
            return Err(RelayError::config(
                "jobs.poll.max_interval_ms must not be below initial_interval_ms",
            ));
        }
        if self.jobs.sweep_interval_secs == 0 {
            return Err(RelayError::config("jobs.sweep_interval_secs must be positive"));
        }
        if self.jobs.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(RelayError::config(format!(
                "jobs.sweep_interval_secs must not exceed {MAX_SWEEP_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }

    /// The preset for the configured provider. Unknown names resolve to the
    /// generic OpenAI-compatible preset, which requires an explicit `base_url`.
    pub fn preset(&self) -> Result<&'static ProviderPreset> {
        if let Some(preset) = ProviderPreset::from_name(&self.provider.name) {
            return Ok(preset);
        }
        if self.provider.base_url.is_some() {
            return Ok(&GENERIC_OPENAI);
        }
        let known = ProviderPreset::all()
            .iter()
            .map(|p| p.name)
            .collect::<Vec<_>>()
            .join(", ");
        Err(RelayError::config(format!(
            "Unknown provider '{}' and no base_url configured. Known providers: {}",
            self.provider.name, known
        )))
    }

    /// API root: configured host (or preset host) plus the preset's API prefix.
    pub fn effective_base_url(&self) -> Result<String> {
        let preset = self.preset()?;
        let host = self
            .provider
            .base_url
            .as_deref()
            .unwrap_or(preset.base_url)
            .trim()
            .trim_end_matches('/');
        Ok(format!("{}{}", host, preset.api_prefix))
    }

    pub fn api_key_env(&self) -> Result<String> {
        if let Some(ref env) = self.provider.api_key_env {
            return Ok(env.clone());
        }
        Ok(self.preset()?.default_api_key_env.to_string())
    }

    /// Resolve the credential from the configured environment variable.
    ///
    /// Local Ollama runs without a key, so a missing variable is only an
    /// error for hosted providers.
    pub fn resolve_credential(&self) -> Result<Credential> {
        let preset = self.preset()?;
        let env = self.api_key_env()?;
        match std::env::var(&env) {
            Ok(key) => Ok(Credential::new(preset.auth, key)),
            Err(_) if preset.name.starts_with("ollama") => Ok(Credential::new(preset.auth, "")),
            Err(_) => Err(RelayError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                env
            ))),
        }
    }

    /// Map a canonical model name through the `[models]` table.
    #[must_use]
    pub fn map_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("genai-relay.toml"));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("genai-relay")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("genai-relay").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("genai-relay").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".genai-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
