use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8791
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierConfig {
    #[serde(default = "default_verifier_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Unparseable audit output degrades to a low-confidence pass when
    /// true, to a low-confidence fail when false. Either way it is
    /// absorbed, never surfaced as a task error.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

fn default_verifier_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_fail_open() -> bool {
    true
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            model: default_verifier_model(),
            api_base: default_api_base(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            fail_open: default_fail_open(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Base64-encoded 32-byte AES-256 master key. Generated per process
    /// when unset, which makes stored values unreadable after restart.
    #[serde(default)]
    pub master_key: Option<String>,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_wait_timeout_secs() -> u64 {
    60 * 60 * 24
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Seconds a finished task's event queue survives after the observer
    /// disconnects before the registry drops it.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Upper bound on a task's requested team size.
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
}

fn default_event_buffer() -> usize {
    1024
}

fn default_grace_secs() -> u64 {
    300
}

fn default_max_participants() -> usize {
    12
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            grace_secs: default_grace_secs(),
            max_participants: default_max_participants(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Verifier key with empty strings treated as unset.
    pub fn verifier_api_key(&self) -> Option<String> {
        self.verifier
            .api_key
            .as_ref()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
    }
}
