//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.kubeassist/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::gateway::{Gateway, DEFAULT_KUBECONFIG_ENV};
use crate::policy::{PolicyConfig, DEFAULT_ALLOWED_COMMANDS, DEFAULT_PROGRAM};

const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OLLAMA_PORT: u16 = 11434;
const DEFAULT_MODEL_FALLBACK: &str = "gpt-oss:20b";
const DEFAULT_MAX_STEPS: usize = 8;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Command gateway settings (allowlist, program, kubeconfig variable).
    #[serde(default)]
    pub kubectl: KubectlConfig,

    /// Agent defaults (model, Ollama endpoint, step bound).
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubectlConfig {
    /// Verbs that may run (default get, describe, logs). Matched case-sensitively against the first token.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Program to invoke; a leading token equal to this is stripped from commands (default "kubectl").
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Environment variable forwarded into the child with the kubeconfig path (default "KUBECONFIG").
    #[serde(default = "default_kubeconfig_env")]
    pub kubeconfig_env: String,
}

fn default_allowed_commands() -> Vec<String> {
    DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect()
}

fn default_binary() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_kubeconfig_env() -> String {
    DEFAULT_KUBECONFIG_ENV.to_string()
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            binary: default_binary(),
            kubeconfig_env: default_kubeconfig_env(),
        }
    }
}

impl KubectlConfig {
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::new(self.binary.trim(), self.allowed_commands.iter().cloned())
    }

    /// Gateway for this config with real subprocesses and the process environment.
    pub fn gateway(&self) -> Gateway {
        Gateway::new(self.policy()).with_kubeconfig_env(self.kubeconfig_env.trim())
    }
}

/// Agent defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Ollama model name as shown by `ollama list` (e.g. "qwen3:8b").
    pub default_model: Option<String>,
    /// Ollama base URL (default http://127.0.0.1:11434).
    pub ollama_base_url: Option<String>,
    /// Maximum model round-trips per query (default 8).
    pub max_steps: Option<usize>,
}

impl AgentsConfig {
    /// Model from the request, else config, else the built-in fallback. Blank values are ignored.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .or(self.default_model.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MODEL_FALLBACK)
            .to_string()
    }

    /// Env OLLAMA_HOST overrides config. Both accept Ollama's `host[:port]` form.
    pub fn resolve_ollama_base_url(&self) -> String {
        self.ollama_base_url_with(std::env::var("OLLAMA_HOST").ok().as_deref())
    }

    fn ollama_base_url_with(&self, host_env: Option<&str>) -> String {
        host_env
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.ollama_base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
            .map(normalize_ollama_host)
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string())
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_STEPS)
    }
}

/// Turn an Ollama host value into a base URL: `http://` when no scheme is given, port 11434
/// when none is given, and an empty host (`:11434`) means loopback. URLs with a scheme pass through.
pub fn normalize_ollama_host(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if raw.contains("://") {
        return raw.to_string();
    }
    let (authority, path) = match raw.find('/') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let authority = if authority.starts_with(':') {
        format!("127.0.0.1{}", authority)
    } else {
        authority.to_string()
    };
    let has_port = match authority.strip_prefix('[') {
        Some(rest) => rest.contains("]:"),
        None => authority.contains(':'),
    };
    if has_port {
        format!("http://{}{}", authority, path)
    } else {
        format!("http://{}:{}{}", authority, DEFAULT_OLLAMA_PORT, path)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("KUBEASSIST_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".kubeassist").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, KUBEASSIST_CONFIG_PATH, or the default. Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
