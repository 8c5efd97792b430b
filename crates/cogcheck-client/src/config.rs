//! File and environment configuration, and the API factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cogcheck_core::cooldown::CooldownPolicy;
use cogcheck_core::scoring::ScoringConfig;
use cogcheck_core::session::{SessionConfig, SessionController};

use crate::credentials::StaticToken;
use crate::http::{HttpTestApi, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};

/// Environment variable overriding `token`.
pub const TOKEN_ENV: &str = "COGCHECK_TOKEN";
/// Environment variable overriding `base_url`.
pub const BASE_URL_ENV: &str = "COGCHECK_BASE_URL";

/// Top-level cogcheck configuration.
///
/// Note: Custom Debug impl masks the token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct CogcheckConfig {
    /// Backend API root, including the `/api` prefix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token; `${VAR}` references are resolved from the environment.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Test types shown by history and cooldown summaries.
    #[serde(default = "default_test_types")]
    pub test_types: Vec<String>,
    #[serde(default)]
    pub cooldown: CooldownPolicy,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl std::fmt::Debug for CogcheckConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CogcheckConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("test_types", &self.test_types)
            .field("cooldown", &self.cooldown)
            .field("session", &self.session)
            .field("scoring", &self.scoring)
            .finish()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_test_types() -> Vec<String> {
    ["attention", "reaction", "memory", "cognitive"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for CogcheckConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_secs: default_timeout(),
            test_types: default_test_types(),
            cooldown: CooldownPolicy::default(),
            session: SessionConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl CogcheckConfig {
    /// The token after env resolution, or `None` if it resolved to nothing.
    pub fn credentials(&self) -> StaticToken {
        StaticToken::from(self.token.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Apply `COGCHECK_TOKEN` / `COGCHECK_BASE_URL` overrides from `lookup`.
pub fn apply_env_overrides(
    config: &mut CogcheckConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(token) = lookup(TOKEN_ENV) {
        config.token = Some(token);
    }
    if let Some(url) = lookup(BASE_URL_ENV) {
        config.base_url = url;
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `cogcheck.toml` in the current directory
/// 2. `~/.config/cogcheck/config.toml`
///
/// Environment variable overrides: `COGCHECK_TOKEN`, `COGCHECK_BASE_URL`.
pub fn load_config() -> Result<CogcheckConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<CogcheckConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("cogcheck.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|dir| dir.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<CogcheckConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => CogcheckConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    config.base_url = resolve_env_vars(&config.base_url);
    config.token = config.token.as_deref().map(resolve_env_vars);

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("cogcheck"))
}

/// Create the HTTP API client from configuration.
pub fn create_api(config: &CogcheckConfig) -> Result<Arc<HttpTestApi>> {
    let api = HttpTestApi::new(
        config.base_url.clone(),
        Arc::new(config.credentials()),
        config.request_timeout(),
    )
    .context("failed to create API client")?;
    Ok(Arc::new(api))
}

/// A session controller over the HTTP API, tuned by `config`.
pub fn session_controller(config: &CogcheckConfig) -> Result<SessionController> {
    let api = create_api(config)?;
    Ok(SessionController::new(api.clone(), api)
        .with_cooldowns(config.cooldown.clone())
        .with_scoring(config.scoring.clone())
        .with_config(config.session.clone()))
}
