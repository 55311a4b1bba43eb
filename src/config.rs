use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::chatbot::gemini::DEFAULT_MODEL;
use crate::chatbot::session::DEFAULT_HISTORY_LIMIT;
use crate::chatbot::supervisor::ReconnectPolicy;

/// Environment variable naming the config file.
pub const CONFIG_PATH_VAR: &str = "CHATRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "chatrelay.json";
const DOTENV_PATH: &str = ".env";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Failed to read or parse a `.env` file.
    DotEnv { path: PathBuf, source: dotenvy::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::DotEnv { path, source } => {
                write!(f, "failed to load env file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::DotEnv { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct ConfigFile {
    /// Gemini API key; `API_KEY` in the environment wins.
    api_key: Option<String>,
    /// Seeds the credential store on first run; `TELEGRAM_BOT_TOKEN` wins.
    telegram_bot_token: Option<String>,
    model: String,
    command_prefix: String,
    history_limit: usize,
    /// Directory holding persisted transport credentials.
    auth_dir: String,
    /// Mirror console lines to a daily log file here.
    log_dir: Option<String>,
    poll_timeout_secs: u32,
    reconnect: ReconnectPolicy,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            api_key: None,
            telegram_bot_token: None,
            model: DEFAULT_MODEL.to_string(),
            command_prefix: "!".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            auth_dir: "auth_info".to_string(),
            log_dir: None,
            poll_timeout_secs: 30,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    /// May be empty; model calls then fail and users get the apology.
    pub api_key: String,
    pub telegram_bot_token: Option<String>,
    pub model: String,
    pub command_prefix: String,
    pub history_limit: usize,
    pub auth_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub poll_timeout_secs: u32,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    /// Load from `$CHATRELAY_CONFIG` (must exist) or `chatrelay.json` (optional),
    /// then apply environment overrides. `./.env` fills in unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dotenv = read_dotenv(DOTENV_PATH)?;
        let env = |key: &str| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned());

        let explicit = env(CONFIG_PATH_VAR);
        let required = explicit.is_some();
        let path = PathBuf::from(explicit.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()));
        Self::load(&path, required, env)
    }

    pub fn load<P, E>(path: P, required: bool, env: E) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        E: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let file = if required || path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
            serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })?
        } else {
            ConfigFile::default()
        };

        if file.command_prefix.is_empty() {
            return Err(ConfigError::Validation("command_prefix must not be empty".into()));
        }
        if file.model.trim().is_empty() {
            return Err(ConfigError::Validation("model must not be empty".into()));
        }
        if file.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be at least 1".into()));
        }
        file.reconnect.validate().map_err(ConfigError::Validation)?;

        let api_key = env("API_KEY")
            .or_else(|| env("GEMINI_API_KEY"))
            .or(file.api_key)
            .unwrap_or_default();
        let telegram_bot_token = env("TELEGRAM_BOT_TOKEN")
            .or(file.telegram_bot_token)
            .filter(|token| !token.is_empty());

        Ok(Self {
            api_key,
            telegram_bot_token,
            model: file.model,
            command_prefix: file.command_prefix,
            history_limit: file.history_limit,
            auth_dir: PathBuf::from(file.auth_dir),
            log_dir: file.log_dir.map(PathBuf::from),
            poll_timeout_secs: file.poll_timeout_secs,
            reconnect: file.reconnect,
        })
    }
}

/// Variables from a `.env` file. A missing file yields an empty map.
pub fn read_dotenv<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>, ConfigError> {
    let path = path.as_ref();
    let to_error = |e| ConfigError::DotEnv { path: path.to_path_buf(), source: e };

    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(to_error(e)),
    };
    iter.collect::<Result<HashMap<_, _>, _>>().map_err(to_error)
}
