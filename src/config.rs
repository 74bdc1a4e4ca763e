use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use cross_xdg::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ops::{self, NamedOperation};
use crate::registry::{OperatorRegistry, RegistryError};

/// Default wall-clock budget for a single run.
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Settings read from `bf.toml`.
///
/// ```toml
/// [limits]
/// timeout_ms = 5000
/// max_steps = 1000000
///
/// [operators]
/// f = "fibonacci"
/// d = "double"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub operators: BTreeMap<String, NamedOperation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    pub timeout_ms: Option<u64>,
    pub max_steps: Option<u64>,
}

/// Why building a registry from configuration failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    InvalidCode(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Register every `[operators]` entry into `registry`.
    pub fn register_operators(&self, registry: &mut OperatorRegistry) -> Result<(), ConfigError> {
        for (key, op) in &self.operators {
            let code = ops::parse_code(key).map_err(ConfigError::InvalidCode)?;
            registry.register(op.bind(code))?;
        }
        Ok(())
    }

    /// Timeout: flag, then `BF_TIMEOUT_MS`, then the file, then the default.
    /// With nothing set and a person typing `,` input on a terminal there is
    /// no wall-clock limit at all.
    pub fn resolve_timeout_ms(&self, flag: Option<u64>, interactive_input: bool) -> Option<u64> {
        flag.or_else(|| env_u64("BF_TIMEOUT_MS"))
            .or(self.limits.timeout_ms)
            .or((!interactive_input).then_some(DEFAULT_TIMEOUT_MS))
    }

    /// Step limit: flag, then `BF_MAX_STEPS`, then the file; unlimited otherwise.
    pub fn resolve_max_steps(&self, flag: Option<u64>) -> Option<u64> {
        flag.or_else(|| env_u64("BF_MAX_STEPS"))
            .or(self.limits.max_steps)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Process-wide configuration, loaded on first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| load().unwrap_or_default())
}

/// `BF_CONFIG` when set, otherwise `bf.toml` in the XDG config home.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os("BF_CONFIG") {
        return Some(PathBuf::from(path));
    }

    // On Linux: resolves to /home/<user>/.config
    // On Windows: resolves to C:\Users\<user>\.config
    // On macOS: resolves to /Users/<user>/.config
    let base_dirs = BaseDirs::new().ok()?;
    let mut path = PathBuf::from(base_dirs.config_home());
    path.push("bf.toml");
    Some(path)
}

fn load() -> Option<Config> {
    let path = config_path()?;
    let content = fs::read_to_string(&path).ok()?;
    match Config::from_toml(&content) {
        Ok(cfg) => {
            debug!(path = %path.display(), operators = cfg.operators.len(), "loaded config");
            Some(cfg)
        }
        Err(e) => {
            warn!(path = %path.display(), "ignoring malformed config: {e}");
            None
        }
    }
}
