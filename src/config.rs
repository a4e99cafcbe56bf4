//! Role configuration: typed structs, builders, and YAML/env loading.
use crate::error::ConfigError;
use crate::stamp::MAX_DIFFICULTY;
use derive_builder::Builder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Selects the `<stem>-<env>.yaml` overlay next to the base file.
pub const ENVIRONMENT_VAR: &str = "HASHGATE_ENVIRONMENT";
pub const LISTEN_ADDR_VAR: &str = "HASHGATE_LISTEN_ADDR";
/// Comma-separated list of server addresses.
pub const SERVER_ADDRESS_VAR: &str = "HASHGATE_SERVER_ADDRESS";

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_SESSIONS: usize = 1024;
pub const DEFAULT_KEY_PATH: &str = "config/key.pem";

fn default_server_name() -> String {
    "hashgate-server".to_owned()
}

fn default_client_name() -> String {
    "hashgate-client".to_owned()
}

fn default_io_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_key_path() -> PathBuf {
    PathBuf::from(DEFAULT_KEY_PATH)
}

fn default_one() -> usize {
    1
}

/// Issuer (server) settings.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[builder(pattern = "owned")]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct IssuerConfig {
    #[builder(setter(into), default = "default_server_name()")]
    #[serde(default = "default_server_name")]
    pub app_name: String,
    /// `host:port` to bind.
    #[builder(setter(into))]
    pub listen_addr: String,
    /// Leading zero bits required from solvers.
    pub difficulty: u32,
    /// How long an issued stamp stays valid.
    #[serde(with = "humantime_serde")]
    pub stamp_timeout: Duration,
    #[builder(default = "DEFAULT_IO_TIMEOUT")]
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,
    /// Upper bound on concurrently running sessions.
    #[builder(default = "DEFAULT_MAX_SESSIONS")]
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[builder(setter(into), default = "default_key_path()")]
    #[serde(default = "default_key_path")]
    pub private_key_path: PathBuf,
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub peer_public_key_path: Option<PathBuf>,
    /// JSON quote file; the built-in table is used when absent.
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub quotes_path: Option<PathBuf>,
}

impl IssuerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen-addr must be set".into()));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty must be <= {MAX_DIFFICULTY}"
            )));
        }
        // Stamp ages are whole seconds; refuse to silently truncate.
        if self.stamp_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "stamp-timeout must be at least 1 second".into(),
            ));
        }
        if self.stamp_timeout.subsec_nanos() != 0 {
            return Err(ConfigError::Invalid(
                "stamp-timeout must be a whole number of seconds".into(),
            ));
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::Invalid("io-timeout must be > 0".into()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max-sessions must be >= 1".into()));
        }
        Ok(())
    }

    /// Base file, optional environment overlay, env-var overrides, then validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut value = load_layered(path, &env)?;
        if let Some(addr) = env(LISTEN_ADDR_VAR) {
            set_key(&mut value, "listen-addr", Value::String(addr));
        }
        let cfg: Self = from_value(path, value)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

impl IssuerConfigBuilder {
    pub fn build_validated(self) -> Result<IssuerConfig, ConfigError> {
        let cfg = self
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Solver (client) settings.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[builder(pattern = "owned")]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SolverConfig {
    #[builder(setter(into), default = "default_client_name()")]
    #[serde(default = "default_client_name")]
    pub app_name: String,
    /// Servers to spread workers over, round-robin.
    pub server_addrs: Vec<String>,
    /// Hard ceiling on counters tried per stamp.
    pub max_iterations: u64,
    #[builder(default = "1")]
    #[serde(default = "default_one")]
    pub solve_threads: usize,
    #[builder(default = "1")]
    #[serde(default = "default_one")]
    pub workers: usize,
    #[builder(default = "1")]
    #[serde(default = "default_one")]
    pub requests_per_worker: usize,
    /// Pause between two requests of the same worker.
    #[builder(default)]
    #[serde(with = "humantime_serde", default)]
    pub request_delay: Duration,
    /// Pause between starting two workers.
    #[builder(default)]
    #[serde(with = "humantime_serde", default)]
    pub worker_spawn_delay: Duration,
    #[builder(default = "DEFAULT_IO_TIMEOUT")]
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,
    #[builder(setter(into), default = "default_key_path()")]
    #[serde(default = "default_key_path")]
    pub private_key_path: PathBuf,
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    pub peer_public_key_path: Option<PathBuf>,
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addrs.is_empty() || self.server_addrs.iter().any(|a| a.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "server-addrs must list at least one address".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid("max-iterations must be >= 1".into()));
        }
        if self.solve_threads == 0 {
            return Err(ConfigError::Invalid("solve-threads must be >= 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be >= 1".into()));
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::Invalid("io-timeout must be > 0".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut value = load_layered(path, &env)?;
        if let Some(addrs) = env(SERVER_ADDRESS_VAR) {
            let list = addrs
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(|a| Value::String(a.to_owned()))
                .collect();
            set_key(&mut value, "server-addrs", Value::Sequence(list));
        }
        let cfg: Self = from_value(path, value)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

impl SolverConfigBuilder {
    pub fn build_validated(self) -> Result<SolverConfig, ConfigError> {
        let cfg = self
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Path of the environment overlay for `base`, e.g. `server.yaml` -> `server-dev.yaml`.
pub fn overlay_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}-{environment}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{environment}"),
    };
    base.with_file_name(name)
}

fn load_layered(
    path: &Path,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Value, ConfigError> {
    let mut value = read_yaml(path)?;
    if !value.is_mapping() {
        value = Value::Mapping(Mapping::new());
    }
    let environment = env(ENVIRONMENT_VAR).filter(|e| !e.is_empty());
    if let Some(environment) = environment {
        let overlay = overlay_path(path, &environment);
        if overlay.exists() {
            if let Value::Mapping(entries) = read_yaml(&overlay)? {
                for (key, entry) in entries {
                    if let Value::Mapping(base) = &mut value {
                        base.insert(key, entry);
                    }
                }
            }
        }
    }
    Ok(value)
}

fn set_key(value: &mut Value, key: &str, entry: Value) {
    if let Value::Mapping(map) = value {
        map.insert(Value::String(key.to_owned()), entry);
    }
}

fn from_value<T: DeserializeOwned>(path: &Path, value: Value) -> Result<T, ConfigError> {
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
