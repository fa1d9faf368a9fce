//! Process configuration: environment selection and layered loading.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. compiled defaults (`ProcessConfig::default()`)
//! 2. `<root>/config/application.toml`
//! 3. `<root>/config/environments/<env>.toml`
//! 4. `<root>/config/initializers/*.toml`, in file name order
//! 5. `HARBOR__*` environment variables (`__` separates nested keys)
//! 6. explicit overrides (command line)
//!
//! Every file is optional. A file that exists but does not parse, or holds
//! a value of the wrong type, fails the whole load.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, Environment as EnvSource, File, FileFormat, Map};
use harbor_core::{ProtocolKind, TransportKind};
use serde::{Deserialize, Serialize};

use crate::error::ConfigLoadError;

/// Variable naming the active environment.
pub const ENV_VAR: &str = "HARBOR_ENV";

/// Variable naming the application root directory.
pub const ROOT_VAR: &str = "HARBOR_ROOT";

/// Prefix for configuration override variables (`HARBOR__PORT=5000`).
pub const OVERRIDE_PREFIX: &str = "HARBOR";

/// Environment used when `HARBOR_ENV` is unset or empty.
pub const DEFAULT_ENV: &str = "development";

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Name of the active environment (`development`, `test`, `production`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Environment(String);

impl Environment {
    /// Creates an environment from a name, falling back to `development`
    /// for an empty name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            Self(DEFAULT_ENV.to_string())
        } else {
            Self(name.trim().to_string())
        }
    }

    /// Reads `HARBOR_ENV`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(std::env::var(ENV_VAR).unwrap_or_default())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.0 == name
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        self.is("development")
    }

    #[must_use]
    pub fn is_test(&self) -> bool {
        self.is("test")
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.is("production")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self(DEFAULT_ENV.to_string())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enumerated settings
// ---------------------------------------------------------------------------

/// How the server handles connections. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Bounded pool of OS threads, one blocking connection per worker.
    Threaded,
    /// Reactor tasks multiplexing all connections.
    #[default]
    EventDriven,
}

impl ConcurrencyMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConcurrencyMode::Threaded => "threaded",
            ConcurrencyMode::EventDriven => "event_driven",
        }
    }

    /// Framing paired with this mode: buffered for blocking workers,
    /// length-prefixed for the reactor.
    #[must_use]
    pub fn transport(self) -> TransportKind {
        match self {
            ConcurrencyMode::Threaded => TransportKind::Buffered,
            ConcurrencyMode::EventDriven => TransportKind::Framed,
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "threaded" | "thread" => Ok(ConcurrencyMode::Threaded),
            "event_driven" | "nonblocking" | "nonblock" => Ok(ConcurrencyMode::EventDriven),
            other => Err(format!("unknown concurrency mode: {other}")),
        }
    }
}

/// Line format of the process log. Chosen once, when the sink is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Message and fields only.
    #[default]
    Plain,
    /// Timestamp, level, and target before the message.
    Full,
}

/// Cache backend selection: backend name, positional arguments, options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStoreSpec {
    pub backend: String,
    pub args: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl Default for CacheStoreSpec {
    fn default() -> Self {
        Self {
            backend: "memory_store".to_string(),
            args: Vec::new(),
            options: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessConfig
// ---------------------------------------------------------------------------

/// Immutable startup configuration shared as `Arc<ProcessConfig>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Application name, reported by `server_info`.
    pub app_name: String,
    /// Directories registered with the autoloader; relative paths resolve
    /// against the root.
    pub autoload_paths: Vec<PathBuf>,
    /// Cache backend selection.
    pub cache_store: CacheStoreSpec,
    /// Wire protocol.
    pub protocol: ProtocolKind,
    /// Connection handling model.
    pub concurrency_mode: ConcurrencyMode,
    /// Worker thread count for threaded mode.
    pub thread_pool_size: usize,
    /// Bind host for both modes.
    pub host: String,
    /// Listening port in event-driven mode.
    pub port: u16,
    /// Listening port in threaded mode.
    pub thread_port: u16,
    /// When false, reload requests are honored without `force`.
    pub cache_classes: bool,
    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            app_name: "harbor".to_string(),
            autoload_paths: vec![
                PathBuf::from("app/services"),
                PathBuf::from("app/models"),
            ],
            cache_store: CacheStoreSpec::default(),
            protocol: ProtocolKind::Binary,
            concurrency_mode: ConcurrencyMode::EventDriven,
            thread_pool_size: 20,
            host: "127.0.0.1".to_string(),
            port: 4000,
            thread_port: 4001,
            cache_classes: false,
            log_format: LogFormat::Plain,
        }
    }
}

impl ProcessConfig {
    /// The port the configured concurrency mode listens on.
    #[must_use]
    pub fn listen_port(&self) -> u16 {
        match self.concurrency_mode {
            ConcurrencyMode::Threaded => self.thread_port,
            ConcurrencyMode::EventDriven => self.port,
        }
    }

    /// `host:port` for the configured concurrency mode.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.listen_port())
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigLoadError::Invalid` for a zero pool size, an empty
    /// host, or an empty cache backend name.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.thread_pool_size == 0 {
            return Err(ConfigLoadError::Invalid {
                field: "thread_pool_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.cache_store.backend.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                field: "cache_store.backend",
                reason: "must name a backend".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConfigLoader
// ---------------------------------------------------------------------------

/// Builds a `ProcessConfig` from the layered sources under a root directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    root: PathBuf,
    env: Environment,
    read_env_vars: bool,
    env_source: Option<Map<String, String>>,
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, env: Environment) -> Self {
        Self {
            root: root.into(),
            env,
            read_env_vars: true,
            env_source: None,
            overrides: Vec::new(),
        }
    }

    /// Enables or disables the `HARBOR__*` variable source.
    #[must_use]
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.read_env_vars = enabled;
        self
    }

    /// Reads `HARBOR__*` variables from `vars` instead of the process
    /// environment.
    #[must_use]
    pub fn with_env_source(mut self, vars: Map<String, String>) -> Self {
        self.read_env_vars = true;
        self.env_source = Some(vars);
        self
    }

    /// Adds a highest-precedence override, e.g. `("port", "5000")`.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Path of the environment-specific override file.
    #[must_use]
    pub fn environment_file(&self) -> PathBuf {
        self.root
            .join("config")
            .join("environments")
            .join(format!("{}.toml", self.env))
    }

    /// Initializer files in the order they are applied.
    ///
    /// # Errors
    ///
    /// Returns `ConfigLoadError::Initializers` if the directory exists but
    /// cannot be read.
    pub fn initializer_files(&self) -> Result<Vec<PathBuf>, ConfigLoadError> {
        let dir = self.root.join("config").join("initializers");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| ConfigLoadError::Initializers {
            path: dir.clone(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| ConfigLoadError::Initializers {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Loads, merges, deserializes, and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigLoadError` when any present source is malformed or
    /// the merged result is invalid.
    pub fn load(&self) -> Result<ProcessConfig, ConfigLoadError> {
        let mut builder = Config::builder()
            .add_source(toml_file(&self.root.join("config").join("application.toml")))
            .add_source(toml_file(&self.environment_file()));

        for path in self.initializer_files()? {
            tracing::debug!(path = %path.display(), "applying initializer");
            builder = builder.add_source(toml_file(&path));
        }

        if self.read_env_vars {
            // `HARBOR_ENV` and `HARBOR_ROOT` use a single underscore and
            // never match the `HARBOR__` prefix.
            builder = builder.add_source(
                EnvSource::with_prefix(OVERRIDE_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(self.env_source.clone()),
            );
        }

        for (key, value) in &self.overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }

        let config: ProcessConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

fn toml_file(path: &Path) -> File<config::FileSourceFile, FileFormat> {
    File::from(path).format(FileFormat::Toml).required(false)
}
