//! Configuration management.
//!
//! [`EngineConfig`] carries the engine defaults: the conflict-resolution
//! strategy, lock and session time budgets, and per-tenant fallbacks for
//! fields a record leaves blank. It can be built in code, loaded from TOML, and adjusted from the
//! environment.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{Entity, ResolutionStrategy, TenantScope};
use crate::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CURRICULA_CONFIG_PATH";
/// Environment override for the default strategy.
pub const STRATEGY_ENV: &str = "CURRICULA_STRATEGY";
/// Environment override for the tenant lock timeout, in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "CURRICULA_LOCK_TIMEOUT_MS";

/// Fallbacks for one tenant, applied to the record that will be written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TenantDefaults {
    /// Credit hours used when a course is still blank after resolution.
    pub credit_hours: Option<f64>,
    /// Modality used when a section is still blank after resolution.
    pub modality: Option<String>,
}

impl TenantDefaults {
    /// Layers `overrides` on top of `self`.
    #[must_use]
    pub fn overlay(&self, overrides: &Self) -> Self {
        Self {
            credit_hours: overrides.credit_hours.or(self.credit_hours),
            modality: overrides
                .modality
                .clone()
                .or_else(|| self.modality.clone()),
        }
    }

    /// Fills the fields of `entity` that are still blank.
    ///
    /// Populated values are never replaced, so applying twice is the same as
    /// applying once.
    #[must_use]
    pub fn apply(&self, mut entity: Entity) -> Entity {
        match &mut entity {
            Entity::Course(course) if course.credit_hours.is_none() => {
                course.credit_hours = self.credit_hours;
            },
            Entity::Section(section) if section.modality.is_none() => {
                section.modality.clone_from(&self.modality);
            },
            _ => {},
        }
        entity
    }
}

/// Logging settings (see [`crate::observability`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// `json` or `pretty`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `curricula=debug`.
    pub filter: Option<String>,
    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Main configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Strategy applied to updates unless a call overrides it.
    pub default_strategy: ResolutionStrategy,
    /// How long an import waits for a busy tenant.
    pub lock_timeout: Duration,
    /// Time budget per session; `None` disables the check.
    pub session_timeout: Option<Duration>,
    /// Strict mode default for callers that do not choose.
    pub strict_by_default: bool,
    /// Fallbacks for every tenant.
    pub default_tenant: TenantDefaults,
    /// Per-institution fallbacks layered over `default_tenant`.
    pub tenants: HashMap<String, TenantDefaults>,
    /// `SQLite` database used by the CLI.
    pub database_path: PathBuf,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_strategy: ResolutionStrategy::default(),
            lock_timeout: Duration::from_secs(5),
            session_timeout: Some(Duration::from_secs(600)),
            strict_by_default: false,
            default_tenant: TenantDefaults::default(),
            tenants: HashMap::new(),
            database_path: PathBuf::from(".curricula").join("curricula.db"),
            logging: LoggingSettings::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Default strategy name.
    pub default_strategy: Option<String>,
    /// Lock timeout in milliseconds.
    pub lock_timeout_ms: Option<u64>,
    /// Session timeout in seconds; `0` disables it.
    pub session_timeout_secs: Option<u64>,
    /// Strict mode default.
    pub strict: Option<bool>,
    /// Database path.
    pub database_path: Option<String>,
    /// Defaults for every tenant.
    pub defaults: Option<TenantDefaults>,
    /// Per-institution overrides.
    #[serde(default)]
    pub tenants: HashMap<String, TenantDefaults>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the tenant lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the session time budget.
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the defaults applied to every tenant.
    #[must_use]
    pub fn with_default_tenant(mut self, defaults: TenantDefaults) -> Self {
        self.default_tenant = defaults;
        self
    }

    /// Adds per-institution defaults.
    #[must_use]
    pub fn with_tenant(mut self, institution_id: impl Into<String>, defaults: TenantDefaults) -> Self {
        self.tenants.insert(institution_id.into(), defaults);
        self
    }

    /// Resolves the blank-field fallbacks for a tenant.
    #[must_use]
    pub fn tenant_defaults(&self, tenant: &TenantScope) -> TenantDefaults {
        self.tenants
            .get(&tenant.institution_id)
            .map_or_else(|| self.default_tenant.clone(), |o| self.default_tenant.overlay(o))
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or names an unknown strategy.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `CURRICULA_CONFIG_PATH`, then the platform config dir, then
    /// `~/.config/curricula/config.toml`. Returns defaults if none is found.
    /// Environment overrides are applied last.
    #[must_use]
    pub fn load_default() -> Self {
        let mut config = Self::locate_config_file()
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    None
                },
            })
            .unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    fn locate_config_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let base_dirs = directories::BaseDirs::new()?;
        let platform_config = base_dirs.config_dir().join("curricula").join("config.toml");
        if platform_config.exists() {
            return Some(platform_config);
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("curricula")
            .join("config.toml");
        xdg_config.exists().then_some(xdg_config)
    }

    /// Applies `CURRICULA_*` environment overrides, ignoring malformed values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(STRATEGY_ENV) {
            match ResolutionStrategy::parse(&value) {
                Some(strategy) => self.default_strategy = strategy,
                None => tracing::warn!(value = %value, "Ignoring unknown {STRATEGY_ENV}"),
            }
        }
        if let Ok(value) = std::env::var(LOCK_TIMEOUT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.lock_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %value, "Ignoring malformed {LOCK_TIMEOUT_ENV}"),
            }
        }
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(strategy) = file.default_strategy {
            config.default_strategy = strategy.parse()?;
        }
        if let Some(ms) = file.lock_timeout_ms {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = file.session_timeout_secs {
            config.session_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(strict) = file.strict {
            config.strict_by_default = strict;
        }
        if let Some(path) = file.database_path {
            config.database_path = PathBuf::from(path);
        }
        if let Some(defaults) = file.defaults {
            config.default_tenant = defaults;
        }
        config.tenants = file.tenants;
        if let Some(logging) = file.logging {
            config.logging = logging;
        }

        Ok(config)
    }
}
