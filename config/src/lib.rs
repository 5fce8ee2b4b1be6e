//! Settings file for polyglot.
//!
//! Loaded from `$POLYGLOT_CONFIG`, else `~/.polyglot/config.toml`. A missing
//! file means defaults. String values may reference environment variables
//! as `${VAR}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use polyglot_adapters::{CommandAdapter, CommandServerConfig, QmlAdapter, QmlSettings};
use polyglot_lsp::{CapabilityPolicy, ClientOptions, LanguageAdapter};
use serde::Deserialize;
use thiserror::Error;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "POLYGLOT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no language server configured for '{name}' (known: {known})")]
    UnknownLanguage { name: String, known: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::UnknownLanguage { .. } => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolyglotConfig {
    pub client: ClientConfig,
    pub languages: LanguagesConfig,
    /// Generic command-launched servers, keyed by language name.
    pub servers: BTreeMap<String, CommandServerConfig>,
}

/// `[client]`: timeouts and handshake policy. Unset fields keep the
/// [`ClientOptions`] defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub request_timeout_secs: Option<u64>,
    pub initialize_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub capability_policy: Option<CapabilityPolicy>,
    pub cancel_on_timeout: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub qml: QmlSettings,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_value(v)),
        _ => {}
    }
}

impl PolyglotConfig {
    /// Parse TOML text, expanding `${VAR}` references in string values.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut value = toml::Value::Table(toml::from_str::<toml::Table>(content)?);
        expand_value(&mut value);
        value.try_into()
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Load from the default location (see [`config_path`]).
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        let defaults = ClientOptions::default();
        let client = &self.client;
        ClientOptions {
            request_timeout: client
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            initialize_timeout: client
                .initialize_timeout_secs
                .map_or(defaults.initialize_timeout, Duration::from_secs),
            shutdown_timeout: client
                .shutdown_timeout_secs
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
            capability_policy: client
                .capability_policy
                .unwrap_or(defaults.capability_policy),
            cancel_on_timeout: client
                .cancel_on_timeout
                .unwrap_or(defaults.cancel_on_timeout),
        }
    }

    /// Names accepted by [`PolyglotConfig::adapter`].
    #[must_use]
    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once("qml".to_string())
            .chain(self.servers.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Resolve a language name to its adapter.
    ///
    /// A `[servers.<name>]` entry takes precedence over a built-in adapter of
    /// the same name.
    pub fn adapter(&self, name: &str) -> Result<Arc<dyn LanguageAdapter>, ConfigError> {
        if let Some(server) = self.servers.get(name) {
            return Ok(Arc::new(CommandAdapter::new(name, server.clone())));
        }
        match name {
            "qml" => Ok(Arc::new(QmlAdapter::new(self.languages.qml.clone()))),
            _ => Err(ConfigError::UnknownLanguage {
                name: name.to_string(),
                known: self.languages().join(", "),
            }),
        }
    }
}

/// `$POLYGLOT_CONFIG` if set, else `~/.polyglot/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".polyglot").join("config.toml"))
}
