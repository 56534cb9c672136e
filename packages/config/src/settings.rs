// ABOUTME: Typed settings loaded from CORRAL_* environment variables
// ABOUTME: Defaults for the definition root, runtime store, timeouts and sandbox labels

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::env;

pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ALLOCATE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SANDBOX_EXEC_PORT: u16 = 8080;
pub const DEFAULT_SANDBOX_STOP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_IMAGE_PULL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_LABEL_PREFIX: &str = "corral";
pub const DEFAULT_COMMIT_AUTHOR_NAME: &str = "Corral";
pub const DEFAULT_COMMIT_AUTHOR_EMAIL: &str = "corral@localhost";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("Could not determine home directory; set {0}")]
    NoHomeDirectory(&'static str),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend for ephemeral runtime values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStoreSetting {
    Memory,
    /// A `sqlite:` connection URL
    Sqlite(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorralSettings {
    pub definition_root: PathBuf,
    pub runtime_store: RuntimeStoreSetting,
    pub dispatch_timeout: Duration,
    pub allocate_timeout: Duration,
    pub sandbox_exec_port: u16,
    pub sandbox_stop_timeout: Duration,
    pub label_prefix: String,
    pub image_pull_timeout: Duration,
    pub commit_author_name: String,
    pub commit_author_email: String,
    pub tool_servers_path: Option<PathBuf>,
}

impl CorralSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let definition_root = match get(env::CORRAL_DEFINITION_ROOT) {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDirectory(env::CORRAL_DEFINITION_ROOT))?
                .join(".corral")
                .join("definitions"),
        };

        let runtime_store = match get(env::CORRAL_RUNTIME_STORE_URL) {
            None => RuntimeStoreSetting::Memory,
            Some(url) if url == "memory" => RuntimeStoreSetting::Memory,
            Some(url) if url.starts_with("sqlite:") => RuntimeStoreSetting::Sqlite(url),
            Some(url) => {
                return Err(ConfigError::Invalid {
                    var: env::CORRAL_RUNTIME_STORE_URL,
                    value: url,
                })
            }
        };

        let settings = Self {
            definition_root,
            runtime_store,
            dispatch_timeout: Duration::from_secs(parse_or(
                get(env::CORRAL_DISPATCH_TIMEOUT_SECS),
                env::CORRAL_DISPATCH_TIMEOUT_SECS,
                DEFAULT_DISPATCH_TIMEOUT_SECS,
            )?),
            allocate_timeout: Duration::from_secs(parse_or(
                get(env::CORRAL_ALLOCATE_TIMEOUT_SECS),
                env::CORRAL_ALLOCATE_TIMEOUT_SECS,
                DEFAULT_ALLOCATE_TIMEOUT_SECS,
            )?),
            sandbox_exec_port: parse_or(
                get(env::CORRAL_SANDBOX_EXEC_PORT),
                env::CORRAL_SANDBOX_EXEC_PORT,
                DEFAULT_SANDBOX_EXEC_PORT,
            )?,
            sandbox_stop_timeout: Duration::from_secs(parse_or(
                get(env::CORRAL_SANDBOX_STOP_TIMEOUT_SECS),
                env::CORRAL_SANDBOX_STOP_TIMEOUT_SECS,
                DEFAULT_SANDBOX_STOP_TIMEOUT_SECS,
            )?),
            label_prefix: get(env::CORRAL_LABEL_PREFIX)
                .unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
            image_pull_timeout: Duration::from_secs(parse_or(
                get(env::CORRAL_IMAGE_PULL_TIMEOUT_SECS),
                env::CORRAL_IMAGE_PULL_TIMEOUT_SECS,
                DEFAULT_IMAGE_PULL_TIMEOUT_SECS,
            )?),
            commit_author_name: get(env::CORRAL_COMMIT_AUTHOR_NAME)
                .unwrap_or_else(|| DEFAULT_COMMIT_AUTHOR_NAME.to_string()),
            commit_author_email: get(env::CORRAL_COMMIT_AUTHOR_EMAIL)
                .unwrap_or_else(|| DEFAULT_COMMIT_AUTHOR_EMAIL.to_string()),
            tool_servers_path: get(env::CORRAL_TOOL_SERVERS).map(PathBuf::from),
        };

        debug!(
            "Loaded settings: definition_root={}, runtime_store={:?}",
            settings.definition_root.display(),
            settings.runtime_store
        );

        Ok(settings)
    }

    /// Read the configured tool server list, or an empty list when none is configured
    pub fn load_tool_servers(&self) -> Result<Vec<Value>, ConfigError> {
        match &self.tool_servers_path {
            Some(path) => read_tool_servers(path),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Tool server files are either a JSON array or an object with a `servers` array
fn read_tool_servers(path: &Path) -> Result<Vec<Value>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    match parsed {
        Value::Array(servers) => Ok(servers),
        Value::Object(mut obj) => match obj.remove("servers") {
            Some(Value::Array(servers)) => Ok(servers),
            _ => Err(ConfigError::Invalid {
                var: env::CORRAL_TOOL_SERVERS,
                value: path.display().to_string(),
            }),
        },
        _ => Err(ConfigError::Invalid {
            var: env::CORRAL_TOOL_SERVERS,
            value: path.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings =
            CorralSettings::from_lookup(lookup(&[(env::CORRAL_DEFINITION_ROOT, "/tmp/defs")]))
                .unwrap();

        assert_eq!(settings.definition_root, PathBuf::from("/tmp/defs"));
        assert_eq!(settings.runtime_store, RuntimeStoreSetting::Memory);
        assert_eq!(settings.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(settings.allocate_timeout, Duration::from_secs(60));
        assert_eq!(settings.sandbox_exec_port, 8080);
        assert_eq!(settings.label_prefix, "corral");
        assert!(settings.tool_servers_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = CorralSettings::from_lookup(lookup(&[
            (env::CORRAL_DEFINITION_ROOT, "/srv/defs"),
            (env::CORRAL_RUNTIME_STORE_URL, "sqlite:/srv/runtime.db"),
            (env::CORRAL_DISPATCH_TIMEOUT_SECS, "5"),
            (env::CORRAL_SANDBOX_EXEC_PORT, "9000"),
            (env::CORRAL_LABEL_PREFIX, "acme"),
        ]))
        .unwrap();

        assert_eq!(
            settings.runtime_store,
            RuntimeStoreSetting::Sqlite("sqlite:/srv/runtime.db".to_string())
        );
        assert_eq!(settings.dispatch_timeout, Duration::from_secs(5));
        assert_eq!(settings.sandbox_exec_port, 9000);
        assert_eq!(settings.label_prefix, "acme");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = CorralSettings::from_lookup(lookup(&[
            (env::CORRAL_DEFINITION_ROOT, "/tmp/defs"),
            (env::CORRAL_DISPATCH_TIMEOUT_SECS, "soon"),
        ]))
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid { var, ref value } if var == env::CORRAL_DISPATCH_TIMEOUT_SECS && value == "soon"
        ));
    }

    #[test]
    fn test_unknown_store_url_is_rejected() {
        let result = CorralSettings::from_lookup(lookup(&[
            (env::CORRAL_DEFINITION_ROOT, "/tmp/defs"),
            (env::CORRAL_RUNTIME_STORE_URL, "redis://localhost"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_tool_servers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(
            &path,
            r#"{"servers": [{"name": "fs", "type": "stdio", "command": "fs-server"}]}"#,
        )
        .unwrap();

        let settings = CorralSettings::from_lookup(lookup(&[
            (env::CORRAL_DEFINITION_ROOT, "/tmp/defs"),
            (env::CORRAL_TOOL_SERVERS, path.to_str().unwrap()),
        ]))
        .unwrap();

        let servers = settings.load_tool_servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0]["name"], "fs");
    }
}
