use crate::error::ConfigError;
use crate::notifier::TELEGRAM_API_BASE;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;
const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DATABASE_PATH: &str = "pulsewatch.db";
const DEFAULT_SERVICES_PATH: &str = "services.json";

/// Gates when cycles run; never how they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub enabled: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            enabled: true,
        }
    }
}

/// Process settings, built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll: PollSettings,
    pub database_path: PathBuf,
    pub services_config_path: PathBuf,
    pub telegram_api_base: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let interval_ms = lookup("POLL_INTERVAL_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(MIN_POLL_INTERVAL_MS);

        let enabled = lookup("POLLING_ENABLED")
            .map(|raw| {
                let lowered = raw.trim().to_lowercase();
                !matches!(lowered.as_str(), "0" | "false" | "off" | "no")
            })
            .unwrap_or(true);

        Settings {
            poll: PollSettings {
                poll_interval: Duration::from_millis(interval_ms),
                enabled,
            },
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            services_config_path: lookup("SERVICES_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVICES_PATH)),
            telegram_api_base: lookup("TELEGRAM_API_BASE")
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
        }
    }
}

/// One entry of the services definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub expected_version: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    /// Names of the services this one relies on.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// The services definition file, read lazily and kept until reloaded.
#[derive(Debug)]
pub struct ServiceCatalog {
    path: PathBuf,
    cached: RwLock<Option<Arc<Vec<ServiceDefinition>>>>,
}

impl ServiceCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached definitions, reading the file on first use.
    pub fn get(&self) -> Result<Arc<Vec<ServiceDefinition>>, ConfigError> {
        if let Some(cached) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(cached));
        }
        self.reload()
    }

    /// Re-reads the file. The previous cache is kept if reading fails.
    pub fn reload(&self) -> Result<Arc<Vec<ServiceDefinition>>, ConfigError> {
        let loaded = Arc::new(read_definitions(&self.path)?);
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

fn read_definitions(path: &Path) -> Result<Vec<ServiceDefinition>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let settings = settings(&[]);
        assert_eq!(settings.poll, PollSettings::default());
        assert_eq!(settings.poll.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.database_path, PathBuf::from("pulsewatch.db"));
        assert_eq!(settings.telegram_api_base, "https://api.telegram.org");
    }

    #[test]
    fn interval_is_parsed_and_floored() {
        assert_eq!(
            settings(&[("POLL_INTERVAL_MS", "15000")]).poll.poll_interval,
            Duration::from_secs(15)
        );
        assert_eq!(
            settings(&[("POLL_INTERVAL_MS", "10")]).poll.poll_interval,
            Duration::from_secs(1)
        );
        assert_eq!(
            settings(&[("POLL_INTERVAL_MS", "soon")]).poll.poll_interval,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn polling_flag_accepts_common_falsy_values() {
        for raw in ["0", "false", "OFF", "no"] {
            assert!(!settings(&[("POLLING_ENABLED", raw)]).poll.enabled, "{raw}");
        }
        assert!(settings(&[("POLLING_ENABLED", "true")]).poll.enabled);
    }

    #[test]
    fn catalog_caches_until_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "API", "url": "https://api.example.com", "expectedVersion": "1.0.0"}}]"#
        )
        .unwrap();

        let catalog = ServiceCatalog::new(file.path());
        let first = catalog.get().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].expected_version.as_deref(), Some("1.0.0"));
        assert_eq!(first[0].environment, None);

        std::fs::write(
            file.path(),
            r#"[{"name": "API", "url": "https://api.example.com"},
                {"name": "Web", "url": "https://www.example.com", "environment": "prod"}]"#,
        )
        .unwrap();
        assert_eq!(catalog.get().unwrap().len(), 1);

        let reloaded = catalog.reload().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(catalog.get().unwrap().len(), 2);
        assert!(reloaded[1].depends_on.is_empty());
    }

    #[test]
    fn depends_on_lists_service_names() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{"name": "Web", "url": "https://www.example.com", "dependsOn": ["API", "Auth"]}]"#,
        )
        .unwrap();

        let definitions = ServiceCatalog::new(file.path()).get().unwrap();
        assert_eq!(definitions[0].depends_on, vec!["API", "Auth"]);
    }

    #[test]
    fn failed_reload_keeps_previous_definitions() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"[{"name": "API", "url": "https://api.example.com"}]"#)
            .unwrap();
        let catalog = ServiceCatalog::new(file.path());
        catalog.get().unwrap();

        std::fs::write(file.path(), "not json").unwrap();
        assert!(matches!(catalog.reload(), Err(ConfigError::Parse { .. })));
        assert_eq!(catalog.get().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let catalog = ServiceCatalog::new("/definitely/not/here/services.json");
        assert!(matches!(catalog.get(), Err(ConfigError::Read { .. })));
    }
}
