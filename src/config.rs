//! Job configuration lookup.
//!
//! The scheduler reads flat `key -> string` values through [`ConfigSource`]
//! so the backing store (TOML file here, a settings table in the full
//! application) stays swappable. Every scheduler (re)build re-reads the
//! source; nothing is cached across rebuilds. A missing key or an erroring
//! source falls back to the documented default with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{GarageLogError, Result};

/// Global kill-switch for all scheduled jobs.
pub const KEY_JOBS_ENABLED: &str = "jobs.enabled";

/// Key for a job's enable flag.
pub fn job_enabled_key(job: &str) -> String {
    format!("jobs.{job}.enabled")
}

/// Key for a job's cron schedule expression.
pub fn job_schedule_key(job: &str) -> String {
    format!("jobs.{job}.schedule")
}

/// Key -> string configuration lookup.
pub trait ConfigSource: Send + Sync {
    /// Look up a value; `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Resolved `{enabled, schedule}` pair for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub enabled: bool,
    pub schedule: String,
}

/// Read the global kill-switch; defaults to enabled.
pub fn global_jobs_enabled(source: &dyn ConfigSource) -> bool {
    read_bool(source, KEY_JOBS_ENABLED, true)
}

/// Read one job's settings, falling back to `default_schedule` and enabled.
pub fn job_settings(source: &dyn ConfigSource, job: &str, default_schedule: &str) -> JobSettings {
    let enabled = read_bool(source, &job_enabled_key(job), true);
    let schedule = match source.get(&job_schedule_key(job)) {
        Ok(Some(value)) => value,
        Ok(None) => default_schedule.to_owned(),
        Err(e) => {
            warn!(job, "config source error reading schedule, using default: {e}");
            default_schedule.to_owned()
        }
    };
    JobSettings { enabled, schedule }
}

fn read_bool(source: &dyn ConfigSource, key: &str, default: bool) -> bool {
    match source.get(key) {
        Ok(Some(value)) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            other => {
                warn!(key, value = other, "unrecognized boolean in config, using default");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!(key, "config source error, using default: {e}");
            default
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Fixed in-memory source, used by tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    values: HashMap<String, String>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for StaticConfig {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }
}

/// TOML-file-backed source.
///
/// Nested tables flatten into dotted keys, so
///
/// ```toml
/// [jobs.reminder_trigger]
/// enabled = true
/// schedule = "0 * * * *"
/// ```
///
/// is read as `jobs.reminder_trigger.enabled` / `.schedule`. Scalars are
/// stringified; arrays and datetimes are skipped.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    values: HashMap<String, String>,
}

impl FileConfig {
    /// Load and flatten a TOML file. A missing file yields an empty source
    /// (all lookups fall back to defaults).
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let root: toml::Value = text
            .parse()
            .map_err(|e| GarageLogError::Config(format!("cannot parse {}: {e}", path.display())))?;

        let mut values = HashMap::new();
        flatten("", &root, &mut values);
        Ok(Self { values })
    }

    /// Default config file location for the daemon.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("garagelog").join("config.toml"))
    }
}

impl ConfigSource for FileConfig {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_owned(), s.clone());
        }
        toml::Value::Integer(i) => {
            out.insert(prefix.to_owned(), i.to_string());
        }
        toml::Value::Float(f) => {
            out.insert(prefix.to_owned(), f.to_string());
        }
        toml::Value::Boolean(b) => {
            out.insert(prefix.to_owned(), b.to_string());
        }
        toml::Value::Array(_) | toml::Value::Datetime(_) => {}
    }
}
