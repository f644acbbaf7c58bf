//! Configuration for taskforge.
//!
//! Settings come from four layers, highest first:
//!
//! 1. CLI flags
//! 2. Environment (`TASKFORGE_PLANNING_DIR`, `TASKFORGE_TARGET_DIR`,
//!    `TASKFORGE_SCHEMA_DIR`, `TASKFORGE_LOG_LEVEL`)
//! 3. `<planning_dir>/taskforge.toml`
//! 4. Built-in defaults
//!
//! Resolution happens once, at the binary boundary. Components receive a
//! resolved [`Config`] or plain paths and never read the environment.
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! target_dir = "../app"
//! schema_dir = "../schemas"
//!
//! [bundle]
//! max_workers = 8
//!
//! [gates]
//! coverage_threshold = 0.9
//! leakage_phase = 1
//!
//! [state]
//! lock_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaskforgeError};

pub const CONFIG_FILE: &str = "taskforge.toml";
pub const DEFAULT_PLANNING_DIR: &str = "project-planning";
pub const DEFAULT_SCHEMA_DIR: &str = "schemas";

pub const ENV_PLANNING_DIR: &str = "TASKFORGE_PLANNING_DIR";
pub const ENV_TARGET_DIR: &str = "TASKFORGE_TARGET_DIR";
pub const ENV_SCHEMA_DIR: &str = "TASKFORGE_SCHEMA_DIR";
pub const ENV_LOG_LEVEL: &str = "TASKFORGE_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default)]
    pub target_dir: Option<String>,
    #[serde(default)]
    pub schema_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSection {
    /// Upper bound on concurrent bundle generation
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    8
}

impl Default for BundleSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    /// Implementation phase checked for leakage
    #[serde(default = "default_leakage_phase")]
    pub leakage_phase: u32,
}

fn default_coverage_threshold() -> f64 {
    crate::gates::DEFAULT_COVERAGE_THRESHOLD
}

fn default_leakage_phase() -> u32 {
    1
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            coverage_threshold: default_coverage_threshold(),
            leakage_phase: default_leakage_phase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    10
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Contents of `taskforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskforgeToml {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub bundle: BundleSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskforgeToml {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TaskforgeError::ConfigInvalid {
            key: CONFIG_FILE.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TaskforgeError::io(path, e))?;
        Self::parse(&content)
    }

    /// Default configuration when the file does not exist.
    pub fn load_or_default(planning_dir: &Path) -> Result<Self> {
        let path = planning_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write as pretty TOML. Refuses to overwrite an existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(TaskforgeError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let content = toml::to_string_pretty(self).map_err(|e| TaskforgeError::ConfigInvalid {
            key: CONFIG_FILE.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TaskforgeError::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| TaskforgeError::io(path, e))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.bundle.max_workers == 0 {
            warnings.push("bundle.max_workers is 0; one worker will be used".to_string());
        }
        if !(0.0..=1.0).contains(&self.gates.coverage_threshold) {
            warnings.push(format!(
                "gates.coverage_threshold {} is outside [0, 1]",
                self.gates.coverage_threshold
            ));
        }
        if self.state.lock_timeout_secs == 0 {
            warnings.push("state.lock_timeout_secs is 0; lock waits fail immediately".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }
        warnings
    }
}

/// Values given on the command line. `None` defers to lower layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub planning_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub schema_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub planning_dir: PathBuf,
    pub target_dir: Option<PathBuf>,
    pub schema_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_workers: usize,
    pub coverage_threshold: f64,
    pub leakage_phase: u32,
    lock_timeout_secs: u64,
    toml: TaskforgeToml,
}

impl Config {
    /// Resolve from the process environment, loading `.env` first.
    pub fn from_env(cli: CliOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve(cli: CliOverrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let planning_dir = cli
            .planning_dir
            .or_else(|| lookup(ENV_PLANNING_DIR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLANNING_DIR));
        let toml = TaskforgeToml::load_or_default(&planning_dir)?;

        let target_dir = cli
            .target_dir
            .or_else(|| lookup(ENV_TARGET_DIR).map(PathBuf::from))
            .or_else(|| toml.paths.target_dir.as_ref().map(PathBuf::from));
        let schema_dir = cli
            .schema_dir
            .or_else(|| lookup(ENV_SCHEMA_DIR).map(PathBuf::from))
            .or_else(|| toml.paths.schema_dir.as_ref().map(PathBuf::from))
            .or_else(|| discover_schema_dir(&planning_dir));

        let log_level = if cli.verbose {
            "debug".to_string()
        } else {
            lookup(ENV_LOG_LEVEL).unwrap_or_else(|| toml.logging.level.clone())
        };

        Ok(Self {
            planning_dir,
            target_dir,
            schema_dir,
            log_level,
            log_format: toml.logging.format,
            max_workers: toml.bundle.max_workers,
            coverage_threshold: toml.gates.coverage_threshold,
            leakage_phase: toml.gates.leakage_phase,
            lock_timeout_secs: toml.state.lock_timeout_secs,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.planning_dir.join(CONFIG_FILE)
    }

    /// The file layer as loaded, or defaults when there is no file.
    pub fn file(&self) -> &TaskforgeToml {
        &self.toml
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Target directory, required by `init`.
    pub fn require_target_dir(&self) -> Result<&Path> {
        self.target_dir
            .as_deref()
            .ok_or_else(|| TaskforgeError::ConfigMissing {
                key: "target_dir".to_string(),
            })
    }

    pub fn require_schema_dir(&self) -> Result<&Path> {
        self.schema_dir
            .as_deref()
            .ok_or_else(|| TaskforgeError::ConfigMissing {
                key: "schema_dir".to_string(),
            })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// A `schemas/` directory beside the planning directory.
fn discover_schema_dir(planning_dir: &Path) -> Option<PathBuf> {
    let parent = planning_dir.parent().filter(|p| !p.as_os_str().is_empty())?;
    let candidate = parent.join(DEFAULT_SCHEMA_DIR);
    candidate.is_dir().then_some(candidate)
}
