use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use modgraph_util::errors::ModgraphError;

/// Resolver configuration loaded from `~/.modgraph/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub resolve: ResolveSettings,
}

/// Settings from `[resolve]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveSettings {
    /// Size of the worker pool used for metadata and artifact fetches.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// How often one module may change its selected version before the
    /// graph is declared unstable.
    #[serde(default = "default_max_reselections", rename = "max-reselections")]
    pub max_reselections: u32,
    #[serde(default, rename = "failure-mode")]
    pub failure_mode: FailureMode,
    #[serde(default)]
    pub conflict: ConflictStrategy,
    #[serde(default = "default_allow_cycles", rename = "allow-cycles")]
    pub allow_cycles: bool,
    #[serde(default, rename = "dynamic-policy")]
    pub dynamic_policy: DynamicPolicyKind,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            max_reselections: default_max_reselections(),
            failure_mode: FailureMode::default(),
            conflict: ConflictStrategy::default(),
            allow_cycles: default_allow_cycles(),
            dynamic_policy: DynamicPolicyKind::default(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}

fn default_max_reselections() -> u32 {
    32
}

fn default_allow_cycles() -> bool {
    true
}

/// Whether a non-empty failure report is fatal for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Failures are reported; resolved files are still usable.
    #[default]
    Lenient,
    /// Any failure makes the resolution an error.
    Strict,
}

/// What to do when requests for one module disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Highest version wins.
    #[default]
    Latest,
    /// Any disagreement between version requests is a conflict.
    Fail,
}

/// Tie-break between dynamic selectors when no exact or forced request exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicPolicyKind {
    #[default]
    Highest,
    Lowest,
}

impl ResolverConfig {
    /// Load the configuration from `~/.modgraph/config.toml`, or return
    /// defaults if the file doesn't exist.
    pub fn load() -> miette::Result<Self> {
        let path = Self::default_path();
        if path.is_file() {
            Self::from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the configuration from an explicit file.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModgraphError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ModgraphError::Config {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;
        if config.resolve.jobs == 0 {
            return Err(ModgraphError::Config {
                message: "resolve.jobs must be at least 1".to_string(),
            }
            .into());
        }
        Ok(config)
    }

    /// Returns the default path to the config file.
    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

/// Returns the path to the modgraph data directory (`~/.modgraph/`).
pub fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".modgraph")
}
