use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use modgraph_util::errors::ModgraphError;

use crate::module::{ComponentId, ModuleIdentity};

/// The parsed representation of a declared-requirements document.
///
/// ```toml
/// [root]
/// module = "com.example:app"
/// version = "1.0"
///
/// [[requirement]]
/// module = "org.a:lib"
/// version = "[1.0,2.0)"
///
/// [[requirement.exclude]]
/// group = "org.b"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirements {
    pub root: RootDecl,

    #[serde(default, rename = "requirement")]
    pub requirements: Vec<RequirementDecl>,

    /// Local (non-module) file dependencies of the root.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default, rename = "substitution")]
    pub substitutions: Vec<SubstitutionDecl>,
}

/// The component being resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootDecl {
    pub module: String,
    #[serde(default = "default_root_version")]
    pub version: String,
    /// Attributes requested on every root edge unless the edge overrides them.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn default_root_version() -> String {
    "unspecified".to_string()
}

/// One declared dependency: `(module, notation, excludes, forced?, attributes)`.
///
/// Also used for the dependencies listed by components in a repository
/// document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementDecl {
    pub module: String,
    pub version: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_transitive")]
    pub transitive: bool,
    /// Version notations that must never be selected.
    #[serde(default)]
    pub reject: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, rename = "exclude")]
    pub excludes: Vec<ExcludeDecl>,
    /// Explicit artifacts (`name[:classifier][@ext]`); empty means the
    /// artifacts of the selected variant.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

fn default_transitive() -> bool {
    true
}

impl RequirementDecl {
    pub fn new(module: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            transitive: true,
            ..Default::default()
        }
    }

    pub fn module_identity(&self) -> Result<ModuleIdentity, ModgraphError> {
        ModuleIdentity::parse(&self.module).ok_or_else(|| ModgraphError::Manifest {
            message: format!("'{}' is not a group:name module identifier", self.module),
        })
    }
}

/// An exclude rule as declared. Absent parts match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeDecl {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub artifact: Option<String>,
    /// Restricts the rule to target modules in this set (`group:name`).
    #[serde(default)]
    pub within: Vec<String>,
}

/// A substitution rule, consulted before default conflict resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubstitutionDecl {
    /// Module pattern, `group:name` with `*` wildcards.
    pub module: String,
    #[serde(default)]
    pub within: Vec<String>,
    #[serde(default, rename = "use-module")]
    pub use_module: Option<String>,
    #[serde(default, rename = "use-version")]
    pub use_version: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Requirements {
    /// Load and parse a requirements document from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModgraphError::Manifest {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Ok(Self::parse_toml(&content)?)
    }

    pub fn parse_toml(content: &str) -> Result<Self, ModgraphError> {
        let reqs: Requirements = toml::from_str(content).map_err(|e| ModgraphError::Manifest {
            message: format!("Failed to parse requirements: {e}"),
        })?;
        reqs.root_component()?;
        for req in &reqs.requirements {
            req.module_identity()?;
        }
        Ok(reqs)
    }

    /// Identity of the component being resolved.
    pub fn root_component(&self) -> Result<ComponentId, ModgraphError> {
        let module = ModuleIdentity::parse(&self.root.module).ok_or_else(|| {
            ModgraphError::Manifest {
                message: format!("root '{}' is not a group:name identifier", self.root.module),
            }
        })?;
        Ok(ComponentId::new(module, self.root.version.clone()))
    }
}
