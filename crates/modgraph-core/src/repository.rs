//! Repository fixture document: a TOML description of available components,
//! used to feed an in-memory metadata source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use modgraph_util::errors::ModgraphError;

use crate::module::{ComponentId, ModuleIdentity};
use crate::requirements::RequirementDecl;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryDocument {
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentDecl>,
}

/// One published version of a module.
///
/// Components without `[[component.variant]]` tables expose a single
/// `default` variant built from `dependencies` and `artifacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub module: String,
    pub version: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<RequirementDecl>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, rename = "variant")]
    pub variants: Vec<VariantDecl>,
}

fn default_status() -> String {
    "release".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<RequirementDecl>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ComponentDecl {
    pub fn component_id(&self) -> Result<ComponentId, ModgraphError> {
        let module = ModuleIdentity::parse(&self.module).ok_or_else(|| ModgraphError::Manifest {
            message: format!("'{}' is not a group:name module identifier", self.module),
        })?;
        Ok(ComponentId::new(module, self.version.clone()))
    }
}

impl RepositoryDocument {
    /// Load and parse a repository document from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ModgraphError::Manifest {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Ok(Self::parse_toml(&content)?)
    }

    pub fn parse_toml(content: &str) -> Result<Self, ModgraphError> {
        let doc: RepositoryDocument =
            toml::from_str(content).map_err(|e| ModgraphError::Manifest {
                message: format!("Failed to parse repository document: {e}"),
            })?;
        for component in &doc.components {
            component.component_id()?;
        }
        Ok(doc)
    }
}
