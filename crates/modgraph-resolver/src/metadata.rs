//! Component metadata as returned by a [`MetadataSource`](crate::source::MetadataSource).

use std::collections::BTreeMap;
use std::fmt;

use modgraph_core::module::{ArtifactName, ComponentId, ModuleIdentity};
use modgraph_core::repository::{ComponentDecl, VariantDecl};
use modgraph_core::requirements::RequirementDecl;
use modgraph_util::errors::ModgraphError;

use crate::excludes::ExcludeSpec;
use crate::selector::VersionSelector;
use crate::version::Version;

/// Name of the variant synthesized for components that declare none.
pub const DEFAULT_VARIANT: &str = "default";

/// Publication status, ordered from least to most stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Integration,
    Milestone,
    Release,
}

impl Status {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integration" => Some(Self::Integration),
            "milestone" => Some(Self::Milestone),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integration => "integration",
            Self::Milestone => "milestone",
            Self::Release => "release",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub id: ComponentId,
    pub version: Version,
    pub status: Status,
    pub variants: Vec<VariantMetadata>,
}

/// A named, attribute-tagged slice of a component's dependencies and artifacts.
#[derive(Debug, Clone)]
pub struct VariantMetadata {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub dependencies: Vec<DependencyMetadata>,
    pub artifacts: Vec<ArtifactName>,
}

/// A dependency as declared by a component, compiled from its notation.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyMetadata {
    pub module: ModuleIdentity,
    pub selector: VersionSelector,
    pub rejection: Option<VersionSelector>,
    pub excludes: ExcludeSpec,
    pub forced: bool,
    pub transitive: bool,
    pub attributes: BTreeMap<String, String>,
    /// Explicit artifacts; empty means the selected variant's artifacts.
    pub artifacts: Vec<ArtifactName>,
}

impl DependencyMetadata {
    pub fn new(module: ModuleIdentity, selector: VersionSelector) -> Self {
        Self {
            module,
            selector,
            rejection: None,
            excludes: ExcludeSpec::Nothing,
            forced: false,
            transitive: true,
            attributes: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Compile a declared requirement. Malformed notations and patterns are
    /// rejected here, never during resolution.
    pub fn from_decl(decl: &RequirementDecl) -> Result<Self, ModgraphError> {
        let module = decl.module_identity()?;
        let selector = VersionSelector::parse(&decl.version)?;
        let rejection = if decl.reject.is_empty() {
            None
        } else {
            Some(VersionSelector::rejecting(&decl.reject)?)
        };
        let excludes = ExcludeSpec::from_decls(&decl.excludes)?;
        let artifacts = decl
            .artifacts
            .iter()
            .map(|a| {
                ArtifactName::parse(a).ok_or_else(|| ModgraphError::Manifest {
                    message: format!("'{a}' is not a valid artifact notation"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            module,
            selector,
            rejection,
            excludes,
            forced: decl.force,
            transitive: decl.transitive,
            attributes: decl.attributes.clone(),
            artifacts,
        })
    }

    pub fn with_excludes(mut self, excludes: ExcludeSpec) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn with_rejection(mut self, rejection: VersionSelector) -> Self {
        self.rejection = Some(rejection);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn non_transitive(mut self) -> Self {
        self.transitive = false;
        self
    }
}

impl fmt::Display for DependencyMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.selector)
    }
}

impl ComponentMetadata {
    /// Metadata with a single empty default variant and `release` status.
    pub fn new(id: ComponentId) -> Self {
        let version = Version::parse(&id.version);
        Self {
            id,
            version,
            status: Status::Release,
            variants: vec![VariantMetadata {
                name: DEFAULT_VARIANT.to_string(),
                attributes: BTreeMap::new(),
                dependencies: Vec::new(),
                artifacts: Vec::new(),
            }],
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Add a dependency to every variant.
    pub fn with_dependency(mut self, dependency: DependencyMetadata) -> Self {
        for variant in &mut self.variants {
            variant.dependencies.push(dependency.clone());
        }
        self
    }

    /// Add an artifact to every variant.
    pub fn with_artifact(mut self, artifact: ArtifactName) -> Self {
        for variant in &mut self.variants {
            variant.artifacts.push(artifact.clone());
        }
        self
    }

    /// Replace the variants.
    pub fn with_variants(mut self, variants: Vec<VariantMetadata>) -> Self {
        self.variants = variants;
        self
    }

    pub fn from_decl(decl: &ComponentDecl) -> Result<Self, ModgraphError> {
        let id = decl.component_id()?;
        let status = Status::parse(&decl.status).ok_or_else(|| ModgraphError::Manifest {
            message: format!("{id}: unknown status '{}'", decl.status),
        })?;
        let variants = if decl.variants.is_empty() {
            vec![variant_from_parts(
                DEFAULT_VARIANT,
                &BTreeMap::new(),
                &decl.dependencies,
                &decl.artifacts,
            )?]
        } else {
            decl.variants
                .iter()
                .map(|v: &VariantDecl| {
                    variant_from_parts(&v.name, &v.attributes, &v.dependencies, &v.artifacts)
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            version: Version::parse(&id.version),
            id,
            status,
            variants,
        })
    }

    /// Pick the variant for a set of requested attributes.
    ///
    /// A variant is compatible when every requested attribute it declares has
    /// the requested value. Among compatible variants the one matching the
    /// most requested attributes wins, then the first declared.
    pub fn select_variant(&self, requested: &BTreeMap<String, String>) -> Option<&VariantMetadata> {
        let mut best: Option<(&VariantMetadata, usize)> = None;
        for variant in &self.variants {
            let mut matched = 0;
            let mut compatible = true;
            for (key, value) in requested {
                match variant.attributes.get(key) {
                    Some(v) if v == value => matched += 1,
                    Some(_) => {
                        compatible = false;
                        break;
                    }
                    None => {}
                }
            }
            if compatible && best.map_or(true, |(_, m)| matched > m) {
                best = Some((variant, matched));
            }
        }
        best.map(|(v, _)| v)
    }

    pub fn variant(&self, name: &str) -> Option<&VariantMetadata> {
        self.variants.iter().find(|v| v.name == name)
    }
}

fn variant_from_parts(
    name: &str,
    attributes: &BTreeMap<String, String>,
    dependencies: &[RequirementDecl],
    artifacts: &[String],
) -> Result<VariantMetadata, ModgraphError> {
    Ok(VariantMetadata {
        name: name.to_string(),
        attributes: attributes.clone(),
        dependencies: dependencies
            .iter()
            .map(DependencyMetadata::from_decl)
            .collect::<Result<Vec<_>, _>>()?,
        artifacts: artifacts
            .iter()
            .map(|a| {
                ArtifactName::parse(a).ok_or_else(|| ModgraphError::Manifest {
                    message: format!("'{a}' is not a valid artifact notation"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    })
}
