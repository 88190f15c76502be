use serde::{Deserialize, Serialize};
use std::fmt;

/// A module independent of its version: `group:name`.
///
/// Used as the conflict-resolution key. Ordering is lexicographic on
/// `(group, name)`, which is what result enumeration sorts by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub group: String,
    pub name: String,
}

impl ModuleIdentity {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Parse `"group:name"`. Both parts must be non-empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (group, name) = s.split_once(':')?;
        if group.is_empty() || name.is_empty() || name.contains(':') {
            return None;
        }
        Some(Self::new(group, name))
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A concrete version of a module: `group:name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    pub module: ModuleIdentity,
    pub version: String,
}

impl ComponentId {
    pub fn new(module: ModuleIdentity, version: impl Into<String>) -> Self {
        Self {
            module,
            version: version.into(),
        }
    }

    /// Parse `"group:name:version"`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [group, name, version]
                if !group.is_empty() && !name.is_empty() && !version.is_empty() =>
            {
                Some(Self::new(ModuleIdentity::new(*group, *name), *version))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.version)
    }
}

/// Name, classifier and extension of an artifact, without its owner.
///
/// Declared as `name`, `name:classifier`, `name@ext` or `name:classifier@ext`.
/// The extension defaults to `jar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactName {
    pub name: String,
    pub classifier: Option<String>,
    pub extension: String,
}

impl ArtifactName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classifier: None,
            extension: "jar".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (rest, extension) = match s.rsplit_once('@') {
            Some((rest, ext)) if !ext.is_empty() => (rest, ext.to_string()),
            Some(_) => return None,
            None => (s, "jar".to_string()),
        };
        let (name, classifier) = match rest.split_once(':') {
            Some((name, c)) if !c.is_empty() && !c.contains(':') => (name, Some(c.to_string())),
            Some(_) => return None,
            None => (rest, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            classifier,
            extension,
        })
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(ref c) = self.classifier {
            write!(f, ":{c}")?;
        }
        write!(f, "@{}", self.extension)
    }
}

/// A concrete file belonging to a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactIdentifier {
    pub component: ComponentId,
    pub artifact: ArtifactName,
}

impl ArtifactIdentifier {
    pub fn new(component: ComponentId, artifact: ArtifactName) -> Self {
        Self {
            component,
            artifact,
        }
    }

    /// Conventional file name: `name-version[-classifier].ext`.
    pub fn file_name(&self) -> String {
        match self.artifact.classifier {
            Some(ref c) => format!(
                "{}-{}-{c}.{}",
                self.artifact.name, self.component.version, self.artifact.extension
            ),
            None => format!(
                "{}-{}.{}",
                self.artifact.name, self.component.version, self.artifact.extension
            ),
        }
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.file_name(), self.component)
    }
}
