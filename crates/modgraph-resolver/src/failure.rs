//! Structured resolution failures, collected rather than thrown.

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// One problem found during resolution. `path` lists the components from
/// the root down to the requester, as `group:name:version`.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum ResolutionFailure {
    #[error("Could not resolve {module}:{selector}: {reason}")]
    UnresolvedDependency {
        module: String,
        selector: String,
        path: Vec<String>,
        reason: String,
    },

    #[error("Version conflict for {module}: {reason}")]
    VersionConflict {
        module: String,
        requesters: Vec<String>,
        reason: String,
    },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    #[error("Could not fetch {artifact}: {reason}")]
    ArtifactFetchFailure {
        artifact: String,
        path: Vec<String>,
        reason: String,
    },
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(" -> ")
    }
}

impl ResolutionFailure {
    /// Short category name used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedDependency { .. } => "unresolved",
            Self::VersionConflict { .. } => "conflict",
            Self::CyclicReference { .. } => "cycle",
            Self::ArtifactFetchFailure { .. } => "artifact",
        }
    }

    /// The module or artifact the failure is about.
    pub fn subject(&self) -> String {
        match self {
            Self::UnresolvedDependency { module, .. } | Self::VersionConflict { module, .. } => {
                module.clone()
            }
            Self::CyclicReference { path } => path.first().cloned().unwrap_or_default(),
            Self::ArtifactFetchFailure { artifact, .. } => artifact.clone(),
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            Self::UnresolvedDependency { path, .. }
            | Self::CyclicReference { path }
            | Self::ArtifactFetchFailure { path, .. } => path,
            Self::VersionConflict { requesters, .. } => requesters,
        }
    }
}

/// All failures of one resolution, in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureReport {
    failures: Vec<ResolutionFailure>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: ResolutionFailure) {
        if !self.failures.contains(&failure) {
            self.failures.push(failure);
        }
    }

    pub fn extend(&mut self, failures: impl IntoIterator<Item = ResolutionFailure>) {
        for f in failures {
            self.push(f);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionFailure> {
        self.failures.iter()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.failures.iter().filter(|f| f.kind() == kind).count()
    }
}

impl IntoIterator for FailureReport {
    type Item = ResolutionFailure;
    type IntoIter = std::vec::IntoIter<ResolutionFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "No resolution failures.");
        }
        writeln!(f, "Resolution failures ({}):", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
            match failure {
                ResolutionFailure::VersionConflict { requesters, .. } => {
                    for r in requesters {
                        writeln!(f, "    requested by {r}")?;
                    }
                }
                ResolutionFailure::CyclicReference { .. } => {}
                other if !other.path().is_empty() => {
                    writeln!(f, "    via {}", render_path(other.path()))?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
