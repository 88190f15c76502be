//! Lazy artifact sets and the visitors that materialize them.
//!
//! Building an [`ArtifactSet`] never touches the filesystem or a source.
//! Files are only fetched when the set is visited by a visitor that
//! [requires them](ArtifactVisitor::requires_artifact_files).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexSet;
use modgraph_core::module::{ArtifactIdentifier, ArtifactName, ComponentId};
use modgraph_util::errors::ModgraphError;
use tokio::sync::Semaphore;

use crate::builder::GraphNode;
use crate::cache::ArtifactCache;
use crate::failure::{FailureReport, ResolutionFailure};
use crate::source::ArtifactSource;

/// Fetches artifact files from ordered sources, one fetch per artifact.
#[derive(Clone)]
pub struct ArtifactFetcher {
    sources: Arc<Vec<Arc<dyn ArtifactSource>>>,
    cache: Arc<ArtifactCache>,
    semaphore: Arc<Semaphore>,
}

impl ArtifactFetcher {
    pub fn new(sources: Vec<Arc<dyn ArtifactSource>>, jobs: usize) -> Self {
        Self::with_cache(sources, Arc::new(ArtifactCache::new()), jobs)
    }

    pub fn with_cache(sources: Vec<Arc<dyn ArtifactSource>>, cache: Arc<ArtifactCache>, jobs: usize) -> Self {
        Self {
            sources: Arc::new(sources),
            cache,
            semaphore: Arc::new(Semaphore::new(jobs.max(1))),
        }
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Local path of an artifact. Not-found and source errors are not cached.
    pub async fn fetch(&self, artifact: &ArtifactIdentifier) -> Result<PathBuf, String> {
        let sources = self.sources.clone();
        let semaphore = self.semaphore.clone();
        let id = artifact.clone();
        let result = self
            .cache
            .files
            .get_or_fetch_retaining(
                artifact.clone(),
                move || async move {
                    let _permit = semaphore.acquire_owned().await;
                    for source in sources.iter() {
                        tracing::debug!("fetching {id} from {}", source.name());
                        if let Some(path) = source.fetch(&id).await? {
                            return Ok(Some(path));
                        }
                    }
                    Ok(None)
                },
                |lookup| matches!(lookup, Ok(Some(_))),
            )
            .await;
        match result {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err("not found in any artifact source".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// One artifact of a resolved component. The file is fetched on demand.
#[derive(Clone)]
pub struct ResolvableArtifact {
    pub id: ArtifactIdentifier,
    /// Requester chain from the root, used when reporting a failed fetch.
    pub path: Vec<String>,
    fetcher: ArtifactFetcher,
}

impl ResolvableArtifact {
    pub async fn file(&self) -> Result<PathBuf, ResolutionFailure> {
        self.fetcher
            .fetch(&self.id)
            .await
            .map_err(|reason| ResolutionFailure::ArtifactFetchFailure {
                artifact: self.id.to_string(),
                path: self.path.clone(),
                reason,
            })
    }
}

/// Receives the contents of an [`ArtifactSet`].
pub trait ArtifactVisitor: Send {
    /// Whether visiting must materialize files. When false only
    /// [`visit_artifact`](Self::visit_artifact) is called.
    fn requires_artifact_files(&self) -> bool {
        true
    }

    fn visit_artifact(&mut self, _artifact: &ResolvableArtifact) {}

    fn visit_file(&mut self, artifact: Option<&ArtifactIdentifier>, file: &Path);

    fn visit_failure(&mut self, failure: ResolutionFailure);
}

/// A lazy, possibly nested collection of resolvable files.
#[derive(Clone, Default)]
pub enum ArtifactSet {
    #[default]
    Empty,
    /// Artifacts of one component, either its variant's or an explicit subset.
    Component {
        component: ComponentId,
        artifacts: Vec<ResolvableArtifact>,
    },
    /// Plain files declared by the root, outside any module.
    LocalFiles(Vec<PathBuf>),
    Composite(Vec<ArtifactSet>),
}

impl ArtifactSet {
    pub fn composite(sets: Vec<ArtifactSet>) -> Self {
        let sets: Vec<_> = sets.into_iter().filter(|s| !s.is_empty()).collect();
        match sets.len() {
            0 => Self::Empty,
            _ => Self::Composite(sets),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Component { artifacts, .. } => artifacts.is_empty(),
            Self::LocalFiles(files) => files.is_empty(),
            Self::Composite(sets) => sets.iter().all(ArtifactSet::is_empty),
        }
    }

    /// Leaf sets in visiting order.
    fn leaves(&self) -> Vec<&ArtifactSet> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(set) = stack.pop() {
            match set {
                Self::Composite(sets) => stack.extend(sets.iter().rev()),
                Self::Empty => {}
                leaf => out.push(leaf),
            }
        }
        out
    }

    /// Feed every file or failure to the visitor. Fetches run concurrently
    /// within a component but are reported in declaration order, and one
    /// failure never stops the others from being visited.
    pub async fn visit(&self, visitor: &mut dyn ArtifactVisitor) {
        let fetch = visitor.requires_artifact_files();
        for leaf in self.leaves() {
            match leaf {
                Self::Component { artifacts, .. } => {
                    if !fetch {
                        for artifact in artifacts {
                            visitor.visit_artifact(artifact);
                        }
                        continue;
                    }
                    let files = join_all(artifacts.iter().map(ResolvableArtifact::file)).await;
                    for (artifact, file) in artifacts.iter().zip(files) {
                        match file {
                            Ok(path) => visitor.visit_file(Some(&artifact.id), &path),
                            Err(failure) => visitor.visit_failure(failure),
                        }
                    }
                }
                Self::LocalFiles(files) => {
                    for file in files {
                        if !fetch {
                            continue;
                        }
                        match tokio::fs::metadata(file).await {
                            Ok(meta) if meta.is_file() => visitor.visit_file(None, file),
                            Ok(_) => visitor.visit_failure(local_failure(file, "not a regular file")),
                            Err(e) => visitor.visit_failure(local_failure(file, &e.to_string())),
                        }
                    }
                }
                Self::Empty | Self::Composite(_) => {}
            }
        }
    }
}

fn local_failure(file: &Path, reason: &str) -> ResolutionFailure {
    ResolutionFailure::ArtifactFetchFailure {
        artifact: file.display().to_string(),
        path: Vec::new(),
        reason: reason.to_string(),
    }
}

/// Builds artifact sets for resolved nodes.
#[derive(Clone)]
pub struct ArtifactSelector {
    fetcher: ArtifactFetcher,
}

impl ArtifactSelector {
    pub fn new(fetcher: ArtifactFetcher) -> Self {
        Self { fetcher }
    }

    /// The selected variant's artifacts, minus those the node's exclusions
    /// remove.
    pub fn resolve_component(&self, node: &GraphNode) -> ArtifactSet {
        let declared = node
            .metadata
            .variant(&node.variant)
            .map(|v| v.artifacts.as_slice())
            .unwrap_or_default();
        self.resolve_explicit(node, declared)
    }

    /// An explicit subset of a component's artifacts. Exclusions still apply.
    pub fn resolve_explicit(&self, node: &GraphNode, artifacts: &[ArtifactName]) -> ArtifactSet {
        let mut path: Vec<String> = node.path.iter().map(ToString::to_string).collect();
        path.push(node.component.to_string());
        let artifacts = artifacts
            .iter()
            .filter(|a| {
                let excluded = node.exclusions.excludes_artifact(&node.component.module, a);
                if excluded {
                    tracing::debug!("{}: excluded artifact {a}", node.component);
                }
                !excluded
            })
            .map(|a| ResolvableArtifact {
                id: ArtifactIdentifier::new(node.component.clone(), a.clone()),
                path: path.clone(),
                fetcher: self.fetcher.clone(),
            })
            .collect();
        ArtifactSet::Component {
            component: node.component.clone(),
            artifacts,
        }
    }

    pub fn resolve_local_files(&self, files: &[PathBuf]) -> ArtifactSet {
        ArtifactSet::LocalFiles(files.to_vec())
    }
}

/// Ordered, duplicate-free file paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFileSet {
    files: IndexSet<PathBuf>,
}

impl ResolvedFileSet {
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_vec(self) -> Vec<PathBuf> {
        self.files.into_iter().collect()
    }
}

/// Collects files and failures; nothing is raised until [`rethrow`](Self::rethrow).
#[derive(Debug, Default)]
pub struct FileCollector {
    files: ResolvedFileSet,
    failures: FailureReport,
}

impl FileCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &ResolvedFileSet {
        &self.files
    }

    pub fn failures(&self) -> &FailureReport {
        &self.failures
    }

    /// Fail if any artifact could not be fetched.
    pub fn rethrow(&self) -> Result<(), ModgraphError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(ModgraphError::Resolution {
            message: format!(
                "{} artifact(s) could not be fetched:\n{}",
                self.failures.len(),
                self.failures
            ),
        })
    }

    pub fn finish(self) -> (ResolvedFileSet, FailureReport) {
        (self.files, self.failures)
    }
}

impl ArtifactVisitor for FileCollector {
    fn visit_file(&mut self, _artifact: Option<&ArtifactIdentifier>, file: &Path) {
        self.files.files.insert(file.to_path_buf());
    }

    fn visit_failure(&mut self, failure: ResolutionFailure) {
        self.failures.push(failure);
    }
}

/// Lists artifact identifiers without fetching anything.
#[derive(Debug, Default)]
pub struct ArtifactListing {
    pub artifacts: Vec<ArtifactIdentifier>,
}

impl ArtifactVisitor for ArtifactListing {
    fn requires_artifact_files(&self) -> bool {
        false
    }

    fn visit_artifact(&mut self, artifact: &ResolvableArtifact) {
        self.artifacts.push(artifact.id.clone());
    }

    fn visit_file(&mut self, _artifact: Option<&ArtifactIdentifier>, _file: &Path) {}

    fn visit_failure(&mut self, _failure: ResolutionFailure) {}
}
