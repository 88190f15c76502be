//! Metadata and artifact sources, and the cached chain the resolver queries.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use modgraph_core::module::{ArtifactIdentifier, ModuleIdentity};
use modgraph_core::repository::RepositoryDocument;
use modgraph_util::errors::ModgraphError;
use thiserror::Error;
use tracing::debug;

use crate::cache::{ComponentLookup, MetadataCache, VersionListing};
use crate::metadata::ComponentMetadata;
use crate::selector::VersionSelector;

/// A source failed to answer; distinct from "not found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Supplies component metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    /// All published versions of a module; empty if the module is unknown.
    async fn list_versions(&self, module: &ModuleIdentity) -> Result<Vec<String>, SourceError>;

    /// Metadata for the best version the selector accepts, if any.
    async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> Result<Option<ComponentMetadata>, SourceError>;
}

/// Supplies artifact files.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Local path of the artifact, or `None` if this source doesn't have it.
    async fn fetch(&self, artifact: &ArtifactIdentifier) -> Result<Option<PathBuf>, SourceError>;
}

/// Ordered metadata sources behind a shared cache. The first source that
/// knows a module answers for it.
#[derive(Clone)]
pub struct RepositoryChain {
    sources: Arc<Vec<Arc<dyn MetadataSource>>>,
    cache: Arc<MetadataCache>,
}

impl RepositoryChain {
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>) -> Self {
        Self::with_cache(sources, Arc::new(MetadataCache::new()))
    }

    /// Use an existing cache, e.g. one shared with another run.
    pub fn with_cache(sources: Vec<Arc<dyn MetadataSource>>, cache: Arc<MetadataCache>) -> Self {
        Self {
            sources: Arc::new(sources),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn list_versions(&self, module: &ModuleIdentity) -> VersionListing {
        let sources = self.sources.clone();
        let key = module.clone();
        self.cache
            .versions
            .get_or_fetch_retaining(
                module.clone(),
                move || async move {
                    for source in sources.iter() {
                        debug!("listing versions of {key} from {}", source.name());
                        let versions = source.list_versions(&key).await?;
                        if !versions.is_empty() {
                            return Ok(Arc::new(versions));
                        }
                    }
                    Ok(Arc::new(Vec::new()))
                },
                |listing| listing.as_ref().is_ok_and(|v| !v.is_empty()),
            )
            .await
    }

    pub async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> ComponentLookup {
        let sources = self.sources.clone();
        let key = (module.clone(), selector.to_string());
        let (m, s) = (module.clone(), selector.clone());
        self.cache
            .components
            .get_or_fetch_retaining(
                key,
                move || async move {
                    for source in sources.iter() {
                        debug!("describing {m}:{s} from {}", source.name());
                        if let Some(metadata) = source.describe(&m, &s).await? {
                            return Ok(Some(Arc::new(metadata)));
                        }
                    }
                    Ok(None)
                },
                |lookup| matches!(lookup, Ok(Some(_))),
            )
            .await
    }
}

/// Metadata held in memory, typically loaded from a repository document.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    name: String,
    components: BTreeMap<ModuleIdentity, Vec<ComponentMetadata>>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: BTreeMap::new(),
        }
    }

    pub fn from_document(name: impl Into<String>, doc: &RepositoryDocument) -> Result<Self, ModgraphError> {
        let mut source = Self::new(name);
        for decl in &doc.components {
            source.add(ComponentMetadata::from_decl(decl)?);
        }
        Ok(source)
    }

    /// Add a component, replacing an earlier one with the same version.
    pub fn add(&mut self, metadata: ComponentMetadata) {
        let versions = self
            .components
            .entry(metadata.id.module.clone())
            .or_default();
        versions.retain(|m| m.id.version != metadata.id.version);
        versions.push(metadata);
    }

    pub fn with(mut self, metadata: ComponentMetadata) -> Self {
        self.add(metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.components.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[async_trait]
impl MetadataSource for InMemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_versions(&self, module: &ModuleIdentity) -> Result<Vec<String>, SourceError> {
        Ok(self
            .components
            .get(module)
            .map(|v| v.iter().map(|m| m.id.version.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> Result<Option<ComponentMetadata>, SourceError> {
        Ok(self.components.get(module).and_then(|versions| {
            versions
                .iter()
                .filter(|m| selector.accept_metadata(m))
                .max_by(|a, b| a.version.cmp(&b.version))
                .cloned()
        }))
    }
}

/// Artifacts stored on disk as `<root>/<group as path>/<name>/<version>/<file>`.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactSource {
    root: PathBuf,
}

impl DirectoryArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the files of one component.
    pub fn component_dir(&self, artifact: &ArtifactIdentifier) -> PathBuf {
        let module = &artifact.component.module;
        self.root
            .join(module.group.replace('.', "/"))
            .join(&module.name)
            .join(&artifact.component.version)
    }

    pub fn artifact_path(&self, artifact: &ArtifactIdentifier) -> PathBuf {
        self.component_dir(artifact).join(artifact.file_name())
    }
}

#[async_trait]
impl ArtifactSource for DirectoryArtifactSource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, artifact: &ArtifactIdentifier) -> Result<Option<PathBuf>, SourceError> {
        let path = self.artifact_path(artifact);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SourceError::new(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Status;
    use modgraph_core::module::{ArtifactName, ComponentId};

    fn component(s: &str) -> ComponentMetadata {
        ComponentMetadata::new(ComponentId::parse(s).unwrap())
    }

    fn source() -> InMemorySource {
        InMemorySource::new("test")
            .with(component("org:a:1.0"))
            .with(component("org:a:1.5").with_status(Status::Milestone))
            .with(component("org:a:1.10"))
    }

    #[tokio::test]
    async fn describe_picks_highest_accepted() {
        let src = source();
        let a = ModuleIdentity::new("org", "a");
        let pick = |n: &str| VersionSelector::parse(n).unwrap();
        let found = src.describe(&a, &pick("[1.0,2.0)")).await.unwrap().unwrap();
        assert_eq!(found.id.version, "1.10");
        let found = src.describe(&a, &pick("[1.0,1.6]")).await.unwrap().unwrap();
        assert_eq!(found.id.version, "1.5");
        let found = src.describe(&a, &pick("1.0")).await.unwrap().unwrap();
        assert_eq!(found.id.version, "1.0");
        assert!(src.describe(&a, &pick("3.0")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_caches_listings() {
        let src: Arc<dyn MetadataSource> = Arc::new(source());
        let chain = RepositoryChain::new(vec![src]);
        let a = ModuleIdentity::new("org", "a");
        let versions = chain.list_versions(&a).await.unwrap();
        assert_eq!(versions.len(), 3);
        chain.list_versions(&a).await.unwrap();
        assert_eq!(chain.cache().cached_listings(), 1);
        let missing = chain.list_versions(&ModuleIdentity::new("org", "zzz")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn directory_source_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = DirectoryArtifactSource::new(dir.path());
        let id = ArtifactIdentifier::new(
            ComponentId::parse("org.example:lib:1.0").unwrap(),
            ArtifactName::new("lib"),
        );
        assert!(src.fetch(&id).await.unwrap().is_none());

        let path = dir.path().join("org/example/lib/1.0/lib-1.0.jar");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"jar").unwrap();
        assert_eq!(src.fetch(&id).await.unwrap(), Some(path));
    }
}
