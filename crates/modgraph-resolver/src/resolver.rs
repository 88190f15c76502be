//! End-to-end resolution of a requirements document.

use std::collections::BTreeMap;
use std::sync::Arc;

use modgraph_core::config::{FailureMode, ResolveSettings, ResolverConfig};
use modgraph_core::module::{ArtifactIdentifier, ModuleIdentity};
use modgraph_core::requirements::Requirements;
use modgraph_util::errors::ModgraphError;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{ArtifactFetcher, ArtifactListing, ArtifactSelector, FileCollector, ResolvedFileSet};
use crate::builder::{DependencyGraphBuilder, RootComponent};
use crate::cache::{ArtifactCache, MetadataCache};
use crate::conflict::ConflictReport;
use crate::failure::FailureReport;
use crate::graph::ResolutionResult;
use crate::metadata::DependencyMetadata;
use crate::source::{ArtifactSource, MetadataSource, RepositoryChain};
use crate::substitution::SubstitutionRules;
use crate::version::Version;
use crate::visitor::{walk, ArtifactSetCollector, CompositeGraphVisitor, ResolutionResultBuilder};

/// Everything one resolution produced.
#[derive(Debug)]
pub struct Resolution {
    pub result: ResolutionResult,
    pub files: ResolvedFileSet,
    /// Artifacts in the graph; only filled when files are not fetched.
    pub artifacts: Vec<ArtifactIdentifier>,
    pub failures: FailureReport,
    pub conflicts: ConflictReport,
    pub selected: BTreeMap<ModuleIdentity, Version>,
    pub cancelled: bool,
}

impl Resolution {
    /// A resolution failed if anything was reported.
    pub fn is_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Apply the failure mode: strict turns any reported failure into an error.
    pub fn check(&self, mode: FailureMode) -> Result<(), ModgraphError> {
        if mode == FailureMode::Strict && self.is_failed() {
            return Err(ModgraphError::Resolution {
                message: format!("{} failure(s)\n{}", self.failures.len(), self.failures),
            });
        }
        Ok(())
    }
}

/// Resolves requirements against metadata and artifact sources.
pub struct Resolver {
    requirements: Requirements,
    settings: ResolveSettings,
    metadata_sources: Vec<Arc<dyn MetadataSource>>,
    artifact_sources: Vec<Arc<dyn ArtifactSource>>,
    metadata_cache: Arc<MetadataCache>,
    artifact_cache: Arc<ArtifactCache>,
    cancel: CancellationToken,
    fetch_files: bool,
}

impl Resolver {
    pub fn new(requirements: Requirements, config: &ResolverConfig) -> Self {
        Self {
            requirements,
            settings: config.resolve.clone(),
            metadata_sources: Vec::new(),
            artifact_sources: Vec::new(),
            metadata_cache: Arc::new(MetadataCache::new()),
            artifact_cache: Arc::new(ArtifactCache::new()),
            cancel: CancellationToken::new(),
            fetch_files: true,
        }
    }

    pub fn metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata_sources.push(source);
        self
    }

    pub fn artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.artifact_sources.push(source);
        self
    }

    /// Share metadata lookups with other runs.
    pub fn metadata_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.metadata_cache = cache;
        self
    }

    pub fn artifact_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.artifact_cache = cache;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// When false, artifacts are listed but no file is fetched.
    pub fn fetch_files(mut self, fetch: bool) -> Self {
        self.fetch_files = fetch;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The root component and its edges, root attributes merged into each
    /// edge unless the edge sets them itself.
    pub fn root_component(&self) -> Result<RootComponent, ModgraphError> {
        let id = self.requirements.root_component()?;
        let dependencies = self
            .requirements
            .requirements
            .iter()
            .map(|decl| {
                let mut dependency = DependencyMetadata::from_decl(decl)?;
                for (key, value) in &self.requirements.root.attributes {
                    dependency
                        .attributes
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                Ok(dependency)
            })
            .collect::<Result<Vec<_>, ModgraphError>>()?;
        Ok(RootComponent { id, dependencies })
    }

    pub async fn resolve(&self) -> Result<Resolution, ModgraphError> {
        let root = self.root_component()?;
        let substitutions = SubstitutionRules::from_decls(&self.requirements.substitutions)?;
        let chain = RepositoryChain::with_cache(self.metadata_sources.clone(), self.metadata_cache.clone());
        tracing::debug!("resolving {} against {}", root.id, chain.source_names().join(", "));

        let graph = DependencyGraphBuilder::from_settings(chain, &self.settings)
            .with_substitutions(substitutions)
            .with_cancellation(self.cancel.clone())
            .build(root)
            .await?;

        let fetcher = ArtifactFetcher::with_cache(
            self.artifact_sources.clone(),
            self.artifact_cache.clone(),
            self.settings.jobs,
        );
        let mut result_builder = ResolutionResultBuilder::new(graph.cancelled);
        let mut artifact_sets =
            ArtifactSetCollector::new(ArtifactSelector::new(fetcher), self.requirements.files.clone());
        walk(
            &graph,
            &mut CompositeGraphVisitor::new()
                .with(&mut result_builder)
                .with(&mut artifact_sets),
        );
        let result = result_builder.into_result();

        let mut failures = FailureReport::new();
        failures.extend(graph.failures);

        let set = artifact_sets.into_set();
        let (files, artifacts) = if self.fetch_files && !graph.cancelled {
            let mut collector = FileCollector::new();
            set.visit(&mut collector).await;
            let (files, artifact_failures) = collector.finish();
            failures.extend(artifact_failures);
            (files, Vec::new())
        } else {
            let mut listing = ArtifactListing::default();
            set.visit(&mut listing).await;
            (ResolvedFileSet::default(), listing.artifacts)
        };

        tracing::debug!(
            "resolved {} components, {} files, {} failures ({} descriptions cached)",
            result.len(),
            files.len(),
            failures.len(),
            self.metadata_cache.cached_components()
        );
        Ok(Resolution {
            result,
            files,
            artifacts,
            failures,
            conflicts: graph.conflicts,
            selected: graph.selected,
            cancelled: graph.cancelled,
        })
    }
}
