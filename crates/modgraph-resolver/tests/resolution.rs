use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use modgraph_core::config::{FailureMode, ResolverConfig};
use modgraph_core::module::{ArtifactName, ComponentId, ModuleIdentity};
use modgraph_core::requirements::Requirements;
use modgraph_resolver::cache::MetadataCache;
use modgraph_resolver::excludes::{ExcludeRule, ExcludeSpec, Pattern};
use modgraph_resolver::failure::ResolutionFailure;
use modgraph_resolver::metadata::{ComponentMetadata, DependencyMetadata, Status, VariantMetadata};
use modgraph_resolver::resolver::{Resolution, Resolver};
use modgraph_resolver::selector::VersionSelector;
use modgraph_resolver::source::{
    ArtifactSource, DirectoryArtifactSource, InMemorySource, MetadataSource, SourceError,
};
use tokio_util::sync::CancellationToken;

fn component(id: &str) -> ComponentMetadata {
    ComponentMetadata::new(ComponentId::parse(id).unwrap())
}

fn dep(module: &str, version: &str) -> DependencyMetadata {
    DependencyMetadata::new(
        ModuleIdentity::parse(module).unwrap(),
        VersionSelector::parse(version).unwrap(),
    )
}

fn module(s: &str) -> ModuleIdentity {
    ModuleIdentity::parse(s).unwrap()
}

fn requirements(body: &str) -> Requirements {
    Requirements::parse_toml(&format!(
        "[root]\nmodule = \"com.example:app\"\nversion = \"1.0\"\n\n{body}"
    ))
    .unwrap()
}

async fn resolve(reqs: Requirements, source: InMemorySource) -> Resolution {
    resolve_with(reqs, source, ResolverConfig::default()).await
}

async fn resolve_with(reqs: Requirements, source: InMemorySource, config: ResolverConfig) -> Resolution {
    Resolver::new(reqs, &config)
        .metadata_source(Arc::new(source))
        .fetch_files(false)
        .resolve()
        .await
        .unwrap()
}

fn version_of(resolution: &Resolution, m: &str) -> Option<String> {
    resolution.result.version_of(&module(m)).map(str::to_string)
}

#[tokio::test]
async fn range_with_excluded_transitive() {
    let repo = InMemorySource::new("repo")
        .with(component("org.a:a:1.5"))
        .with(component("org.a:a:1.9").with_dependency(dep("org.b:b", "3.0")))
        .with(component("org.b:b:3.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.a:a"
version = "[1.0,2.0)"

[[requirement.exclude]]
group = "org.b"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.a:a").as_deref(), Some("1.9"));
    assert!(!resolution.result.contains(&module("org.b:b")));
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn highest_exact_version_wins() {
    let repo = InMemorySource::new("repo")
        .with(component("org.x:x:1.0").with_dependency(dep("org.m:m", "2.0")))
        .with(component("org.m:m:1.0").with_dependency(dep("org.old:only-in-1", "1.0")))
        .with(component("org.m:m:2.0"))
        .with(component("org.old:only-in-1:1.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.m:m"
version = "1.0"

[[requirement]]
module = "org.x:x"
version = "1.0"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.m:m").as_deref(), Some("2.0"));
    assert!(resolution
        .result
        .components()
        .iter()
        .all(|c| c.id.to_string() != "org.m:m:1.0"));
    // Only reachable through the evicted 1.0 node.
    assert!(!resolution.result.contains(&module("org.old:only-in-1")));
    assert_eq!(resolution.conflicts.len(), 1);
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn forced_version_beats_higher_request() {
    let repo = InMemorySource::new("repo")
        .with(component("org.x:x:1.0").with_dependency(dep("org.m:m", "2.0")))
        .with(component("org.m:m:1.0"))
        .with(component("org.m:m:2.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.m:m"
version = "1.0"
force = true

[[requirement]]
module = "org.x:x"
version = "1.0"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.m:m").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn contradicting_top_level_versions_conflict() {
    let repo = InMemorySource::new("repo")
        .with(component("org.m:m:1.0"))
        .with(component("org.m:m:2.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.m:m"
version = "1.0"

[[requirement]]
module = "org.m:m"
version = "2.0"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert!(!resolution.selected.contains_key(&module("org.m:m")));
    assert!(!resolution.result.contains(&module("org.m:m")));
    let conflicts: Vec<_> = resolution
        .failures
        .iter()
        .filter(|f| f.kind() == "conflict")
        .collect();
    assert_eq!(conflicts.len(), 1);
    let ResolutionFailure::VersionConflict { requesters, .. } = conflicts[0] else {
        panic!("expected a version conflict");
    };
    assert_eq!(
        requesters,
        &["com.example:app:1.0 (1.0)", "com.example:app:1.0 (2.0)"]
    );
    assert!(resolution.check(FailureMode::Strict).is_err());
    assert!(resolution.check(FailureMode::Lenient).is_ok());
}

#[tokio::test]
async fn exclusion_on_one_path_keeps_module() {
    let repo = InMemorySource::new("repo")
        .with(component("org.p:p:1.0").with_dependency(dep("org.t:t", "1.0")))
        .with(component("org.q:q:1.0").with_dependency(dep("org.t:t", "1.0")))
        .with(component("org.t:t:1.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.p:p"
version = "1.0"

[[requirement.exclude]]
module = "t"

[[requirement]]
module = "org.q:q"
version = "1.0"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert!(resolution.result.contains(&module("org.t:t")));
    let path = resolution.result.find_path("org.t:t").unwrap();
    assert_eq!(path[1].id.to_string(), "org.q:q:1.0");
}

#[tokio::test]
async fn artifact_excluded_on_every_path_is_dropped() {
    let lib = component("org.t:t:1.0")
        .with_artifact(ArtifactName::new("t"))
        .with_artifact(ArtifactName::parse("t:native").unwrap());
    let repo = InMemorySource::new("repo")
        .with(component("org.p:p:1.0").with_dependency(dep("org.t:t", "1.0")))
        .with(lib);
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.p:p"
version = "1.0"

[[requirement.exclude]]
group = "org.t"
artifact = "t"

[[requirement]]
module = "org.t:t"
version = "1.0"
"#,
    );
    // The direct edge brings the artifacts back.
    let resolution = resolve(reqs, repo.clone()).await;
    assert_eq!(resolution.artifacts.len(), 2);

    let reqs = requirements(
        r#"
[[requirement]]
module = "org.p:p"
version = "1.0"

[[requirement.exclude]]
group = "org.t"
artifact = "t"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert!(resolution.result.contains(&module("org.t:t")));
    assert!(resolution.artifacts.is_empty());
}

#[tokio::test]
async fn latest_status_and_rejection() {
    let repo = InMemorySource::new("repo")
        .with(component("org.s:s:1.0"))
        .with(component("org.s:s:1.5"))
        .with(component("org.s:s:2.0-rc1").with_status(Status::Milestone))
        .with(component("org.r:r:1.0"))
        .with(component("org.r:r:1.9"))
        .with(component("org.r:r:1.5"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.s:s"
version = "latest.release"

[[requirement]]
module = "org.r:r"
version = "[1.0,2.0)"
reject = ["1.9"]
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.s:s").as_deref(), Some("1.5"));
    assert_eq!(version_of(&resolution, "org.r:r").as_deref(), Some("1.5"));
}

#[tokio::test]
async fn prefix_selector_and_missing_module() {
    let repo = InMemorySource::new("repo")
        .with(component("org.p:p:1.2"))
        .with(component("org.p:p:1.10"))
        .with(component("org.p:p:2.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.p:p"
version = "1.+"

[[requirement]]
module = "org.gone:gone"
version = "1.0"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.p:p").as_deref(), Some("1.10"));
    let unresolved: Vec<_> = resolution
        .failures
        .iter()
        .filter(|f| f.kind() == "unresolved")
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].subject(), "org.gone:gone");
    assert_eq!(unresolved[0].path(), ["com.example:app:1.0"]);
}

#[tokio::test]
async fn substitution_redirects_module() {
    let repo = InMemorySource::new("repo")
        .with(component("org.x:x:1.0").with_dependency(dep("org.old:lib", "1.0")))
        .with(component("org.new:lib:2.0"));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.x:x"
version = "1.0"

[[substitution]]
module = "org.old:lib"
use-module = "org.new:lib"
use-version = "2.0"
reason = "relocated"
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert_eq!(version_of(&resolution, "org.new:lib").as_deref(), Some("2.0"));
    assert!(!resolution.result.contains(&module("org.old:lib")));
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn variant_chosen_by_attributes() {
    let variants = vec![
        VariantMetadata {
            name: "api".to_string(),
            attributes: [("usage".to_string(), "api".to_string())].into(),
            dependencies: Vec::new(),
            artifacts: vec![ArtifactName::new("v-api")],
        },
        VariantMetadata {
            name: "runtime".to_string(),
            attributes: [("usage".to_string(), "runtime".to_string())].into(),
            dependencies: vec![dep("org.rt:rt", "1.0")],
            artifacts: vec![ArtifactName::new("v")],
        },
    ];
    let repo = InMemorySource::new("repo")
        .with(component("org.v:v:1.0").with_variants(variants))
        .with(component("org.rt:rt:1.0"));
    let reqs = requirements(
        r#"
[root.attributes]
usage = "runtime"

[[requirement]]
module = "org.v:v"
version = "1.0"

[[requirement]]
module = "org.v:v"
version = "1.0"
attributes = { flavor = "full" }
"#,
    );
    let resolution = resolve(reqs, repo).await;
    let idx = resolution.result.find("org.v:v").unwrap();
    assert_eq!(resolution.result.node(idx).variant, "runtime");
    assert!(resolution.result.contains(&module("org.rt:rt")));
    // Attributes a variant doesn't declare don't rule it out.
    assert_eq!(resolution.result.dependents_of(idx).len(), 1);
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn incompatible_variant_is_unresolved() {
    let variants = vec![VariantMetadata {
        name: "api".to_string(),
        attributes: [("usage".to_string(), "api".to_string())].into(),
        dependencies: Vec::new(),
        artifacts: Vec::new(),
    }];
    let repo = InMemorySource::new("repo").with(component("org.v:v:1.0").with_variants(variants));
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.v:v"
version = "1.0"
attributes = { usage = "runtime" }
"#,
    );
    let resolution = resolve(reqs, repo).await;
    assert!(!resolution.result.contains(&module("org.v:v")));
    let failure = resolution.failures.iter().next().unwrap();
    assert!(failure.to_string().contains("no variant"));
}

#[tokio::test]
async fn cycles_are_reported_only_when_disallowed() {
    let repo = InMemorySource::new("repo")
        .with(component("org.a:a:1.0").with_dependency(dep("org.b:b", "1.0")))
        .with(component("org.b:b:1.0").with_dependency(dep("org.a:a", "1.0")));
    let body = r#"
[[requirement]]
module = "org.a:a"
version = "1.0"
"#;
    let resolution = resolve(requirements(body), repo.clone()).await;
    assert!(resolution.failures.is_empty());
    assert_eq!(resolution.result.len(), 2);

    let mut config = ResolverConfig::default();
    config.resolve.allow_cycles = false;
    let resolution = resolve_with(requirements(body), repo, config).await;
    assert_eq!(resolution.failures.count("cycle"), 1);
    let cycle = resolution.failures.iter().next().unwrap();
    assert_eq!(cycle.path(), ["org.a:a:1.0", "org.b:b:1.0", "org.a:a:1.0"]);
}

#[tokio::test]
async fn output_order_is_deterministic() {
    let repo = InMemorySource::new("repo")
        .with(component("org.z:z:1.0").with_dependency(dep("org.c:c", "[1.0,)")))
        .with(component("org.a:a:1.0").with_dependency(dep("org.c:c", "1.0")))
        .with(component("org.c:c:1.0"))
        .with(component("org.c:c:1.1"));
    let body = r#"
[[requirement]]
module = "org.z:z"
version = "1.0"

[[requirement]]
module = "org.a:a"
version = "1.0"
"#;
    let mut config = ResolverConfig::default();
    config.resolve.jobs = 1;
    let first = resolve_with(requirements(body), repo.clone(), config).await;
    let mut config = ResolverConfig::default();
    config.resolve.jobs = 8;
    let second = resolve_with(requirements(body), repo, config).await;
    assert_eq!(first.result.print_tree(None), second.result.print_tree(None));
    let order: Vec<String> = first.result.components().iter().map(|c| c.id.to_string()).collect();
    // The exact request wins over the open range.
    assert_eq!(order, ["org.a:a:1.0", "org.c:c:1.0", "org.z:z:1.0"]);
}

/// Cancels the token when asked for a particular module's metadata.
struct CancelOn {
    inner: InMemorySource,
    module: ModuleIdentity,
    token: CancellationToken,
}

#[async_trait]
impl MetadataSource for CancelOn {
    fn name(&self) -> &str {
        "cancel-on"
    }

    async fn list_versions(&self, module: &ModuleIdentity) -> Result<Vec<String>, SourceError> {
        self.inner.list_versions(module).await
    }

    async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> Result<Option<ComponentMetadata>, SourceError> {
        if *module == self.module {
            self.token.cancel();
        }
        self.inner.describe(module, selector).await
    }
}

#[tokio::test]
async fn cancellation_returns_partial_result() {
    let inner = InMemorySource::new("repo")
        .with(component("org.x:x:1.0").with_dependency(dep("org.y:y", "1.0")))
        .with(component("org.y:y:1.0").with_dependency(dep("org.z:z", "1.0")))
        .with(component("org.z:z:1.0"));
    let token = CancellationToken::new();
    let source = CancelOn {
        inner,
        module: module("org.y:y"),
        token: token.clone(),
    };
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.x:x"
version = "1.0"
"#,
    );
    let resolution = Resolver::new(reqs, &ResolverConfig::default())
        .metadata_source(Arc::new(source))
        .cancellation(token)
        .resolve()
        .await
        .unwrap();

    assert!(resolution.cancelled);
    assert!(resolution.result.is_cancelled());
    assert!(resolution.result.contains(&module("org.x:x")));
    assert!(!resolution.result.contains(&module("org.z:z")));
    if let Some(y) = resolution.result.find("org.y:y") {
        assert!(resolution.result.dependencies_of(y).is_empty());
    }
    assert!(resolution.failures.is_empty());
}

/// Counts how often each lookup reaches the underlying source.
struct Counting {
    inner: InMemorySource,
    listings: AtomicUsize,
}

#[async_trait]
impl MetadataSource for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list_versions(&self, module: &ModuleIdentity) -> Result<Vec<String>, SourceError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.inner.list_versions(module).await
    }

    async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> Result<Option<ComponentMetadata>, SourceError> {
        self.inner.describe(module, selector).await
    }
}

#[tokio::test]
async fn shared_version_listing_is_fetched_once() {
    let inner = InMemorySource::new("repo")
        .with(component("org.a:a:1.0").with_dependency(dep("org.c:c", "[1.0,2.0)")))
        .with(component("org.b:b:1.0").with_dependency(dep("org.c:c", "1.+")))
        .with(component("org.c:c:1.0"))
        .with(component("org.c:c:1.4"));
    let counting = Arc::new(Counting {
        inner,
        listings: AtomicUsize::new(0),
    });
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.a:a"
version = "1.0"

[[requirement]]
module = "org.b:b"
version = "1.0"
"#,
    );
    let source: Arc<dyn MetadataSource> = counting.clone();
    let resolution = Resolver::new(reqs, &ResolverConfig::default())
        .metadata_source(source)
        .fetch_files(false)
        .resolve()
        .await
        .unwrap();
    assert_eq!(version_of(&resolution, "org.c:c").as_deref(), Some("1.4"));
    assert_eq!(counting.listings.load(Ordering::SeqCst), 1);
}

/// A repository that gains components while the test runs.
struct Publishing {
    inner: Mutex<InMemorySource>,
}

impl Publishing {
    fn publish(&self, metadata: ComponentMetadata) {
        self.inner.lock().unwrap().add(metadata);
    }

    fn snapshot(&self) -> InMemorySource {
        self.inner.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataSource for Publishing {
    fn name(&self) -> &str {
        "publishing"
    }

    async fn list_versions(&self, module: &ModuleIdentity) -> Result<Vec<String>, SourceError> {
        self.snapshot().list_versions(module).await
    }

    async fn describe(
        &self,
        module: &ModuleIdentity,
        selector: &VersionSelector,
    ) -> Result<Option<ComponentMetadata>, SourceError> {
        self.snapshot().describe(module, selector).await
    }
}

async fn resolve_cached(
    reqs: Requirements,
    source: Arc<dyn MetadataSource>,
    cache: Arc<MetadataCache>,
) -> Resolution {
    Resolver::new(reqs, &ResolverConfig::default())
        .metadata_source(source)
        .metadata_cache(cache)
        .fetch_files(false)
        .resolve()
        .await
        .unwrap()
}

#[tokio::test]
async fn shared_cache_does_not_remember_missing_modules() {
    let publishing = Arc::new(Publishing {
        inner: Mutex::new(InMemorySource::new("repo")),
    });
    let cache = Arc::new(MetadataCache::new());
    let body = r#"
[[requirement]]
module = "org.a:a"
version = "1.0"

[[requirement]]
module = "org.b:b"
version = "[1.0,2.0)"
"#;
    let first = resolve_cached(requirements(body), publishing.clone(), cache.clone()).await;
    assert_eq!(first.failures.count("unresolved"), 2);

    publishing.publish(component("org.a:a:1.0"));
    publishing.publish(component("org.b:b:1.2"));
    let second = resolve_cached(requirements(body), publishing.clone(), cache).await;
    assert_eq!(version_of(&second, "org.a:a").as_deref(), Some("1.0"));
    assert_eq!(version_of(&second, "org.b:b").as_deref(), Some("1.2"));
    assert!(second.failures.is_empty());
}

#[tokio::test]
async fn narrowing_exclusions_do_not_count_as_instability() {
    // p0 -> p1 -> ... -> p39, each also depending on t with its own exclusion,
    // so t is re-expanded once per wave as its exclusions shrink.
    let links = 40;
    let mut repo = InMemorySource::new("repo")
        .with(component("org.t:t:1.0").with_dependency(dep("org.u:u", "1.0")))
        .with(component("org.u:u:1.0"));
    for i in 0..links {
        let exclude = ExcludeRule::Group(Pattern::new(&format!("org.x{i}")).unwrap());
        let mut p = component(&format!("org.p:p{i}:1.0"))
            .with_dependency(dep("org.t:t", "1.0").with_excludes(ExcludeSpec::rule(exclude)));
        if i + 1 < links {
            p = p.with_dependency(dep(&format!("org.p:p{}", i + 1), "1.0"));
        }
        repo.add(p);
    }
    let reqs = requirements(
        r#"
[[requirement]]
module = "org.p:p0"
version = "1.0"
"#,
    );
    let mut config = ResolverConfig::default();
    config.resolve.max_reselections = 4;
    let resolution = resolve_with(reqs, repo, config).await;

    assert_eq!(version_of(&resolution, "org.t:t").as_deref(), Some("1.0"));
    assert_eq!(version_of(&resolution, "org.u:u").as_deref(), Some("1.0"));
    assert!(resolution.result.contains(&module("org.p:p39")));
    assert!(resolution.failures.is_empty());
}

#[tokio::test]
async fn files_collected_without_failing_fast() {
    let dir = tempfile::tempdir().unwrap();
    let write = |rel: &str| {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        path
    };
    let a = write("repo/org/a/a/1.0/a-1.0.jar");
    let local = write("libs/local.jar");

    let repo = InMemorySource::new("repo")
        .with(
            component("org.a:a:1.0")
                .with_artifact(ArtifactName::new("a"))
                .with_dependency(dep("org.b:b", "1.0")),
        )
        .with(component("org.b:b:1.0").with_artifact(ArtifactName::new("b")));
    let reqs = Requirements::parse_toml(&format!(
        r#"
files = [{local:?}]

[root]
module = "com.example:app"

[[requirement]]
module = "org.a:a"
version = "1.0"
"#
    ))
    .unwrap();
    let artifacts: Arc<dyn ArtifactSource> =
        Arc::new(DirectoryArtifactSource::new(dir.path().join("repo")));
    let resolution = Resolver::new(reqs, &ResolverConfig::default())
        .metadata_source(Arc::new(repo))
        .artifact_source(artifacts)
        .resolve()
        .await
        .unwrap();

    let files: Vec<PathBuf> = resolution.files.clone().into_vec();
    assert_eq!(files, vec![local, a]);
    assert_eq!(resolution.failures.count("artifact"), 1);
    let failure = resolution.failures.iter().next().unwrap();
    assert_eq!(failure.path(), ["com.example:app:unspecified", "org.a:a:1.0", "org.b:b:1.0"]);
}
