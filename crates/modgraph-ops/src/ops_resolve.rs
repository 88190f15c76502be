//! Operation: resolve a requirements document against a repository document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modgraph_core::config::{FailureMode, ResolverConfig};
use modgraph_core::repository::RepositoryDocument;
use modgraph_core::requirements::Requirements;
use modgraph_resolver::resolver::{Resolution, Resolver};
use modgraph_resolver::source::{DirectoryArtifactSource, InMemorySource};
use modgraph_util::progress::{spinner, status, status_error, status_warn};
use serde_json::json;

/// Input files shared by every operation.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs {
    /// Declared-requirements document.
    pub requirements: PathBuf,
    /// Repository document describing the available components.
    pub repository: PathBuf,
    /// Directory holding artifact files, laid out by group, name and version.
    pub artifacts: Option<PathBuf>,
    /// Explicit config file instead of `~/.modgraph/config.toml`.
    pub config: Option<PathBuf>,
    /// Treat any reported failure as an error, whatever the config says.
    pub strict: bool,
}

impl ResolveInputs {
    pub fn load_config(&self) -> miette::Result<ResolverConfig> {
        let mut config = match &self.config {
            Some(path) => ResolverConfig::from_path(path)?,
            None => ResolverConfig::load()?,
        };
        if self.strict {
            config.resolve.failure_mode = FailureMode::Strict;
        }
        Ok(config)
    }

    /// Parse the requirements. Relative local files are taken relative to
    /// the requirements document.
    pub fn load_requirements(&self) -> miette::Result<Requirements> {
        let mut requirements = Requirements::from_path(&self.requirements)?;
        let base = self.requirements.parent().unwrap_or(Path::new("."));
        for file in &mut requirements.files {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        Ok(requirements)
    }
}

/// Options for `modgraph resolve`.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub inputs: ResolveInputs,
    /// Print the outcome as JSON instead of text.
    pub json: bool,
}

/// Run one resolution. Ctrl-C cancels it; whatever was known by then is
/// returned.
pub async fn run(inputs: &ResolveInputs, fetch_files: bool) -> miette::Result<(Resolution, FailureMode)> {
    let config = inputs.load_config()?;
    let requirements = inputs.load_requirements()?;
    let document = RepositoryDocument::from_path(&inputs.repository)?;
    let source = InMemorySource::from_document(inputs.repository.display().to_string(), &document)?;
    tracing::debug!("loaded {} components from {}", source.len(), inputs.repository.display());

    let mut resolver = Resolver::new(requirements, &config)
        .metadata_source(Arc::new(source))
        .fetch_files(fetch_files);
    if let Some(dir) = &inputs.artifacts {
        resolver = resolver.artifact_source(Arc::new(DirectoryArtifactSource::new(dir.clone())));
    }

    let token = resolver.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight fetches");
            token.cancel();
        }
    });

    let sp = spinner("Resolving dependencies...");
    let resolution = resolver.resolve().await;
    sp.finish_and_clear();
    interrupt.abort();

    Ok((resolution?, config.resolve.failure_mode))
}

/// Print status lines for conflicts, failures and cancellation. Failures
/// are errors under the strict failure mode and warnings otherwise.
fn report(resolution: &Resolution, mode: FailureMode) {
    if resolution.cancelled {
        status_warn("Cancelled", "resolution stopped before the graph was complete");
    }
    for conflict in &resolution.conflicts.conflicts {
        status_warn("Conflict", &conflict.to_string());
    }
    for failure in resolution.failures.iter() {
        match mode {
            FailureMode::Strict => status_error("Failed", &failure.to_string()),
            FailureMode::Lenient => status_warn("Failed", &failure.to_string()),
        }
    }
}

/// Resolve and print the selected components.
pub async fn resolve(opts: &ResolveOptions) -> miette::Result<()> {
    let (resolution, mode) = run(&opts.inputs, false).await?;

    if opts.json {
        println!("{}", to_json(&resolution));
    } else {
        report(&resolution, mode);
        for component in resolution.result.components() {
            println!("{component}");
        }
        status(
            "Resolved",
            &format!(
                "{} components, {} conflicts, {} failures",
                resolution.result.len(),
                resolution.conflicts.len(),
                resolution.failures.len()
            ),
        );
    }

    Ok(resolution.check(mode)?)
}

/// Resolve, fetch every artifact file and print the file paths.
pub async fn files(inputs: &ResolveInputs) -> miette::Result<()> {
    let (resolution, mode) = run(inputs, true).await?;
    report(&resolution, mode);
    for file in resolution.files.iter() {
        println!("{}", file.display());
    }
    status("Fetched", &format!("{} files", resolution.files.len()));
    Ok(resolution.check(mode)?)
}

/// Machine-readable form of a resolution.
pub fn to_json(resolution: &Resolution) -> serde_json::Value {
    let root = resolution
        .result
        .root()
        .map(|idx| resolution.result.node(idx).id.to_string());
    let components: Vec<_> = resolution
        .result
        .components()
        .into_iter()
        .map(|c| {
            json!({
                "module": c.key(),
                "version": c.id.version,
                "variant": c.variant,
                "status": c.status.to_string(),
            })
        })
        .collect();
    let conflicts: Vec<_> = resolution
        .conflicts
        .conflicts
        .iter()
        .map(|c| {
            json!({
                "module": c.module.to_string(),
                "requested": c.requested,
                "resolved": c.resolved,
                "reason": c.reason,
            })
        })
        .collect();
    let failures: Vec<_> = resolution
        .failures
        .iter()
        .map(|f| {
            json!({
                "kind": f.kind(),
                "subject": f.subject(),
                "message": f.to_string(),
                "path": f.path(),
            })
        })
        .collect();
    json!({
        "root": root,
        "components": components,
        "artifacts": resolution.artifacts.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "conflicts": conflicts,
        "failures": failures,
        "cancelled": resolution.cancelled,
    })
}
