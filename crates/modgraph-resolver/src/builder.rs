//! Dependency graph construction.
//!
//! The builder owns all graph state for one run. Nodes and edges live in
//! arenas addressed by index; evicted entries are flagged dead rather than
//! removed so indices stay stable. Work proceeds in waves:
//!
//! 1. expand queued nodes into outgoing edges (exclusions prune here)
//! 2. find a candidate version for each new edge, fetching in parallel
//! 3. hand the requests to the [`ConflictResolver`]
//! 4. fetch metadata for changed selections, in parallel
//! 5. point edges at the selected nodes, evict stale and unreachable nodes
//!
//! Only steps 2 and 4 await I/O, and their results are integrated serially.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use modgraph_core::config::ResolveSettings;
use modgraph_core::module::{ComponentId, ModuleIdentity};
use modgraph_util::errors::ModgraphError;
use petgraph::graph::DiGraph;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::conflict::{policy_for, ConflictReport, ConflictResolver, VersionRequest};
use crate::excludes::ExcludeSpec;
use crate::failure::ResolutionFailure;
use crate::metadata::{ComponentMetadata, DependencyMetadata, DEFAULT_VARIANT};
use crate::selector::VersionSelector;
use crate::source::RepositoryChain;
use crate::substitution::SubstitutionRules;
use crate::version::Version;

type NodeId = usize;
type EdgeId = usize;

const ROOT: NodeId = 0;

/// Knobs for one graph build.
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub jobs: usize,
    pub max_reselections: u32,
    pub allow_cycles: bool,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self::from(&ResolveSettings::default())
    }
}

impl From<&ResolveSettings> for BuilderSettings {
    fn from(settings: &ResolveSettings) -> Self {
        Self {
            jobs: settings.jobs.max(1),
            max_reselections: settings.max_reselections,
            allow_cycles: settings.allow_cycles,
        }
    }
}

/// The component being resolved and its declared dependencies.
#[derive(Debug, Clone)]
pub struct RootComponent {
    pub id: ComponentId,
    pub dependencies: Vec<DependencyMetadata>,
}

/// A node of the stabilized graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub index: usize,
    pub component: ComponentId,
    pub version: Version,
    pub variant: String,
    pub metadata: Arc<ComponentMetadata>,
    /// Exclusions in force for this node's own artifacts and dependencies.
    pub exclusions: ExcludeSpec,
    /// Shortest requester chain from the root, root first, excluding this node.
    pub path: Vec<ComponentId>,
}

impl GraphNode {
    pub fn is_root(&self) -> bool {
        self.index == ROOT
    }
}

/// An edge of the stabilized graph.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub dependency: DependencyMetadata,
}

/// The graph once no more work is pending (or the run was cancelled).
///
/// Nodes are ordered root first, then by module, version and variant; edges
/// by source then target. Neither order depends on fetch completion order.
#[derive(Debug)]
pub struct StableGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub selected: BTreeMap<ModuleIdentity, Version>,
    pub failures: Vec<ResolutionFailure>,
    pub conflicts: ConflictReport,
    pub cancelled: bool,
}

impl StableGraph {
    pub fn root(&self) -> &GraphNode {
        &self.nodes[ROOT]
    }

    pub fn outgoing(&self, node: usize) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.from == node)
    }

    pub fn incoming(&self, node: usize) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.to == node)
    }
}

#[derive(Debug)]
struct NodeState {
    component: ComponentId,
    version: Version,
    variant: String,
    metadata: Arc<ComponentMetadata>,
    incoming: BTreeSet<EdgeId>,
    outgoing: Vec<EdgeId>,
    exclusions: ExcludeSpec,
    /// Exclusions and transitivity of the last expansion.
    expanded_with: Option<(ExcludeSpec, bool)>,
    expansions: u32,
    /// Edges ever attached. Each one may narrow exclusions once.
    attached: u32,
    live: bool,
}

#[derive(Debug)]
struct EdgeState {
    from: NodeId,
    dependency: DependencyMetadata,
    target: Option<NodeId>,
    /// Why the edge has no target, once known.
    reason: Option<String>,
    live: bool,
}

#[derive(Debug, Clone)]
enum Candidate {
    Found(Version),
    Missing(String),
}

/// Candidates are shared by edges asking the same question.
type CandidateKey = (ModuleIdentity, String, Option<String>);
type MetadataResult = Result<Option<Arc<ComponentMetadata>>, String>;

pub struct DependencyGraphBuilder {
    chain: RepositoryChain,
    substitutions: SubstitutionRules,
    resolver: ConflictResolver,
    settings: BuilderSettings,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,

    nodes: Vec<NodeState>,
    edges: Vec<EdgeState>,
    node_index: HashMap<(ComponentId, String), NodeId>,
    module_edges: BTreeMap<ModuleIdentity, Vec<EdgeId>>,
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
    pending: Vec<EdgeId>,
    dirty: BTreeSet<ModuleIdentity>,

    // Run-local memo, failures included.
    candidates: HashMap<CandidateKey, Candidate>,
    metadata: HashMap<ComponentId, MetadataResult>,
    cancelled: bool,
}

impl DependencyGraphBuilder {
    pub fn new(
        chain: RepositoryChain,
        resolver: ConflictResolver,
        settings: BuilderSettings,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.jobs.max(1)));
        Self {
            chain,
            substitutions: SubstitutionRules::default(),
            resolver,
            settings,
            cancel: CancellationToken::new(),
            semaphore,
            nodes: Vec::new(),
            edges: Vec::new(),
            node_index: HashMap::new(),
            module_edges: BTreeMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            pending: Vec::new(),
            dirty: BTreeSet::new(),
            candidates: HashMap::new(),
            metadata: HashMap::new(),
            cancelled: false,
        }
    }

    /// Builder with a conflict resolver configured from `settings`.
    pub fn from_settings(chain: RepositoryChain, settings: &ResolveSettings) -> Self {
        let resolver = ConflictResolver::new(
            settings.conflict,
            policy_for(settings.dynamic_policy),
            settings.max_reselections,
        );
        Self::new(chain, resolver, BuilderSettings::from(settings))
    }

    pub fn with_substitutions(mut self, substitutions: SubstitutionRules) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the graph until it is stable or the run is cancelled.
    ///
    /// Per-edge problems end up in [`StableGraph::failures`]; only an
    /// unstable graph is an error.
    pub async fn build(mut self, root: RootComponent) -> Result<StableGraph, ModgraphError> {
        let mut metadata = ComponentMetadata::new(root.id.clone());
        for dependency in root.dependencies {
            metadata = metadata.with_dependency(dependency);
        }
        self.node_for(Arc::new(metadata), DEFAULT_VARIANT);
        tracing::debug!("resolving dependencies of {}", root.id);

        let mut waves = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
            }
            if !self.cancelled {
                self.expand_queued()?;
            }
            if self.cancelled {
                tracing::info!("resolution cancelled after {waves} waves");
                break;
            }
            if self.pending.is_empty() && self.dirty.is_empty() && self.queue.is_empty() {
                break;
            }
            waves += 1;
            self.resolve_pending().await?;
            self.settle().await?;
        }
        if !self.cancelled {
            tracing::debug!(
                "graph stable after {waves} waves: {} nodes",
                self.nodes.iter().filter(|n| n.live).count()
            );
        }
        Ok(self.finish())
    }

    fn expand_queued(&mut self) -> Result<(), ModgraphError> {
        while let Some(node) = self.queue.pop_front() {
            self.queued.remove(&node);
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                return Ok(());
            }
            self.expand(node)?;
        }
        Ok(())
    }

    fn expand(&mut self, n: NodeId) -> Result<(), ModgraphError> {
        if !self.nodes[n].live {
            return Ok(());
        }
        let (exclusions, transitive) = self.effective(n);
        let state = Some((exclusions.clone(), transitive));
        if self.nodes[n].expanded_with == state {
            return Ok(());
        }
        let exclusions_changed = self.nodes[n]
            .expanded_with
            .as_ref()
            .map_or(true, |(e, _)| *e != exclusions);

        let node = &mut self.nodes[n];
        node.expansions += 1;
        if node.expansions > self.settings.max_reselections.saturating_add(node.attached) {
            return Err(ModgraphError::UnstableGraph {
                module: node.component.module.to_string(),
                count: node.expansions,
            });
        }
        tracing::debug!("expanding {} ({})", node.component, node.variant);

        let desired = if transitive {
            self.desired_dependencies(n, &exclusions)
        } else {
            Vec::new()
        };

        let mut existing: Vec<EdgeId> = self.nodes[n]
            .outgoing
            .iter()
            .copied()
            .filter(|e| self.edges[*e].live)
            .collect();
        let mut outgoing = Vec::with_capacity(desired.len());
        for dependency in desired {
            let kept = existing
                .iter()
                .position(|e| self.edges[*e].dependency == dependency);
            match kept {
                Some(pos) => {
                    let e = existing.remove(pos);
                    if exclusions_changed {
                        if let Some(t) = self.edges[e].target {
                            self.enqueue(t);
                        }
                    }
                    outgoing.push(e);
                }
                None => outgoing.push(self.add_edge(n, dependency)),
            }
        }
        for e in existing {
            self.detach_edge(e)?;
        }

        let node = &mut self.nodes[n];
        node.outgoing = outgoing;
        node.exclusions = exclusions;
        node.expanded_with = state;
        Ok(())
    }

    /// Exclusions and transitivity of a node: the intersection over incoming
    /// edges of what each path excludes.
    fn effective(&self, n: NodeId) -> (ExcludeSpec, bool) {
        if n == ROOT {
            return (ExcludeSpec::Nothing, true);
        }
        let mut exclusions: Option<ExcludeSpec> = None;
        let mut transitive = false;
        for &e in &self.nodes[n].incoming {
            let edge = &self.edges[e];
            if !edge.live {
                continue;
            }
            let path = edge
                .dependency
                .excludes
                .union(&self.nodes[edge.from].exclusions);
            exclusions = Some(match exclusions {
                None => path,
                Some(acc) => acc.intersect(&path),
            });
            transitive |= edge.dependency.transitive;
        }
        (exclusions.unwrap_or_default(), transitive)
    }

    fn desired_dependencies(&self, n: NodeId, exclusions: &ExcludeSpec) -> Vec<DependencyMetadata> {
        let node = &self.nodes[n];
        let Some(variant) = node.metadata.variant(&node.variant) else {
            return Vec::new();
        };
        variant
            .dependencies
            .iter()
            .filter_map(|dependency| {
                if exclusions.excludes_module(&dependency.module) {
                    tracing::debug!("{}: excluded {}", node.component, dependency.module);
                    return None;
                }
                let dependency = self
                    .substitutions
                    .apply(dependency)
                    .unwrap_or_else(|| dependency.clone());
                (!exclusions.excludes_module(&dependency.module)).then_some(dependency)
            })
            .collect()
    }

    fn add_edge(&mut self, from: NodeId, dependency: DependencyMetadata) -> EdgeId {
        let id = self.edges.len();
        self.module_edges
            .entry(dependency.module.clone())
            .or_default()
            .push(id);
        self.edges.push(EdgeState {
            from,
            dependency,
            target: None,
            reason: None,
            live: true,
        });
        self.pending.push(id);
        id
    }

    fn detach_edge(&mut self, e: EdgeId) -> Result<(), ModgraphError> {
        if !self.edges[e].live {
            return Ok(());
        }
        self.edges[e].live = false;
        if let Some(t) = self.edges[e].target.take() {
            self.nodes[t].incoming.remove(&e);
            self.enqueue(t);
        }
        let module = self.edges[e].dependency.module.clone();
        self.resolver.remove_request(&module, e)?;
        self.dirty.insert(module);
        Ok(())
    }

    fn enqueue(&mut self, n: NodeId) {
        if self.nodes[n].live && self.queued.insert(n) {
            self.queue.push_back(n);
        }
    }

    /// Find candidates for new edges and register their requests.
    async fn resolve_pending(&mut self) -> Result<(), ModgraphError> {
        let pending: Vec<EdgeId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|e| self.edges[*e].live)
            .collect();

        let mut lookups: BTreeMap<CandidateKey, (ModuleIdentity, VersionSelector, Option<VersionSelector>)> =
            BTreeMap::new();
        for &e in &pending {
            let dependency = &self.edges[e].dependency;
            let key = candidate_key(dependency);
            if matches!(dependency.selector, VersionSelector::Exact(_)) || self.candidates.contains_key(&key) {
                continue;
            }
            lookups.insert(
                key,
                (
                    dependency.module.clone(),
                    dependency.selector.clone(),
                    dependency.rejection.clone(),
                ),
            );
        }

        if !lookups.is_empty() {
            let mut join_set = JoinSet::new();
            for (key, (module, selector, rejection)) in lookups {
                let chain = self.chain.clone();
                let sem = self.semaphore.clone();
                join_set.spawn(async move {
                    let _permit = sem.acquire().await;
                    let candidate = find_candidate(&chain, &module, &selector, rejection.as_ref()).await;
                    (key, candidate)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((key, candidate)) => {
                        self.candidates.insert(key, candidate);
                    }
                    Err(e) => tracing::warn!("version lookup task failed: {e}"),
                }
            }
        }

        for e in pending {
            let dependency = &self.edges[e].dependency;
            let candidate = match dependency.selector {
                VersionSelector::Exact(ref v) => Candidate::Found(v.clone()),
                _ => self
                    .candidates
                    .get(&candidate_key(dependency))
                    .cloned()
                    .unwrap_or_else(|| Candidate::Missing("version lookup did not complete".to_string())),
            };
            let (version, reason) = match candidate {
                Candidate::Found(v) => (Some(v), None),
                Candidate::Missing(reason) => (None, Some(reason)),
            };
            let module = dependency.module.clone();
            let request = VersionRequest {
                requester: self.nodes[self.edges[e].from].component.clone(),
                selector: dependency.selector.clone(),
                rejection: dependency.rejection.clone(),
                candidate: version,
                forced: dependency.forced,
            };
            self.edges[e].reason = reason;
            self.resolver.add_request(&module, e, request)?;
            self.dirty.insert(module);
        }
        Ok(())
    }

    /// Bring edges in line with the current selections until nothing changes.
    async fn settle(&mut self) -> Result<(), ModgraphError> {
        loop {
            while !self.dirty.is_empty() {
                let modules: Vec<ModuleIdentity> = std::mem::take(&mut self.dirty).into_iter().collect();
                let wanted: Vec<ComponentId> = modules
                    .iter()
                    .filter_map(|m| {
                        self.resolver
                            .selected(m)
                            .map(|v| ComponentId::new(m.clone(), v.as_str()))
                    })
                    .filter(|id| !self.metadata.contains_key(id))
                    .collect();
                self.fetch_metadata(wanted).await;
                for module in &modules {
                    self.settle_module(module)?;
                }
            }
            let orphans = self.unreachable();
            if orphans.is_empty() {
                return Ok(());
            }
            for n in orphans {
                self.evict(n)?;
            }
        }
    }

    async fn fetch_metadata(&mut self, ids: Vec<ComponentId>) {
        if ids.is_empty() {
            return;
        }
        let mut join_set = JoinSet::new();
        for id in ids {
            let chain = self.chain.clone();
            let sem = self.semaphore.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire().await;
                let selector = VersionSelector::exact(&id.version);
                let result = chain
                    .describe(&id.module, &selector)
                    .await
                    .map_err(|e| format!("fetching metadata for {id} failed: {e}"));
                (id, result)
            });
        }
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(ref e) = result {
                        tracing::warn!("{e}");
                    }
                    self.metadata.insert(id, result);
                }
                Err(e) => tracing::warn!("metadata task failed: {e}"),
            }
        }
    }

    fn settle_module(&mut self, module: &ModuleIdentity) -> Result<(), ModgraphError> {
        let selection = self.resolver.selected(module).cloned();
        let mut target: Option<Arc<ComponentMetadata>> = None;
        let mut missing: Option<String> = None;
        if let Some(ref version) = selection {
            let id = ComponentId::new(module.clone(), version.as_str());
            match self.metadata.get(&id).cloned() {
                Some(Ok(Some(metadata))) => {
                    if self.resolver.verify_metadata(module, &metadata)?.changed() {
                        self.dirty.insert(module.clone());
                        return Ok(());
                    }
                    target = Some(metadata);
                }
                Some(Ok(None)) => missing = Some(format!("{id} was not found in any source")),
                Some(Err(e)) => missing = Some(e),
                None => missing = Some(format!("metadata for {id} is unavailable")),
            }
        }

        let edges: Vec<EdgeId> = self
            .module_edges
            .get(module)
            .map(|ids| ids.iter().copied().filter(|e| self.edges[*e].live).collect())
            .unwrap_or_default();
        for e in edges {
            let desired = match target {
                Some(ref metadata) => {
                    let attributes = self.edges[e].dependency.attributes.clone();
                    match metadata.select_variant(&attributes) {
                        Some(variant) => {
                            let name = variant.name.clone();
                            Some(self.node_for(metadata.clone(), &name))
                        }
                        None => {
                            self.edges[e].reason = Some(format!(
                                "no variant of {} matches attributes {}",
                                metadata.id,
                                render_attributes(&attributes)
                            ));
                            None
                        }
                    }
                }
                None => {
                    if let Some(ref reason) = missing {
                        self.edges[e].reason = Some(reason.clone());
                    }
                    None
                }
            };
            self.retarget(e, desired);
        }

        let stale: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| {
                *i != ROOT
                    && n.live
                    && n.component.module == *module
                    && selection
                        .as_ref()
                        .map_or(true, |v| v.as_str() != n.component.version)
            })
            .map(|(i, _)| i)
            .collect();
        for n in stale {
            self.evict(n)?;
        }
        Ok(())
    }

    /// The live node for a component variant, created and queued if needed.
    fn node_for(&mut self, metadata: Arc<ComponentMetadata>, variant: &str) -> NodeId {
        let key = (metadata.id.clone(), variant.to_string());
        if let Some(&n) = self.node_index.get(&key) {
            if self.nodes[n].live {
                return n;
            }
        }
        let n = self.nodes.len();
        self.nodes.push(NodeState {
            component: metadata.id.clone(),
            version: metadata.version.clone(),
            variant: variant.to_string(),
            metadata,
            incoming: BTreeSet::new(),
            outgoing: Vec::new(),
            exclusions: ExcludeSpec::Nothing,
            expanded_with: None,
            expansions: 0,
            attached: 0,
            live: true,
        });
        self.node_index.insert(key, n);
        self.enqueue(n);
        n
    }

    fn retarget(&mut self, e: EdgeId, desired: Option<NodeId>) {
        let current = self.edges[e].target;
        if current == desired {
            return;
        }
        if let Some(t) = current {
            self.nodes[t].incoming.remove(&e);
            self.enqueue(t);
        }
        if let Some(t) = desired {
            if self.nodes[t].incoming.insert(e) {
                self.nodes[t].attached = self.nodes[t].attached.saturating_add(1);
            }
            self.enqueue(t);
            self.edges[e].reason = None;
        }
        self.edges[e].target = desired;
    }

    fn evict(&mut self, n: NodeId) -> Result<(), ModgraphError> {
        if n == ROOT || !self.nodes[n].live {
            return Ok(());
        }
        tracing::debug!("evicting {} ({})", self.nodes[n].component, self.nodes[n].variant);
        self.nodes[n].live = false;
        let key = (self.nodes[n].component.clone(), self.nodes[n].variant.clone());
        if self.node_index.get(&key) == Some(&n) {
            self.node_index.remove(&key);
        }
        let incoming = std::mem::take(&mut self.nodes[n].incoming);
        if !incoming.is_empty() {
            for e in incoming {
                self.edges[e].target = None;
            }
            self.dirty.insert(self.nodes[n].component.module.clone());
        }
        for e in std::mem::take(&mut self.nodes[n].outgoing) {
            self.detach_edge(e)?;
        }
        Ok(())
    }

    fn unreachable(&self) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![ROOT];
        seen[ROOT] = true;
        while let Some(n) = stack.pop() {
            for &e in &self.nodes[n].outgoing {
                let edge = &self.edges[e];
                if let (true, Some(t)) = (edge.live, edge.target) {
                    if !seen[t] {
                        seen[t] = true;
                        stack.push(t);
                    }
                }
            }
        }
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.live && !seen[*i])
            .map(|(i, _)| i)
            .collect()
    }

    /// Freeze selections and produce the immutable graph.
    fn finish(mut self) -> StableGraph {
        let selected = self.resolver.freeze();
        let conflicts = self.resolver.report();

        let mut order: Vec<NodeId> = (1..self.nodes.len()).filter(|&n| self.nodes[n].live).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&self.nodes[a], &self.nodes[b]);
            a.component
                .module
                .cmp(&b.component.module)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.variant.cmp(&b.variant))
        });
        order.insert(0, ROOT);
        let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        let mut edges: Vec<GraphEdge> = Vec::new();
        for &n in &order {
            for &e in &self.nodes[n].outgoing {
                let edge = &self.edges[e];
                let Some(t) = edge.target.filter(|_| edge.live) else {
                    continue;
                };
                if let Some(&to) = position.get(&t) {
                    edges.push(GraphEdge {
                        from: position[&n],
                        to,
                        dependency: edge.dependency.clone(),
                    });
                }
            }
        }
        edges.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));

        // Shortest requester chain per node, breadth first over sorted edges.
        let mut paths: Vec<Option<Vec<ComponentId>>> = vec![None; order.len()];
        paths[0] = Some(Vec::new());
        let mut frontier = VecDeque::from([0usize]);
        while let Some(i) = frontier.pop_front() {
            let mut next = paths[i].clone().unwrap_or_default();
            next.push(self.nodes[order[i]].component.clone());
            for edge in edges.iter().filter(|e| e.from == i) {
                if paths[edge.to].is_none() {
                    paths[edge.to] = Some(next.clone());
                    frontier.push_back(edge.to);
                }
            }
        }

        let nodes: Vec<GraphNode> = order
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let state = &self.nodes[n];
                GraphNode {
                    index: i,
                    component: state.component.clone(),
                    version: state.version.clone(),
                    variant: state.variant.clone(),
                    metadata: state.metadata.clone(),
                    exclusions: state.exclusions.clone(),
                    path: paths[i].clone().unwrap_or_default(),
                }
            })
            .collect();

        let mut failures: Vec<ResolutionFailure> = self
            .resolver
            .conflicts()
            .into_iter()
            .map(|(module, detail)| ResolutionFailure::VersionConflict {
                module: module.to_string(),
                requesters: detail.requesters,
                reason: detail.reason,
            })
            .collect();

        let mut unresolved = Vec::new();
        for &n in &order {
            for &e in &self.nodes[n].outgoing {
                let edge = &self.edges[e];
                if !edge.live || edge.target.is_some() {
                    continue;
                }
                if self.resolver.conflict(&edge.dependency.module).is_some() {
                    continue;
                }
                let reason = match (&edge.reason, self.cancelled) {
                    (Some(r), _) => r.clone(),
                    (None, true) => continue,
                    (None, false) => "no version was selected".to_string(),
                };
                let mut path: Vec<String> = nodes[position[&n]].path.iter().map(|c| c.to_string()).collect();
                path.push(self.nodes[n].component.to_string());
                unresolved.push(ResolutionFailure::UnresolvedDependency {
                    module: edge.dependency.module.to_string(),
                    selector: edge.dependency.selector.to_string(),
                    path,
                    reason,
                });
            }
        }
        unresolved.sort_by(|a, b| (a.subject(), a.path()).cmp(&(b.subject(), b.path())));
        failures.extend(unresolved);

        if !self.settings.allow_cycles {
            failures.extend(find_cycles(&nodes, &edges));
        }

        StableGraph {
            nodes,
            edges,
            selected,
            failures,
            conflicts,
            cancelled: self.cancelled,
        }
    }
}

fn candidate_key(dependency: &DependencyMetadata) -> CandidateKey {
    (
        dependency.module.clone(),
        dependency.selector.to_string(),
        dependency.rejection.as_ref().map(ToString::to_string),
    )
}

fn render_attributes(attributes: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Highest available version the selector (and rejection) accept.
async fn find_candidate(
    chain: &RepositoryChain,
    module: &ModuleIdentity,
    selector: &VersionSelector,
    rejection: Option<&VersionSelector>,
) -> Candidate {
    let versions = match chain.list_versions(module).await {
        Ok(v) => v,
        Err(e) => return Candidate::Missing(format!("listing versions of {module} failed: {e}")),
    };
    if versions.is_empty() {
        return Candidate::Missing(format!("{module} was not found in any source"));
    }
    let mut sorted: Vec<Version> = versions.iter().map(|v| Version::parse(v)).collect();
    sorted.sort_by(|a, b| b.cmp(a));

    let needs_metadata =
        selector.requires_metadata() || rejection.is_some_and(VersionSelector::requires_metadata);
    for version in sorted {
        if !selector.accept(&version) || rejection.is_some_and(|r| !r.accept(&version)) {
            continue;
        }
        if needs_metadata {
            match chain.describe(module, &VersionSelector::Exact(version.clone())).await {
                Ok(Some(metadata)) => {
                    if !selector.accept_metadata(&metadata)
                        || rejection.is_some_and(|r| !r.accept_metadata(&metadata))
                    {
                        continue;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    return Candidate::Missing(format!(
                        "fetching metadata for {module}:{version} failed: {e}"
                    ))
                }
            }
        }
        return Candidate::Found(version);
    }
    Candidate::Missing(format!("no version of {module} matches {selector}"))
}

fn find_cycles(nodes: &[GraphNode], edges: &[GraphEdge]) -> Vec<ResolutionFailure> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let indices: Vec<_> = nodes.iter().map(|n| graph.add_node(n.index)).collect();
    for edge in edges {
        graph.add_edge(indices[edge.from], indices[edge.to], ());
    }
    let mut cycles: Vec<Vec<String>> = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<usize> = scc.iter().map(|i| graph[*i]).collect();
            members.sort_unstable();
            let mut path: Vec<String> = members.iter().map(|&i| nodes[i].component.to_string()).collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            path
        })
        .collect();
    cycles.sort();
    cycles
        .into_iter()
        .map(|path| ResolutionFailure::CyclicReference { path })
        .collect()
}
