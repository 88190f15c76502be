//! The resolved dependency graph and its traversals.

use std::collections::{HashMap, HashSet};
use std::fmt;

use modgraph_core::module::{ComponentId, ModuleIdentity};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::metadata::Status;

/// A component in the resolved graph.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResolvedComponent {
    pub id: ComponentId,
    pub variant: String,
    pub status: Status,
}

impl ResolvedComponent {
    /// `group:name` identifier (without version).
    pub fn key(&self) -> String {
        self.id.module.to_string()
    }
}

impl fmt::Display for ResolvedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Edge label: what the requester asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub requested: String,
    pub forced: bool,
}

/// The final graph. Only the visitor pipeline builds one; afterwards it is
/// read-only.
#[derive(Debug)]
pub struct ResolutionResult {
    graph: DiGraph<ResolvedComponent, ResolvedDependency>,
    /// Lookup from `group:name` to the first node of that module.
    index: HashMap<String, NodeIndex>,
    root: Option<NodeIndex>,
    cancelled: bool,
}

impl ResolutionResult {
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            root: None,
            cancelled: false,
        }
    }

    pub(crate) fn add_node(&mut self, component: ResolvedComponent) -> NodeIndex {
        let key = component.key();
        let idx = self.graph.add_node(component);
        self.index.entry(key).or_insert(idx);
        idx
    }

    pub(crate) fn set_root(&mut self, idx: NodeIndex) {
        self.root = Some(idx);
    }

    pub(crate) fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    /// Add a dependency edge. A requester may reach the same component
    /// through several declarations; each distinct request keeps its own
    /// edge, identical ones are stored once.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: ResolvedDependency) {
        let known = self
            .graph
            .edges(from)
            .any(|e| e.target() == to && *e.weight() == edge);
        if !known {
            self.graph.add_edge(from, to, edge);
        }
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    /// Whether resolution stopped early. The graph then holds only what was
    /// known at that point.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Look up a node by `group:name`.
    pub fn find(&self, key: &str) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    pub fn contains(&self, module: &ModuleIdentity) -> bool {
        self.index.contains_key(&module.to_string())
    }

    /// Selected version of a module, if it is in the graph.
    pub fn version_of(&self, module: &ModuleIdentity) -> Option<&str> {
        self.find(&module.to_string())
            .map(|idx| self.graph[idx].id.version.as_str())
    }

    pub fn node(&self, idx: NodeIndex) -> &ResolvedComponent {
        &self.graph[idx]
    }

    /// All resolved components (excluding root), in resolution order.
    pub fn components(&self) -> Vec<&ResolvedComponent> {
        self.graph
            .node_indices()
            .filter(|&idx| Some(idx) != self.root)
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &ResolvedDependency)> {
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect();
        // petgraph yields edges newest first
        deps.sort_by_key(|(t, _)| t.index());
        deps
    }

    /// Reverse dependencies (who depends on this node).
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &ResolvedDependency)> {
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect();
        deps.sort_by_key(|(s, _)| s.index());
        deps
    }

    /// Render the tree below the root. Requests that resolved to a different
    /// version are shown as `requested -> selected`.
    pub fn print_tree(&self, max_depth: Option<usize>) -> String {
        let mut output = String::new();
        let Some(root) = self.root else {
            return output;
        };
        output.push_str(&format!("{}\n", self.graph[root]));
        if self.cancelled {
            output.push_str("(incomplete: resolution was cancelled)\n");
        }

        let mut visited = HashSet::new();
        visited.insert(root);
        let deps = self.dependencies_of(root);
        let count = deps.len();
        for (i, (idx, edge)) in deps.iter().enumerate() {
            let line = Line {
                idx: *idx,
                edge: Some(*edge),
                is_last: i == count - 1,
            };
            self.print_subtree(&mut output, line, "", 1, max_depth, &mut visited);
        }
        output
    }

    fn print_subtree(
        &self,
        output: &mut String,
        line: Line<'_>,
        prefix: &str,
        depth: usize,
        max_depth: Option<usize>,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if line.is_last { "└── " } else { "├── " };
        let node = &self.graph[line.idx];
        output.push_str(&format!("{prefix}{connector}{}\n", label(node, line.edge)));

        if max_depth.is_some_and(|max| depth >= max) {
            return;
        }
        if !visited.insert(line.idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if line.is_last { "    " } else { "│   " });
        let deps = self.dependencies_of(line.idx);
        let count = deps.len();
        for (i, (child, edge)) in deps.iter().enumerate() {
            let child = Line {
                idx: *child,
                edge: Some(*edge),
                is_last: i == count - 1,
            };
            self.print_subtree(output, child, &child_prefix, depth + 1, max_depth, visited);
        }
        visited.remove(&line.idx);
    }

    /// Find the path from root to a component.
    ///
    /// Accepts either `group:name` or just `name`.
    pub fn find_path(&self, target_key: &str) -> Option<Vec<&ResolvedComponent>> {
        let root = self.root?;
        let target = self.resolve_key(target_key)?;
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.dfs_path(root, target, &mut path, &mut visited) {
            Some(path.iter().map(|&idx| &self.graph[idx]).collect())
        } else {
            None
        }
    }

    /// Exact `group:name` first, then the first node (in resolution order)
    /// whose name matches.
    fn resolve_key(&self, key: &str) -> Option<NodeIndex> {
        if let Some(&idx) = self.index.get(key) {
            return Some(idx);
        }
        self.graph
            .node_indices()
            .find(|&idx| self.graph[idx].id.module.name == key)
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for (next, _) in self.dependencies_of(current) {
            if self.dfs_path(next, target, path, visited) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Inverted tree (reverse edges) for one component.
    pub fn print_inverted_tree(&self, target_key: &str) -> String {
        let mut output = String::new();
        let Some(idx) = self.resolve_key(target_key) else {
            return output;
        };
        output.push_str(&format!("{}\n", self.graph[idx]));

        let mut visited = HashSet::new();
        visited.insert(idx);
        let dependents = self.dependents_of(idx);
        let count = dependents.len();
        for (i, (dep_idx, edge)) in dependents.iter().enumerate() {
            let line = Line {
                idx: *dep_idx,
                edge: Some(*edge),
                is_last: i == count - 1,
            };
            self.print_inverted_subtree(&mut output, line, "", &mut visited);
        }
        output
    }

    fn print_inverted_subtree(
        &self,
        output: &mut String,
        line: Line<'_>,
        prefix: &str,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if line.is_last { "└── " } else { "├── " };
        let node = &self.graph[line.idx];
        let asked = line
            .edge
            .map(|e| format!(" (requested {})", e.requested))
            .unwrap_or_default();
        output.push_str(&format!("{prefix}{connector}{node}{asked}\n"));

        if !visited.insert(line.idx) {
            return;
        }
        let child_prefix = format!("{prefix}{}", if line.is_last { "    " } else { "│   " });
        let dependents = self.dependents_of(line.idx);
        let count = dependents.len();
        for (i, (dep_idx, edge)) in dependents.iter().enumerate() {
            let next = Line {
                idx: *dep_idx,
                edge: Some(*edge),
                is_last: i == count - 1,
            };
            self.print_inverted_subtree(output, next, &child_prefix, visited);
        }
        visited.remove(&line.idx);
    }

    /// Number of components (excluding root).
    pub fn len(&self) -> usize {
        let total = self.graph.node_count();
        if self.root.is_some() {
            total.saturating_sub(1)
        } else {
            total
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Line<'a> {
    idx: NodeIndex,
    edge: Option<&'a ResolvedDependency>,
    is_last: bool,
}

fn label(node: &ResolvedComponent, edge: Option<&ResolvedDependency>) -> String {
    let mut out = node.to_string();
    if let Some(edge) = edge {
        let requested = edge.requested.rsplit_once(':').map_or("", |(_, v)| v);
        if requested != node.id.version {
            out = format!("{}:{} -> {}", node.id.module, requested, node.id.version);
        }
        if edge.forced {
            out.push_str(" (forced)");
        }
    }
    out
}
