//! Visitors over the stabilized graph.
//!
//! [`walk`] calls `start`, then `visit_node` for every node, then
//! `visit_edge` for every edge, then `finish`, always in the graph's
//! deterministic order.

use std::collections::HashMap;
use std::path::PathBuf;

use modgraph_core::module::ArtifactName;
use petgraph::graph::NodeIndex;

use crate::artifacts::{ArtifactSelector, ArtifactSet};
use crate::builder::{GraphEdge, GraphNode, StableGraph};
use crate::graph::{ResolutionResult, ResolvedComponent, ResolvedDependency};

pub trait DependencyGraphVisitor {
    fn start(&mut self, _root: &GraphNode) {}

    fn visit_node(&mut self, _node: &GraphNode) {}

    fn visit_edge(&mut self, _from: &GraphNode, _edge: &GraphEdge, _to: &GraphNode) {}

    fn finish(&mut self, _root: &GraphNode) {}
}

/// Drive a visitor over the graph.
pub fn walk(graph: &StableGraph, visitor: &mut dyn DependencyGraphVisitor) {
    let root = graph.root();
    visitor.start(root);
    for node in &graph.nodes {
        visitor.visit_node(node);
    }
    for edge in &graph.edges {
        visitor.visit_edge(&graph.nodes[edge.from], edge, &graph.nodes[edge.to]);
    }
    visitor.finish(root);
}

/// Forwards every call to each visitor in order.
#[derive(Default)]
pub struct CompositeGraphVisitor<'a> {
    visitors: Vec<&'a mut dyn DependencyGraphVisitor>,
}

impl<'a> CompositeGraphVisitor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, visitor: &'a mut dyn DependencyGraphVisitor) -> Self {
        self.visitors.push(visitor);
        self
    }
}

impl DependencyGraphVisitor for CompositeGraphVisitor<'_> {
    fn start(&mut self, root: &GraphNode) {
        for v in &mut self.visitors {
            v.start(root);
        }
    }

    fn visit_node(&mut self, node: &GraphNode) {
        for v in &mut self.visitors {
            v.visit_node(node);
        }
    }

    fn visit_edge(&mut self, from: &GraphNode, edge: &GraphEdge, to: &GraphNode) {
        for v in &mut self.visitors {
            v.visit_edge(from, edge, to);
        }
    }

    fn finish(&mut self, root: &GraphNode) {
        for v in &mut self.visitors {
            v.finish(root);
        }
    }
}

/// Builds the [`ResolutionResult`].
pub struct ResolutionResultBuilder {
    result: ResolutionResult,
    indices: HashMap<usize, NodeIndex>,
}

impl ResolutionResultBuilder {
    pub fn new(cancelled: bool) -> Self {
        let mut result = ResolutionResult::new();
        result.set_cancelled(cancelled);
        Self {
            result,
            indices: HashMap::new(),
        }
    }

    pub fn into_result(self) -> ResolutionResult {
        self.result
    }
}

impl DependencyGraphVisitor for ResolutionResultBuilder {
    fn visit_node(&mut self, node: &GraphNode) {
        let idx = self.result.add_node(ResolvedComponent {
            id: node.component.clone(),
            variant: node.variant.clone(),
            status: node.metadata.status,
        });
        if node.is_root() {
            self.result.set_root(idx);
        }
        self.indices.insert(node.index, idx);
    }

    fn visit_edge(&mut self, from: &GraphNode, edge: &GraphEdge, to: &GraphNode) {
        if let (Some(&a), Some(&b)) = (self.indices.get(&from.index), self.indices.get(&to.index)) {
            self.result.add_edge(
                a,
                b,
                ResolvedDependency {
                    requested: edge.dependency.to_string(),
                    forced: edge.dependency.forced,
                },
            );
        }
    }
}

#[derive(Default)]
struct Requested {
    variant_artifacts: bool,
    explicit: Vec<ArtifactName>,
}

/// Collects the lazy artifact sets of every node, root local files first.
///
/// A node contributes its variant's artifacts if any incoming edge asks for
/// them, plus every artifact named explicitly on an incoming edge.
pub struct ArtifactSetCollector {
    selector: ArtifactSelector,
    local_files: Vec<PathBuf>,
    nodes: Vec<GraphNode>,
    requested: HashMap<usize, Requested>,
    sets: Vec<ArtifactSet>,
}

impl ArtifactSetCollector {
    pub fn new(selector: ArtifactSelector, local_files: Vec<PathBuf>) -> Self {
        Self {
            selector,
            local_files,
            nodes: Vec::new(),
            requested: HashMap::new(),
            sets: Vec::new(),
        }
    }

    pub fn into_set(self) -> ArtifactSet {
        ArtifactSet::composite(self.sets)
    }
}

impl DependencyGraphVisitor for ArtifactSetCollector {
    fn visit_node(&mut self, node: &GraphNode) {
        if !node.is_root() {
            self.nodes.push(node.clone());
        }
    }

    fn visit_edge(&mut self, _from: &GraphNode, edge: &GraphEdge, to: &GraphNode) {
        let entry = self.requested.entry(to.index).or_default();
        if edge.dependency.artifacts.is_empty() {
            entry.variant_artifacts = true;
        }
        for artifact in &edge.dependency.artifacts {
            if !entry.explicit.contains(artifact) {
                entry.explicit.push(artifact.clone());
            }
        }
    }

    fn finish(&mut self, _root: &GraphNode) {
        self.sets.push(self.selector.resolve_local_files(&self.local_files));
        for node in &self.nodes {
            let Some(requested) = self.requested.get(&node.index) else {
                continue;
            };
            if requested.variant_artifacts {
                self.sets.push(self.selector.resolve_component(node));
            }
            if !requested.explicit.is_empty() {
                self.sets
                    .push(self.selector.resolve_explicit(node, &requested.explicit));
            }
        }
    }
}
