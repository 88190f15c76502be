//! High-level operations behind the `modgraph` commands.

pub mod ops_resolve;
pub mod ops_tree;
