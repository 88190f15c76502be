//! Handler for `modgraph tree`.

use miette::Result;

use modgraph_ops::ops_resolve::ResolveInputs;
use modgraph_ops::ops_tree::{self, TreeOptions};

pub async fn exec(inputs: ResolveInputs, depth: Option<u32>, conflicts: bool) -> Result<()> {
    let opts = TreeOptions {
        depth: depth.map(|d| d as usize),
        why: None,
        conflicts,
    };
    ops_tree::tree(&inputs, &opts).await
}
