//! Handler for `modgraph why`.

use miette::Result;

use modgraph_ops::ops_resolve::ResolveInputs;
use modgraph_ops::ops_tree::{self, TreeOptions};

pub async fn exec(inputs: ResolveInputs, module: String) -> Result<()> {
    let opts = TreeOptions {
        why: Some(module),
        ..Default::default()
    };
    ops_tree::tree(&inputs, &opts).await
}
