//! Handler for `modgraph resolve`.

use miette::Result;

use modgraph_ops::ops_resolve::{self, ResolveInputs, ResolveOptions};

pub async fn exec(inputs: ResolveInputs, json: bool) -> Result<()> {
    ops_resolve::resolve(&ResolveOptions { inputs, json }).await
}
