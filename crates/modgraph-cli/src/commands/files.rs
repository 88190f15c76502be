//! Handler for `modgraph files`.

use miette::Result;

use modgraph_ops::ops_resolve::{self, ResolveInputs};

pub async fn exec(inputs: ResolveInputs) -> Result<()> {
    ops_resolve::files(&inputs).await
}
