//! Command dispatch and handler modules.

mod files;
mod resolve;
mod tree;
mod why;

use miette::Result;
use modgraph_ops::ops_resolve::ResolveInputs;

use crate::cli::{Cli, Command, InputArgs};

/// Route a parsed CLI invocation to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Resolve { inputs, json } => resolve::exec(inputs.into(), json).await,
        Command::Tree {
            inputs,
            depth,
            conflicts,
        } => tree::exec(inputs.into(), depth, conflicts).await,
        Command::Why { module, inputs } => why::exec(inputs.into(), module).await,
        Command::Files { inputs } => files::exec(inputs.into()).await,
    }
}

impl From<InputArgs> for ResolveInputs {
    fn from(args: InputArgs) -> Self {
        ResolveInputs {
            requirements: args.requirements,
            repository: args.repository,
            artifacts: args.artifacts,
            config: args.config,
            strict: args.strict,
        }
    }
}
