//! CLI argument definitions for modgraph.
//!
//! Uses `clap` derive macros. Each command corresponds to a handler in the
//! [`super::commands`] module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "modgraph",
    version,
    about = "Resolve module dependency graphs",
    long_about = "modgraph resolves declared module requirements against a repository \
                  description: version selection, exclusions, conflict resolution and \
                  artifact file collection."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where the requirements, repository and artifacts come from.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Declared-requirements document
    #[arg(short, long, default_value = "requirements.toml")]
    pub requirements: PathBuf,
    /// Repository document describing available components
    #[arg(long, default_value = "repository.toml")]
    pub repository: PathBuf,
    /// Directory holding artifact files (<group path>/<name>/<version>/<file>)
    #[arg(long)]
    pub artifacts: Option<PathBuf>,
    /// Config file (defaults to ~/.modgraph/config.toml)
    #[arg(long, env = "MODGRAPH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Exit with an error if anything failed to resolve
    #[arg(long)]
    pub strict: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the requirements and list the selected components
    Resolve {
        #[command(flatten)]
        inputs: InputArgs,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display the dependency tree
    Tree {
        #[command(flatten)]
        inputs: InputArgs,
        /// Maximum depth
        #[arg(long)]
        depth: Option<u32>,
        /// Show version conflicts
        #[arg(long)]
        conflicts: bool,
    },

    /// Explain why a module is in the graph
    Why {
        /// Module as group:name or just name
        module: String,
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Fetch artifacts and list the resolved files
    Files {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

/// Parse command-line arguments.
pub fn parse() -> Cli {
    Cli::parse()
}
