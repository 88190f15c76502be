//! Operation: display the dependency tree.

use crate::ops_resolve::{self, ResolveInputs};

/// Options for `modgraph tree` and `modgraph why`.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Maximum tree depth to display.
    pub depth: Option<usize>,
    /// Show how a module is reached instead of the whole tree.
    pub why: Option<String>,
    /// Show version conflicts.
    pub conflicts: bool,
}

/// Display the dependency tree for the requirements.
pub async fn tree(inputs: &ResolveInputs, opts: &TreeOptions) -> miette::Result<()> {
    let (resolution, mode) = ops_resolve::run(inputs, false).await?;
    let graph = &resolution.result;

    if let Some(ref target) = opts.why {
        match graph.find_path(target) {
            Some(path) => {
                println!("Path to {target}:");
                for (i, node) in path.iter().enumerate() {
                    let indent = "  ".repeat(i);
                    println!("{indent}{node}");
                }
                println!();
                print!("{}", graph.print_inverted_tree(target));
            }
            None => println!("Dependency '{target}' not found in the graph."),
        }
        return Ok(());
    }

    if opts.conflicts {
        print!("{}", resolution.conflicts);
        if resolution.conflicts.is_empty() {
            println!();
        }
        return Ok(());
    }

    print!("{}", graph.print_tree(opts.depth));
    if !resolution.failures.is_empty() {
        println!();
        println!("Failures ({}):", resolution.failures.len());
        for failure in resolution.failures.iter() {
            println!("  {failure}");
        }
    }
    Ok(resolution.check(mode)?)
}
