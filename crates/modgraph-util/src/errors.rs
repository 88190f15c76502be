use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all modgraph operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ModgraphError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or malformed requirements or repository document.
    #[error("Manifest error: {message}")]
    #[diagnostic(help("Check the TOML document for syntax errors"))]
    Manifest { message: String },

    /// Invalid resolver configuration.
    #[error("Config error: {message}")]
    Config { message: String },

    /// A version notation could not be parsed.
    #[error("Invalid version notation '{notation}': {reason}")]
    #[diagnostic(help("Use an exact version, a range like [1.0,2.0), a prefix like 1.+, or latest.<status>"))]
    Notation { notation: String, reason: String },

    /// An exclude or substitution pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Dependency resolution failed as a whole.
    #[error("Dependency resolution failed: {message}")]
    Resolution { message: String },

    /// The graph kept switching selections and never stabilized.
    #[error("Dependency graph did not stabilize: {module} was re-selected {count} times")]
    #[diagnostic(help("Pin the module with a forced version or a substitution rule"))]
    UnstableGraph { module: String, count: u32 },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type ModgraphResult<T> = miette::Result<T>;
