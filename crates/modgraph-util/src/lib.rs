//! Shared utilities for modgraph.
//!
//! Cross-cutting concerns used by the other crates: the unified error type
//! and terminal status/progress helpers.

pub mod errors;
pub mod progress;
