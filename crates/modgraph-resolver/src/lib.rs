//! Dependency resolution engine.
//!
//! Version selectors, the exclude algebra and per-module conflict resolution
//! feed a lazily expanded dependency graph. Once the graph is stable, a
//! visitor pipeline turns it into a [`graph::ResolutionResult`] and lazy
//! artifact sets whose files are collected without failing fast.

pub mod artifacts;
pub mod builder;
pub mod cache;
pub mod conflict;
pub mod excludes;
pub mod failure;
pub mod graph;
pub mod metadata;
pub mod resolver;
pub mod selector;
pub mod source;
pub mod substitution;
pub mod version;
pub mod visitor;
