//! Core data types for modgraph.
//!
//! This crate defines the fundamental types shared by the resolver and its
//! callers: module and artifact coordinates, the declared-requirements
//! document, the repository fixture document, and resolver configuration.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod config;
pub mod module;
pub mod repository;
pub mod requirements;
