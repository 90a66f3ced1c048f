//! mason-lib: the build engine behind the `mason` monorepo orchestrator.
//!
//! This crate provides the core machinery:
//! - `workspace`: the scanned repository model (components, packages, sources)
//! - `plan`: dependency graph, version computation, cache-annotated build plans
//! - `cache`: local filesystem cache and the remote artifact cache protocol
//! - `build`: the bounded-concurrency, dependency-ordered build executor
//! - `watch`: debounced source change notification for incremental rebuilds
//! - `report`: build lifecycle event sinks

pub mod build;
pub mod cache;
pub mod consts;
pub mod plan;
pub mod report;
pub mod util;
pub mod watch;
pub mod workspace;
