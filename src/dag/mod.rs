// src/dag/mod.rs

//! Task trees.
//!
//! - [`task`] holds task declarations, inputs/outputs and the runtime node.
//! - [`graph`] wires a flat declaration list into a validated graph.
//! - [`control`] is the shared run-state cell used for cancel and pause.
//! - [`snapshot`] persists the in-flight stream of a paused tree.
//! - [`tree`] walks the graph one task at a time.

pub mod control;
pub mod graph;
pub mod snapshot;
pub mod task;
pub mod tree;

pub use control::RunControl;
pub use graph::{DEFAULT_EXIT_KIND, DEFAULT_FAILURE_KIND, TaskGraph, WiredNode};
pub use task::{Task, TaskConfig, TaskInput, TaskOutput, TaskStream};
pub use tree::{TaskTree, VisitOutcome};
