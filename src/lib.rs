//! node-forge-compute: compiles artist-authored node graphs describing
//! per-element GPU work into ordered compute graphs.
//!
//! The input is an immutable [`graph::Program`] snapshot — nodes with typed
//! pins and capability sets, links, loop terminal pairs, subgraph references.
//! The output is one [`compute_graph::ComputeGraph`] per execution phase:
//! an ordered kernel invocation list, the data providers they bind, and one
//! typed edge per kernel parameter slot. Editing, persistence, and the
//! execution engine live elsewhere; this crate is only the compiler between
//! them.

pub mod compiler;
pub mod compute_graph;
pub mod diag;
pub mod graph;
pub mod kernel;
pub mod provider;
pub mod types;
pub mod wgsl;

pub use compiler::{CompileOutput, Compiler, CompilerConfig, ValueDescription};
pub use compute_graph::{BoundProvider, ComputeGraph, GraphEdge};
pub use diag::{CompileStatus, Diagnostic, DiagnosticLevel};
