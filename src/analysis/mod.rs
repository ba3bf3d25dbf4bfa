//! Structural analysis of method bodies.

mod cfg;

pub use cfg::{CfgEdge, CfgEdgeKind, ControlFlowGraph};
