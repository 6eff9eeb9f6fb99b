//! The three graph levels: nodes, scnodes, clusters.
//!
//! A node is one top-level declaration-unit; the scnode graph condenses
//! its strongly connected components; clusters partition the nodes into
//! prospective subpackages. All three are arenas indexed by integer ids
//! (see `types`), with adjacency kept as ordered id sets.

pub mod cluster;
pub mod node;
pub mod scc;

pub use cluster::{Cluster, Partition, RESIDUE};
pub use node::{Node, NodeGraph};
pub use scc::{ScGraph, ScNode};
