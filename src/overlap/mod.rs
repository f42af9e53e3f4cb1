//! Overlap module: which DOFs are duplicated on which neighbor, and how
//! duplicated values are merged.
//!
//! This module re-exports the [`neighbor_map`] and [`delta`] submodules.

pub mod delta;
pub mod neighbor_map;

pub use delta::{AddDelta, CopyDelta, Delta};
pub use neighbor_map::{Neighbor, NeighborMap};
