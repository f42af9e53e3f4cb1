#![cfg_attr(docsrs, feature(doc_cfg))]
//! # ddm-subdomain
//!
//! ddm-subdomain is the communication and global-indexing core of a
//! domain-decomposition solver. Each process owns one subdomain: a local
//! sparse matrix plus the list of DOFs it shares with neighboring
//! subdomains. On top of that the crate provides
//!
//! - halo exchange: sum (or otherwise merge) values on duplicated DOFs;
//! - interaction blocks: exchange the matrix entries coupling local DOFs to
//!   each neighbor's shared DOFs;
//! - global numbering: a rank-ordered distributed prefix sum giving every DOF
//!   one process-wide id, contiguous per process;
//! - distributed assembly: renumber local CSR matrices and vectors into a
//!   contiguous owned range for an external distributed solver.
//!
//! ## Transports
//! Protocols are written against the [`Communicator`](algs::communicator::Communicator)
//! trait. [`NoComm`](algs::communicator::NoComm) serves single-process runs,
//! [`LocalComm`](algs::communicator::LocalComm) runs ranks as threads of one
//! process (tests, demos), and `MpiComm` is available with the `mpi-support`
//! feature.
//!
//! ```toml
//! [dependencies]
//! ddm-subdomain = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ## Determinism
//! Receives complete in arrival order. Halo merges with [`AddDelta`](overlap::delta::AddDelta)
//! are order-independent up to floating-point rounding; numbering and
//! interaction blocks are fully deterministic.

pub mod algs;
pub mod config;
pub mod data;
pub mod ddm_error;
pub mod debug_invariants;
pub mod overlap;
pub mod subdomain;

pub use ddm_error::DdmError;
pub use debug_invariants::DebugInvariants;
pub use subdomain::Subdomain;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::assembly::DistributedCsr;
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        CommTag, Communicator, GroupRelation, LocalComm, LocalUniverse, NoComm, SubdomainCommTags,
        Wait,
    };
    pub use crate::algs::numbering::{GlobalId, GlobalNumbering};
    pub use crate::config::{AssemblyOptions, InteractionOptions, SubdomainConfig};
    pub use crate::data::csr::{CsrMatrix, IndexBase};
    pub use crate::data::scalar::Scalar;
    pub use crate::ddm_error::DdmError;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::overlap::delta::{AddDelta, CopyDelta, Delta};
    pub use crate::overlap::neighbor_map::{Neighbor, NeighborMap};
    pub use crate::subdomain::Subdomain;
}
