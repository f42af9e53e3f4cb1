//! Communication protocols of a subdomain and the transport they run on.

pub mod assembly;
pub mod communicator;
pub mod halo;
pub mod interaction;
pub mod numbering;
pub mod requests;
pub mod wire;

pub use assembly::{DistributedCsr, distributed_csr, gather, scatter};
pub use communicator::{CommTag, Communicator, GroupRelation, SubdomainCommTags, Wait};
pub use interaction::collect_couplings;
pub use numbering::{GlobalId, GlobalNumbering, NumberingPhase, global_mapping};
pub use requests::RequestSet;
