//! Runtime configuration of a [`Subdomain`](crate::subdomain::Subdomain).

use serde::{Deserialize, Serialize};

use crate::algs::communicator::SubdomainCommTags;
use crate::data::csr::IndexBase;

/// Default ownership cut-off of partition of unity weights.
pub const DEFAULT_OWNERSHIP_THRESHOLD: f64 = 0.1;

/// Behavior of [`interaction`](crate::algs::interaction::interaction).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionOptions {
    /// Override the matrix's own symmetry flag. When symmetric, only the
    /// stored triangle is scanned and shared rows contribute their entries
    /// toward non-shared columns.
    pub symmetric: Option<bool>,
    /// Stable-sort every received row by column.
    pub sorted: bool,
    /// Pre-multiply sent values by the weight of their column.
    pub scale: bool,
}

impl Default for InteractionOptions {
    fn default() -> Self {
        Self {
            symmetric: None,
            sorted: true,
            scale: false,
        }
    }
}

/// Behavior of [`distributed_csr`](crate::algs::assembly::distributed_csr).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyOptions {
    /// Let a full-range request with identity numbering borrow the local
    /// arrays instead of copying them.
    pub allow_alias: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubdomainConfig {
    pub tags: SubdomainCommTags,
    /// First global id handed out by the numbering.
    pub numbering_base: IndexBase,
    /// A DOF is owned when its weight is strictly above this value.
    pub ownership_threshold: f64,
    pub interaction: InteractionOptions,
    pub assembly: AssemblyOptions,
}

impl Default for SubdomainConfig {
    fn default() -> Self {
        Self {
            tags: SubdomainCommTags::default(),
            numbering_base: IndexBase::Zero,
            ownership_threshold: DEFAULT_OWNERSHIP_THRESHOLD,
            interaction: InteractionOptions::default(),
            assembly: AssemblyOptions::default(),
        }
    }
}

impl SubdomainConfig {
    pub fn with_tags(mut self, tags: SubdomainCommTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_numbering_base(mut self, base: IndexBase) -> Self {
        self.numbering_base = base;
        self
    }

    pub fn with_interaction(mut self, opts: InteractionOptions) -> Self {
        self.interaction = opts;
        self
    }

    pub fn with_assembly(mut self, opts: AssemblyOptions) -> Self {
        self.assembly = opts;
        self
    }
}
