//! Structural invariant checks for CSR matrices, neighbor maps and buffer pools.

use crate::ddm_error::DdmError;

/// Types whose internal consistency can be validated on demand.
pub trait DebugInvariants {
    /// Validate invariants and return the first violation found.
    fn validate_invariants(&self) -> Result<(), DdmError>;

    /// Panic on a violated invariant in debug builds, or when
    /// `check-invariants` / `strict-invariants` is enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "structure check failed");
    }

    /// Validate and hand `self` back, for builder-style construction.
    fn checked(self) -> Result<Self, DdmError>
    where
        Self: Sized,
    {
        self.validate_invariants()?;
        Ok(self)
    }
}

/// Run a fallible check and panic with context when invariant checking is on.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
