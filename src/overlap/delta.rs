//! Delta trait: rules for merging a neighbor's copy of a duplicated DOF

/// *Delta* decides how an incoming neighbor value lands on the local one.
///
/// Halo exchange completes neighbors in arbitrary order, so a rule used there
/// must give the same result whatever order the fragments arrive in.
pub trait Delta<V> {
    /// Merge an incoming fragment into the local value.
    fn fuse(local: &mut V, incoming: V);
}

/// Overwrite the local value with the incoming one.
///
/// Only order-independent when at most one neighbor shares each DOF.
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyDelta;

impl<V> Delta<V> for CopyDelta {
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }
}

/// Additive delta: duplicated DOFs become the sum of all contributions.
#[derive(Copy, Clone, Debug, Default)]
pub struct AddDelta;

impl<V> Delta<V> for AddDelta
where
    V: std::ops::AddAssign,
{
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local += incoming;
    }
}
