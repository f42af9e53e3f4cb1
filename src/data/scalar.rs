//! Scalar field carried by matrices, halo buffers and the wire.

use num_traits::{Float, Zero};
use std::fmt::Debug;
use std::ops::{AddAssign, MulAssign};

/// A matrix/vector entry type.
///
/// `Pod` lets values travel as raw bytes; `Real` is the type of partition of
/// unity weights used for scaling and ownership decisions.
pub trait Scalar:
    bytemuck::Pod + Zero + AddAssign + PartialEq + Debug + Send + Sync + 'static
{
    /// Underlying real type of weights.
    type Real: Float + bytemuck::Pod + Debug + Send + Sync + 'static;

    /// Multiply in place by a real weight.
    fn scale_by(&mut self, w: Self::Real);
}

macro_rules! impl_real_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            type Real = $t;
            #[inline]
            fn scale_by(&mut self, w: $t) {
                self.mul_assign(w);
            }
        }
    )*};
}

impl_real_scalar!(f32, f64);

/// True if `w` marks a DOF this process contributes to.
#[inline]
pub(crate) fn is_owner_weight<R: Float>(w: R, threshold: f64) -> bool {
    w.to_f64().is_some_and(|w| w > threshold)
}
