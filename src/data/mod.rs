//! Data module: CSR storage, scalar field and the communication arena

pub mod buffer_pool;
pub mod csr;
pub mod scalar;

pub use buffer_pool::{BufferPool, BufferView, Staging};
pub use csr::{CsrMatrix, IndexBase};
pub use scalar::Scalar;
