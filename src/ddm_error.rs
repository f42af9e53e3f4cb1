//! DdmError: unified error type for ddm-subdomain public APIs
//!
//! Every fallible public operation returns this error. Transport failures are
//! only surfaced after all in-flight requests of the current round have been
//! drained, so an `Err` never leaves a posted buffer behind.

use thiserror::Error;

/// Unified error type for subdomain operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DdmError {
    /// The local matrix must be square.
    #[error("local matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    /// A CSR array does not have the length implied by the others.
    #[error("CSR {what} has length {got}, expected {expected}")]
    CsrLengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// Row pointers must be non-decreasing.
    #[error("CSR row pointer decreases at row {row}")]
    RowPtrNotMonotone { row: usize },
    /// A column index does not fit the declared column count.
    #[error("CSR column {col} in row {row} is out of bounds (n_cols = {n_cols})")]
    ColumnOutOfBounds { row: usize, col: usize, n_cols: usize },
    /// The same neighbor rank appears twice in the adjacency list.
    #[error("neighbor rank {0} listed more than once")]
    DuplicateNeighbor(usize),
    /// A process cannot be its own neighbor.
    #[error("rank {0} lists itself as a neighbor")]
    SelfNeighbor(usize),
    /// A shared index lies outside `[0, dof)`.
    #[error("shared index {index} for neighbor {rank} is out of bounds (dof = {dof})")]
    SharedIndexOutOfBounds { rank: usize, index: usize, dof: usize },
    /// A caller-supplied slice has the wrong length.
    #[error("{what} has length {got}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// `[first, last)` is not a valid range.
    #[error("invalid ownership range [{first}, {last})")]
    InvalidRange { first: usize, last: usize },
    /// Communication with a neighbor failed.
    #[error("communication with rank {neighbor} failed: {message}")]
    CommError { neighbor: usize, message: String },
    /// A message did not have the size both ends agreed on.
    #[error("buffer size mismatch with rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// An interaction payload could not be decoded.
    #[error("malformed payload from rank {neighbor}: {message}")]
    MalformedPayload { neighbor: usize, message: String },
    /// Peer speaks another wire version.
    #[error("unsupported wire version {got} (expected {expected})")]
    WireVersion { expected: u16, got: u16 },
    /// Staging memory for an oversized payload could not be reserved.
    #[error("failed to allocate {bytes} bytes of staging memory")]
    AllocationFailed { bytes: usize },
    /// A count does not fit the 32-bit fields of the wire records.
    #[error("{what} of {len} does not fit a 32-bit wire field")]
    PayloadTooLarge { what: &'static str, len: usize },
    /// Global numbering finished with DOFs nobody claimed.
    #[error("{count} local DOFs were left without a global id")]
    UnassignedDofs { count: usize },
    /// The operation needs a local matrix, but this process was excluded.
    #[error("process is excluded from the decomposition and owns no matrix")]
    Excluded,
}
