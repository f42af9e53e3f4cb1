//! Fixed, versioned, little-endian wire records for the interaction exchange.
//!
//! One interaction payload is laid out as
//!
//! ```text
//! WireBlockHdr | WireRun x runs | u32 col x nnz | pad to 8 | K x nnz
//! ```
//!
//! Its exact byte length follows from `(runs, nnz)` alone ([`block_len`]), so
//! once the size records have been exchanged both ends agree on every region
//! without further framing. Integers are little-endian; scalar values travel
//! in their native `Pod` layout and are read unaligned.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::ddm_error::DdmError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Record kind of an interaction block.
pub const KIND_INTERACTION: u16 = 1;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(neighbor: usize, actual: usize, expected: usize) -> Result<(), DdmError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DdmError::BufferSizeMismatch {
            neighbor,
            expected,
            got: actual,
        })
    }
}

/// `n` as a 32-bit wire field.
pub fn wire_u32(what: &'static str, n: usize) -> Result<u32, DdmError> {
    u32::try_from(n).map_err(|_| DdmError::PayloadTooLarge { what, len: n })
}

/// Size negotiation record: run count and payload byte length.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireSizes {
    pub runs_le: u32,
    pub len_le: u32,
}

impl WireSizes {
    pub fn new(runs: usize, len: usize) -> Result<Self, DdmError> {
        Ok(Self {
            runs_le: wire_u32("run count", runs)?.to_le(),
            len_le: wire_u32("payload length", len)?.to_le(),
        })
    }
    pub fn runs(&self) -> usize {
        u32::from_le(self.runs_le) as usize
    }
    pub fn len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Leading record of an interaction payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireBlockHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub runs_le: u32,
    pub nnz_le: u32,
    pub reserved_le: u32, // keep zero
}

impl WireBlockHdr {
    pub fn new(runs: usize, nnz: usize) -> Result<Self, DdmError> {
        Ok(Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: KIND_INTERACTION.to_le(),
            runs_le: wire_u32("run count", runs)?.to_le(),
            nnz_le: wire_u32("entry count", nnz)?.to_le(),
            reserved_le: 0,
        })
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn runs(&self) -> usize {
        u32::from_le(self.runs_le) as usize
    }
    pub fn nnz(&self) -> usize {
        u32::from_le(self.nnz_le) as usize
    }
}

/// One distinct row: its shared position and how many entries follow.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireRun {
    pub row_le: u32,
    pub len_le: u32,
}

impl WireRun {
    pub fn new(row: u32, len: u32) -> Self {
        Self {
            row_le: row.to_le(),
            len_le: len.to_le(),
        }
    }
    pub fn row(&self) -> u32 {
        u32::from_le(self.row_le)
    }
    pub fn len(&self) -> u32 {
        u32::from_le(self.len_le)
    }
}

const_assert_eq!(size_of::<WireSizes>(), 8);
const_assert_eq!(size_of::<WireBlockHdr>(), 16);
const_assert_eq!(size_of::<WireRun>(), 8);

#[inline]
fn cols_offset(runs: usize) -> usize {
    size_of::<WireBlockHdr>() + runs * size_of::<WireRun>()
}

#[inline]
fn values_offset(runs: usize, nnz: usize) -> usize {
    (cols_offset(runs) + nnz * size_of::<u32>()).next_multiple_of(8)
}

/// Exact byte length of a payload with `runs` rows and `nnz` entries.
///
/// An empty block (no entries) is sent as zero bytes.
#[inline]
pub fn block_len<K>(runs: usize, nnz: usize) -> usize {
    if nnz == 0 {
        0
    } else {
        values_offset(runs, nnz) + nnz * size_of::<K>()
    }
}

/// Write one payload into `out`, which must be exactly [`block_len`] long.
pub fn encode_block<K: Pod>(
    out: &mut [u8],
    runs: &[WireRun],
    cols: &[u32],
    values: &[K],
) -> Result<(), DdmError> {
    debug_assert_eq!(cols.len(), values.len());
    debug_assert_eq!(out.len(), block_len::<K>(runs.len(), values.len()));
    if values.is_empty() {
        return Ok(());
    }
    let hdr = WireBlockHdr::new(runs.len(), values.len())?;
    let mut at = 0;
    let mut put = |bytes: &[u8], at: &mut usize| {
        out[*at..*at + bytes.len()].copy_from_slice(bytes);
        *at += bytes.len();
    };
    put(bytemuck::bytes_of(&hdr), &mut at);
    put(cast_slice(runs), &mut at);
    for &c in cols {
        put(&c.to_le_bytes(), &mut at);
    }
    at = values_offset(runs.len(), values.len());
    put(cast_slice(values), &mut at);
    Ok(())
}

/// Decoded interaction payload.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBlock<K> {
    /// `(shared position, entry count)` per distinct row, in wire order.
    pub runs: Vec<(usize, usize)>,
    pub cols: Vec<u32>,
    pub values: Vec<K>,
}

impl<K> Default for DecodedBlock<K> {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// Parse a payload received from `neighbor`.
///
/// `expected_runs` comes from the size negotiation and must match the header.
pub fn decode_block<K: Pod>(
    neighbor: usize,
    bytes: &[u8],
    expected_runs: usize,
) -> Result<DecodedBlock<K>, DdmError> {
    if bytes.is_empty() {
        return Ok(DecodedBlock::default());
    }
    let malformed = |message: String| DdmError::MalformedPayload { neighbor, message };
    if bytes.len() < size_of::<WireBlockHdr>() {
        return Err(malformed(format!("{} bytes cannot hold a header", bytes.len())));
    }
    let hdr: WireBlockHdr = bytemuck::pod_read_unaligned(&bytes[..size_of::<WireBlockHdr>()]);
    if hdr.version() != WIRE_VERSION {
        return Err(DdmError::WireVersion {
            expected: WIRE_VERSION,
            got: hdr.version(),
        });
    }
    if hdr.kind() != KIND_INTERACTION {
        return Err(malformed(format!("unexpected record kind {}", hdr.kind())));
    }
    let (runs, nnz) = (hdr.runs(), hdr.nnz());
    if runs != expected_runs {
        return Err(malformed(format!(
            "header declares {runs} rows, size record {expected_runs}"
        )));
    }
    expect_exact_len(neighbor, bytes.len(), block_len::<K>(runs, nnz))?;

    let run_bytes = &bytes[size_of::<WireBlockHdr>()..cols_offset(runs)];
    let runs_out = run_bytes
        .chunks_exact(size_of::<WireRun>())
        .map(|c| {
            let r: WireRun = bytemuck::pod_read_unaligned(c);
            (r.row() as usize, r.len() as usize)
        })
        .collect();
    let col_bytes = &bytes[cols_offset(runs)..cols_offset(runs) + nnz * size_of::<u32>()];
    let cols = col_bytes
        .chunks_exact(size_of::<u32>())
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let values = bytes[values_offset(runs, nnz)..]
        .chunks_exact(size_of::<K>())
        .map(bytemuck::pod_read_unaligned)
        .collect();
    Ok(DecodedBlock {
        runs: runs_out,
        cols,
        values,
    })
}
