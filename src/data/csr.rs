//! Compressed sparse row storage for the local subdomain matrix.
//!
//! Row pointers and column indices are stored in the matrix's own
//! [`IndexBase`]; [`CsrMatrix::row`] always yields 0-based columns so
//! algorithms never have to care which convention the caller used.

use serde::{Deserialize, Serialize};

use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;
use crate::debug_invariants::DebugInvariants;

/// 0- or 1-based indexing of CSR arrays and global ids.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexBase {
    #[default]
    Zero,
    One,
}

impl IndexBase {
    /// Numeric offset of the first index.
    #[inline]
    pub const fn offset(self) -> usize {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

/// Square or rectangular sparse matrix in CSR layout.
///
/// When `symmetric` is set only one triangle is stored and consumers scan the
/// stored triangle only.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix<K> {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<K>,
    symmetric: bool,
    base: IndexBase,
}

impl<K: Scalar> CsrMatrix<K> {
    /// Build from raw CSR arrays, validating their shape.
    pub fn try_new(
        n_rows: usize,
        n_cols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<K>,
        symmetric: bool,
        base: IndexBase,
    ) -> Result<Self, DdmError> {
        Self {
            n_rows,
            n_cols,
            row_ptr,
            col_idx,
            values,
            symmetric,
            base,
        }
        .checked()
    }

    /// Assemble a 0-based matrix from `(row, col, value)` triplets.
    ///
    /// Entries keep their input order within a row; duplicates are kept as
    /// separate explicit nonzeros.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        triplets: &[(usize, usize, K)],
        symmetric: bool,
    ) -> Result<Self, DdmError> {
        let mut row_ptr = vec![0usize; n_rows + 1];
        for &(r, c, _) in triplets {
            if r >= n_rows || c >= n_cols {
                return Err(DdmError::ColumnOutOfBounds {
                    row: r,
                    col: c,
                    n_cols,
                });
            }
            row_ptr[r + 1] += 1;
        }
        for i in 0..n_rows {
            row_ptr[i + 1] += row_ptr[i];
        }
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; triplets.len()];
        let mut values = vec![K::zero(); triplets.len()];
        for &(r, c, v) in triplets {
            col_idx[next[r]] = c;
            values[next[r]] = v;
            next[r] += 1;
        }
        Self::try_new(
            n_rows,
            n_cols,
            row_ptr,
            col_idx,
            values,
            symmetric,
            IndexBase::Zero,
        )
    }

    /// `n x n` identity matrix.
    pub fn identity(n: usize) -> Self
    where
        K: num_traits::One,
    {
        Self {
            n_rows: n,
            n_cols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![K::one(); n],
            symmetric: false,
            base: IndexBase::Zero,
        }
    }

    /// Empty `n_rows x n_cols` matrix with room for `nnz` entries.
    ///
    /// Used when the row pointers are filled in afterwards by a decoder.
    pub(crate) fn zeroed(n_rows: usize, n_cols: usize, nnz: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            row_ptr: vec![0; n_rows + 1],
            col_idx: vec![0; nnz],
            values: vec![K::zero(); nnz],
            symmetric: false,
            base: IndexBase::Zero,
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
    #[inline]
    pub fn is_square(&self) -> bool {
        self.n_rows == self.n_cols
    }
    #[inline]
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }
    #[inline]
    pub fn base(&self) -> IndexBase {
        self.base
    }

    /// Raw row pointers in the matrix's own base.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }
    /// Raw column indices in the matrix's own base.
    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }
    pub fn values(&self) -> &[K] {
        &self.values
    }

    /// Position range of row `i` inside `col_idx`/`values` (0-based positions).
    #[inline]
    pub fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        let off = self.base.offset();
        (self.row_ptr[i] - off)..(self.row_ptr[i + 1] - off)
    }

    /// Iterate `(raw_position, col, value)` of row `i`, columns 0-based.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, usize, K)> + '_ {
        let off = self.base.offset();
        self.row_range(i)
            .map(move |j| (j, self.col_idx[j] - off, self.values[j]))
    }

    /// 0-based column of the entry stored at raw position `j`.
    #[inline]
    pub fn col_at(&self, j: usize) -> usize {
        self.col_idx[j] - self.base.offset()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut [usize], &mut [usize], &mut [K]) {
        (&mut self.row_ptr, &mut self.col_idx, &mut self.values)
    }
}

impl<K: Scalar> DebugInvariants for CsrMatrix<K> {
    fn validate_invariants(&self) -> Result<(), DdmError> {
        if self.row_ptr.len() != self.n_rows + 1 {
            return Err(DdmError::CsrLengthMismatch {
                what: "row_ptr",
                expected: self.n_rows + 1,
                got: self.row_ptr.len(),
            });
        }
        if self.col_idx.len() != self.values.len() {
            return Err(DdmError::CsrLengthMismatch {
                what: "col_idx",
                expected: self.values.len(),
                got: self.col_idx.len(),
            });
        }
        let off = self.base.offset();
        if self.row_ptr[0] != off {
            return Err(DdmError::RowPtrNotMonotone { row: 0 });
        }
        for (row, w) in self.row_ptr.windows(2).enumerate() {
            if w[1] < w[0] {
                return Err(DdmError::RowPtrNotMonotone { row });
            }
        }
        let end = self.row_ptr[self.n_rows] - off;
        if end != self.values.len() {
            return Err(DdmError::CsrLengthMismatch {
                what: "values",
                expected: end,
                got: self.values.len(),
            });
        }
        for row in 0..self.n_rows {
            for j in self.row_range(row) {
                let c = self.col_idx[j];
                if c < off || c - off >= self.n_cols {
                    return Err(DdmError::ColumnOutOfBounds {
                        row,
                        col: c,
                        n_cols: self.n_cols,
                    });
                }
            }
        }
        Ok(())
    }
}
