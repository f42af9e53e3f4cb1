//! Repartition local CSR matrices and vectors into a globally numbered,
//! contiguous ownership range for an external distributed solver.
//!
//! Results borrow the local arrays only when the caller allows aliasing and
//! the request is a no-op: full local range, identity numbering, 0-based
//! storage. Otherwise they own fresh arrays.

use std::borrow::Cow;
use std::ops::Range;

use crate::algs::numbering::GlobalNumbering;
use crate::config::AssemblyOptions;
use crate::data::csr::{CsrMatrix, IndexBase};
use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;

/// Rows `[first, last)` of the global matrix held by this process, 0-based
/// row pointers, columns as global ids sorted within each row.
#[derive(Clone, Debug, PartialEq)]
pub struct DistributedCsr<'a, K: Clone> {
    first: usize,
    n_rows: usize,
    row_ptr: Cow<'a, [usize]>,
    col_idx: Cow<'a, [usize]>,
    values: Cow<'a, [K]>,
}

impl<'a, K: Clone> DistributedCsr<'a, K> {
    /// Global id of the first row.
    pub fn first(&self) -> usize {
        self.first
    }
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }
    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }
    pub fn values(&self) -> &[K] {
        &self.values
    }

    /// True if the arrays alias the local matrix.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.values, Cow::Borrowed(_))
    }

    /// Detach from the local matrix.
    pub fn into_owned(self) -> DistributedCsr<'static, K> {
        DistributedCsr {
            first: self.first,
            n_rows: self.n_rows,
            row_ptr: Cow::Owned(self.row_ptr.into_owned()),
            col_idx: Cow::Owned(self.col_idx.into_owned()),
            values: Cow::Owned(self.values.into_owned()),
        }
    }
}

fn check_range(first: usize, last: usize) -> Result<Range<usize>, DdmError> {
    if first > last {
        return Err(DdmError::InvalidRange { first, last });
    }
    Ok(first..last)
}

fn check_numbering(numbering: &GlobalNumbering, n: usize, what: &'static str) -> Result<(), DdmError> {
    if numbering.ids().len() != n {
        return Err(DdmError::LengthMismatch {
            what,
            expected: numbering.ids().len(),
            got: n,
        });
    }
    Ok(())
}

/// A request that changes nothing and may alias the caller's arrays.
fn is_passthrough(
    numbering: &GlobalNumbering,
    range: &Range<usize>,
    n: usize,
    opts: &AssemblyOptions,
) -> bool {
    opts.allow_alias
        && numbering.base() == IndexBase::Zero
        && *range == (0..n)
        && numbering.is_identity()
}

/// Keep the rows of `matrix` whose global id lies in `[first, last)`.
///
/// Row `r` of the result is global row `first + r`; rows with no local
/// counterpart stay empty. Columns are renumbered through `numbering` and
/// each row is stable-sorted by column.
pub fn distributed_csr<'a, K: Scalar>(
    numbering: &GlobalNumbering,
    first: usize,
    last: usize,
    matrix: &'a CsrMatrix<K>,
    opts: &AssemblyOptions,
) -> Result<DistributedCsr<'a, K>, DdmError> {
    let range = check_range(first, last)?;
    check_numbering(numbering, matrix.n_rows(), "matrix rows")?;
    if !matrix.is_square() {
        return Err(DdmError::NotSquare {
            rows: matrix.n_rows(),
            cols: matrix.n_cols(),
        });
    }

    if matrix.base() == IndexBase::Zero && is_passthrough(numbering, &range, matrix.n_rows(), opts) {
        log::debug!("distributed_csr: aliasing {} local rows", matrix.n_rows());
        return Ok(DistributedCsr {
            first,
            n_rows: matrix.n_rows(),
            row_ptr: Cow::Borrowed(matrix.row_ptr()),
            col_idx: Cow::Borrowed(matrix.col_idx()),
            values: Cow::Borrowed(matrix.values()),
        });
    }

    let ids = numbering.ids();
    let n_out = range.len();
    let mut rows: Vec<Vec<(usize, K)>> = vec![Vec::new(); n_out];
    for (i, &g) in ids.iter().enumerate() {
        if range.contains(&g) {
            let row = &mut rows[g - first];
            row.reserve(matrix.row_range(i).len());
            row.extend(matrix.row(i).map(|(_, c, v)| (ids[c], v)));
        }
    }

    let mut row_ptr = Vec::with_capacity(n_out + 1);
    row_ptr.push(0);
    let nnz: usize = rows.iter().map(Vec::len).sum();
    let mut col_idx = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    for mut row in rows {
        row.sort_by_key(|e| e.0);
        for (c, v) in row {
            col_idx.push(c);
            values.push(v);
        }
        row_ptr.push(col_idx.len());
    }
    Ok(DistributedCsr {
        first,
        n_rows: n_out,
        row_ptr: Cow::Owned(row_ptr),
        col_idx: Cow::Owned(col_idx),
        values: Cow::Owned(values),
    })
}

/// Compact the entries of `x` whose global id lies in `[first, last)` into a
/// buffer of `last - first` values indexed by `id - first`.
pub fn gather<'a, K: Scalar>(
    numbering: &GlobalNumbering,
    first: usize,
    last: usize,
    x: &'a [K],
    opts: &AssemblyOptions,
) -> Result<Cow<'a, [K]>, DdmError> {
    let range = check_range(first, last)?;
    check_numbering(numbering, x.len(), "local vector")?;
    if is_passthrough(numbering, &range, x.len(), opts) {
        return Ok(Cow::Borrowed(x));
    }
    let mut out = vec![K::zero(); range.len()];
    for (&g, &v) in numbering.ids().iter().zip(x) {
        if range.contains(&g) {
            out[g - first] = v;
        }
    }
    Ok(Cow::Owned(out))
}

/// Inverse of [`gather`]: write `compact[id - first]` back to every local
/// position whose id lies in `[first, last)`; other entries are untouched.
pub fn scatter<K: Scalar>(
    numbering: &GlobalNumbering,
    first: usize,
    last: usize,
    compact: &[K],
    x: &mut [K],
) -> Result<(), DdmError> {
    let range = check_range(first, last)?;
    check_numbering(numbering, x.len(), "local vector")?;
    if compact.len() != range.len() {
        return Err(DdmError::LengthMismatch {
            what: "compact vector",
            expected: range.len(),
            got: compact.len(),
        });
    }
    for (&g, slot) in numbering.ids().iter().zip(x.iter_mut()) {
        if range.contains(&g) {
            *slot = compact[g - first];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbering(ids: Vec<usize>, owned: Range<usize>, total: usize) -> GlobalNumbering {
        GlobalNumbering::from_parts(ids, owned, total, IndexBase::Zero)
    }

    fn sample() -> CsrMatrix<f64> {
        CsrMatrix::from_triplets(
            3,
            3,
            &[(0, 2, 3.0), (0, 0, 1.0), (1, 1, 5.0), (2, 0, 7.0), (2, 2, 9.0)],
            false,
        )
        .unwrap()
    }

    #[test]
    fn full_range_aliases_only_when_allowed() {
        let a = sample();
        let g = GlobalNumbering::identity(3, IndexBase::Zero);
        let alias = AssemblyOptions { allow_alias: true };
        let d = distributed_csr(&g, 0, 3, &a, &alias).unwrap();
        assert!(d.is_borrowed());
        assert_eq!(d.values(), a.values());

        let d = distributed_csr(&g, 0, 3, &a, &AssemblyOptions::default()).unwrap();
        assert!(!d.is_borrowed());
        // row 0 sorted by column
        assert_eq!(&d.col_idx()[..2], &[0, 2]);
        assert_eq!(&d.values()[..2], &[1.0, 3.0]);
    }

    #[test]
    fn rows_outside_range_are_dropped_and_columns_renumbered() {
        let a = sample();
        // local 0 -> 10, 1 -> 4, 2 -> 11
        let g = numbering(vec![10, 4, 11], 10..12, 12);
        let d = distributed_csr(&g, 10, 12, &a, &AssemblyOptions::default()).unwrap();
        assert_eq!(d.n_rows(), 2);
        assert_eq!(d.row_ptr(), &[0, 2, 4]);
        assert_eq!(d.col_idx(), &[10, 11, 10, 11]);
        assert_eq!(d.values(), &[1.0, 3.0, 7.0, 9.0]);
        assert_eq!(d.clone().into_owned(), d);
    }

    #[test]
    fn gather_scatter_roundtrip() {
        let g = numbering(vec![10, 4, 11], 10..12, 12);
        let x = [1.0f64, 2.0, 3.0];
        let c = gather(&g, 10, 12, &x, &AssemblyOptions::default()).unwrap();
        assert_eq!(&*c, &[1.0, 3.0]);
        let mut y = x;
        scatter(&g, 10, 12, &c, &mut y).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let g = GlobalNumbering::identity(3, IndexBase::Zero);
        let a = sample();
        assert_eq!(
            distributed_csr(&g, 2, 1, &a, &AssemblyOptions::default()).unwrap_err(),
            DdmError::InvalidRange { first: 2, last: 1 }
        );
        let mut x = [0.0f64; 3];
        assert!(matches!(
            scatter(&g, 0, 3, &[1.0], &mut x),
            Err(DdmError::LengthMismatch { what: "compact vector", .. })
        ));
        assert!(matches!(
            gather(&g, 0, 3, &[1.0f64; 2], &AssemblyOptions::default()),
            Err(DdmError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn one_based_matrix_is_copied() {
        let a = CsrMatrix::try_new(
            2,
            2,
            vec![1, 2, 3],
            vec![2, 1],
            vec![4.0f64, 6.0],
            false,
            IndexBase::One,
        )
        .unwrap();
        let g = GlobalNumbering::identity(2, IndexBase::Zero);
        let d = distributed_csr(&g, 0, 2, &a, &AssemblyOptions { allow_alias: true }).unwrap();
        assert!(!d.is_borrowed());
        assert_eq!(d.row_ptr(), &[0, 1, 2]);
        assert_eq!(d.col_idx(), &[1, 0]);
    }
}
