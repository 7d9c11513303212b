use crate::linalg::faer_ndarray::{FaerArrayView, FaerLinalgError};
use faer::Side;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::Llt as SparseLlt;
use faer::sparse::{SparseColMat, SparseColMatRef, Triplet};
use ndarray::{Array1, Array2, Axis};

/// Fixed CSC structure of a symmetric block-diagonal matrix.
///
/// Every diagonal entry is structurally present, plus every `(row, col)` pair
/// inside one block. Both triangles are stored. Values live outside the
/// pattern so one pattern serves every parameter point.
pub struct BlockSparsePattern {
    skeleton: SparseColMat<usize, f64>,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    diag_slots: Vec<usize>,
    slot_block: Vec<Option<usize>>,
}

impl BlockSparsePattern {
    /// `blocks` are disjoint, ascending index lists over `0..n`.
    pub fn new(n: usize, blocks: &[Vec<usize>]) -> Result<Self, FaerLinalgError> {
        let mut block_of = vec![None; n];
        for (b, idx) in blocks.iter().enumerate() {
            for &i in idx {
                block_of[i] = Some(b);
            }
        }

        let block_entries: usize = blocks.iter().map(|b| b.len() * b.len()).sum();
        let mut triplets = Vec::with_capacity(n + block_entries);
        for (i, owner) in block_of.iter().enumerate() {
            if owner.is_none() {
                triplets.push(Triplet::new(i, i, 1.0));
            }
        }
        for idx in blocks {
            for &col in idx {
                for &row in idx {
                    triplets.push(Triplet::new(row, col, 1.0));
                }
            }
        }
        let skeleton = SparseColMat::try_new_from_triplets(n, n, &triplets)
            .map_err(|_| FaerLinalgError::SparseCholesky)?;

        let col_ptr = skeleton.symbolic().col_ptr().to_vec();
        let row_idx = skeleton.symbolic().row_idx().to_vec();
        let mut diag_slots = vec![0usize; n];
        let mut slot_block = vec![None; row_idx.len()];
        for col in 0..n {
            for slot in col_ptr[col]..col_ptr[col + 1] {
                let row = row_idx[slot];
                if row == col {
                    diag_slots[col] = slot;
                }
                if block_of[row].is_some() && block_of[row] == block_of[col] {
                    slot_block[slot] = block_of[col];
                }
            }
        }

        Ok(Self {
            skeleton,
            col_ptr,
            row_idx,
            diag_slots,
            slot_block,
        })
    }

    pub fn n(&self) -> usize {
        self.diag_slots.len()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_idx.len()
    }

    /// Values with each block filled by its amplitude and zeros elsewhere.
    pub fn block_values(&self, amplitudes: &[f64]) -> Vec<f64> {
        self.slot_block
            .iter()
            .map(|b| b.map_or(0.0, |b| amplitudes[b]))
            .collect()
    }

    /// `values` with `diag` added on the diagonal slots.
    pub fn with_diagonal(&self, values: &[f64], diag: &Array1<f64>) -> Vec<f64> {
        let mut out = values.to_vec();
        for (i, &slot) in self.diag_slots.iter().enumerate() {
            out[slot] += diag[i];
        }
        out
    }

    pub fn as_matrix<'a>(&'a self, values: &'a [f64]) -> SparseColMatRef<'a, usize, f64> {
        SparseColMatRef::new(self.skeleton.symbolic(), values)
    }

    pub fn diagonal(&self, values: &[f64]) -> Array1<f64> {
        self.diag_slots.iter().map(|&s| values[s]).collect()
    }

    /// Dense copy of the sub-matrix on `idx` (ascending).
    pub fn dense_block(&self, values: &[f64], idx: &[usize]) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((idx.len(), idx.len()));
        for (b, &col) in idx.iter().enumerate() {
            for slot in self.col_ptr[col]..self.col_ptr[col + 1] {
                if let Ok(a) = idx.binary_search(&self.row_idx[slot]) {
                    out[[a, b]] = values[slot];
                }
            }
        }
        out
    }

    pub fn to_dense(&self, values: &[f64]) -> Array2<f64> {
        let n = self.n();
        let mut out = Array2::<f64>::zeros((n, n));
        for col in 0..n {
            for slot in self.col_ptr[col]..self.col_ptr[col + 1] {
                out[[self.row_idx[slot], col]] = values[slot];
            }
        }
        out
    }

    pub fn matvec(&self, values: &[f64], vector: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(self.n());
        for col in 0..self.n() {
            let x = vector[col];
            if x == 0.0 {
                continue;
            }
            for slot in self.col_ptr[col]..self.col_ptr[col + 1] {
                out[self.row_idx[slot]] += values[slot] * x;
            }
        }
        out
    }
}

#[derive(Clone)]
pub struct SparseExactFactor {
    factor: SparseLlt<usize, f64>,
    n: usize,
}

impl SparseExactFactor {
    pub fn n(&self) -> usize {
        self.n
    }
}

pub fn factorize_sparse_spd(
    h: SparseColMatRef<'_, usize, f64>,
) -> Result<SparseExactFactor, FaerLinalgError> {
    let factor = h
        .sp_cholesky(Side::Upper)
        .map_err(|_| FaerLinalgError::SparseCholesky)?;
    Ok(SparseExactFactor {
        factor,
        n: h.ncols(),
    })
}

pub fn solve_sparse_spd(factor: &SparseExactFactor, rhs: &Array1<f64>) -> Array1<f64> {
    let rhs_col = rhs.view().insert_axis(Axis(1));
    let rhs_view = FaerArrayView::new(&rhs_col);
    let out = factor.factor.solve(rhs_view.as_ref());
    let mut result = Array1::<f64>::zeros(rhs.len());
    for i in 0..rhs.len() {
        result[i] = out[(i, 0)];
    }
    result
}

pub fn solve_sparse_spd_multi(factor: &SparseExactFactor, rhs: &Array2<f64>) -> Array2<f64> {
    let rhs_view = FaerArrayView::new(rhs);
    let out = factor.factor.solve(rhs_view.as_ref());
    let mut result = Array2::<f64>::zeros(rhs.raw_dim());
    for j in 0..rhs.ncols() {
        for i in 0..rhs.nrows() {
            result[[i, j]] = out[(i, j)];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn pattern() -> BlockSparsePattern {
        BlockSparsePattern::new(5, &[vec![0, 1], vec![2, 3, 4]]).unwrap()
    }

    #[test]
    fn structure_covers_blocks_and_diagonal() {
        let p = BlockSparsePattern::new(6, &[vec![1, 2], vec![3, 4, 5]]).unwrap();
        assert_eq!(p.nnz(), 1 + 4 + 9);
        let values = p.block_values(&[2.0, 3.0]);
        let dense = p.to_dense(&values);
        assert_eq!(dense[[0, 0]], 0.0);
        assert_eq!(dense[[1, 2]], 2.0);
        assert_eq!(dense[[5, 3]], 3.0);
        assert_eq!(dense[[2, 3]], 0.0);
    }

    #[test]
    fn matvec_matches_dense() {
        let p = pattern();
        let values = p.with_diagonal(&p.block_values(&[0.5, 2.0]), &array![1.0, 2.0, 3.0, 4.0, 5.0]);
        let x = array![1.0, -1.0, 0.5, 0.25, 2.0];
        let expected = p.to_dense(&values).dot(&x);
        let got = p.matvec(&values, &x);
        for i in 0..5 {
            assert_abs_diff_eq!(got[i], expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn sparse_cholesky_solves_combined_system() {
        let p = pattern();
        let values = p.with_diagonal(&p.block_values(&[0.5, 2.0]), &array![1.0, 2.0, 3.0, 4.0, 5.0]);
        let factor = factorize_sparse_spd(p.as_matrix(&values)).unwrap();
        assert_eq!(factor.n(), 5);
        let b = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let x = solve_sparse_spd(&factor, &b);
        let back = p.matvec(&values, &x);
        for i in 0..5 {
            assert_abs_diff_eq!(back[i], b[i], epsilon = 1e-10);
        }
        let multi = solve_sparse_spd_multi(&factor, &Array2::eye(5));
        let prod = p.to_dense(&values).dot(&multi);
        for i in 0..5 {
            for j in 0..5 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(prod[[i, j]], expect, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn dense_block_extracts_submatrix() {
        let p = pattern();
        let values = p.with_diagonal(&p.block_values(&[0.5, 2.0]), &Array1::ones(5));
        let block = p.dense_block(&values, &[2, 3, 4]);
        assert_eq!(block, array![[3.0, 2.0, 2.0], [2.0, 3.0, 2.0], [2.0, 2.0, 3.0]]);
        assert_eq!(p.diagonal(&values), array![1.5, 1.5, 3.0, 3.0, 3.0]);
    }
}
