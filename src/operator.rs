//! Implicit white-noise covariance operators.
//!
//! A [`NoiseOperator`] represents `N = D + C` where `D` is a diagonal and `C`
//! is either zero or block diagonal with blocks `j_e · 1·1ᵀ` over observing
//! epochs. Models hand out operators with `D = 0`; the likelihood engine adds
//! the diagonal contributions with [`NoiseOperator::with_diagonal`] before
//! solving. All variants agree numerically; they differ in storage and cost.

use crate::linalg::faer_ndarray::FaerCholesky;
use crate::linalg::faer_ndarray::FaerCholeskyFactor;
use crate::linalg::sparse_exact::{
    BlockSparsePattern, SparseExactFactor, factorize_sparse_spd, solve_sparse_spd,
    solve_sparse_spd_multi,
};
use crate::linalg::utils::{KahanSum, sum_ln};
use crate::signal::{NoiseError, NoiseResult, ensure_len};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use std::fmt;
use std::sync::{Arc, OnceLock};

#[cfg(feature = "fast-sherman-morrison")]
use rayon::prelude::*;

fn check_positive_diagonal(diag: &Array1<f64>, context: &str) -> NoiseResult<()> {
    if let Some(i) = diag.iter().position(|d| !(*d > 0.0) || !d.is_finite()) {
        return Err(NoiseError::NotPositiveDefinite(format!(
            "{context}: diagonal entry {i} is {}",
            diag[i]
        )));
    }
    Ok(())
}

/// Epoch index lists with their amplitudes `j_e = ecorr_e²`.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochBlocks {
    indices: Arc<Vec<Vec<usize>>>,
    jvec: Array1<f64>,
}

impl EpochBlocks {
    pub fn new(indices: Arc<Vec<Vec<usize>>>, jvec: Array1<f64>) -> NoiseResult<Self> {
        ensure_len("epoch amplitudes", indices.len(), jvec.len())?;
        if let Some(e) = jvec.iter().position(|j| !(*j >= 0.0)) {
            return Err(NoiseError::InvalidConfig(format!(
                "epoch {e} amplitude must be non-negative, got {}",
                jvec[e]
            )));
        }
        Ok(Self { indices, jvec })
    }

    pub fn indices(&self) -> &[Vec<usize>] {
        &self.indices
    }

    pub fn jvec(&self) -> &Array1<f64> {
        &self.jvec
    }

    pub fn len(&self) -> usize {
        self.jvec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jvec.is_empty()
    }

    fn add_product(&self, x: ArrayView1<'_, f64>, mut out: ArrayViewMut1<'_, f64>) {
        for (idx, &j) in self.indices.iter().zip(self.jvec.iter()) {
            let s: f64 = idx.iter().map(|&i| x[i]).sum();
            for &i in idx {
                out[i] += j * s;
            }
        }
    }

    fn fill_dense(&self, out: &mut Array2<f64>) {
        for (idx, &j) in self.indices.iter().zip(self.jvec.iter()) {
            for &r in idx {
                for &c in idx {
                    out[[r, c]] += j;
                }
            }
        }
    }
}

/// Rank-one-per-epoch operator solved with the Sherman-Morrison identity.
///
/// For one epoch with `N_e = D_e + j 1·1ᵀ`:
/// `N_e⁻¹ x = D_e⁻¹ x - β (1ᵀ D_e⁻¹ x) D_e⁻¹ 1` with `β = 1 / (1/j + 1ᵀ D_e⁻¹ 1)`
/// and `ln|N_e| = ln|D_e| + ln(1 + j 1ᵀ D_e⁻¹ 1)`.
#[derive(Debug, Clone)]
pub struct ShermanMorrison {
    diag: Array1<f64>,
    blocks: EpochBlocks,
}

impl ShermanMorrison {
    pub fn new(nobs: usize, blocks: EpochBlocks) -> Self {
        Self {
            diag: Array1::zeros(nobs),
            blocks,
        }
    }

    fn solve_column(&self, x: ArrayView1<'_, f64>, mut out: ArrayViewMut1<'_, f64>) {
        for i in 0..x.len() {
            out[i] = x[i] / self.diag[i];
        }
        for (idx, &j) in self.blocks.indices.iter().zip(self.blocks.jvec.iter()) {
            let ni_sum: f64 = idx.iter().map(|&i| 1.0 / self.diag[i]).sum();
            let beta = 1.0 / (ni_sum + 1.0 / j);
            let dot: f64 = idx.iter().map(|&i| x[i] / self.diag[i]).sum();
            for &i in idx {
                out[i] -= beta * dot / self.diag[i];
            }
        }
    }

    fn log_determinant(&self) -> f64 {
        let mut acc = KahanSum::default();
        acc.add(sum_ln(self.diag.iter().copied()));
        for (idx, &j) in self.blocks.indices.iter().zip(self.blocks.jvec.iter()) {
            let ni_sum: f64 = idx.iter().map(|&i| 1.0 / self.diag[i]).sum();
            acc.add((1.0 + j * ni_sum).ln());
        }
        acc.sum()
    }
}

/// Sherman-Morrison operator with per-epoch coefficients computed once per
/// diagonal and multi-column work spread over the rayon pool.
#[cfg(feature = "fast-sherman-morrison")]
#[derive(Debug, Clone)]
pub struct FastShermanMorrison {
    diag: Array1<f64>,
    inv_diag: Array1<f64>,
    blocks: EpochBlocks,
    /// `(β_e, 1ᵀ D_e⁻¹ 1)` per epoch.
    coefficients: Vec<(f64, f64)>,
}

#[cfg(feature = "fast-sherman-morrison")]
impl FastShermanMorrison {
    pub fn new(nobs: usize, blocks: EpochBlocks) -> Self {
        Self::with_parts(Array1::zeros(nobs), blocks)
    }

    fn with_parts(diag: Array1<f64>, blocks: EpochBlocks) -> Self {
        let inv_diag = diag.mapv(|d| 1.0 / d);
        let coefficients = blocks
            .indices
            .iter()
            .zip(blocks.jvec.iter())
            .map(|(idx, &j)| {
                let ni_sum: f64 = idx.iter().map(|&i| inv_diag[i]).sum();
                (1.0 / (ni_sum + 1.0 / j), ni_sum)
            })
            .collect();
        Self {
            diag,
            inv_diag,
            blocks,
            coefficients,
        }
    }

    fn solve_column(&self, x: ArrayView1<'_, f64>, mut out: ArrayViewMut1<'_, f64>) {
        for i in 0..x.len() {
            out[i] = x[i] * self.inv_diag[i];
        }
        for (idx, &(beta, _)) in self.blocks.indices.iter().zip(self.coefficients.iter()) {
            if beta == 0.0 {
                continue;
            }
            let dot: f64 = idx.iter().map(|&i| x[i] * self.inv_diag[i]).sum();
            for &i in idx {
                out[i] -= beta * dot * self.inv_diag[i];
            }
        }
    }

    fn log_determinant(&self) -> f64 {
        let mut acc = KahanSum::default();
        acc.add(sum_ln(self.diag.iter().copied()));
        for (&j, &(_, ni_sum)) in self.blocks.jvec.iter().zip(self.coefficients.iter()) {
            acc.add((1.0 + j * ni_sum).ln());
        }
        acc.sum()
    }
}

/// Explicit sparse matrix over a pattern fixed at model construction.
pub struct SparseEcorr {
    pattern: Arc<BlockSparsePattern>,
    blocks: Arc<Vec<Vec<usize>>>,
    diag: Array1<f64>,
    /// Values of `D + C` in pattern order.
    values: Vec<f64>,
    factor: OnceLock<SparseExactFactor>,
}

impl SparseEcorr {
    pub fn new(
        pattern: Arc<BlockSparsePattern>,
        blocks: Arc<Vec<Vec<usize>>>,
        amplitudes: &[f64],
    ) -> NoiseResult<Self> {
        ensure_len("epoch amplitudes", blocks.len(), amplitudes.len())?;
        let values = pattern.block_values(amplitudes);
        Ok(Self {
            diag: Array1::zeros(pattern.n()),
            pattern,
            blocks,
            values,
            factor: OnceLock::new(),
        })
    }

    pub fn pattern(&self) -> &BlockSparsePattern {
        &self.pattern
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of stored entries whose value is non-zero.
    pub fn nonzero_count(&self) -> usize {
        self.values.iter().filter(|v| **v != 0.0).count()
    }

    fn factor(&self) -> NoiseResult<&SparseExactFactor> {
        if let Some(factor) = self.factor.get() {
            return Ok(factor);
        }
        check_positive_diagonal(&self.pattern.diagonal(&self.values), "sparse ecorr")?;
        let factor = factorize_sparse_spd(self.pattern.as_matrix(&self.values))?;
        Ok(self.factor.get_or_init(|| factor))
    }

    fn log_determinant(&self) -> NoiseResult<f64> {
        let diag = self.pattern.diagonal(&self.values);
        check_positive_diagonal(&diag, "sparse ecorr")?;
        let mut in_block = vec![false; diag.len()];
        let mut acc = KahanSum::default();
        for idx in self.blocks.iter() {
            let dense = self.pattern.dense_block(&self.values, idx);
            acc.add(dense.cholesky(Side::Lower)?.log_determinant());
            for &i in idx {
                in_block[i] = true;
            }
        }
        acc.add(sum_ln(
            diag.iter()
                .zip(in_block.iter())
                .filter(|(_, b)| !**b)
                .map(|(d, _)| *d),
        ));
        Ok(acc.sum())
    }
}

/// One dense `j_e · ones(n, n)` block per epoch.
pub struct BlockEcorr {
    diag: Array1<f64>,
    indices: Arc<Vec<Vec<usize>>>,
    blocks: Vec<Array2<f64>>,
    factors: OnceLock<Vec<FaerCholeskyFactor>>,
}

impl BlockEcorr {
    pub fn new(nobs: usize, indices: Arc<Vec<Vec<usize>>>, blocks: Vec<Array2<f64>>) -> NoiseResult<Self> {
        ensure_len("epoch blocks", indices.len(), blocks.len())?;
        for (idx, block) in indices.iter().zip(blocks.iter()) {
            if block.dim() != (idx.len(), idx.len()) {
                return Err(NoiseError::ShapeMismatch {
                    context: "dense epoch block".to_string(),
                    expected: idx.len(),
                    found: block.nrows(),
                });
            }
        }
        Ok(Self {
            diag: Array1::zeros(nobs),
            indices,
            blocks,
            factors: OnceLock::new(),
        })
    }

    /// `j · ones(n, n)` for every epoch.
    pub fn from_amplitudes(
        nobs: usize,
        indices: Arc<Vec<Vec<usize>>>,
        jvec: &Array1<f64>,
    ) -> NoiseResult<Self> {
        ensure_len("epoch amplitudes", indices.len(), jvec.len())?;
        let blocks = indices
            .iter()
            .zip(jvec.iter())
            .map(|(idx, &j)| Array2::from_elem((idx.len(), idx.len()), j))
            .collect();
        Self::new(nobs, indices, blocks)
    }

    pub fn blocks(&self) -> &[Array2<f64>] {
        &self.blocks
    }

    fn factors(&self) -> NoiseResult<&[FaerCholeskyFactor]> {
        if let Some(factors) = self.factors.get() {
            return Ok(factors);
        }
        let mut factors = Vec::with_capacity(self.blocks.len());
        for (idx, block) in self.indices.iter().zip(self.blocks.iter()) {
            let mut combined = block.clone();
            for (a, &i) in idx.iter().enumerate() {
                combined[[a, a]] += self.diag[i];
            }
            factors.push(combined.cholesky(Side::Lower)?);
        }
        Ok(self.factors.get_or_init(|| factors))
    }

    fn outside_mask(&self) -> Vec<bool> {
        let mut outside = vec![true; self.diag.len()];
        for idx in self.indices.iter() {
            for &i in idx {
                outside[i] = false;
            }
        }
        outside
    }

    fn solve_vec(&self, b: &Array1<f64>) -> NoiseResult<Array1<f64>> {
        let factors = self.factors()?;
        let outside = self.outside_mask();
        let mut out = Array1::<f64>::zeros(b.len());
        for i in 0..b.len() {
            if outside[i] {
                if !(self.diag[i] > 0.0) {
                    return Err(NoiseError::NotPositiveDefinite(format!(
                        "block ecorr: diagonal entry {i} is {}",
                        self.diag[i]
                    )));
                }
                out[i] = b[i] / self.diag[i];
            }
        }
        for (idx, factor) in self.indices.iter().zip(factors.iter()) {
            let local: Array1<f64> = idx.iter().map(|&i| b[i]).collect();
            let solved = factor.solve_vec(&local);
            for (a, &i) in idx.iter().enumerate() {
                out[i] = solved[a];
            }
        }
        Ok(out)
    }

    fn log_determinant(&self) -> NoiseResult<f64> {
        let factors = self.factors()?;
        let outside = self.outside_mask();
        let outside_diag: Vec<f64> = self
            .diag
            .iter()
            .zip(outside.iter())
            .filter(|(_, o)| **o)
            .map(|(d, _)| *d)
            .collect();
        check_positive_diagonal(&Array1::from(outside_diag.clone()), "block ecorr")?;
        let mut acc = KahanSum::default();
        acc.add(sum_ln(outside_diag));
        for factor in factors {
            acc.add(factor.log_determinant());
        }
        Ok(acc.sum())
    }
}

/// Covariance contribution handed to the likelihood engine.
pub enum NoiseOperator {
    Diagonal(Array1<f64>),
    Sparse(SparseEcorr),
    ShermanMorrison(ShermanMorrison),
    #[cfg(feature = "fast-sherman-morrison")]
    FastShermanMorrison(FastShermanMorrison),
    Block(BlockEcorr),
}

impl fmt::Debug for NoiseOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseOperator")
            .field("kind", &self.kind())
            .field("nobs", &self.nobs())
            .finish()
    }
}

impl NoiseOperator {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Diagonal(_) => "diagonal",
            Self::Sparse(_) => "sparse",
            Self::ShermanMorrison(_) => "sherman-morrison",
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(_) => "fast-sherman-morrison",
            Self::Block(_) => "block",
        }
    }

    pub fn nobs(&self) -> usize {
        match self {
            Self::Diagonal(d) => d.len(),
            Self::Sparse(op) => op.pattern.n(),
            Self::ShermanMorrison(op) => op.diag.len(),
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => op.diag.len(),
            Self::Block(op) => op.diag.len(),
        }
    }

    /// Diagonal part `D` of the operator.
    pub fn diagonal(&self) -> Array1<f64> {
        match self {
            Self::Diagonal(d) => d.clone(),
            Self::Sparse(op) => op.diag.clone(),
            Self::ShermanMorrison(op) => op.diag.clone(),
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => op.diag.clone(),
            Self::Block(op) => op.diag.clone(),
        }
    }

    /// `self + diag(extra)` as a new operator. The receiver is left untouched.
    pub fn with_diagonal(&self, extra: &Array1<f64>) -> NoiseResult<NoiseOperator> {
        ensure_len("added diagonal", self.nobs(), extra.len())?;
        Ok(match self {
            Self::Diagonal(d) => Self::Diagonal(d + extra),
            Self::Sparse(op) => Self::Sparse(SparseEcorr {
                pattern: Arc::clone(&op.pattern),
                blocks: Arc::clone(&op.blocks),
                diag: &op.diag + extra,
                values: op.pattern.with_diagonal(&op.values, extra),
                factor: OnceLock::new(),
            }),
            Self::ShermanMorrison(op) => Self::ShermanMorrison(ShermanMorrison {
                diag: &op.diag + extra,
                blocks: op.blocks.clone(),
            }),
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => Self::FastShermanMorrison(
                FastShermanMorrison::with_parts(&op.diag + extra, op.blocks.clone()),
            ),
            Self::Block(op) => Self::Block(BlockEcorr {
                diag: &op.diag + extra,
                indices: Arc::clone(&op.indices),
                blocks: op.blocks.clone(),
                factors: OnceLock::new(),
            }),
        })
    }

    /// `N x`.
    pub fn apply_vec(&self, x: &Array1<f64>) -> NoiseResult<Array1<f64>> {
        ensure_len("right-hand side", self.nobs(), x.len())?;
        Ok(match self {
            Self::Diagonal(d) => d * x,
            Self::Sparse(op) => op.pattern.matvec(&op.values, x),
            Self::ShermanMorrison(op) => {
                let mut out = &op.diag * x;
                op.blocks.add_product(x.view(), out.view_mut());
                out
            }
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => {
                let mut out = &op.diag * x;
                op.blocks.add_product(x.view(), out.view_mut());
                out
            }
            Self::Block(op) => {
                let mut out = &op.diag * x;
                for (idx, block) in op.indices.iter().zip(op.blocks.iter()) {
                    let local: Array1<f64> = idx.iter().map(|&i| x[i]).collect();
                    let prod = block.dot(&local);
                    for (a, &i) in idx.iter().enumerate() {
                        out[i] += prod[a];
                    }
                }
                out
            }
        })
    }

    /// `N X`, column by column.
    pub fn apply_mat(&self, x: &Array2<f64>) -> NoiseResult<Array2<f64>> {
        ensure_len("right-hand side rows", self.nobs(), x.nrows())?;
        let mut out = Array2::<f64>::zeros(x.raw_dim());
        for (col, mut dst) in x.axis_iter(Axis(1)).zip(out.axis_iter_mut(Axis(1))) {
            dst.assign(&self.apply_vec(&col.to_owned())?);
        }
        Ok(out)
    }

    /// `N⁻¹ b`. Fails unless `N` is positive definite.
    pub fn solve_vec(&self, b: &Array1<f64>) -> NoiseResult<Array1<f64>> {
        ensure_len("right-hand side", self.nobs(), b.len())?;
        match self {
            Self::Diagonal(d) => {
                check_positive_diagonal(d, "diagonal")?;
                Ok(b / d)
            }
            Self::Sparse(op) => Ok(solve_sparse_spd(op.factor()?, b)),
            Self::ShermanMorrison(op) => {
                check_positive_diagonal(&op.diag, "sherman-morrison")?;
                let mut out = Array1::<f64>::zeros(b.len());
                op.solve_column(b.view(), out.view_mut());
                Ok(out)
            }
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => {
                check_positive_diagonal(&op.diag, "fast-sherman-morrison")?;
                let mut out = Array1::<f64>::zeros(b.len());
                op.solve_column(b.view(), out.view_mut());
                Ok(out)
            }
            Self::Block(op) => op.solve_vec(b),
        }
    }

    /// `N⁻¹ B`.
    pub fn solve_mat(&self, b: &Array2<f64>) -> NoiseResult<Array2<f64>> {
        ensure_len("right-hand side rows", self.nobs(), b.nrows())?;
        match self {
            Self::Sparse(op) => Ok(solve_sparse_spd_multi(op.factor()?, b)),
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => {
                check_positive_diagonal(&op.diag, "fast-sherman-morrison")?;
                let mut out = Array2::<f64>::zeros(b.raw_dim());
                out.axis_iter_mut(Axis(1))
                    .into_par_iter()
                    .zip(b.axis_iter(Axis(1)).into_par_iter())
                    .for_each(|(dst, col)| op.solve_column(col, dst));
                Ok(out)
            }
            _ => {
                let mut out = Array2::<f64>::zeros(b.raw_dim());
                for (col, mut dst) in b.axis_iter(Axis(1)).zip(out.axis_iter_mut(Axis(1))) {
                    dst.assign(&self.solve_vec(&col.to_owned())?);
                }
                Ok(out)
            }
        }
    }

    /// `xᵀ N⁻¹ x`.
    pub fn quadratic_form(&self, x: &Array1<f64>) -> NoiseResult<f64> {
        Ok(x.dot(&self.solve_vec(x)?))
    }

    /// `Lᵀ N⁻¹ R`.
    pub fn bilinear_form(&self, left: &Array2<f64>, right: &Array2<f64>) -> NoiseResult<Array2<f64>> {
        ensure_len("left-hand side rows", self.nobs(), left.nrows())?;
        Ok(left.t().dot(&self.solve_mat(right)?))
    }

    /// `ln |N|`.
    pub fn log_determinant(&self) -> NoiseResult<f64> {
        match self {
            Self::Diagonal(d) => {
                check_positive_diagonal(d, "diagonal")?;
                Ok(sum_ln(d.iter().copied()))
            }
            Self::Sparse(op) => op.log_determinant(),
            Self::ShermanMorrison(op) => {
                check_positive_diagonal(&op.diag, "sherman-morrison")?;
                Ok(op.log_determinant())
            }
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => {
                check_positive_diagonal(&op.diag, "fast-sherman-morrison")?;
                Ok(op.log_determinant())
            }
            Self::Block(op) => op.log_determinant(),
        }
    }

    /// Dense `N`. Quadratic in memory; for tests and small diagnostics.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Sparse(op) => op.pattern.to_dense(&op.values),
            Self::Block(op) => {
                let mut out = Array2::from_diag(&op.diag);
                for (idx, block) in op.indices.iter().zip(op.blocks.iter()) {
                    for (a, &r) in idx.iter().enumerate() {
                        for (b, &c) in idx.iter().enumerate() {
                            out[[r, c]] += block[[a, b]];
                        }
                    }
                }
                out
            }
            Self::Diagonal(d) => Array2::from_diag(d),
            Self::ShermanMorrison(op) => {
                let mut out = Array2::from_diag(&op.diag);
                op.blocks.fill_dense(&mut out);
                out
            }
            #[cfg(feature = "fast-sherman-morrison")]
            Self::FastShermanMorrison(op) => {
                let mut out = Array2::from_diag(&op.diag);
                op.blocks.fill_dense(&mut out);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn blocks() -> EpochBlocks {
        EpochBlocks::new(Arc::new(vec![vec![0, 1], vec![3, 4, 5]]), array![0.5, 2.0]).unwrap()
    }

    fn dense_reference(diag: &Array1<f64>) -> Array2<f64> {
        let mut out = Array2::from_diag(diag);
        blocks().fill_dense(&mut out);
        out
    }

    #[test]
    fn sherman_morrison_solve_inverts_apply() {
        let diag = array![1.0, 2.0, 0.5, 1.5, 3.0, 0.25];
        let op = NoiseOperator::ShermanMorrison(ShermanMorrison::new(6, blocks()))
            .with_diagonal(&diag)
            .unwrap();
        let b = array![1.0, -2.0, 0.5, 3.0, 0.0, 1.0];
        let x = op.solve_vec(&b).unwrap();
        let back = op.apply_vec(&x).unwrap();
        for i in 0..6 {
            assert_abs_diff_eq!(back[i], b[i], epsilon = 1e-12);
        }
        let dense = dense_reference(&diag);
        let chol = dense.cholesky(Side::Lower).unwrap();
        assert_abs_diff_eq!(op.log_determinant().unwrap(), chol.log_determinant(), epsilon = 1e-12);
    }

    #[test]
    fn contribution_alone_is_not_solvable() {
        let op = NoiseOperator::ShermanMorrison(ShermanMorrison::new(6, blocks()));
        assert!(matches!(
            op.solve_vec(&Array1::ones(6)),
            Err(NoiseError::NotPositiveDefinite(_))
        ));
        assert!(op.log_determinant().is_err());
    }

    #[test]
    fn with_diagonal_checks_length() {
        let op = NoiseOperator::Diagonal(Array1::ones(3));
        assert!(matches!(
            op.with_diagonal(&Array1::ones(4)),
            Err(NoiseError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn block_operator_matches_dense_algebra() {
        let diag = array![1.0, 2.0, 0.5, 1.5, 3.0, 0.25];
        let b = blocks();
        let op = NoiseOperator::Block(
            BlockEcorr::from_amplitudes(6, Arc::clone(&b.indices), b.jvec()).unwrap(),
        )
        .with_diagonal(&diag)
        .unwrap();
        let dense = dense_reference(&diag);
        assert_eq!(op.to_dense(), dense);
        let rhs = array![0.3, 0.1, -0.2, 1.0, 2.0, -1.0];
        let x = op.solve_vec(&rhs).unwrap();
        let back = dense.dot(&x);
        for i in 0..6 {
            assert_abs_diff_eq!(back[i], rhs[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn sparse_operator_reports_diagonal_without_blocks() {
        let b = blocks();
        let pattern = Arc::new(BlockSparsePattern::new(6, &b.indices).unwrap());
        let op = NoiseOperator::Sparse(
            SparseEcorr::new(pattern, Arc::clone(&b.indices), b.jvec().as_slice().unwrap()).unwrap(),
        );
        let diag = array![1.0, 2.0, 0.5, 1.5, 3.0, 0.25];
        let combined = op.with_diagonal(&diag).unwrap();
        let got = combined.diagonal();
        for i in 0..6 {
            assert_abs_diff_eq!(got[i], diag[i], epsilon = 1e-15);
        }
    }

    #[test]
    fn diagonal_operator_roundtrip() {
        let op = NoiseOperator::Diagonal(array![2.0, 4.0]);
        assert_eq!(op.solve_vec(&array![2.0, 2.0]).unwrap(), array![1.0, 0.5]);
        assert_abs_diff_eq!(op.log_determinant().unwrap(), 8.0_f64.ln(), epsilon = 1e-15);
        assert_abs_diff_eq!(op.quadratic_form(&array![2.0, 2.0]).unwrap(), 3.0, epsilon = 1e-15);
    }
}
