// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Global Sparse Assembly
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Single sparse matrix built from per-block triplets.
//!
//! Triplets are collected in COO form and compressed to CSR with `sprs`.
//! Duplicate positions are summed; explicit zeros stay in the structure.
//! Products go through the `sprs` accumulating kernels.

use mdao_types::error::{MdaoError, MdaoResult};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use sprs::{prod, CsMat, TriMat};

use crate::block::SubJacobian;

#[derive(Debug, Clone, Default)]
pub struct TripletBuffer {
    shape: (usize, usize),
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl TripletBuffer {
    pub fn new(shape: (usize, usize)) -> Self {
        TripletBuffer {
            shape,
            ..Default::default()
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    pub fn push(&mut self, row: usize, col: usize, val: f64) -> MdaoResult<()> {
        if row >= self.shape.0 || col >= self.shape.1 {
            return Err(MdaoError::LinAlg(format!(
                "triplet ({row}, {col}) outside global matrix {:?}",
                self.shape
            )));
        }
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
        Ok(())
    }

    /// Append every stored entry of `block` shifted by the given offsets.
    pub fn push_block(
        &mut self,
        block: &SubJacobian,
        row_offset: usize,
        col_offset: usize,
    ) -> MdaoResult<()> {
        let (m, n) = block.shape();
        if row_offset + m > self.shape.0 || col_offset + n > self.shape.1 {
            return Err(MdaoError::LinAlg(format!(
                "block {:?} at ({row_offset}, {col_offset}) exceeds global matrix {:?}",
                (m, n),
                self.shape
            )));
        }
        self.rows.reserve(block.nnz());
        self.cols.reserve(block.nnz());
        self.vals.reserve(block.nnz());
        block.for_each_entry(|r, c, v| {
            self.rows.push(row_offset + r);
            self.cols.push(col_offset + c);
            self.vals.push(v);
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GlobalMatrix {
    csr: CsMat<f64>,
    structural_nnz: usize,
}

impl GlobalMatrix {
    pub fn from_triplets(buffer: &TripletBuffer) -> Self {
        let mut tri = TriMat::new(buffer.shape);
        for ((&r, &c), &v) in buffer
            .rows
            .iter()
            .zip(buffer.cols.iter())
            .zip(buffer.vals.iter())
        {
            tri.add_triplet(r, c, v);
        }
        let csr: CsMat<f64> = tri.to_csr();

        let mut positions: Vec<(usize, usize)> = buffer
            .rows
            .iter()
            .copied()
            .zip(buffer.cols.iter().copied())
            .collect();
        positions.sort_unstable();
        positions.dedup();

        GlobalMatrix {
            csr,
            structural_nnz: positions.len(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.csr.rows(), self.csr.cols())
    }

    /// Distinct structural positions, explicit zeros included.
    pub fn nnz(&self) -> usize {
        self.structural_nnz
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.csr.get(row, col).copied().unwrap_or(0.0)
    }

    /// `y += A x`
    pub fn mul_acc(&self, x: ArrayView1<'_, f64>, y: ArrayViewMut1<'_, f64>) -> MdaoResult<()> {
        let (m, n) = self.shape();
        if x.len() != n || y.len() != m {
            return Err(MdaoError::shape("global matvec", &[m, n], &[y.len(), x.len()]));
        }
        prod::mul_acc_mat_vec_csr(self.csr.view(), x, y);
        Ok(())
    }

    /// `y += Aᵀ x`
    pub fn tmul_acc(&self, x: ArrayView1<'_, f64>, y: ArrayViewMut1<'_, f64>) -> MdaoResult<()> {
        let (m, n) = self.shape();
        if x.len() != m || y.len() != n {
            return Err(MdaoError::shape("global transpose matvec", &[n, m], &[y.len(), x.len()]));
        }
        // The transpose of a CSR matrix is the same storage read as CSC.
        prod::mul_acc_mat_vec_csc(self.csr.transpose_view(), x, y);
        Ok(())
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros(self.shape());
        for (row, vec) in self.csr.outer_iterator().enumerate() {
            for (col, &v) in vec.iter() {
                out[[row, col]] += v;
            }
        }
        out
    }
}
