// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Sub-Jacobian Blocks
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Storage formats for one (output, wrt) derivative block.
//!
//! A block is either dense `[size(of), size(wrt)]` or a COO triplet list.
//! Dense blocks keep every element, zeros included, so the assembled
//! structure reflects the declared block sizes exactly.

use mdao_types::error::{MdaoError, MdaoResult};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};

/// Declared row/column positions of a sparse block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl SparsityPattern {
    pub fn new(rows: Vec<usize>, cols: Vec<usize>) -> MdaoResult<Self> {
        if rows.len() != cols.len() {
            return Err(MdaoError::shape(
                "sparsity pattern cols",
                &[rows.len()],
                &[cols.len()],
            ));
        }
        Ok(SparsityPattern { rows, cols })
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn check_bounds(&self, shape: (usize, usize)) -> MdaoResult<()> {
        check_indices(&self.rows, &self.cols, shape)
    }
}

fn check_indices(rows: &[usize], cols: &[usize], shape: (usize, usize)) -> MdaoResult<()> {
    if let Some((&r, &c)) = rows
        .iter()
        .zip(cols.iter())
        .find(|&(&r, &c)| r >= shape.0 || c >= shape.1)
    {
        return Err(MdaoError::LinAlg(format!(
            "entry ({r}, {c}) outside block of shape {shape:?}"
        )));
    }
    Ok(())
}

/// Value handed to a partial declaration or assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialValue {
    /// Broadcast over the declared pattern, or over the whole block.
    Scalar(f64),
    /// Row-major block values, or one value per pattern entry.
    Flat(Vec<f64>),
    Dense(Array2<f64>),
    Triplets {
        rows: Vec<usize>,
        cols: Vec<usize>,
        vals: Vec<f64>,
    },
}

impl From<f64> for PartialValue {
    fn from(v: f64) -> Self {
        PartialValue::Scalar(v)
    }
}

impl From<Vec<f64>> for PartialValue {
    fn from(v: Vec<f64>) -> Self {
        PartialValue::Flat(v)
    }
}

impl From<Array2<f64>> for PartialValue {
    fn from(v: Array2<f64>) -> Self {
        PartialValue::Dense(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubJacobian {
    Dense(Array2<f64>),
    Sparse {
        shape: (usize, usize),
        rows: Vec<usize>,
        cols: Vec<usize>,
        vals: Vec<f64>,
    },
}

impl SubJacobian {
    /// Expand `value` into a block of `shape`, honouring a declared pattern.
    pub fn from_value(
        value: &PartialValue,
        shape: (usize, usize),
        pattern: Option<&SparsityPattern>,
    ) -> MdaoResult<Self> {
        let (m, n) = shape;
        if let Some(p) = pattern {
            p.check_bounds(shape)?;
            let vals = match value {
                PartialValue::Scalar(v) => vec![*v; p.len()],
                PartialValue::Flat(vals) => {
                    if vals.len() != p.len() {
                        return Err(MdaoError::shape("pattern values", &[p.len()], &[vals.len()]));
                    }
                    vals.clone()
                }
                PartialValue::Dense(a) => {
                    if a.dim() != shape {
                        return Err(MdaoError::shape("dense partial", &[m, n], a.shape()));
                    }
                    p.rows
                        .iter()
                        .zip(p.cols.iter())
                        .map(|(&r, &c)| a[[r, c]])
                        .collect()
                }
                PartialValue::Triplets { .. } => {
                    return Err(MdaoError::ConfigError(
                        "triplet values cannot be assigned to a block with a declared pattern"
                            .to_string(),
                    ));
                }
            };
            return Ok(SubJacobian::Sparse {
                shape,
                rows: p.rows.clone(),
                cols: p.cols.clone(),
                vals,
            });
        }

        match value {
            PartialValue::Scalar(v) => Ok(SubJacobian::Dense(Array2::from_elem(shape, *v))),
            PartialValue::Flat(vals) => {
                if vals.len() != m * n {
                    return Err(MdaoError::shape("flat partial", &[m, n], &[vals.len()]));
                }
                Array2::from_shape_vec(shape, vals.clone())
                    .map(SubJacobian::Dense)
                    .map_err(|e| MdaoError::LinAlg(e.to_string()))
            }
            PartialValue::Dense(a) => {
                if a.dim() != shape {
                    return Err(MdaoError::shape("dense partial", &[m, n], a.shape()));
                }
                Ok(SubJacobian::Dense(a.clone()))
            }
            PartialValue::Triplets { rows, cols, vals } => {
                if rows.len() != cols.len() || rows.len() != vals.len() {
                    return Err(MdaoError::shape(
                        "triplet partial",
                        &[rows.len(), rows.len()],
                        &[cols.len(), vals.len()],
                    ));
                }
                check_indices(rows, cols, shape)?;
                Ok(SubJacobian::Sparse {
                    shape,
                    rows: rows.clone(),
                    cols: cols.clone(),
                    vals: vals.clone(),
                })
            }
        }
    }

    pub fn identity(n: usize) -> Self {
        SubJacobian::Sparse {
            shape: (n, n),
            rows: (0..n).collect(),
            cols: (0..n).collect(),
            vals: vec![1.0; n],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            SubJacobian::Dense(a) => a.dim(),
            SubJacobian::Sparse { shape, .. } => *shape,
        }
    }

    /// Stored entries, explicit zeros included.
    pub fn nnz(&self) -> usize {
        match self {
            SubJacobian::Dense(a) => a.len(),
            SubJacobian::Sparse { vals, .. } => vals.len(),
        }
    }

    pub fn negate(&mut self) {
        match self {
            SubJacobian::Dense(a) => a.mapv_inplace(|v| -v),
            SubJacobian::Sparse { vals, .. } => vals.iter_mut().for_each(|v| *v = -*v),
        }
    }

    /// `y += A x`
    pub fn mul_acc(&self, x: ArrayView1<'_, f64>, mut y: ArrayViewMut1<'_, f64>) {
        debug_assert_eq!((y.len(), x.len()), self.shape());
        match self {
            SubJacobian::Dense(a) => y += &a.dot(&x),
            SubJacobian::Sparse {
                rows, cols, vals, ..
            } => {
                for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(vals.iter()) {
                    y[r] += v * x[c];
                }
            }
        }
    }

    /// `y += Aᵀ x`
    pub fn tmul_acc(&self, x: ArrayView1<'_, f64>, mut y: ArrayViewMut1<'_, f64>) {
        debug_assert_eq!((x.len(), y.len()), self.shape());
        match self {
            SubJacobian::Dense(a) => y += &a.t().dot(&x),
            SubJacobian::Sparse {
                rows, cols, vals, ..
            } => {
                for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(vals.iter()) {
                    y[c] += v * x[r];
                }
            }
        }
    }

    /// Visit every stored entry as (row, col, value), in storage order.
    pub fn for_each_entry(&self, mut f: impl FnMut(usize, usize, f64)) {
        match self {
            SubJacobian::Dense(a) => {
                for ((r, c), &v) in a.indexed_iter() {
                    f(r, c, v);
                }
            }
            SubJacobian::Sparse {
                rows, cols, vals, ..
            } => {
                for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(vals.iter()) {
                    f(r, c, v);
                }
            }
        }
    }

    /// Dense copy; duplicate sparse entries are summed.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros(self.shape());
        self.for_each_entry(|r, c, v| out[[r, c]] += v);
        out
    }
}
