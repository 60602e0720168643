// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Jacobian Store
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Block-sparse partial derivatives of one component.
//!
//! Blocks are keyed by `(of, wrt)` where `of` is an output and `wrt` an
//! input or output. At construction every output depends on every input and
//! on itself. A pair declared `dependent = false` never gets storage and is
//! skipped by every read, write and product.
//!
//! The assembled matrix has one row per output element and columns ordered
//! outputs first, then inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use mdao_math::assembly::{GlobalMatrix, TripletBuffer};
use mdao_math::block::{PartialValue, SparsityPattern, SubJacobian};
use mdao_types::error::{MdaoError, MdaoResult};
use mdao_types::metadata::VarKind;
use mdao_types::registry::VariableRegistry;
use mdao_types::vector::{LinearVectors, Mode};
use ndarray::{s, Array1};
use tracing::{debug, trace};

/// Options for `declare_partials`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDecl {
    pub dependent: bool,
    /// Frozen after the first value lands. Implied by `value`.
    pub constant: bool,
    pub value: Option<PartialValue>,
    pub rows: Option<Vec<usize>>,
    pub cols: Option<Vec<usize>>,
}

impl Default for PartialDecl {
    fn default() -> Self {
        PartialDecl {
            dependent: true,
            constant: false,
            value: None,
            rows: None,
            cols: None,
        }
    }
}

impl PartialDecl {
    pub fn dependent() -> Self {
        Self::default()
    }

    pub fn independent() -> Self {
        PartialDecl {
            dependent: false,
            ..Self::default()
        }
    }

    /// Constant block with a value fixed at declaration.
    pub fn with_value(mut self, value: impl Into<PartialValue>) -> Self {
        self.value = Some(value.into());
        self.constant = true;
        self
    }

    pub fn with_pattern(mut self, rows: Vec<usize>, cols: Vec<usize>) -> Self {
        self.rows = Some(rows);
        self.cols = Some(cols);
        self
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }
}

#[derive(Debug, Clone)]
struct PartialEntry {
    dependent: bool,
    constant: bool,
    pattern: Option<SparsityPattern>,
    value: Option<SubJacobian>,
    /// Written since the last `finish_pass`.
    fresh: bool,
}

impl PartialEntry {
    fn dependent() -> Self {
        PartialEntry {
            dependent: true,
            constant: false,
            pattern: None,
            value: None,
            fresh: false,
        }
    }

    fn live_block(&self) -> Option<&SubJacobian> {
        if self.dependent {
            self.value.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Jacobian {
    registry: Arc<VariableRegistry>,
    entries: BTreeMap<(String, String), PartialEntry>,
    assembled: Option<GlobalMatrix>,
    top_owner: bool,
    linearized: bool,
}

fn key(of: &str, wrt: &str) -> (String, String) {
    (of.to_string(), wrt.to_string())
}

impl Jacobian {
    pub fn new(registry: Arc<VariableRegistry>) -> Self {
        let mut entries = BTreeMap::new();
        for of in registry.names(VarKind::Output) {
            for wrt in registry.names(VarKind::Input) {
                entries.insert(key(of, wrt), PartialEntry::dependent());
            }
            entries.insert(key(of, of), PartialEntry::dependent());
        }
        Jacobian {
            registry,
            entries,
            assembled: None,
            top_owner: false,
            linearized: false,
        }
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    /// Mark this store as the one that maintains the assembled matrix.
    pub fn set_top_owner(&mut self, top_owner: bool) {
        self.top_owner = top_owner;
        if !top_owner {
            self.assembled = None;
        }
    }

    pub fn is_top_owner(&self) -> bool {
        self.top_owner
    }

    fn wrt_kind(&self, wrt: &str) -> MdaoResult<VarKind> {
        self.registry
            .find(wrt)
            .map(|m| m.kind)
            .ok_or_else(|| MdaoError::UndeclaredVariable {
                name: wrt.to_string(),
                kind: VarKind::Input,
            })
    }

    fn block_shape(&self, of: &str, wrt: &str) -> MdaoResult<(usize, usize)> {
        let rows = self.registry.size(VarKind::Output, of)?;
        let kind = self.wrt_kind(wrt)?;
        let cols = self.registry.size(kind, wrt)?;
        Ok((rows, cols))
    }

    /// Register or override the dependency status of one pair.
    pub fn declare(&mut self, of: &str, wrt: &str, decl: PartialDecl) -> MdaoResult<()> {
        if self.linearized {
            return Err(MdaoError::ConfigError(format!(
                "partial ({of}, {wrt}) declared after the first linearization"
            )));
        }
        let shape = self.block_shape(of, wrt)?;

        if !decl.dependent {
            self.entries.insert(
                key(of, wrt),
                PartialEntry {
                    dependent: false,
                    constant: false,
                    pattern: None,
                    value: None,
                    fresh: false,
                },
            );
            trace!(of, wrt, "declared non-dependent partial");
            return Ok(());
        }

        let pattern = match (decl.rows, decl.cols) {
            (Some(rows), Some(cols)) => {
                let pattern = SparsityPattern::new(rows, cols)?;
                pattern.check_bounds(shape)?;
                Some(pattern)
            }
            (None, None) => None,
            _ => {
                return Err(MdaoError::ConfigError(format!(
                    "partial ({of}, {wrt}) needs both rows and cols for a sparsity pattern"
                )));
            }
        };
        let value = decl
            .value
            .as_ref()
            .map(|v| SubJacobian::from_value(v, shape, pattern.as_ref()))
            .transpose()?;
        let fresh = value.is_some();
        self.entries.insert(
            key(of, wrt),
            PartialEntry {
                dependent: true,
                constant: decl.constant || value.is_some(),
                pattern,
                value,
                fresh,
            },
        );
        Ok(())
    }

    /// `declare` for several `wrt` names at once.
    pub fn declare_partials(&mut self, of: &str, wrt: &[&str], decl: PartialDecl) -> MdaoResult<()> {
        for name in wrt {
            self.declare(of, name, decl.clone())?;
        }
        Ok(())
    }

    /// Assign a block. Writes to a constant block that already holds a value
    /// are ignored.
    pub fn set(&mut self, of: &str, wrt: &str, value: impl Into<PartialValue>) -> MdaoResult<()> {
        let shape = self.block_shape(of, wrt)?;
        let entry = self
            .entries
            .entry(key(of, wrt))
            .or_insert_with(PartialEntry::dependent);
        if !entry.dependent {
            return Err(MdaoError::NonDependentPartial {
                of: of.to_string(),
                wrt: wrt.to_string(),
            });
        }
        if entry.constant && entry.value.is_some() {
            trace!(of, wrt, "skipping write to frozen constant partial");
            return Ok(());
        }
        entry.value = Some(SubJacobian::from_value(
            &value.into(),
            shape,
            entry.pattern.as_ref(),
        )?);
        entry.fresh = true;
        Ok(())
    }

    /// Force the `(of, of)` block to the identity.
    pub fn set_identity(&mut self, of: &str) -> MdaoResult<()> {
        let n = self.registry.size(VarKind::Output, of)?;
        let entry = self
            .entries
            .entry(key(of, of))
            .or_insert_with(PartialEntry::dependent);
        entry.dependent = true;
        entry.constant = false;
        entry.pattern = None;
        entry.value = Some(SubJacobian::identity(n));
        entry.fresh = true;
        Ok(())
    }

    /// Flip the sign of one block; no-op for non-dependent or empty pairs.
    pub fn negate(&mut self, of: &str, wrt: &str) -> MdaoResult<()> {
        self.block_shape(of, wrt)?;
        if let Some(entry) = self.entries.get_mut(&key(of, wrt)) {
            if entry.dependent {
                if let Some(block) = entry.value.as_mut() {
                    block.negate();
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, of: &str, wrt: &str) -> Option<&SubJacobian> {
        self.entries.get(&key(of, wrt)).and_then(PartialEntry::live_block)
    }

    pub fn is_dependent(&self, of: &str, wrt: &str) -> bool {
        self.entries.get(&key(of, wrt)).is_some_and(|e| e.dependent)
    }

    pub fn is_constant(&self, of: &str, wrt: &str) -> bool {
        self.entries.get(&key(of, wrt)).is_some_and(|e| e.constant)
    }

    /// True when the block was written during the current linearization pass.
    pub fn is_fresh(&self, of: &str, wrt: &str) -> bool {
        self.entries
            .get(&key(of, wrt))
            .is_some_and(|e| e.dependent && e.fresh && e.value.is_some())
    }

    /// Number of blocks holding storage.
    pub fn allocated_blocks(&self) -> usize {
        self.entries.values().filter(|e| e.value.is_some()).count()
    }

    /// Close a linearization pass.
    pub fn finish_pass(&mut self) {
        for entry in self.entries.values_mut() {
            entry.fresh = false;
        }
        self.linearized = true;
    }

    /// Accumulate the block operator into `d`.
    ///
    /// Forward: `d_residuals[of] += J[of, wrt] · d_(inputs|outputs)[wrt]`.
    /// Reverse: `d_(inputs|outputs)[wrt] += J[of, wrt]ᵀ · d_residuals[of]`.
    /// Blocks are visited in key order.
    pub fn apply(&self, d: &mut LinearVectors, mode: Mode) -> MdaoResult<()> {
        for ((of, wrt), entry) in &self.entries {
            let Some(block) = entry.live_block() else {
                continue;
            };
            let kind = self.wrt_kind(wrt)?;
            match mode {
                Mode::Fwd => {
                    let x = match kind {
                        VarKind::Input => d.d_inputs.get(wrt)?,
                        VarKind::Output => d.d_outputs.get(wrt)?,
                    };
                    block.mul_acc(x, d.d_residuals.get_mut(of)?);
                }
                Mode::Rev => {
                    let r = d.d_residuals.get(of)?;
                    let y = match kind {
                        VarKind::Input => d.d_inputs.get_mut(wrt)?,
                        VarKind::Output => d.d_outputs.get_mut(wrt)?,
                    };
                    block.tmul_acc(r, y);
                }
            }
        }
        Ok(())
    }

    /// Rebuild the assembled matrix from the current blocks.
    pub fn update(&mut self) -> MdaoResult<()> {
        let n_out = self.registry.total_size(VarKind::Output);
        let n_in = self.registry.total_size(VarKind::Input);
        let mut buffer = TripletBuffer::new((n_out, n_out + n_in));
        for ((of, wrt), entry) in &self.entries {
            let Some(block) = entry.live_block() else {
                continue;
            };
            let row = self.registry.offset(VarKind::Output, of)?;
            let col = match self.wrt_kind(wrt)? {
                VarKind::Output => self.registry.offset(VarKind::Output, wrt)?,
                VarKind::Input => n_out + self.registry.offset(VarKind::Input, wrt)?,
            };
            buffer.push_block(block, row, col)?;
        }
        let matrix = GlobalMatrix::from_triplets(&buffer);
        debug!(
            rows = n_out,
            cols = n_out + n_in,
            nnz = matrix.nnz(),
            "assembled jacobian"
        );
        self.assembled = Some(matrix);
        Ok(())
    }

    pub fn assembled(&self) -> Option<&GlobalMatrix> {
        self.assembled.as_ref()
    }

    /// Apply the assembled matrix, accumulating into `d` like [`Jacobian::apply`].
    pub fn apply_assembled(&self, d: &mut LinearVectors, mode: Mode) -> MdaoResult<()> {
        let matrix = self.assembled.as_ref().ok_or_else(|| {
            MdaoError::LinAlg("jacobian has not been assembled; call linearize first".to_string())
        })?;
        let n_out = d.d_outputs.len();
        let n_cols = matrix.shape().1;
        match mode {
            Mode::Fwd => {
                let mut x = Array1::zeros(n_cols);
                x.slice_mut(s![..n_out]).assign(&d.d_outputs.as_array());
                x.slice_mut(s![n_out..]).assign(&d.d_inputs.as_array());
                matrix.mul_acc(x.view(), d.d_residuals.as_array_mut())
            }
            Mode::Rev => {
                let mut y = Array1::zeros(n_cols);
                matrix.tmul_acc(d.d_residuals.as_array(), y.view_mut())?;
                let mut d_out = d.d_outputs.as_array_mut();
                d_out += &y.slice(s![..n_out]);
                let mut d_in = d.d_inputs.as_array_mut();
                d_in += &y.slice(s![n_out..]);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdao_types::metadata::VariableOptions;
    use mdao_types::vector::VectorSet;
    use ndarray::array;

    fn registry() -> Arc<VariableRegistry> {
        let mut reg = VariableRegistry::new();
        reg.add_input("x", VariableOptions::default()).unwrap();
        reg.add_input("y", VariableOptions::default().with_shape(&[2]))
            .unwrap();
        reg.add_output("f", VariableOptions::default().with_shape(&[2]))
            .unwrap();
        Arc::new(reg)
    }

    #[test]
    fn test_defaults_dependent_but_unallocated() {
        let jac = Jacobian::new(registry());
        assert!(jac.is_dependent("f", "x"));
        assert!(jac.is_dependent("f", "y"));
        assert!(jac.is_dependent("f", "f"));
        assert_eq!(jac.allocated_blocks(), 0);
    }

    #[test]
    fn test_non_dependent_write_rejected() {
        let mut jac = Jacobian::new(registry());
        jac.declare("f", "x", PartialDecl::independent()).unwrap();
        assert!(matches!(
            jac.set("f", "x", 1.0),
            Err(MdaoError::NonDependentPartial { .. })
        ));
        jac.negate("f", "x").unwrap();
        assert!(jac.get("f", "x").is_none());
        assert_eq!(jac.allocated_blocks(), 0);
    }

    #[test]
    fn test_undeclared_names_rejected() {
        let mut jac = Jacobian::new(registry());
        assert!(matches!(
            jac.set("x", "y", 1.0),
            Err(MdaoError::UndeclaredVariable { .. })
        ));
        assert!(jac.set("f", "nope", 1.0).is_err());
        assert!(jac.declare("nope", "x", PartialDecl::dependent()).is_err());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut jac = Jacobian::new(registry());
        assert!(matches!(
            jac.set("f", "y", vec![1.0, 2.0, 3.0]),
            Err(MdaoError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_constant_value_frozen() {
        let mut jac = Jacobian::new(registry());
        jac.declare("f", "x", PartialDecl::dependent().with_value(vec![2.0, 3.0]))
            .unwrap();
        assert!(jac.is_constant("f", "x"));
        jac.finish_pass();
        jac.set("f", "x", vec![9.0, 9.0]).unwrap();
        assert_eq!(jac.get("f", "x").unwrap().to_dense(), array![[2.0], [3.0]]);
    }

    #[test]
    fn test_constant_without_value_freezes_after_first_write() {
        let mut jac = Jacobian::new(registry());
        jac.declare("f", "x", PartialDecl::dependent().constant())
            .unwrap();
        jac.set("f", "x", 4.0).unwrap();
        jac.set("f", "x", 5.0).unwrap();
        assert_eq!(jac.get("f", "x").unwrap().to_dense(), array![[4.0], [4.0]]);
    }

    #[test]
    fn test_declare_after_linearize_rejected() {
        let mut jac = Jacobian::new(registry());
        jac.finish_pass();
        assert!(jac.declare("f", "x", PartialDecl::independent()).is_err());
    }

    #[test]
    fn test_pattern_needs_rows_and_cols() {
        let mut jac = Jacobian::new(registry());
        let decl = PartialDecl {
            rows: Some(vec![0]),
            ..PartialDecl::default()
        };
        assert!(jac.declare("f", "y", decl).is_err());
    }

    #[test]
    fn test_fresh_tracking() {
        let mut jac = Jacobian::new(registry());
        jac.set("f", "x", 1.0).unwrap();
        assert!(jac.is_fresh("f", "x"));
        assert!(!jac.is_fresh("f", "y"));
        jac.finish_pass();
        assert!(!jac.is_fresh("f", "x"));
    }

    #[test]
    fn test_block_apply_matches_assembled() {
        let reg = registry();
        let mut jac = Jacobian::new(Arc::clone(&reg));
        jac.set("f", "x", vec![1.0, -2.0]).unwrap();
        jac.set("f", "y", array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        jac.set_identity("f").unwrap();
        jac.update().unwrap();
        assert_eq!(jac.assembled().unwrap().nnz(), 2 + 4 + 2);

        let mut set = VectorSet::new(&reg, &["linear"]).unwrap();
        let lin = set.linear_mut("linear").unwrap();
        lin.d_inputs.set("x", &[0.5]).unwrap();
        lin.d_inputs.set("y", &[1.0, -1.0]).unwrap();
        lin.d_outputs.set("f", &[2.0, 3.0]).unwrap();

        let mut by_blocks = lin.clone();
        jac.apply(&mut by_blocks, Mode::Fwd).unwrap();
        let mut by_matrix = lin.clone();
        jac.apply_assembled(&mut by_matrix, Mode::Fwd).unwrap();
        // f = [0.5 - 1 + 2, -1 - 1 + 3]
        assert_eq!(by_blocks.d_residuals.as_array().to_vec(), vec![1.5, 1.0]);
        assert_eq!(
            by_blocks.d_residuals.as_array(),
            by_matrix.d_residuals.as_array()
        );

        lin.d_residuals.set("f", &[1.0, 1.0]).unwrap();
        lin.d_inputs.fill(0.0);
        lin.d_outputs.fill(0.0);
        let mut by_blocks = lin.clone();
        jac.apply(&mut by_blocks, Mode::Rev).unwrap();
        let mut by_matrix = lin.clone();
        jac.apply_assembled(&mut by_matrix, Mode::Rev).unwrap();
        assert_eq!(by_blocks.d_inputs.as_array().to_vec(), vec![-1.0, 4.0, 6.0]);
        assert_eq!(by_blocks.d_inputs.as_array(), by_matrix.d_inputs.as_array());
        assert_eq!(by_blocks.d_outputs.as_array(), by_matrix.d_outputs.as_array());
    }

    #[test]
    fn test_apply_assembled_requires_update() {
        let reg = registry();
        let jac = Jacobian::new(Arc::clone(&reg));
        let mut set = VectorSet::new(&reg, &["linear"]).unwrap();
        assert!(jac
            .apply_assembled(set.linear_mut("linear").unwrap(), Mode::Fwd)
            .is_err());
    }
}
