// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Component Protocol
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The four canonical operations every component exposes, plus the
//! sub-solver hooks an enclosing group may attach.
//!
//! Linear operations overwrite their targets: forward mode writes
//! `d_residuals`, reverse mode writes `d_inputs` and `d_outputs`. With a
//! [`VarIndexRange`], variables outside the range are treated as absent from
//! `d_inputs`/`d_outputs`: they contribute nothing in forward mode and are
//! left untouched in reverse mode.

use std::sync::Arc;

use mdao_types::error::MdaoResult;
use mdao_types::metadata::VarKind;
use mdao_types::registry::VariableRegistry;
use mdao_types::vector::{LinearVectors, Mode, VarIndexRange, Vector, VectorSet};

use crate::jacobian::Jacobian;

/// Nonlinear sub-solver attached to an implicit component.
pub trait NonlinearSolver {
    /// Converge `outputs` for the given `inputs`. `Ok(false)` means the
    /// iteration did not converge.
    fn solve(&mut self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<bool>;
}

/// Linear sub-solver attached to an implicit component.
pub trait LinearSolver {
    /// Forward: `d_residuals -> d_outputs`. Reverse: `d_outputs -> d_residuals`.
    fn solve(&mut self, vectors: &mut VectorSet, vec_names: &[&str], mode: Mode) -> MdaoResult<bool>;
}

/// Operations an enclosing group drives on a component.
pub trait Component {
    fn name(&self) -> &str;

    fn registry(&self) -> &Arc<VariableRegistry>;

    fn jacobian(&self) -> &Jacobian;

    /// vec_names this component allocates linear vectors for.
    fn rhs_names(&self) -> &[String];

    /// Fresh vectors laid out for this component.
    fn new_vectors(&self) -> MdaoResult<VectorSet> {
        VectorSet::new(self.registry(), self.rhs_names())
    }

    /// Write `residuals` from the current `inputs` and `outputs`.
    fn apply_nonlinear(&mut self, vectors: &mut VectorSet) -> MdaoResult<()>;

    /// Update `outputs` so the residuals vanish. `Ok(false)` on non-convergence.
    fn solve_nonlinear(&mut self, vectors: &mut VectorSet) -> MdaoResult<bool>;

    fn apply_linear(
        &mut self,
        vectors: &mut VectorSet,
        vec_names: &[&str],
        mode: Mode,
        range: Option<VarIndexRange>,
    ) -> MdaoResult<()>;

    /// Invert the output block. `Ok(false)` on the first failed right-hand side.
    fn solve_linear(&mut self, vectors: &mut VectorSet, vec_names: &[&str], mode: Mode) -> MdaoResult<bool>;

    /// Refresh the Jacobian Store from the current nonlinear state.
    fn linearize(&mut self, vectors: &VectorSet) -> MdaoResult<()>;
}

/// Run `apply` on `lin` with target zeroing and index-range scoping.
pub(crate) fn scoped_linear<F>(
    registry: &VariableRegistry,
    lin: &mut LinearVectors,
    mode: Mode,
    range: Option<VarIndexRange>,
    apply: F,
) -> MdaoResult<()>
where
    F: FnOnce(&mut LinearVectors) -> MdaoResult<()>,
{
    let in_range = |kind: VarKind, name: &str| match range {
        None => true,
        Some(r) => registry
            .var_index(kind, name)
            .map(|i| r.contains(i))
            .unwrap_or(false),
    };

    match mode {
        Mode::Fwd => {
            lin.d_residuals.fill(0.0);
            if range.is_none() {
                return apply(lin);
            }
            let saved_inputs = lin.d_inputs.clone();
            let saved_outputs = lin.d_outputs.clone();
            lin.d_inputs.zero_unless(|n| in_range(VarKind::Input, n));
            lin.d_outputs.zero_unless(|n| in_range(VarKind::Output, n));
            let result = apply(lin);
            lin.d_inputs.set_from(&saved_inputs)?;
            lin.d_outputs.set_from(&saved_outputs)?;
            result
        }
        Mode::Rev => {
            let saved = range.map(|_| (lin.d_inputs.clone(), lin.d_outputs.clone()));
            lin.d_inputs.fill(0.0);
            lin.d_outputs.fill(0.0);
            apply(lin)?;
            if let Some((saved_inputs, saved_outputs)) = saved {
                restore_outside(&mut lin.d_inputs, &saved_inputs, |n| in_range(VarKind::Input, n))?;
                restore_outside(&mut lin.d_outputs, &saved_outputs, |n| {
                    in_range(VarKind::Output, n)
                })?;
            }
            Ok(())
        }
    }
}

fn restore_outside(
    target: &mut Vector,
    saved: &Vector,
    in_range: impl Fn(&str) -> bool,
) -> MdaoResult<()> {
    let outside: Vec<String> = target
        .names()
        .filter(|n| !in_range(n))
        .map(str::to_string)
        .collect();
    for name in outside {
        target.get_mut(&name)?.assign(&saved.get(&name)?);
    }
    Ok(())
}
