// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Implicit Components
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Components whose author supplies the residual `r(x, y)` directly.

use std::sync::Arc;

use mdao_types::config::KernelConfig;
use mdao_types::error::MdaoResult;
use mdao_types::registry::VariableRegistry;
use mdao_types::vector::{LinearVectors, Mode, VarIndexRange, Vector, VectorSet};
use tracing::debug;

use crate::component::{scoped_linear, Component, LinearSolver, NonlinearSolver};
use crate::jacobian::Jacobian;

/// Callbacks of an implicit component.
pub trait ImplicitModel {
    /// Declare inputs and outputs.
    fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()>;

    /// Declare sparsity, non-dependence and constant blocks.
    fn declare_partials(&self, _jacobian: &mut Jacobian) -> MdaoResult<()> {
        Ok(())
    }

    fn apply_nonlinear(&self, inputs: &Vector, outputs: &Vector, residuals: &mut Vector) -> MdaoResult<()>;

    fn solve_nonlinear(&mut self, _inputs: &Vector, _outputs: &mut Vector) -> MdaoResult<()> {
        Ok(())
    }

    /// Jacobian-vector product. The default applies the component's Jacobian
    /// Store, so models that fill it in `linearize` need nothing more.
    fn apply_linear(
        &self,
        _inputs: &Vector,
        _outputs: &Vector,
        d: &mut LinearVectors,
        mode: Mode,
        jacobian: &Jacobian,
    ) -> MdaoResult<()> {
        jacobian.apply(d, mode)
    }

    /// Inverse of the output block. The default knows no inverse and fails.
    fn solve_linear(&mut self, _d_outputs: &mut Vector, _d_residuals: &mut Vector, _mode: Mode) -> MdaoResult<bool> {
        Ok(false)
    }

    fn linearize(&mut self, _inputs: &Vector, _outputs: &Vector, _jacobian: &mut Jacobian) -> MdaoResult<()> {
        Ok(())
    }
}

pub struct ImplicitComponent<M: ImplicitModel> {
    name: String,
    model: M,
    registry: Arc<VariableRegistry>,
    jacobian: Jacobian,
    rhs_names: Vec<String>,
    nonlinear_solver: Option<Box<dyn NonlinearSolver>>,
    linear_solver: Option<Box<dyn LinearSolver>>,
}

impl<M: ImplicitModel> ImplicitComponent<M> {
    pub fn new(name: &str, model: M) -> MdaoResult<Self> {
        Self::with_config(name, model, &KernelConfig::default())
    }

    pub fn with_config(name: &str, model: M, config: &KernelConfig) -> MdaoResult<Self> {
        config.validate()?;
        let mut registry = VariableRegistry::new();
        model.setup(&mut registry)?;
        let registry = Arc::new(registry);
        let mut jacobian = Jacobian::new(Arc::clone(&registry));
        jacobian.set_top_owner(config.jacobian.assembled);
        model.declare_partials(&mut jacobian)?;
        debug!(
            component = name,
            inputs = registry.variables(mdao_types::metadata::VarKind::Input).len(),
            outputs = registry.variables(mdao_types::metadata::VarKind::Output).len(),
            assembled = config.jacobian.assembled,
            "set up implicit component"
        );
        Ok(ImplicitComponent {
            name: name.to_string(),
            model,
            registry,
            jacobian,
            rhs_names: config.vectors.rhs_names.clone(),
            nonlinear_solver: None,
            linear_solver: None,
        })
    }

    pub fn with_nonlinear_solver(mut self, solver: impl NonlinearSolver + 'static) -> Self {
        self.nonlinear_solver = Some(Box::new(solver));
        self
    }

    pub fn with_linear_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.linear_solver = Some(Box::new(solver));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

impl<M: ImplicitModel> Component for ImplicitComponent<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    fn jacobian(&self) -> &Jacobian {
        &self.jacobian
    }

    fn rhs_names(&self) -> &[String] {
        &self.rhs_names
    }

    fn apply_nonlinear(&mut self, vectors: &mut VectorSet) -> MdaoResult<()> {
        let nl = vectors.nonlinear_mut();
        self.model
            .apply_nonlinear(&nl.inputs, &nl.outputs, &mut nl.residuals)
    }

    fn solve_nonlinear(&mut self, vectors: &mut VectorSet) -> MdaoResult<bool> {
        let nl = vectors.nonlinear_mut();
        match self.nonlinear_solver.as_mut() {
            Some(solver) => {
                let converged = solver.solve(&nl.inputs, &mut nl.outputs)?;
                if !converged {
                    debug!(component = %self.name, "nonlinear sub-solver did not converge");
                }
                Ok(converged)
            }
            None => {
                self.model.solve_nonlinear(&nl.inputs, &mut nl.outputs)?;
                Ok(true)
            }
        }
    }

    fn apply_linear(
        &mut self,
        vectors: &mut VectorSet,
        vec_names: &[&str],
        mode: Mode,
        range: Option<VarIndexRange>,
    ) -> MdaoResult<()> {
        let jacobian = &self.jacobian;
        let model = &self.model;
        for vec_name in vec_names {
            let (nl, lin) = vectors.split_linear_mut(vec_name)?;
            scoped_linear(&self.registry, lin, mode, range, |lin| {
                if jacobian.is_top_owner() {
                    jacobian.apply_assembled(lin, mode)
                } else {
                    model.apply_linear(&nl.inputs, &nl.outputs, lin, mode, jacobian)
                }
            })?;
        }
        Ok(())
    }

    fn solve_linear(&mut self, vectors: &mut VectorSet, vec_names: &[&str], mode: Mode) -> MdaoResult<bool> {
        if let Some(solver) = self.linear_solver.as_mut() {
            return solver.solve(vectors, vec_names, mode);
        }
        for vec_name in vec_names {
            let lin = vectors.linear_mut(vec_name)?;
            if !self
                .model
                .solve_linear(&mut lin.d_outputs, &mut lin.d_residuals, mode)?
            {
                debug!(component = %self.name, vec_name, ?mode, "solve_linear failed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn linearize(&mut self, vectors: &VectorSet) -> MdaoResult<()> {
        let nl = vectors.nonlinear();
        self.model
            .linearize(&nl.inputs, &nl.outputs, &mut self.jacobian)?;
        self.jacobian.finish_pass();
        if self.jacobian.is_top_owner() {
            self.jacobian.update()?;
        }
        Ok(())
    }
}
