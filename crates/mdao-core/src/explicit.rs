// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Explicit Components
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Components defined by `y = f(x)`, driven as the residual `r = y - f(x)`.
//!
//! Model callbacks always report the plain derivative `∂f/∂x`. The sign of
//! the residual and the identity output block are folded in here:
//!
//! - forward: `d_residuals = d_outputs - ∂f/∂x · d_inputs`
//! - reverse: `d_inputs = -(∂f/∂x)ᵀ · d_residuals`, `d_outputs = d_residuals`

use std::sync::Arc;

use mdao_types::config::KernelConfig;
use mdao_types::error::{MdaoError, MdaoResult};
use mdao_types::metadata::VarKind;
use mdao_types::registry::VariableRegistry;
use mdao_types::vector::{LinearVectors, Mode, NonlinearVectors, VarIndexRange, Vector, VectorSet};
use tracing::{debug, trace};

use crate::component::{scoped_linear, Component};
use crate::jacobian::Jacobian;

/// Callbacks of an explicit component.
pub trait ExplicitModel {
    fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()>;

    fn declare_partials(&self, _jacobian: &mut Jacobian) -> MdaoResult<()> {
        Ok(())
    }

    /// Write `f(inputs)` into `outputs`.
    fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()>;

    /// Fill `(output, input)` blocks with `∂f/∂x`.
    fn compute_jacobian(&mut self, _inputs: &Vector, _outputs: &Vector, _jacobian: &mut Jacobian) -> MdaoResult<()> {
        Ok(())
    }

    /// True when `compute_jacvec_product` is implemented. Otherwise
    /// `apply_linear` runs on the blocks filled by `compute_jacobian`.
    fn matrix_free(&self) -> bool {
        false
    }

    /// Forward: `d_outputs += ∂f/∂x · d_inputs`.
    /// Reverse: `d_inputs += (∂f/∂x)ᵀ · d_outputs`.
    fn compute_jacvec_product(
        &self,
        _inputs: &Vector,
        _outputs: &Vector,
        _d_inputs: &mut Vector,
        _d_outputs: &mut Vector,
        _mode: Mode,
    ) -> MdaoResult<()> {
        Ok(())
    }
}

pub struct ExplicitComponent<M: ExplicitModel> {
    name: String,
    model: M,
    registry: Arc<VariableRegistry>,
    jacobian: Jacobian,
    rhs_names: Vec<String>,
}

impl<M: ExplicitModel> ExplicitComponent<M> {
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
        reject_output_cross_blocks(&registry, &jacobian)?;
        // The store path must see `d_residuals = d_outputs` even before the
        // first linearization.
        for of in registry.names(VarKind::Output) {
            jacobian.set_identity(of)?;
        }
        debug!(
            component = name,
            inputs = registry.variables(VarKind::Input).len(),
            outputs = registry.variables(VarKind::Output).len(),
            matrix_free = model.matrix_free(),
            assembled = config.jacobian.assembled,
            "set up explicit component"
        );
        Ok(ExplicitComponent {
            name: name.to_string(),
            model,
            registry,
            jacobian,
            rhs_names: config.vectors.rhs_names.clone(),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

/// Output-to-output partials other than the identity have no meaning for `y = f(x)`.
fn reject_output_cross_blocks(registry: &VariableRegistry, jacobian: &Jacobian) -> MdaoResult<()> {
    for of in registry.names(VarKind::Output) {
        for wrt in registry.names(VarKind::Output) {
            if wrt != of && jacobian.is_dependent(of, wrt) {
                return Err(MdaoError::ConfigError(format!(
                    "explicit component cannot carry partial ({of}, {wrt}) between outputs"
                )));
            }
        }
    }
    Ok(())
}

fn jacvec<M: ExplicitModel>(
    model: &M,
    nl: &NonlinearVectors,
    lin: &mut LinearVectors,
    mode: Mode,
) -> MdaoResult<()> {
    match mode {
        Mode::Fwd => {
            let mut d_inputs = lin.d_inputs.clone();
            let mut jvp = lin.d_outputs.zeros_like();
            model.compute_jacvec_product(&nl.inputs, &nl.outputs, &mut d_inputs, &mut jvp, Mode::Fwd)?;
            lin.d_residuals.set_from(&lin.d_outputs)?;
            lin.d_residuals.axpy(-1.0, &jvp)
        }
        Mode::Rev => {
            let mut seed = lin.d_residuals.clone();
            let mut vjp = lin.d_inputs.zeros_like();
            model.compute_jacvec_product(&nl.inputs, &nl.outputs, &mut vjp, &mut seed, Mode::Rev)?;
            lin.d_inputs.axpy(-1.0, &vjp)?;
            lin.d_outputs.set_from(&lin.d_residuals)
        }
    }
}

impl<M: ExplicitModel> Component for ExplicitComponent<M> {
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
        let saved = nl.outputs.clone();
        let computed = self.model.compute(&nl.inputs, &mut nl.outputs);
        if computed.is_ok() {
            nl.residuals.set_from(&saved)?;
            nl.residuals.axpy(-1.0, &nl.outputs)?;
        }
        nl.outputs.set_from(&saved)?;
        computed
    }

    fn solve_nonlinear(&mut self, vectors: &mut VectorSet) -> MdaoResult<bool> {
        let nl = vectors.nonlinear_mut();
        nl.residuals.fill(0.0);
        self.model.compute(&nl.inputs, &mut nl.outputs)?;
        Ok(true)
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
            trace!(component = %self.name, vec_name, ?mode, "explicit apply_linear");
            let (nl, lin) = vectors.split_linear_mut(vec_name)?;
            scoped_linear(&self.registry, lin, mode, range, |lin| {
                if jacobian.is_top_owner() {
                    jacobian.apply_assembled(lin, mode)
                } else if model.matrix_free() {
                    jacvec(model, nl, lin, mode)
                } else {
                    jacobian.apply(lin, mode)
                }
            })?;
        }
        Ok(())
    }

    fn solve_linear(&mut self, vectors: &mut VectorSet, vec_names: &[&str], mode: Mode) -> MdaoResult<bool> {
        for vec_name in vec_names {
            let lin = vectors.linear_mut(vec_name)?;
            match mode {
                Mode::Fwd => lin.d_outputs.set_from(&lin.d_residuals)?,
                Mode::Rev => lin.d_residuals.set_from(&lin.d_outputs)?,
            }
        }
        Ok(true)
    }

    fn linearize(&mut self, vectors: &VectorSet) -> MdaoResult<()> {
        let nl = vectors.nonlinear();
        self.model
            .compute_jacobian(&nl.inputs, &nl.outputs, &mut self.jacobian)?;
        reject_output_cross_blocks(&self.registry, &self.jacobian)?;

        let outputs: Vec<String> = self
            .registry
            .names(VarKind::Output)
            .map(str::to_string)
            .collect();
        let inputs: Vec<String> = self
            .registry
            .names(VarKind::Input)
            .map(str::to_string)
            .collect();
        for of in &outputs {
            self.jacobian.set_identity(of)?;
            for wrt in &inputs {
                // Blocks kept from an earlier pass already carry the residual sign.
                if self.jacobian.is_fresh(of, wrt) {
                    self.jacobian.negate(of, wrt)?;
                }
            }
        }
        self.jacobian.finish_pass();
        if self.jacobian.is_top_owner() {
            self.jacobian.update()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian::PartialDecl;
    use mdao_types::metadata::VariableOptions;
    use ndarray::array;

    /// f = (x - 3)^2 + x y + (y + 4)^2 - 3
    struct Paraboloid;

    impl ExplicitModel for Paraboloid {
        fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
            registry.add_input("x", VariableOptions::default().with_value(1.0))?;
            registry.add_input("y", VariableOptions::default().with_value(2.0))?;
            registry.add_output("f", VariableOptions::default().with_value(0.0))
        }

        fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
            let (x, y) = (inputs.get("x")?[0], inputs.get("y")?[0]);
            outputs.set("f", &[(x - 3.0).powi(2) + x * y + (y + 4.0).powi(2) - 3.0])
        }

        fn compute_jacobian(&mut self, inputs: &Vector, _outputs: &Vector, jacobian: &mut Jacobian) -> MdaoResult<()> {
            let (x, y) = (inputs.get("x")?[0], inputs.get("y")?[0]);
            jacobian.set("f", "x", 2.0 * (x - 3.0) + y)?;
            jacobian.set("f", "y", x + 2.0 * (y + 4.0))
        }
    }

    /// y = A x with a fixed 2x3 matrix, matrix-free only.
    struct MatVec;

    const A: [[f64; 3]; 2] = [[1.0, 2.0, 0.0], [0.0, -1.0, 3.0]];

    impl ExplicitModel for MatVec {
        fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
            registry.add_input("x", VariableOptions::default().with_shape(&[3]))?;
            registry.add_output("y", VariableOptions::default().with_shape(&[2]))
        }

        fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
            let x = inputs.get("x")?;
            let y: Vec<f64> = A
                .iter()
                .map(|row| row.iter().zip(x.iter()).map(|(a, b)| a * b).sum())
                .collect();
            outputs.set("y", &y)
        }

        fn matrix_free(&self) -> bool {
            true
        }

        fn compute_jacvec_product(
            &self,
            _inputs: &Vector,
            _outputs: &Vector,
            d_inputs: &mut Vector,
            d_outputs: &mut Vector,
            mode: Mode,
        ) -> MdaoResult<()> {
            match mode {
                Mode::Fwd => {
                    let dx = d_inputs.get("x")?.to_owned();
                    let mut dy = d_outputs.get_mut("y")?;
                    for (i, row) in A.iter().enumerate() {
                        dy[i] += row.iter().zip(dx.iter()).map(|(a, b)| a * b).sum::<f64>();
                    }
                }
                Mode::Rev => {
                    let dy = d_outputs.get("y")?.to_owned();
                    let mut dx = d_inputs.get_mut("x")?;
                    for (i, row) in A.iter().enumerate() {
                        for (j, a) in row.iter().enumerate() {
                            dx[j] += a * dy[i];
                        }
                    }
                }
            }
            Ok(())
        }
    }

    struct Failing;

    impl ExplicitModel for Failing {
        fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
            registry.add_input("x", VariableOptions::default())?;
            registry.add_output("y", VariableOptions::default().with_value(7.0))
        }

        fn compute(&self, _inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
            outputs.set("y", &[1.0])?;
            outputs.set("missing", &[1.0])
        }
    }

    #[test]
    fn test_apply_nonlinear_keeps_outputs() {
        let mut comp = ExplicitComponent::new("parab", Paraboloid).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        vectors.outputs_mut().set("f", &[10.0]).unwrap();
        comp.apply_nonlinear(&mut vectors).unwrap();
        // f(1, 2) = 4 + 2 + 36 - 3
        assert_eq!(vectors.outputs().get("f").unwrap()[0], 10.0);
        assert_eq!(vectors.residuals().get("f").unwrap()[0], 10.0 - 39.0);
    }

    #[test]
    fn test_apply_nonlinear_restores_on_error() {
        let mut comp = ExplicitComponent::new("bad", Failing).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        assert!(comp.apply_nonlinear(&mut vectors).is_err());
        assert_eq!(vectors.outputs().get("y").unwrap()[0], 7.0);
    }

    #[test]
    fn test_solve_then_apply_gives_zero_residual() {
        let mut comp = ExplicitComponent::new("parab", Paraboloid).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        assert!(comp.solve_nonlinear(&mut vectors).unwrap());
        assert_eq!(vectors.outputs().get("f").unwrap()[0], 39.0);
        comp.apply_nonlinear(&mut vectors).unwrap();
        assert_eq!(vectors.residuals().norm(), 0.0);
    }

    #[test]
    fn test_linearize_negates_cross_blocks() {
        let mut comp = ExplicitComponent::new("parab", Paraboloid).unwrap();
        let vectors = comp.new_vectors().unwrap();
        comp.linearize(&vectors).unwrap();
        let jac = comp.jacobian();
        // df/dx = -4 + 2, df/dy = 1 + 12
        assert_eq!(jac.get("f", "x").unwrap().to_dense(), array![[2.0]]);
        assert_eq!(jac.get("f", "y").unwrap().to_dense(), array![[-13.0]]);
        assert_eq!(jac.get("f", "f").unwrap().to_dense(), array![[1.0]]);

        // a second pass does not flip the sign back
        comp.linearize(&vectors).unwrap();
        assert_eq!(comp.jacobian().get("f", "x").unwrap().to_dense(), array![[2.0]]);
    }

    #[test]
    fn test_store_apply_linear_sign_convention() {
        let mut comp = ExplicitComponent::new("parab", Paraboloid).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        comp.linearize(&vectors).unwrap();

        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_inputs.set("x", &[1.0]).unwrap();
        lin.d_inputs.set("y", &[1.0]).unwrap();
        lin.d_outputs.set("f", &[5.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Fwd, None)
            .unwrap();
        // 5 - (-2 + 13)
        let lin = vectors.linear("linear").unwrap();
        assert_eq!(lin.d_residuals.get("f").unwrap()[0], -6.0);

        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_residuals.set("f", &[2.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Rev, None)
            .unwrap();
        let lin = vectors.linear("linear").unwrap();
        assert_eq!(lin.d_inputs.as_array().to_vec(), vec![4.0, -26.0]);
        assert_eq!(lin.d_outputs.get("f").unwrap()[0], 2.0);
    }

    /// y = 3 x through the block store.
    struct Triple;

    impl ExplicitModel for Triple {
        fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
            registry.add_input("x", VariableOptions::default())?;
            registry.add_output("y", VariableOptions::default())
        }

        fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
            outputs.set("y", &[3.0 * inputs.get("x")?[0]])
        }

        fn compute_jacobian(&mut self, _i: &Vector, _o: &Vector, jacobian: &mut Jacobian) -> MdaoResult<()> {
            jacobian.set("y", "x", 3.0)
        }
    }

    #[test]
    fn test_store_apply_linear_before_linearize_passes_outputs_through() {
        let mut comp = ExplicitComponent::new("triple", Triple).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_inputs.set("x", &[1.0]).unwrap();
        lin.d_outputs.set("y", &[5.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Fwd, None)
            .unwrap();
        assert_eq!(vectors.linear("linear").unwrap().d_residuals.get("y").unwrap()[0], 5.0);

        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_residuals.set("y", &[2.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Rev, None)
            .unwrap();
        let lin = vectors.linear("linear").unwrap();
        assert_eq!(lin.d_outputs.get("y").unwrap()[0], 2.0);
        assert_eq!(lin.d_inputs.get("x").unwrap()[0], 0.0);

        // after linearization the input block joins in
        comp.linearize(&vectors).unwrap();
        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_inputs.set("x", &[1.0]).unwrap();
        lin.d_outputs.set("y", &[5.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Fwd, None)
            .unwrap();
        assert_eq!(vectors.linear("linear").unwrap().d_residuals.get("y").unwrap()[0], 2.0);
    }

    /// Two outputs whose jacobian writes a block between them.
    struct CrossOutputs {
        declare_cross: bool,
    }

    impl ExplicitModel for CrossOutputs {
        fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
            registry.add_input("a", VariableOptions::default())?;
            registry.add_output("p", VariableOptions::default())?;
            registry.add_output("q", VariableOptions::default())
        }

        fn declare_partials(&self, jacobian: &mut Jacobian) -> MdaoResult<()> {
            if self.declare_cross {
                jacobian.declare("p", "q", PartialDecl::dependent())?;
            }
            Ok(())
        }

        fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
            let a = inputs.get("a")?[0];
            outputs.set("p", &[a])?;
            outputs.set("q", &[2.0 * a])
        }

        fn compute_jacobian(&mut self, _i: &Vector, _o: &Vector, jacobian: &mut Jacobian) -> MdaoResult<()> {
            jacobian.set("p", "a", 1.0)?;
            jacobian.set("q", "a", 2.0)?;
            jacobian.set("p", "q", 7.0)
        }
    }

    #[test]
    fn test_output_cross_blocks_are_rejected() {
        let mut comp = ExplicitComponent::new("cross", CrossOutputs { declare_cross: false }).unwrap();
        let vectors = comp.new_vectors().unwrap();
        assert!(matches!(comp.linearize(&vectors), Err(MdaoError::ConfigError(_))));

        let declared = ExplicitComponent::new("cross", CrossOutputs { declare_cross: true });
        assert!(matches!(declared, Err(MdaoError::ConfigError(_))));
    }

    #[test]
    fn test_matrix_free_sign_convention() {
        let mut comp = ExplicitComponent::new("matvec", MatVec).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_inputs.set("x", &[1.0, 1.0, 1.0]).unwrap();
        lin.d_outputs.set("y", &[10.0, 10.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Fwd, None)
            .unwrap();
        let lin = vectors.linear("linear").unwrap();
        assert_eq!(lin.d_residuals.as_array().to_vec(), vec![7.0, 8.0]);
        // the product never touches the caller's d_inputs
        assert_eq!(lin.d_inputs.as_array().to_vec(), vec![1.0, 1.0, 1.0]);

        let lin = vectors.linear_mut("linear").unwrap();
        lin.d_residuals.set("y", &[1.0, 2.0]).unwrap();
        comp.apply_linear(&mut vectors, &["linear"], Mode::Rev, None)
            .unwrap();
        let lin = vectors.linear("linear").unwrap();
        assert_eq!(lin.d_inputs.as_array().to_vec(), vec![-1.0, 0.0, -6.0]);
        assert_eq!(lin.d_outputs.as_array().to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_solve_linear_is_identity() {
        let config = KernelConfig::from_json_str(r#"{"vectors": {"rhs_names": ["a", "b"]}}"#).unwrap();
        let mut comp = ExplicitComponent::with_config("parab", Paraboloid, &config).unwrap();
        let mut vectors = comp.new_vectors().unwrap();
        vectors.linear_mut("a").unwrap().d_residuals.set("f", &[3.0]).unwrap();
        vectors.linear_mut("b").unwrap().d_residuals.set("f", &[-1.0]).unwrap();
        assert!(comp.solve_linear(&mut vectors, &["a", "b"], Mode::Fwd).unwrap());
        assert_eq!(vectors.linear("a").unwrap().d_outputs.get("f").unwrap()[0], 3.0);
        assert_eq!(vectors.linear("b").unwrap().d_outputs.get("f").unwrap()[0], -1.0);

        vectors.linear_mut("a").unwrap().d_outputs.set("f", &[8.0]).unwrap();
        assert!(comp.solve_linear(&mut vectors, &["a"], Mode::Rev).unwrap());
        assert_eq!(vectors.linear("a").unwrap().d_residuals.get("f").unwrap()[0], 8.0);
    }

    #[test]
    fn test_non_dependent_blocks_stay_unallocated() {
        struct Split;
        impl ExplicitModel for Split {
            fn setup(&self, registry: &mut VariableRegistry) -> MdaoResult<()> {
                registry.add_input("a", VariableOptions::default())?;
                registry.add_input("b", VariableOptions::default())?;
                registry.add_output("p", VariableOptions::default())?;
                registry.add_output("q", VariableOptions::default())
            }
            fn declare_partials(&self, jacobian: &mut Jacobian) -> MdaoResult<()> {
                jacobian.declare("p", "b", PartialDecl::independent())?;
                jacobian.declare("q", "a", PartialDecl::independent())
            }
            fn compute(&self, inputs: &Vector, outputs: &mut Vector) -> MdaoResult<()> {
                outputs.set("p", &[2.0 * inputs.get("a")?[0]])?;
                outputs.set("q", &[3.0 * inputs.get("b")?[0]])
            }
            fn compute_jacobian(&mut self, _i: &Vector, _o: &Vector, jacobian: &mut Jacobian) -> MdaoResult<()> {
                jacobian.set("p", "a", 2.0)?;
                jacobian.set("q", "b", 3.0)
            }
        }

        let config = KernelConfig::from_json_str(r#"{"jacobian": {"assembled": true}}"#).unwrap();
        let mut comp = ExplicitComponent::with_config("split", Split, &config).unwrap();
        let vectors = comp.new_vectors().unwrap();
        comp.linearize(&vectors).unwrap();
        assert_eq!(comp.jacobian().allocated_blocks(), 4);
        assert!(comp.jacobian().get("p", "b").is_none());
        assert_eq!(comp.jacobian().assembled().unwrap().nnz(), 4);
    }
}
