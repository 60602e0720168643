// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Vectors
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Named flat containers for nonlinear and linearized component state.
//!
//! A [`Vector`] is one contiguous `Array1<f64>` plus a shared
//! [`VectorLayout`] mapping each variable name to its slice. Residual
//! vectors use the output layout.

use std::ops::{MulAssign, Range};
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{s, Array1, ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use crate::error::{MdaoError, MdaoResult};
use crate::metadata::VarKind;
use crate::registry::VariableRegistry;

/// Direction of linear propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// (d_inputs, d_outputs) -> d_residuals
    Fwd,
    /// d_residuals -> (d_inputs, d_outputs)
    Rev,
}

/// Half-open range over the combined variable index (inputs, then outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarIndexRange {
    pub start: usize,
    pub end: usize,
}

impl VarIndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        VarIndexRange { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarSlot {
    pub range: Range<usize>,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayout {
    kind: VarKind,
    slots: IndexMap<String, VarSlot>,
    len: usize,
}

impl VectorLayout {
    pub fn from_registry(registry: &VariableRegistry, kind: VarKind) -> Self {
        let mut slots = IndexMap::new();
        let mut cursor = 0usize;
        for meta in registry.variables(kind) {
            let size = meta.size();
            slots.insert(
                meta.name.clone(),
                VarSlot {
                    range: cursor..cursor + size,
                    shape: meta.shape.clone(),
                },
            );
            cursor += size;
        }
        VectorLayout {
            kind,
            slots,
            len: cursor,
        }
    }

    pub fn kind(&self) -> VarKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn slot(&self, name: &str) -> MdaoResult<&VarSlot> {
        self.slots
            .get(name)
            .ok_or_else(|| MdaoError::UndeclaredVariable {
                name: name.to_string(),
                kind: self.kind,
            })
    }
}

#[derive(Debug, Clone)]
pub struct Vector {
    layout: Arc<VectorLayout>,
    data: Array1<f64>,
}

impl Vector {
    pub fn zeros(layout: Arc<VectorLayout>) -> Self {
        let data = Array1::zeros(layout.len());
        Vector { layout, data }
    }

    /// Vector filled with each variable's declared initial value.
    pub fn initial(layout: Arc<VectorLayout>, registry: &VariableRegistry) -> Self {
        let mut vec = Self::zeros(layout);
        for meta in registry.variables(vec.layout.kind()) {
            if let Ok(slot) = vec.layout.slot(&meta.name) {
                let range = slot.range.clone();
                vec.data
                    .slice_mut(s![range])
                    .assign(&meta.initial_array());
            }
        }
        vec
    }

    /// Zero vector sharing this vector's layout.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(Arc::clone(&self.layout))
    }

    pub fn layout(&self) -> &Arc<VectorLayout> {
        &self.layout
    }

    pub fn kind(&self) -> VarKind {
        self.layout.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layout.slot(name).is_ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layout.names()
    }

    pub fn get(&self, name: &str) -> MdaoResult<ArrayView1<'_, f64>> {
        let range = self.layout.slot(name)?.range.clone();
        Ok(self.data.slice(s![range]))
    }

    pub fn get_mut(&mut self, name: &str) -> MdaoResult<ArrayViewMut1<'_, f64>> {
        let range = self.layout.slot(name)?.range.clone();
        Ok(self.data.slice_mut(s![range]))
    }

    pub fn set(&mut self, name: &str, values: &[f64]) -> MdaoResult<()> {
        let slot = self.layout.slot(name)?;
        if values.len() != slot.range.len() {
            return Err(MdaoError::shape(
                format!("assignment to '{name}'"),
                &slot.shape,
                &[values.len()],
            ));
        }
        let range = slot.range.clone();
        self.data
            .slice_mut(s![range])
            .assign(&ArrayView1::from(values));
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn as_array(&self) -> ArrayView1<'_, f64> {
        self.data.view()
    }

    pub fn as_array_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.data.view_mut()
    }

    fn check_compatible(&self, other: &Vector) -> MdaoResult<()> {
        if Arc::ptr_eq(&self.layout, &other.layout) || *self.layout == *other.layout {
            Ok(())
        } else {
            Err(MdaoError::shape(
                format!("{} vector operation", self.kind()),
                &[self.len()],
                &[other.len()],
            ))
        }
    }

    pub fn set_from(&mut self, other: &Vector) -> MdaoResult<()> {
        self.check_compatible(other)?;
        self.data.assign(&other.data);
        Ok(())
    }

    /// `self += alpha * other`
    pub fn axpy(&mut self, alpha: f64, other: &Vector) -> MdaoResult<()> {
        self.check_compatible(other)?;
        self.data.scaled_add(alpha, &other.data);
        Ok(())
    }

    pub fn dot(&self, other: &Vector) -> MdaoResult<f64> {
        self.check_compatible(other)?;
        Ok(self.data.dot(&other.data))
    }

    pub fn norm(&self) -> f64 {
        self.data.dot(&self.data).sqrt()
    }

    /// Zero every variable for which `keep` returns false.
    pub fn zero_unless(&mut self, mut keep: impl FnMut(&str) -> bool) {
        for (name, slot) in self.layout.slots.iter() {
            if !keep(name) {
                self.data.slice_mut(s![slot.range.clone()]).fill(0.0);
            }
        }
    }
}

impl MulAssign<f64> for Vector {
    fn mul_assign(&mut self, rhs: f64) {
        self.data *= rhs;
    }
}

/// Nonlinear state of one component.
#[derive(Debug, Clone)]
pub struct NonlinearVectors {
    pub inputs: Vector,
    pub outputs: Vector,
    pub residuals: Vector,
}

/// Linearized state for one right-hand side.
#[derive(Debug, Clone)]
pub struct LinearVectors {
    pub d_inputs: Vector,
    pub d_outputs: Vector,
    pub d_residuals: Vector,
}

impl LinearVectors {
    fn zeros(input_layout: &Arc<VectorLayout>, output_layout: &Arc<VectorLayout>) -> Self {
        LinearVectors {
            d_inputs: Vector::zeros(Arc::clone(input_layout)),
            d_outputs: Vector::zeros(Arc::clone(output_layout)),
            d_residuals: Vector::zeros(Arc::clone(output_layout)),
        }
    }
}

/// All vectors of one component: the nonlinear triple and one linear triple
/// per vec_name.
#[derive(Debug, Clone)]
pub struct VectorSet {
    nonlinear: NonlinearVectors,
    linear: IndexMap<String, LinearVectors>,
}

impl VectorSet {
    pub fn new<S: AsRef<str>>(registry: &VariableRegistry, rhs_names: &[S]) -> MdaoResult<Self> {
        let input_layout = Arc::new(VectorLayout::from_registry(registry, VarKind::Input));
        let output_layout = Arc::new(VectorLayout::from_registry(registry, VarKind::Output));

        let nonlinear = NonlinearVectors {
            inputs: Vector::initial(Arc::clone(&input_layout), registry),
            outputs: Vector::initial(Arc::clone(&output_layout), registry),
            residuals: Vector::zeros(Arc::clone(&output_layout)),
        };

        let mut linear = IndexMap::new();
        for name in rhs_names {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(MdaoError::ConfigError(
                    "vec_name must not be empty".to_string(),
                ));
            }
            if linear
                .insert(
                    name.to_string(),
                    LinearVectors::zeros(&input_layout, &output_layout),
                )
                .is_some()
            {
                return Err(MdaoError::ConfigError(format!(
                    "vec_name '{name}' listed twice"
                )));
            }
        }
        Ok(VectorSet { nonlinear, linear })
    }

    pub fn nonlinear(&self) -> &NonlinearVectors {
        &self.nonlinear
    }

    pub fn nonlinear_mut(&mut self) -> &mut NonlinearVectors {
        &mut self.nonlinear
    }

    pub fn inputs(&self) -> &Vector {
        &self.nonlinear.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut Vector {
        &mut self.nonlinear.inputs
    }

    pub fn outputs(&self) -> &Vector {
        &self.nonlinear.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vector {
        &mut self.nonlinear.outputs
    }

    pub fn residuals(&self) -> &Vector {
        &self.nonlinear.residuals
    }

    pub fn rhs_names(&self) -> impl Iterator<Item = &str> {
        self.linear.keys().map(String::as_str)
    }

    pub fn linear(&self, vec_name: &str) -> MdaoResult<&LinearVectors> {
        self.linear
            .get(vec_name)
            .ok_or_else(|| MdaoError::UnknownVector(vec_name.to_string()))
    }

    pub fn linear_mut(&mut self, vec_name: &str) -> MdaoResult<&mut LinearVectors> {
        self.linear
            .get_mut(vec_name)
            .ok_or_else(|| MdaoError::UnknownVector(vec_name.to_string()))
    }

    /// Read-only nonlinear state alongside one writable linear triple.
    pub fn split_linear_mut(
        &mut self,
        vec_name: &str,
    ) -> MdaoResult<(&NonlinearVectors, &mut LinearVectors)> {
        let linear = self
            .linear
            .get_mut(vec_name)
            .ok_or_else(|| MdaoError::UnknownVector(vec_name.to_string()))?;
        Ok((&self.nonlinear, linear))
    }
}
