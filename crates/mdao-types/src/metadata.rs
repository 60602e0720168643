// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Variable Metadata
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{MdaoError, MdaoResult};

/// Role of a variable inside one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Input,
    Output,
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarKind::Input => write!(f, "input"),
            VarKind::Output => write!(f, "output"),
        }
    }
}

/// Initial value: a scalar broadcast over the shape, or a flat row-major array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialValue {
    Scalar(f64),
    Array(Vec<f64>),
}

impl From<f64> for InitialValue {
    fn from(v: f64) -> Self {
        InitialValue::Scalar(v)
    }
}

impl From<Vec<f64>> for InitialValue {
    fn from(v: Vec<f64>) -> Self {
        InitialValue::Array(v)
    }
}

/// Per-declaration options.
///
/// `VariableOptions::default()` is the prototype every declaration starts
/// from; each `add_input`/`add_output` call receives its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableOptions {
    #[serde(default = "default_shape")]
    pub shape: Vec<usize>,
    #[serde(default = "default_value")]
    pub value: InitialValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    /// Partition tag (`var_set`), used to group variables for solvers.
    #[serde(default)]
    pub partition_tag: usize,
    /// Source indices for inputs (ignored for outputs).
    #[serde(default = "default_src_indices")]
    pub src_indices: Vec<usize>,
}

fn default_shape() -> Vec<usize> {
    vec![1]
}
fn default_value() -> InitialValue {
    InitialValue::Scalar(1.0)
}
fn default_scale() -> f64 {
    1.0
}
fn default_src_indices() -> Vec<usize> {
    vec![0]
}

impl Default for VariableOptions {
    fn default() -> Self {
        VariableOptions {
            shape: default_shape(),
            value: default_value(),
            units: None,
            scale: default_scale(),
            lower: None,
            upper: None,
            partition_tag: 0,
            src_indices: default_src_indices(),
        }
    }
}

impl VariableOptions {
    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.shape = shape.to_vec();
        self
    }

    pub fn with_value(mut self, value: impl Into<InitialValue>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_partition_tag(mut self, tag: usize) -> Self {
        self.partition_tag = tag;
        self
    }
}

/// Declared variable, as recorded by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMetadata {
    pub name: String,
    pub kind: VarKind,
    pub shape: Vec<usize>,
    pub value: InitialValue,
    pub units: Option<String>,
    pub scale: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub partition_tag: usize,
    pub src_indices: Vec<usize>,
}

impl VariableMetadata {
    /// Validate `options` and build the metadata record for `name`.
    pub fn new(name: &str, kind: VarKind, options: VariableOptions) -> MdaoResult<Self> {
        if name.is_empty() {
            return Err(MdaoError::ConfigError(
                "variable name must not be empty".to_string(),
            ));
        }
        if options.shape.is_empty() || options.shape.iter().any(|&d| d == 0) {
            return Err(MdaoError::ConfigError(format!(
                "variable '{name}' needs a shape of positive extents, got {:?}",
                options.shape
            )));
        }
        if !options.scale.is_finite() || options.scale == 0.0 {
            return Err(MdaoError::ConfigError(format!(
                "variable '{name}' scale must be finite and non-zero"
            )));
        }
        if let (Some(lo), Some(hi)) = (options.lower, options.upper) {
            if lo > hi {
                return Err(MdaoError::ConfigError(format!(
                    "variable '{name}' lower bound {lo} exceeds upper bound {hi}"
                )));
            }
        }
        let size: usize = options.shape.iter().product();
        if let InitialValue::Array(values) = &options.value {
            if values.len() != size {
                return Err(MdaoError::shape(
                    format!("initial value of '{name}'"),
                    &options.shape,
                    &[values.len()],
                ));
            }
        }
        Ok(VariableMetadata {
            name: name.to_string(),
            kind,
            shape: options.shape,
            value: options.value,
            units: options.units,
            scale: options.scale,
            lower: options.lower,
            upper: options.upper,
            partition_tag: options.partition_tag,
            src_indices: match kind {
                VarKind::Input => options.src_indices,
                VarKind::Output => Vec::new(),
            },
        })
    }

    /// Flat element count.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Initial value expanded to a flat array of `size()` elements.
    pub fn initial_array(&self) -> Array1<f64> {
        match &self.value {
            InitialValue::Scalar(v) => Array1::from_elem(self.size(), *v),
            InitialValue::Array(values) => Array1::from_vec(values.clone()),
        }
    }
}
