// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Errors
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

use crate::metadata::VarKind;

/// Configuration errors of the component kernel.
///
/// Solver non-convergence is not represented here: solve operations report
/// it as `Ok(false)`.
#[derive(Error, Debug)]
pub enum MdaoError {
    #[error("Undeclared {kind} variable '{name}'")]
    UndeclaredVariable { name: String, kind: VarKind },

    #[error("Variable '{name}' declared twice (existing {existing}, new {kind})")]
    DuplicateVariable {
        name: String,
        existing: VarKind,
        kind: VarKind,
    },

    #[error("Shape mismatch for {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Partial derivative ({of}, {wrt}) is declared non-dependent")]
    NonDependentPartial { of: String, wrt: String },

    #[error("Unknown linear vector '{0}'")]
    UnknownVector(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),
}

pub type MdaoResult<T> = Result<T, MdaoError>;

impl MdaoError {
    pub fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        MdaoError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
