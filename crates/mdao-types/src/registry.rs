// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Variable Registry
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Ordered record of the variables a component declares.
//!
//! Declaration order fixes the flat layout of every vector and the row and
//! column order of the assembled Jacobian. Inputs come first in the combined
//! variable index, outputs after them.

use serde::{Deserialize, Serialize};

use crate::error::{MdaoError, MdaoResult};
use crate::metadata::{VarKind, VariableMetadata, VariableOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRegistry {
    #[serde(default)]
    inputs: Vec<VariableMetadata>,
    #[serde(default)]
    outputs: Vec<VariableMetadata>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: &str, options: VariableOptions) -> MdaoResult<()> {
        self.add(name, VarKind::Input, options)
    }

    pub fn add_output(&mut self, name: &str, options: VariableOptions) -> MdaoResult<()> {
        self.add(name, VarKind::Output, options)
    }

    /// Names are unique across inputs and outputs so that a partial's `wrt`
    /// name resolves to exactly one variable.
    pub fn add(&mut self, name: &str, kind: VarKind, options: VariableOptions) -> MdaoResult<()> {
        if let Some(existing) = self.find(name) {
            return Err(MdaoError::DuplicateVariable {
                name: name.to_string(),
                existing: existing.kind,
                kind,
            });
        }
        let meta = VariableMetadata::new(name, kind, options)?;
        self.list_mut(kind).push(meta);
        Ok(())
    }

    fn list_mut(&mut self, kind: VarKind) -> &mut Vec<VariableMetadata> {
        match kind {
            VarKind::Input => &mut self.inputs,
            VarKind::Output => &mut self.outputs,
        }
    }

    pub fn variables(&self, kind: VarKind) -> &[VariableMetadata] {
        match kind {
            VarKind::Input => &self.inputs,
            VarKind::Output => &self.outputs,
        }
    }

    pub fn names(&self, kind: VarKind) -> impl Iterator<Item = &str> {
        self.variables(kind).iter().map(|m| m.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<&VariableMetadata> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|m| m.name == name)
    }

    pub fn get(&self, kind: VarKind, name: &str) -> MdaoResult<&VariableMetadata> {
        self.variables(kind)
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| MdaoError::UndeclaredVariable {
                name: name.to_string(),
                kind,
            })
    }

    pub fn contains(&self, kind: VarKind, name: &str) -> bool {
        self.variables(kind).iter().any(|m| m.name == name)
    }

    pub fn size(&self, kind: VarKind, name: &str) -> MdaoResult<usize> {
        Ok(self.get(kind, name)?.size())
    }

    pub fn total_size(&self, kind: VarKind) -> usize {
        self.variables(kind).iter().map(VariableMetadata::size).sum()
    }

    /// Start of `name` in the flat vector of its kind.
    pub fn offset(&self, kind: VarKind, name: &str) -> MdaoResult<usize> {
        let mut offset = 0;
        for meta in self.variables(kind) {
            if meta.name == name {
                return Ok(offset);
            }
            offset += meta.size();
        }
        Err(MdaoError::UndeclaredVariable {
            name: name.to_string(),
            kind,
        })
    }

    /// Position in the combined ordering (inputs, then outputs).
    pub fn var_index(&self, kind: VarKind, name: &str) -> MdaoResult<usize> {
        let pos = self
            .variables(kind)
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| MdaoError::UndeclaredVariable {
                name: name.to_string(),
                kind,
            })?;
        Ok(match kind {
            VarKind::Input => pos,
            VarKind::Output => self.inputs.len() + pos,
        })
    }

    pub fn num_vars(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }
}
