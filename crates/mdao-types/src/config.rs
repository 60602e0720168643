// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::error::{MdaoError, MdaoResult};

/// Kernel configuration. Every section is optional in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub jacobian: JacobianOptions,
    #[serde(default)]
    pub vectors: VectorOptions,
    #[serde(default)]
    pub allocator: AllocatorOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JacobianOptions {
    /// This component is the top owner and maintains the global sparse matrix.
    #[serde(default)]
    pub assembled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorOptions {
    /// Right-hand-side names for which linear vectors are allocated.
    #[serde(default = "default_rhs_names")]
    pub rhs_names: Vec<String>,
}

fn default_rhs_names() -> Vec<String> {
    vec!["linear".to_string()]
}

impl Default for VectorOptions {
    fn default() -> Self {
        VectorOptions {
            rhs_names: default_rhs_names(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Contiguous,
    Weighted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocatorOptions {
    /// True splits the communicator across subsystems; false hands it to all.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Per-subsystem weights for the weighted strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

impl KernelConfig {
    pub fn from_file(path: &str) -> MdaoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> MdaoResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MdaoResult<()> {
        if self.vectors.rhs_names.is_empty() {
            return Err(MdaoError::ConfigError(
                "vectors.rhs_names must list at least one vec_name".to_string(),
            ));
        }
        if let Some(weights) = &self.allocator.weights {
            if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(MdaoError::ConfigError(
                    "allocator.weights must be finite and > 0".to_string(),
                ));
            }
        }
        if self.allocator.strategy == StrategyKind::Weighted && self.allocator.weights.is_none() {
            return Err(MdaoError::ConfigError(
                "weighted allocator strategy requires allocator.weights".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_json_gives_defaults() {
        let cfg = KernelConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, KernelConfig::default());
        assert!(!cfg.jacobian.assembled);
        assert_eq!(cfg.vectors.rhs_names, vec!["linear".to_string()]);
        assert!(!cfg.allocator.parallel);
        assert_eq!(cfg.allocator.strategy, StrategyKind::Contiguous);
    }

    #[test]
    fn test_full_config_parses() {
        let json = r#"{
            "jacobian": {"assembled": true},
            "vectors": {"rhs_names": ["linear", "adjoint_cl"]},
            "allocator": {"parallel": true, "strategy": "weighted", "weights": [1.0, 3.0]}
        }"#;
        let cfg = KernelConfig::from_json_str(json).unwrap();
        assert!(cfg.jacobian.assembled);
        assert_eq!(cfg.vectors.rhs_names.len(), 2);
        assert_eq!(cfg.allocator.strategy, StrategyKind::Weighted);
        assert_eq!(cfg.allocator.weights, Some(vec![1.0, 3.0]));
    }

    #[test]
    fn test_rejects_invalid_sections() {
        assert!(KernelConfig::from_json_str(r#"{"vectors": {"rhs_names": []}}"#).is_err());
        assert!(KernelConfig::from_json_str(
            r#"{"allocator": {"parallel": true, "strategy": "weighted"}}"#
        )
        .is_err());
        assert!(KernelConfig::from_json_str(
            r#"{"allocator": {"strategy": "weighted", "weights": [1.0, -2.0]}}"#
        )
        .is_err());
        assert!(matches!(
            KernelConfig::from_json_str("{not json"),
            Err(MdaoError::Json(_))
        ));
    }

    #[test]
    fn test_from_file_and_missing_file() {
        let path = std::env::temp_dir().join(format!("mdao_cfg_{}.json", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(br#"{"jacobian": {"assembled": true}}"#).unwrap();
        }
        let cfg = KernelConfig::from_file(&path.to_string_lossy()).unwrap();
        assert!(cfg.jacobian.assembled);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            KernelConfig::from_file("/nonexistent/mdao.json"),
            Err(MdaoError::Io(_))
        ));
    }

    #[test]
    fn test_roundtrip_serialization() {
        let mut cfg = KernelConfig::default();
        cfg.allocator.parallel = true;
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let back: KernelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
