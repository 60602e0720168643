//! Derivative block storage and sparse assembly for SCPN MDAO Core.

pub mod assembly;
pub mod block;
