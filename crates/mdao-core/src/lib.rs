//! Component evaluation and linearization protocol for SCPN MDAO Core.
//!
//! Implicit and explicit components over a block-sparse Jacobian Store,
//! plus the Processor Allocator that hands subsystems to process ranks.

pub mod comm;
pub mod component;
pub mod explicit;
pub mod implicit;
pub mod jacobian;
pub mod proc_alloc;
