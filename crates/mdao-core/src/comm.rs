// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Communicators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Process-group abstraction used by the Processor Allocator.
//!
//! `split_by_colors` is the collective split: every rank passes the same
//! color table (`colors[r]` is rank `r`'s color) and receives the group of
//! ranks sharing its color, ordered by parent rank.

use std::fmt;
use std::sync::Arc;

use mdao_types::error::{MdaoError, MdaoResult};

pub trait Communicator: fmt::Debug + Send + Sync {
    fn size(&self) -> usize;

    fn rank(&self) -> usize;

    fn split_by_colors(&self, colors: &[usize]) -> MdaoResult<Arc<dyn Communicator>>;
}

fn check_colors(colors: &[usize], size: usize) -> MdaoResult<()> {
    if colors.len() != size {
        return Err(MdaoError::ConfigError(format!(
            "color table has {} entries for a communicator of size {size}",
            colors.len()
        )));
    }
    Ok(())
}

/// Single-process communicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn split_by_colors(&self, colors: &[usize]) -> MdaoResult<Arc<dyn Communicator>> {
        check_colors(colors, 1)?;
        Ok(Arc::new(SerialComm))
    }
}

/// One rank's view of an in-process group of `size` ranks.
///
/// Splits are computed locally from the shared color table, so evaluating
/// every rank of a world reproduces what a distributed run would see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedComm {
    rank: usize,
    size: usize,
}

impl SimulatedComm {
    pub fn new(rank: usize, size: usize) -> MdaoResult<Self> {
        if size == 0 || rank >= size {
            return Err(MdaoError::ConfigError(format!(
                "rank {rank} invalid for communicator of size {size}"
            )));
        }
        Ok(SimulatedComm { rank, size })
    }

    /// Every rank of a `size`-rank group.
    pub fn world(size: usize) -> Vec<Arc<dyn Communicator>> {
        (0..size)
            .map(|rank| Arc::new(SimulatedComm { rank, size }) as Arc<dyn Communicator>)
            .collect()
    }
}

impl Communicator for SimulatedComm {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn split_by_colors(&self, colors: &[usize]) -> MdaoResult<Arc<dyn Communicator>> {
        check_colors(colors, self.size)?;
        let color = colors[self.rank];
        let rank = colors[..self.rank].iter().filter(|&&c| c == color).count();
        let size = colors.iter().filter(|&&c| c == color).count();
        Ok(Arc::new(SimulatedComm { rank, size }))
    }
}
