// ─────────────────────────────────────────────────────────────────────
// SCPN MDAO Core — Processor Allocation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Partition of process ranks and subsystems for one level of a system tree.
//!
//! `allocate(nsub, comm, proc_range)` yields the subsystems this rank owns,
//! the communicator they run on and the slice of `proc_range` behind it.
//! Across all ranks the sub-ranges tile `proc_range` and every subsystem in
//! `0..nsub` has an owner. Each subsystem may call `allocate` again with
//! what it received.

use std::fmt;
use std::sync::Arc;

use mdao_types::config::{AllocatorOptions, StrategyKind};
use mdao_types::error::{MdaoError, MdaoResult};
use tracing::debug;

use crate::comm::Communicator;

/// Half-open interval of global process ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcRange {
    pub start: usize,
    pub end: usize,
}

impl ProcRange {
    pub fn new(start: usize, end: usize) -> Self {
        ProcRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Clone)]
pub struct ProcAllocation {
    /// Subsystem indices owned by this rank, ascending.
    pub isubs: Vec<usize>,
    pub sub_comm: Arc<dyn Communicator>,
    pub sub_proc_range: ProcRange,
}

/// Splitting rule applied when a parallel group spans several ranks.
///
/// Called with `comm.size() == proc_range.len() > 1` and `nsub > 0`.
pub trait PartitionStrategy: fmt::Debug + Send + Sync {
    fn divide(
        &self,
        nsub: usize,
        comm: &Arc<dyn Communicator>,
        proc_range: ProcRange,
    ) -> MdaoResult<ProcAllocation>;
}

/// `total` split into `parts` near-equal counts, remainder to the lowest parts.
fn even_counts(total: usize, parts: usize) -> Vec<usize> {
    let base = total / parts;
    let rem = total % parts;
    (0..parts).map(|i| base + usize::from(i < rem)).collect()
}

/// Subsystem `k` runs on `procs_per_sub[k]` consecutive ranks.
/// Requires `procs_per_sub.iter().sum() == comm.size()`, every count > 0.
fn assign_processes(
    procs_per_sub: &[usize],
    comm: &Arc<dyn Communicator>,
    proc_range: ProcRange,
) -> MdaoResult<ProcAllocation> {
    let mut colors = Vec::with_capacity(comm.size());
    let mut owned = None;
    let mut cursor = 0usize;
    for (isub, &count) in procs_per_sub.iter().enumerate() {
        if (cursor..cursor + count).contains(&comm.rank()) {
            owned = Some((isub, cursor, cursor + count));
        }
        colors.extend(std::iter::repeat(isub).take(count));
        cursor += count;
    }
    let (isub, lo, hi) = owned.ok_or_else(|| {
        MdaoError::ConfigError(format!(
            "rank {} not covered by process counts {procs_per_sub:?}",
            comm.rank()
        ))
    })?;
    Ok(ProcAllocation {
        isubs: vec![isub],
        sub_comm: comm.split_by_colors(&colors)?,
        sub_proc_range: ProcRange::new(proc_range.start + lo, proc_range.start + hi),
    })
}

/// Rank `r` owns `subs_per_proc[r]` consecutive subsystems on its own
/// single-rank communicator.
fn assign_subsystems(
    subs_per_proc: &[usize],
    comm: &Arc<dyn Communicator>,
    proc_range: ProcRange,
) -> MdaoResult<ProcAllocation> {
    let rank = comm.rank();
    let first: usize = subs_per_proc[..rank].iter().sum();
    let colors: Vec<usize> = (0..comm.size()).collect();
    Ok(ProcAllocation {
        isubs: (first..first + subs_per_proc[rank]).collect(),
        sub_comm: comm.split_by_colors(&colors)?,
        sub_proc_range: ProcRange::new(proc_range.start + rank, proc_range.start + rank + 1),
    })
}

/// Near-equal contiguous blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContiguousSplit;

impl PartitionStrategy for ContiguousSplit {
    fn divide(
        &self,
        nsub: usize,
        comm: &Arc<dyn Communicator>,
        proc_range: ProcRange,
    ) -> MdaoResult<ProcAllocation> {
        let nproc = comm.size();
        if nproc >= nsub {
            assign_processes(&even_counts(nproc, nsub), comm, proc_range)
        } else {
            assign_subsystems(&even_counts(nsub, nproc), comm, proc_range)
        }
    }
}

/// Ranks handed out in proportion to per-subsystem weights.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSplit {
    weights: Vec<f64>,
}

impl WeightedSplit {
    pub fn new(weights: Vec<f64>) -> MdaoResult<Self> {
        if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(MdaoError::ConfigError(
                "weights must be non-empty, finite and > 0".to_string(),
            ));
        }
        Ok(WeightedSplit { weights })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// One rank each, the rest by largest remainder (ties to the lower index).
    fn procs_per_sub(&self, nproc: usize) -> Vec<usize> {
        let nsub = self.weights.len();
        let extra = nproc - nsub;
        let total: f64 = self.weights.iter().sum();
        let quotas: Vec<f64> = self
            .weights
            .iter()
            .map(|w| extra as f64 * w / total)
            .collect();
        let mut counts: Vec<usize> = quotas.iter().map(|q| 1 + q.floor() as usize).collect();
        let assigned: usize = counts.iter().sum::<usize>() - nsub;

        let mut order: Vec<usize> = (0..nsub).collect();
        order.sort_by(|&a, &b| {
            let ra = quotas[a] - quotas[a].floor();
            let rb = quotas[b] - quotas[b].floor();
            rb.total_cmp(&ra).then(a.cmp(&b))
        });
        for &i in order.iter().cycle().take(extra.saturating_sub(assigned)) {
            counts[i] += 1;
        }
        counts
    }

    /// Contiguous groups of near-equal cumulative weight, none empty.
    fn subs_per_proc(&self, nproc: usize) -> Vec<usize> {
        let nsub = self.weights.len();
        let total: f64 = self.weights.iter().sum();
        let mut cumulative = Vec::with_capacity(nsub);
        let mut acc = 0.0;
        for w in &self.weights {
            acc += w;
            cumulative.push(acc);
        }

        let mut counts = Vec::with_capacity(nproc);
        let mut start = 0usize;
        for part in 1..nproc {
            let target = total * part as f64 / nproc as f64;
            let ideal = cumulative.partition_point(|&c| c < target) + 1;
            let end = ideal.clamp(start + 1, nsub - (nproc - part));
            counts.push(end - start);
            start = end;
        }
        counts.push(nsub - start);
        counts
    }
}

impl PartitionStrategy for WeightedSplit {
    fn divide(
        &self,
        nsub: usize,
        comm: &Arc<dyn Communicator>,
        proc_range: ProcRange,
    ) -> MdaoResult<ProcAllocation> {
        if self.weights.len() != nsub {
            return Err(MdaoError::ConfigError(format!(
                "{} weights given for {nsub} subsystems",
                self.weights.len()
            )));
        }
        let nproc = comm.size();
        if nproc >= nsub {
            assign_processes(&self.procs_per_sub(nproc), comm, proc_range)
        } else {
            assign_subsystems(&self.subs_per_proc(nproc), comm, proc_range)
        }
    }
}

/// Processor Allocator of one group.
#[derive(Debug)]
pub struct ProcAllocator {
    parallel: bool,
    strategy: Box<dyn PartitionStrategy>,
}

impl Default for ProcAllocator {
    fn default() -> Self {
        Self::serial()
    }
}

impl ProcAllocator {
    pub fn serial() -> Self {
        ProcAllocator {
            parallel: false,
            strategy: Box::new(ContiguousSplit),
        }
    }

    pub fn parallel(strategy: impl PartitionStrategy + 'static) -> Self {
        ProcAllocator {
            parallel: true,
            strategy: Box::new(strategy),
        }
    }

    pub fn from_options(options: &AllocatorOptions) -> MdaoResult<Self> {
        let strategy: Box<dyn PartitionStrategy> = match options.strategy {
            StrategyKind::Contiguous => Box::new(ContiguousSplit),
            StrategyKind::Weighted => {
                let weights = options.weights.clone().ok_or_else(|| {
                    MdaoError::ConfigError("weighted strategy requires weights".to_string())
                })?;
                Box::new(WeightedSplit::new(weights)?)
            }
        };
        Ok(ProcAllocator {
            parallel: options.parallel,
            strategy,
        })
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn allocate(
        &self,
        nsub: usize,
        comm: &Arc<dyn Communicator>,
        proc_range: ProcRange,
    ) -> MdaoResult<ProcAllocation> {
        if nsub == 0 || proc_range.is_empty() {
            debug!(nsub, ?proc_range, "degenerate allocation");
            return Ok(ProcAllocation {
                isubs: Vec::new(),
                sub_comm: Arc::clone(comm),
                sub_proc_range: ProcRange::new(proc_range.start, proc_range.start),
            });
        }
        if !self.parallel || comm.size() == 1 {
            return Ok(ProcAllocation {
                isubs: (0..nsub).collect(),
                sub_comm: Arc::clone(comm),
                sub_proc_range: proc_range,
            });
        }
        if proc_range.len() != comm.size() {
            return Err(MdaoError::ConfigError(format!(
                "proc range {}..{} does not match communicator size {}",
                proc_range.start,
                proc_range.end,
                comm.size()
            )));
        }

        let alloc = self.strategy.divide(nsub, comm, proc_range)?;
        check_local(&alloc, nsub, proc_range)?;
        debug!(
            rank = comm.rank(),
            nsub,
            isubs = ?alloc.isubs,
            sub_start = alloc.sub_proc_range.start,
            sub_end = alloc.sub_proc_range.end,
            "parallel allocation"
        );
        Ok(alloc)
    }
}

/// Rank-local sanity checks on a strategy's answer.
fn check_local(alloc: &ProcAllocation, nsub: usize, proc_range: ProcRange) -> MdaoResult<()> {
    let sub = alloc.sub_proc_range;
    if sub.start < proc_range.start || sub.end > proc_range.end || sub.is_empty() {
        return Err(MdaoError::ConfigError(format!(
            "sub range {}..{} outside {}..{}",
            sub.start, sub.end, proc_range.start, proc_range.end
        )));
    }
    if alloc.sub_comm.size() != sub.len() {
        return Err(MdaoError::ConfigError(format!(
            "sub communicator size {} does not match sub range length {}",
            alloc.sub_comm.size(),
            sub.len()
        )));
    }
    if let Some(&bad) = alloc.isubs.iter().find(|&&i| i >= nsub) {
        return Err(MdaoError::ConfigError(format!(
            "subsystem index {bad} out of range for {nsub} subsystems"
        )));
    }
    Ok(())
}
