//! Batched, memory-budgeted, multi-threaded VIG aggregation.
//!
//! The builder bounds its working set to a caller-supplied number of
//! pair-write slots. Variables are partitioned into contiguous batches whose
//! contribution counts fit the per-thread capacity; the batches of each
//! round share one cell arena sized to the largest round. The whole layout
//! (batch partition, arena regions, each variable's place within them) is
//! computed up front and shared immutably, so the worker pool synchronises
//! through atomics and barriers alone: no mutex, no lock. Four barrier
//! waits per round order the phases: setup, fill, reduce, teardown.
//!
//! Output is deterministic: every variable lives in exactly one batch, so
//! its neighbour multiset is independent of the budget and worker count;
//! the per-variable sort keys on `(neighbour, weight bits)` so neither the
//! reduction order nor the floating-point sums can depend on which thread
//! wrote first; and the merged edge list is canonicalised by endpoint, so
//! the result is identical for any valid budget and worker count.

use std::{
    sync::{
        Barrier,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    thread,
};

use rayon::prelude::*;
use tracing::debug;

use crate::cnf::Cnf;

use super::{ClauseThreshold, Edge, PairWeights, Vig, VigBuildError};

pub(super) fn build(
    cnf: &Cnf,
    threshold: ClauseThreshold,
    max_buffer: usize,
    threads: usize,
) -> Result<Vig, VigBuildError> {
    if threads == 0 {
        return Err(VigBuildError::InvalidThreadCount);
    }
    if max_buffer == 0 {
        return Err(VigBuildError::InvalidBufferCapacity);
    }

    let n = cnf.variable_count();
    if n == 0 {
        return Ok(Vig::new(0, Vec::new(), 0, false));
    }

    let plan = ContributionPlan::analyse(cnf, threshold)?;
    if plan.total == 0 {
        return Ok(Vig::new(n, Vec::new(), plan.scaffolding_bytes(), false));
    }

    let (capacity, bumped_to_fit) = plan.per_thread_capacity(max_buffer, threads);
    let layout = RoundLayout::plan(&plan, capacity, threads)?;
    debug!(
        variables = n,
        total_contributions = plan.total,
        max_contribution = plan.max,
        capacity,
        bumped_to_fit,
        batches = layout.batches.len(),
        rounds = layout.rounds,
        target_rounds = plan.total.div_ceil(capacity.saturating_mul(threads as u64).max(1)),
        "planned VIG aggregation"
    );

    let weights = PairWeights::up_to(plan.max_clause_size);
    let arena: Vec<PairCell> = (0..layout.arena_len).map(|_| PairCell::zeroed()).collect();
    let write_ptrs: Vec<AtomicU32> = layout
        .cell_offset
        .iter()
        .map(|&offset| AtomicU32::new(offset))
        .collect();
    let barrier = Barrier::new(threads);

    let context = WorkerContext {
        clauses: cnf.clauses(),
        threshold,
        weights: &weights,
        contributions: &plan.contributions,
        layout: &layout,
        arena: &arena,
        write_ptrs: &write_ptrs,
        barrier: &barrier,
        threads,
    };

    let outputs: Vec<Vec<Edge>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|index| {
                let context = &context;
                scope.spawn(move || worker(context, index))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(edges) => edges,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    });

    let working_bytes = (arena.len() * std::mem::size_of::<PairCell>()) as u64
        + (write_ptrs.len() * std::mem::size_of::<AtomicU32>()) as u64;

    let mut edges: Vec<Edge> = Vec::new();
    let mut output_bytes = 0u64;
    for out in outputs {
        output_bytes =
            output_bytes.saturating_add(out.len() as u64 * std::mem::size_of::<Edge>() as u64);
        edges.extend(out);
    }
    // Canonical endpoint order detaches the output from the batch
    // partition, so the edge list is identical for any valid budget and
    // worker count.
    edges.par_sort_unstable_by_key(|edge| (edge.source(), edge.target()));

    let aggregation_memory = working_bytes
        .saturating_add(output_bytes)
        .saturating_add(edges.len() as u64 * std::mem::size_of::<Edge>() as u64)
        .saturating_add(plan.scaffolding_bytes() as u64)
        .saturating_add(layout.scaffolding_bytes() as u64);
    debug!(
        edges = edges.len(),
        aggregation_memory, "built VIG (optimized)"
    );

    Ok(Vig::new(
        n,
        edges,
        usize::try_from(aggregation_memory).unwrap_or(usize::MAX),
        bumped_to_fit,
    ))
}

/// Per-variable pair-emission counts derived from the qualifying clauses.
struct ContributionPlan {
    contributions: Vec<u32>,
    total: u64,
    max: u32,
    max_clause_size: usize,
}

impl ContributionPlan {
    /// Phase 1: counts, for each variable, how many `(a, b)` emissions it
    /// produces as the smaller endpoint `a`. Position `i` of a clause with
    /// `s` literals emits `s - 1 - i` pairs.
    fn analyse(cnf: &Cnf, threshold: ClauseThreshold) -> Result<Self, VigBuildError> {
        let n = cnf.variable_count();
        let mut counts = vec![0u64; n as usize];
        let mut max_clause_size = 0usize;

        for clause in cnf.clauses() {
            let size = clause.len();
            if !threshold.admits(size) {
                continue;
            }
            max_clause_size = max_clause_size.max(size);
            for (i, &literal) in clause.iter().enumerate() {
                let variable = literal.unsigned_abs() - 1;
                if variable >= n {
                    return Err(VigBuildError::VariableOutOfRange {
                        variable,
                        variable_count: n,
                    });
                }
                counts[variable as usize] += (size - 1 - i) as u64;
            }
        }

        let mut contributions = Vec::with_capacity(counts.len());
        let mut total = 0u64;
        let mut max = 0u32;
        for (variable, &count) in counts.iter().enumerate() {
            let narrowed =
                u32::try_from(count).map_err(|_| VigBuildError::ContributionOverflow {
                    variable: variable as u32,
                    contributions: count,
                })?;
            contributions.push(narrowed);
            total += count;
            max = max.max(narrowed);
        }

        Ok(Self {
            contributions,
            total,
            max,
            max_clause_size,
        })
    }

    /// Phase 2: splits the global budget across the workers, leaving the
    /// coordinator's share to the round scaffolding. The capacity rises to
    /// the largest single contribution when necessary so that any one
    /// variable's run fits a single buffer.
    fn per_thread_capacity(&self, max_buffer: usize, threads: usize) -> (u64, bool) {
        let capacity = (max_buffer as u64 / threads.saturating_sub(1).max(1) as u64).max(1);
        if capacity < u64::from(self.max) {
            (u64::from(self.max), true)
        } else {
            (capacity, false)
        }
    }

    fn scaffolding_bytes(&self) -> usize {
        self.contributions.len() * std::mem::size_of::<u32>()
    }
}

/// A contiguous, inclusive range of variables processed as one unit.
#[derive(Clone, Copy, Debug)]
struct Batch {
    start: u32,
    end: u32,
    total: u32,
}

impl Batch {
    fn checked(start: u32, end: u32, total: u64) -> Result<Self, VigBuildError> {
        let total = u32::try_from(total).map_err(|_| VigBuildError::BatchOverflow {
            start,
            contributions: total,
        })?;
        Ok(Self { start, end, total })
    }
}

/// One arena cell holding a single `(neighbour, weight)` emission.
///
/// Stores are relaxed: each cell is written exactly once per run (the
/// writer owns an exclusive range reserved by `fetch_add` on the variable's
/// write pointer, and the cell's region belongs to exactly one round) and
/// the owning reducer only reads after the fill barrier.
struct PairCell {
    neighbour: AtomicU32,
    weight_bits: AtomicU64,
}

impl PairCell {
    fn zeroed() -> Self {
        Self {
            neighbour: AtomicU32::new(0),
            weight_bits: AtomicU64::new(0),
        }
    }
}

/// Phase 3 output: the batch partition and the immutable arena layout
/// shared by every worker.
///
/// A variable belongs to exactly one batch and a batch to exactly one
/// round, so each arena region is written in exactly one round and the
/// arena only needs to be as large as the biggest round; regions reused by
/// later rounds are fully overwritten before they are read, with the round
/// barriers sequencing the reuse.
struct RoundLayout {
    batches: Vec<Batch>,
    /// Arena offset of each batch's region within its round.
    batch_base: Vec<usize>,
    /// Round in which each variable's batch is active.
    var_round: Vec<u32>,
    /// Arena offset of each variable's batch region.
    arena_base: Vec<usize>,
    /// Each variable's offset within its batch region; also the initial
    /// value of its write pointer.
    cell_offset: Vec<u32>,
    arena_len: usize,
    rounds: usize,
}

impl RoundLayout {
    /// Greedily packs contiguous variables into batches whose contribution
    /// totals fit `capacity`, then lays the batches of each round out in
    /// the shared arena. Every batch holds at least one variable.
    fn plan(
        plan: &ContributionPlan,
        capacity: u64,
        threads: usize,
    ) -> Result<Self, VigBuildError> {
        let contributions = &plan.contributions;
        let n = contributions.len() as u32;

        let mut batches = Vec::new();
        let mut start = 0u32;
        let mut accumulated = 0u64;
        for variable in 0..n {
            let count = u64::from(contributions[variable as usize]);
            if accumulated + count > capacity && variable > start {
                batches.push(Batch::checked(start, variable - 1, accumulated)?);
                start = variable;
                accumulated = count;
            } else {
                accumulated += count;
            }
        }
        if start < n {
            batches.push(Batch::checked(start, n - 1, accumulated)?);
        }

        let rounds = batches.len().div_ceil(threads);
        let mut batch_base = Vec::with_capacity(batches.len());
        let mut arena_len = 0usize;
        let mut round_len = 0usize;
        for (index, batch) in batches.iter().enumerate() {
            if index % threads == 0 {
                round_len = 0;
            }
            batch_base.push(round_len);
            round_len += batch.total as usize;
            arena_len = arena_len.max(round_len);
        }

        let mut var_round = vec![0u32; n as usize];
        let mut arena_base = vec![0usize; n as usize];
        let mut cell_offset = vec![0u32; n as usize];
        for (index, batch) in batches.iter().enumerate() {
            let round = (index / threads) as u32;
            let base = batch_base[index];
            let mut prefix = 0u32;
            for variable in batch.start..=batch.end {
                var_round[variable as usize] = round;
                arena_base[variable as usize] = base;
                cell_offset[variable as usize] = prefix;
                prefix += contributions[variable as usize];
            }
            debug_assert_eq!(prefix, batch.total);
        }

        Ok(Self {
            batches,
            batch_base,
            var_round,
            arena_base,
            cell_offset,
            arena_len,
            rounds,
        })
    }

    fn scaffolding_bytes(&self) -> usize {
        self.batches.len() * (std::mem::size_of::<Batch>() + std::mem::size_of::<usize>())
            + self.var_round.len()
                * (2 * std::mem::size_of::<u32>() + std::mem::size_of::<usize>())
    }
}

struct WorkerContext<'a> {
    clauses: &'a [Vec<i32>],
    threshold: ClauseThreshold,
    weights: &'a PairWeights,
    contributions: &'a [u32],
    layout: &'a RoundLayout,
    arena: &'a [PairCell],
    write_ptrs: &'a [AtomicU32],
    barrier: &'a Barrier,
    threads: usize,
}

fn worker(context: &WorkerContext<'_>, index: usize) -> Vec<Edge> {
    let mut out: Vec<Edge> = Vec::new();
    let mut scratch: Vec<(u32, u64)> = Vec::new();

    for round in 0..context.layout.rounds {
        if index == 0 {
            debug!(round, "aggregation round starting");
        }
        context.barrier.wait(); // setup done

        fill_clause_slice(context, round, index);
        context.barrier.wait(); // fill done

        let batch_index = round * context.threads + index;
        if batch_index < context.layout.batches.len() {
            reduce_batch(context, batch_index, &mut scratch, &mut out);
        }
        context.barrier.wait(); // reduce done

        if index == 0 {
            verify_round_filled(context, round);
        }
        context.barrier.wait(); // round done
    }

    out
}

/// Emits the pair contributions of this worker's clause slice into the
/// arena regions of the round's batches.
fn fill_clause_slice(context: &WorkerContext<'_>, round: usize, index: usize) {
    let layout = context.layout;
    let clause_count = context.clauses.len();
    let lo = clause_count * index / context.threads;
    let hi = clause_count * (index + 1) / context.threads;

    for clause in &context.clauses[lo..hi] {
        let size = clause.len();
        if !context.threshold.admits(size) {
            continue;
        }
        let weight_bits = context.weights.get(size).to_bits();

        for (i, &literal) in clause[..size - 1].iter().enumerate() {
            let variable = (literal.unsigned_abs() - 1) as usize;
            if layout.var_round[variable] != round as u32 {
                continue;
            }
            let run = (size - 1 - i) as u32;
            let relative = context.write_ptrs[variable].fetch_add(run, Ordering::Relaxed);
            let base = layout.arena_base[variable] + relative as usize;
            for (offset, &neighbour_lit) in clause[i + 1..].iter().enumerate() {
                let cell = &context.arena[base + offset];
                cell.neighbour
                    .store(neighbour_lit.unsigned_abs() - 1, Ordering::Relaxed);
                cell.weight_bits.store(weight_bits, Ordering::Relaxed);
            }
        }
    }
}

/// Aggregates one batch: sorts each variable's arena slice and reduces
/// equal-neighbour runs to single edges.
fn reduce_batch(
    context: &WorkerContext<'_>,
    batch_index: usize,
    scratch: &mut Vec<(u32, u64)>,
    out: &mut Vec<Edge>,
) {
    let layout = context.layout;
    let batch = layout.batches[batch_index];
    let base = layout.batch_base[batch_index];

    for variable in batch.start..=batch.end {
        let count = context.contributions[variable as usize] as usize;
        if count == 0 {
            continue;
        }
        let begin = base + layout.cell_offset[variable as usize] as usize;

        scratch.clear();
        scratch.extend(context.arena[begin..begin + count].iter().map(|cell| {
            (
                cell.neighbour.load(Ordering::Relaxed),
                cell.weight_bits.load(Ordering::Relaxed),
            )
        }));
        // Keying on the weight bits as well as the neighbour makes the
        // reduction order independent of fill interleaving.
        scratch.sort_by_key(|&(neighbour, bits)| (neighbour, bits));

        let mut run_neighbour = scratch[0].0;
        let mut run_weight = f64::from_bits(scratch[0].1);
        for &(neighbour, bits) in &scratch[1..] {
            if neighbour == run_neighbour {
                run_weight += f64::from_bits(bits);
            } else {
                out.push(Edge::new(variable, run_neighbour, run_weight));
                run_neighbour = neighbour;
                run_weight = f64::from_bits(bits);
            }
        }
        out.push(Edge::new(variable, run_neighbour, run_weight));
    }
}

/// Teardown integrity check: every write pointer of the round's batches
/// must have advanced to the end of its variable's region.
fn verify_round_filled(context: &WorkerContext<'_>, round: usize) {
    if !cfg!(debug_assertions) {
        return;
    }
    let layout = context.layout;
    let first = round * context.threads;
    let last = (first + context.threads).min(layout.batches.len());
    for batch in &layout.batches[first..last] {
        for variable in batch.start..=batch.end {
            let expected = layout.cell_offset[variable as usize]
                + context.contributions[variable as usize];
            debug_assert_eq!(
                context.write_ptrs[variable as usize].load(Ordering::Relaxed),
                expected,
                "variable {variable} region not fully filled"
            );
        }
    }
}
