//! Variable Interaction Graph (VIG) construction.
//!
//! Every clause of size `s` with `2 <= s <= tau` contributes weight
//! `2 / (s * (s - 1))` to each of its `C(s, 2)` variable pairs, so the
//! clause distributes total mass 1 uniformly over its pairs. Edge weights
//! aggregate those contributions across all qualifying clauses, which makes
//! the sum of all edge weights equal the number of qualifying clauses.
//!
//! Two builders produce the same graph: a single-threaded hash-map
//! aggregator ([`VigBuilder::Naive`]) and a batched, memory-budgeted,
//! multi-threaded aggregator ([`VigBuilder::Optimized`]).

mod naive;
mod optimized;

use std::{fmt, str::FromStr};

use rayon::prelude::*;
use thiserror::Error;

use crate::cnf::Cnf;


/// Stable codes describing [`VigBuildError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum VigBuildErrorCode {
    /// The optimized builder was configured with zero worker threads.
    InvalidThreadCount,
    /// The optimized builder was configured with a zero-slot buffer.
    InvalidBufferCapacity,
    /// A clause referenced a variable outside the formula's range.
    VariableOutOfRange,
    /// A per-variable contribution count exceeded the 32-bit budget.
    ContributionOverflow,
    /// An active-batch buffer length exceeded the 32-bit budget.
    BatchOverflow,
}

impl VigBuildErrorCode {
    /// Returns the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidThreadCount => "VIG_INVALID_THREAD_COUNT",
            Self::InvalidBufferCapacity => "VIG_INVALID_BUFFER_CAPACITY",
            Self::VariableOutOfRange => "VIG_VARIABLE_OUT_OF_RANGE",
            Self::ContributionOverflow => "VIG_CONTRIBUTION_OVERFLOW",
            Self::BatchOverflow => "VIG_BATCH_OVERFLOW",
        }
    }
}

impl fmt::Display for VigBuildErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while building a VIG.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VigBuildError {
    /// The optimized builder needs at least one worker thread.
    #[error("threads must be at least 1")]
    InvalidThreadCount,
    /// The optimized builder needs at least one buffer slot.
    #[error("max_buffer must be at least 1")]
    InvalidBufferCapacity,
    /// A clause referenced a variable outside the formula's range.
    #[error("clause references variable {variable}, but variable_count is {variable_count}")]
    VariableOutOfRange {
        /// Zero-based id of the offending variable.
        variable: u32,
        /// Number of variables declared by the formula.
        variable_count: u32,
    },
    /// A per-variable contribution count exceeded the 32-bit budget.
    #[error("variable {variable} emits {contributions} pair contributions, exceeding u32::MAX")]
    ContributionOverflow {
        /// Zero-based id of the offending variable.
        variable: u32,
        /// Number of pair emissions the variable would produce.
        contributions: u64,
    },
    /// An active-batch buffer length exceeded the 32-bit budget.
    #[error("batch at variable {start} needs {contributions} buffer slots, exceeding u32::MAX")]
    BatchOverflow {
        /// First variable of the offending batch.
        start: u32,
        /// Buffer slots the batch would require.
        contributions: u64,
    },
}

impl VigBuildError {
    /// Retrieves the stable [`VigBuildErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> VigBuildErrorCode {
        match self {
            Self::InvalidThreadCount => VigBuildErrorCode::InvalidThreadCount,
            Self::InvalidBufferCapacity => VigBuildErrorCode::InvalidBufferCapacity,
            Self::VariableOutOfRange { .. } => VigBuildErrorCode::VariableOutOfRange,
            Self::ContributionOverflow { .. } => VigBuildErrorCode::ContributionOverflow,
            Self::BatchOverflow { .. } => VigBuildErrorCode::BatchOverflow,
        }
    }
}

/// A weighted undirected VIG edge in canonical form (`source < target`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    source: u32,
    target: u32,
    weight: f64,
}

impl Edge {
    /// Creates an edge, canonicalising the endpoints to `source < target`.
    #[must_use]
    pub fn new(u: u32, v: u32, weight: f64) -> Self {
        let (source, target) = if u <= v { (u, v) } else { (v, u) };
        Self {
            source,
            target,
            weight,
        }
    }

    /// Returns the smaller endpoint id.
    #[must_use]
    #[rustfmt::skip]
    pub fn source(&self) -> u32 { self.source }

    /// Returns the larger endpoint id.
    #[must_use]
    #[rustfmt::skip]
    pub fn target(&self) -> u32 { self.target }

    /// Returns the aggregated edge weight.
    #[must_use]
    #[rustfmt::skip]
    pub fn weight(&self) -> f64 { self.weight }
}

/// Clause-size threshold `tau`: clauses larger than the bound are ignored.
///
/// # Examples
/// ```
/// use vigseg_core::ClauseThreshold;
///
/// let tau: ClauseThreshold = "3".parse().expect("numeric threshold parses");
/// assert!(tau.admits(3));
/// assert!(!tau.admits(4));
/// let unbounded: ClauseThreshold = "inf".parse().expect("`inf` parses");
/// assert!(unbounded.admits(1000));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ClauseThreshold {
    /// Include all clauses of size at least 2.
    #[default]
    Unbounded,
    /// Include clauses of size at most the bound.
    AtMost(u32),
}

impl ClauseThreshold {
    /// Returns `true` when a clause of `size` literals contributes to the
    /// graph. Clauses of fewer than two literals never contribute.
    #[must_use]
    pub fn admits(self, size: usize) -> bool {
        if size < 2 {
            return false;
        }
        match self {
            Self::Unbounded => true,
            Self::AtMost(bound) => size <= bound as usize,
        }
    }
}

impl fmt::Display for ClauseThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("inf"),
            Self::AtMost(bound) => write!(f, "{bound}"),
        }
    }
}

impl FromStr for ClauseThreshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("inf") {
            return Ok(Self::Unbounded);
        }
        trimmed
            .parse::<u32>()
            .map(Self::AtMost)
            .map_err(|err| format!("invalid clause threshold `{trimmed}`: {err}"))
    }
}

/// Weight contributed by each variable pair of a clause with `size` literals.
///
/// Defined for `size >= 2`; the clause's `C(size, 2)` pairs then sum to 1.
#[must_use]
pub fn pair_weight(size: usize) -> f64 {
    2.0 / (size as f64 * (size as f64 - 1.0))
}

/// Precomputed [`pair_weight`] table for clause sizes up to an observed bound.
#[derive(Clone, Debug)]
pub(crate) struct PairWeights {
    table: Vec<f64>,
}

impl PairWeights {
    pub(crate) fn up_to(max_size: usize) -> Self {
        let table = (0..=max_size)
            .map(|size| if size < 2 { 0.0 } else { pair_weight(size) })
            .collect();
        Self { table }
    }

    pub(crate) fn get(&self, size: usize) -> f64 {
        self.table
            .get(size)
            .copied()
            .unwrap_or_else(|| pair_weight(size))
    }
}

/// Packs an ordered pair (`u < v`) into 64 bits for hashing and aggregation.
pub(crate) fn pack_pair(u: u32, v: u32) -> u64 {
    (u64::from(u) << 32) | u64::from(v)
}

pub(crate) fn unpack_pair(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

/// Selects how the VIG is aggregated from the clause set.
///
/// # Examples
/// ```
/// use vigseg_core::{ClauseThreshold, Cnf, VigBuilder};
///
/// let cnf = Cnf::from_clauses(3, vec![vec![1, 2, 3]]);
/// let vig = VigBuilder::Naive
///     .build(&cnf, ClauseThreshold::Unbounded)
///     .expect("naive build cannot fail on in-range clauses");
/// assert_eq!(vig.edges().len(), 3);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VigBuilder {
    /// Single-threaded hash-map aggregation; the reference implementation.
    Naive,
    /// Batched aggregation under a bounded working set.
    Optimized {
        /// Worker thread count; must be at least 1.
        threads: usize,
        /// Total pair-write slots shared by the worker buffers; must be at
        /// least 1.
        max_buffer: usize,
    },
}

impl VigBuilder {
    /// Builds the VIG of `cnf` under the clause-size threshold.
    ///
    /// Both variants produce the same multiset of `(source, target, weight)`
    /// triples up to floating-point summation order; the optimized variant
    /// is additionally deterministic for a fixed `(cnf, threshold, threads)`.
    ///
    /// # Errors
    /// Returns [`VigBuildError`] when the optimized configuration is invalid
    /// (`threads == 0`, `max_buffer == 0`), a clause references a variable
    /// outside `cnf.variable_count()`, or a contribution count overflows the
    /// 32-bit budget.
    pub fn build(&self, cnf: &Cnf, threshold: ClauseThreshold) -> Result<Vig, VigBuildError> {
        match *self {
            Self::Naive => naive::build(cnf, threshold),
            Self::Optimized {
                threads,
                max_buffer,
            } => optimized::build(cnf, threshold, max_buffer, threads),
        }
    }
}

/// A Variable Interaction Graph: nodes `0..n` and aggregated weighted edges.
#[derive(Clone, Debug, PartialEq)]
pub struct Vig {
    n: u32,
    edges: Vec<Edge>,
    aggregation_memory: usize,
    bumped_to_fit: bool,
}

impl Vig {
    pub(crate) fn new(
        n: u32,
        edges: Vec<Edge>,
        aggregation_memory: usize,
        bumped_to_fit: bool,
    ) -> Self {
        Self {
            n,
            edges,
            aggregation_memory,
            bumped_to_fit,
        }
    }

    /// Number of variables (graph nodes).
    #[must_use]
    #[rustfmt::skip]
    pub fn variable_count(&self) -> u32 { self.n }

    /// The aggregated edges. Ordering is implementation-defined until
    /// [`Self::sort_by_weight_descending`] is called.
    #[must_use]
    #[rustfmt::skip]
    pub fn edges(&self) -> &[Edge] { &self.edges }

    /// Consumes the graph, yielding its edges.
    #[must_use]
    pub fn into_edges(self) -> Vec<Edge> {
        self.edges
    }

    /// Peak working-set gauge of the aggregation, in bytes. Zero for the
    /// naive builder.
    #[must_use]
    #[rustfmt::skip]
    pub fn aggregation_memory(&self) -> usize { self.aggregation_memory }

    /// Whether the optimized builder had to raise its per-thread buffer
    /// capacity so the largest single variable's contributions fit.
    #[must_use]
    #[rustfmt::skip]
    pub fn bumped_to_fit(&self) -> bool { self.bumped_to_fit }

    /// Sum of all edge weights; equals the number of qualifying clauses.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(Edge::weight).sum()
    }

    /// Sorts edges by descending weight, ties broken by ascending
    /// `(source, target)`. The tie-break makes the order deterministic, so
    /// an unstable parallel sort is safe.
    pub fn sort_by_weight_descending(&mut self) {
        sort_edges_descending(&mut self.edges);
    }
}

/// Sorts `edges` by descending weight with `(source, target)` ascending as
/// the tie-break.
pub(crate) fn sort_edges_descending(edges: &mut [Edge]) {
    edges.par_sort_unstable_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.target.cmp(&b.target))
    });
}
