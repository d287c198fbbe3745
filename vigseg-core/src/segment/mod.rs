//! Felzenszwalb–Huttenlocher graph segmentation with a modularity guard.
//!
//! Edges carry similarity weights (larger = more similar) and are processed
//! in descending weight order. The connection distance of an edge is
//! `1 / weight`, optionally normalised by the median distance of the
//! strongest edges so `k` has comparable effect across graphs. A merge is
//! admitted when the distance clears both components' gates,
//! `gate(C) = max_dist(C) + k / |C|^size_exponent`, and, when the guard is
//! enabled, survives a pair of modularity bounds: a lower bound on the
//! merge's ΔQ accepts outright, an upper bound rejects outright, and the
//! remaining ambiguous cases follow a configurable policy.
//!
//! Edges that connect two components without merging them are retained in
//! examination order (descending weight); the cross-component extractor
//! reduces that list to the strongest edge per component pair.

mod cross;

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::{
    union_find::DisjointSet,
    vig::{Edge, sort_edges_descending},
};

#[cfg(test)]
mod tests;

/// Stable codes describing [`SegmentError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SegmentErrorCode {
    /// The segmentation parameter `k` must be positive and finite.
    InvalidK,
}

impl SegmentErrorCode {
    /// Returns the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidK => "SEGMENT_INVALID_K",
        }
    }
}

impl fmt::Display for SegmentErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while configuring the segmenter.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SegmentError {
    /// The segmentation parameter `k` must be positive and finite.
    #[error("segmentation parameter k must be positive and finite (got {got})")]
    InvalidK {
        /// The rejected value.
        got: f64,
    },
}

impl SegmentError {
    /// Retrieves the stable [`SegmentErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> SegmentErrorCode {
        match self {
            Self::InvalidK { .. } => SegmentErrorCode::InvalidK,
        }
    }
}

/// Policy applied when the modularity bounds cannot decide a merge.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AmbiguousPolicy {
    /// Merge anyway.
    Accept,
    /// Refuse the merge and retain the edge as a candidate.
    Reject,
    /// Merge only when the gate clears the distance with margin to spare.
    #[default]
    GateMargin,
}

/// Tunable knobs controlling segmentation behaviour.
///
/// Defaults keep the gate equivalent to classic FH apart from the size
/// exponent, and enable the modularity guard with an annealed tolerance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmenterConfig {
    /// Normalise distances by the median of `1/w` over the strongest edges
    /// so `k` is comparable across graphs.
    pub normalize_distances: bool,
    /// How many of the strongest edges to sample for the median.
    pub norm_sample_edges: usize,
    /// Exponent of the component size in the gate denominator. `1.0`
    /// reproduces FH; larger values make merges harder for large components.
    pub size_exponent: f64,
    /// Enable the ΔQ admission test.
    pub use_modularity_guard: bool,
    /// Modularity resolution.
    pub gamma: f64,
    /// Allow slightly negative ΔQ for small components, tightening as they
    /// grow.
    pub anneal: bool,
    /// Initial ΔQ tolerance for the annealed guard.
    pub dq_tol0: f64,
    /// Annealing volume scale; `0` auto-selects `max(1, 2·sum_w/n)`.
    pub dq_vscale: f64,
    /// Policy for merges the bounds cannot decide.
    pub ambiguous_policy: AmbiguousPolicy,
    /// Relative gate headroom required by [`AmbiguousPolicy::GateMargin`].
    pub gate_margin_ratio: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            normalize_distances: true,
            norm_sample_edges: 1000,
            size_exponent: 1.2,
            use_modularity_guard: true,
            gamma: 1.0,
            anneal: true,
            dq_tol0: 5e-4,
            dq_vscale: 0.0,
            ambiguous_policy: AmbiguousPolicy::GateMargin,
            gate_margin_ratio: 0.05,
        }
    }
}

/// Greedy FH segmenter over `n` nodes.
///
/// # Examples
/// ```
/// use vigseg_core::{Edge, GraphSegmenter, SegmenterConfig};
///
/// let mut edges = vec![Edge::new(0, 1, 1.0), Edge::new(1, 2, 1.0)];
/// let config = SegmenterConfig {
///     normalize_distances: false,
///     use_modularity_guard: false,
///     size_exponent: 1.0,
///     ..SegmenterConfig::default()
/// };
/// let mut segmenter = GraphSegmenter::with_config(3, 1.0, config)
///     .expect("k is positive");
/// segmenter.run(&mut edges);
/// assert_eq!(segmenter.num_components(), 1);
/// assert!(segmenter.candidates().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct GraphSegmenter {
    dsu: DisjointSet,
    comp_size: Vec<u32>,
    max_dist: Vec<f64>,
    comp_vol: Vec<f64>,
    lb_internal: Vec<f64>,
    sum_weights: f64,
    k: f64,
    config: SegmenterConfig,
    d_scale: f64,
    candidates: Vec<Edge>,
    lb_accepts: u64,
    ub_rejects: u64,
    ambiguous: u64,
}

impl GraphSegmenter {
    /// Creates a segmenter over `n` nodes with the default configuration.
    ///
    /// # Errors
    /// Returns [`SegmentError::InvalidK`] unless `k` is positive and finite.
    pub fn new(n: u32, k: f64) -> Result<Self, SegmentError> {
        Self::with_config(n, k, SegmenterConfig::default())
    }

    /// Creates a segmenter over `n` nodes with an explicit configuration.
    ///
    /// # Errors
    /// Returns [`SegmentError::InvalidK`] unless `k` is positive and finite.
    pub fn with_config(n: u32, k: f64, config: SegmenterConfig) -> Result<Self, SegmentError> {
        if !(k > 0.0) || !k.is_finite() {
            return Err(SegmentError::InvalidK { got: k });
        }
        Ok(Self {
            dsu: DisjointSet::new(n),
            comp_size: vec![1; n as usize],
            max_dist: vec![0.0; n as usize],
            comp_vol: vec![0.0; n as usize],
            lb_internal: vec![0.0; n as usize],
            sum_weights: 0.0,
            k,
            config,
            d_scale: 1.0,
            candidates: Vec::new(),
            lb_accepts: 0,
            ub_rejects: 0,
            ambiguous: 0,
        })
    }

    /// The active configuration.
    #[must_use]
    #[rustfmt::skip]
    pub fn config(&self) -> &SegmenterConfig { &self.config }

    /// Pre-reserves space for candidate edges. The candidate list can grow
    /// proportionally to the edge list, so callers that know the graph size
    /// can avoid reallocation.
    pub fn reserve_candidates(&mut self, capacity: usize) {
        self.candidates.reserve(capacity);
    }

    /// Runs segmentation in place; `edges` are sorted by descending weight
    /// (ties broken by ascending endpoints) as a side effect.
    ///
    /// Non-positive-weight edges are skipped. Empty edge lists and `n = 0`
    /// are valid and leave every node a singleton.
    pub fn run(&mut self, edges: &mut [Edge]) {
        sort_edges_descending(edges);

        if self.config.use_modularity_guard {
            self.sum_weights = edges.iter().map(Edge::weight).sum();
            for edge in edges.iter() {
                self.comp_vol[edge.source() as usize] += edge.weight();
                self.comp_vol[edge.target() as usize] += edge.weight();
            }
        }

        if self.config.normalize_distances && !edges.is_empty() {
            self.d_scale = median_distance_scale(edges, self.config.norm_sample_edges);
        }

        for &edge in edges.iter() {
            if edge.weight() <= 0.0 {
                continue;
            }
            self.examine(edge);
        }

        debug!(
            components = self.dsu.components(),
            candidates = self.candidates.len(),
            lb_accepts = self.lb_accepts,
            ub_rejects = self.ub_rejects,
            ambiguous = self.ambiguous,
            d_scale = self.d_scale,
            "segmentation finished"
        );
    }

    fn examine(&mut self, edge: Edge) {
        let a = self.dsu.find(edge.source());
        let b = self.dsu.find(edge.target());
        if a == b {
            if self.config.use_modularity_guard {
                self.lb_internal[a as usize] += edge.weight();
            }
            return;
        }

        let distance = (1.0 / edge.weight()) / self.d_scale;
        let gate = self.gate(a).min(self.gate(b));
        if distance > gate {
            self.candidates.push(edge);
            return;
        }

        if self.config.use_modularity_guard && !self.admit_by_guard(a, b, edge.weight(), gate, distance)
        {
            self.candidates.push(edge);
            return;
        }

        self.merge(a, b, edge.weight(), distance);
    }

    /// ΔQ admission test: lower bound accepts, upper bound rejects, and the
    /// ambiguous remainder follows the configured policy.
    fn admit_by_guard(&mut self, a: u32, b: u32, weight: f64, gate: f64, distance: f64) -> bool {
        if !(self.sum_weights > 0.0) {
            return true;
        }

        let tolerance = self.dq_tolerance(a, b);
        if self.dq_lower_bound(a, b, weight) >= tolerance {
            self.lb_accepts += 1;
            return true;
        }
        if self.dq_upper_bound(a, b) < tolerance {
            self.ub_rejects += 1;
            return false;
        }

        self.ambiguous += 1;
        match self.config.ambiguous_policy {
            AmbiguousPolicy::Accept => true,
            AmbiguousPolicy::Reject => false,
            AmbiguousPolicy::GateMargin => {
                gate > 0.0 && (gate - distance) >= self.config.gate_margin_ratio * gate
            }
        }
    }

    fn merge(&mut self, a: u32, b: u32, weight: f64, distance: f64) {
        let size = self.comp_size[a as usize] + self.comp_size[b as usize];
        let dist = self.max_dist[a as usize]
            .max(self.max_dist[b as usize])
            .max(distance);
        let volume = self.comp_vol[a as usize] + self.comp_vol[b as usize];
        let internal = self.lb_internal[a as usize] + self.lb_internal[b as usize] + weight;

        let root = self.dsu.union(a, b);
        self.comp_size[root as usize] = size;
        self.max_dist[root as usize] = dist;
        if self.config.use_modularity_guard {
            self.comp_vol[root as usize] = volume;
            self.lb_internal[root as usize] = internal;
        }
    }

    /// Admission threshold of component `root`: the largest internal
    /// distance plus headroom shrinking with component size.
    fn gate(&self, root: u32) -> f64 {
        let size_term = f64::from(self.comp_size[root as usize]).powf(self.config.size_exponent);
        let headroom = self.k / if size_term > 0.0 { size_term } else { 1.0 };
        self.max_dist[root as usize] + headroom
    }

    /// Annealed guard tolerance: slightly negative for small components,
    /// approaching zero as volumes grow.
    fn dq_tolerance(&self, a: u32, b: u32) -> f64 {
        if !self.config.anneal {
            return 0.0;
        }
        let max_volume = self.comp_vol[a as usize].max(self.comp_vol[b as usize]);
        let vscale = if self.config.dq_vscale > 0.0 {
            self.config.dq_vscale
        } else {
            let n = self.comp_size.len() as f64;
            if n > 0.0 {
                (2.0 * self.sum_weights / n).max(1.0)
            } else {
                1.0
            }
        };
        -self.config.dq_tol0 * (-max_volume / vscale).exp()
    }

    /// Worst-case ΔQ of the merge, counting only the connecting edge.
    fn dq_lower_bound(&self, a: u32, b: u32, weight: f64) -> f64 {
        let m = self.sum_weights;
        weight / m
            - (self.config.gamma * self.comp_vol[a as usize] * self.comp_vol[b as usize])
                / (2.0 * m * m)
    }

    /// Best-case ΔQ of the merge, bounding the unobserved cut from the
    /// volumes and the internal-weight lower bounds.
    fn dq_upper_bound(&self, a: u32, b: u32) -> f64 {
        let volume_a = self.comp_vol[a as usize];
        let volume_b = self.comp_vol[b as usize];
        let m = self.sum_weights;
        let cut_a = (volume_a - 2.0 * self.lb_internal[a as usize]).max(0.0);
        let cut_b = (volume_b - 2.0 * self.lb_internal[b as usize]).max(0.0);
        let cut_bound = cut_a.min(cut_b).min(volume_a).min(volume_b);
        cut_bound / m - (self.config.gamma * volume_a * volume_b) / (2.0 * m * m)
    }

    /// Number of nodes under segmentation.
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.comp_size.len() as u32
    }

    /// Live component count.
    #[must_use]
    pub fn num_components(&self) -> u32 {
        self.dsu.components()
    }

    /// Representative of `node` without mutating the forest.
    #[must_use]
    pub fn component_of(&self, node: u32) -> u32 {
        self.dsu.find_readonly(node)
    }

    /// Returns `true` when two nodes share a component.
    #[must_use]
    pub fn same_component(&self, a: u32, b: u32) -> bool {
        self.dsu.find_readonly(a) == self.dsu.find_readonly(b)
    }

    /// Component label of every node, in node order.
    #[must_use]
    pub fn labels(&self) -> Vec<u32> {
        (0..self.node_count()).map(|node| self.component_of(node)).collect()
    }

    /// Size of the component whose representative is `root`.
    #[must_use]
    pub fn component_size(&self, root: u32) -> u32 {
        self.comp_size[root as usize]
    }

    /// Edges that were cross-component when examined but did not merge, in
    /// examination order (descending weight).
    #[must_use]
    #[rustfmt::skip]
    pub fn candidates(&self) -> &[Edge] { &self.candidates }

    /// Distance normalisation scale applied during the run.
    #[must_use]
    #[rustfmt::skip]
    pub fn d_scale(&self) -> f64 { self.d_scale }

    /// Merges accepted outright by the ΔQ lower bound.
    #[must_use]
    #[rustfmt::skip]
    pub fn lb_accepts(&self) -> u64 { self.lb_accepts }

    /// Merges rejected outright by the ΔQ upper bound.
    #[must_use]
    #[rustfmt::skip]
    pub fn ub_rejects(&self) -> u64 { self.ub_rejects }

    /// Merges the bounds could not decide.
    #[must_use]
    #[rustfmt::skip]
    pub fn ambiguous_count(&self) -> u64 { self.ambiguous }
}

/// Median of `1/w` over the strongest `sample` edges; even-sized windows
/// average the two central distances. Returns 1 when the median is not
/// finite and positive.
fn median_distance_scale(edges: &[Edge], sample: usize) -> f64 {
    let count = edges.len().min(sample);
    if count == 0 {
        return 1.0;
    }
    // Edges are sorted descending by weight, so the distances 1/w of the
    // leading edges are already ascending.
    let upper = 1.0 / edges[count / 2].weight();
    let median = if count % 2 == 0 {
        let lower = 1.0 / edges[count / 2 - 1].weight();
        (lower + upper) / 2.0
    } else {
        upper
    };
    if median.is_finite() && median > 0.0 {
        median
    } else {
        1.0
    }
}
