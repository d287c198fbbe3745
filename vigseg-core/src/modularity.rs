//! Modularity scoring of a labelling against a weighted graph.

use crate::vig::Edge;

/// Computes the Newman–Girvan modularity of a community labelling.
///
/// `Q = Σ_c [ e_c/m − γ·(vol_c/(2m))² ]` where `m` is the total edge weight
/// (each undirected edge counted once), `e_c` the weight inside community
/// `c`, and `vol_c` the sum of weighted degrees of its members. Labels need
/// not be contiguous. An empty or edgeless graph scores 0.
///
/// # Examples
/// ```
/// use vigseg_core::{Edge, modularity};
///
/// // Two triangles joined by one weak edge; labelling them separately
/// // scores close to the ideal two-community split.
/// let edges = vec![
///     Edge::new(0, 1, 1.0),
///     Edge::new(0, 2, 1.0),
///     Edge::new(1, 2, 1.0),
///     Edge::new(3, 4, 1.0),
///     Edge::new(3, 5, 1.0),
///     Edge::new(4, 5, 1.0),
///     Edge::new(2, 3, 0.01),
/// ];
/// let split = modularity(6, &edges, |node| u32::from(node >= 3), 1.0);
/// let lumped = modularity(6, &edges, |_| 0, 1.0);
/// assert!(split > lumped);
/// ```
#[must_use]
pub fn modularity(
    n: u32,
    edges: &[Edge],
    mut community_of: impl FnMut(u32) -> u32,
    gamma: f64,
) -> f64 {
    if n == 0 {
        return 0.0;
    }

    let mut strength = vec![0.0f64; n as usize];
    let mut total_weight = 0.0f64;
    for edge in edges {
        strength[edge.source() as usize] += edge.weight();
        strength[edge.target() as usize] += edge.weight();
        total_weight += edge.weight();
    }
    if total_weight == 0.0 {
        return 0.0;
    }

    // Compact arbitrary labels to 0..C.
    let labels: Vec<u32> = (0..n).map(&mut community_of).collect();
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut remap: Vec<u32> = vec![u32::MAX; max_label + 1];
    let mut communities = 0u32;
    for &label in &labels {
        if remap[label as usize] == u32::MAX {
            remap[label as usize] = communities;
            communities += 1;
        }
    }

    let mut sum_total = vec![0.0f64; communities as usize];
    let mut sum_internal = vec![0.0f64; communities as usize];
    for (node, &label) in labels.iter().enumerate() {
        sum_total[remap[label as usize] as usize] += strength[node];
    }
    for edge in edges {
        let cu = remap[labels[edge.source() as usize] as usize];
        let cv = remap[labels[edge.target() as usize] as usize];
        if cu == cv {
            sum_internal[cu as usize] += edge.weight();
        }
    }

    let two_m = 2.0 * total_weight;
    sum_internal
        .iter()
        .zip(&sum_total)
        .map(|(&internal, &total)| {
            internal / total_weight - gamma * (total / two_m) * (total / two_m)
        })
        .sum()
}
