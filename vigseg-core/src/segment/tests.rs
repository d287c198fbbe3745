//! Unit tests for FH segmentation, the modularity guard, and cross-component
//! extraction.

use rstest::rstest;

use crate::vig::Edge;

use super::{AmbiguousPolicy, GraphSegmenter, SegmentErrorCode, SegmenterConfig};

fn plain_fh_config() -> SegmenterConfig {
    SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: false,
        size_exponent: 1.0,
        ..SegmenterConfig::default()
    }
}

/// Two unit-weight triangles bridged by the given weak links.
fn bridged_triangles(links: &[(u32, u32, f64)]) -> Vec<Edge> {
    let mut edges = vec![
        Edge::new(0, 1, 1.0),
        Edge::new(0, 2, 1.0),
        Edge::new(1, 2, 1.0),
        Edge::new(3, 4, 1.0),
        Edge::new(3, 5, 1.0),
        Edge::new(4, 5, 1.0),
    ];
    edges.extend(links.iter().map(|&(u, v, w)| Edge::new(u, v, w)));
    edges
}

#[rstest]
#[case::zero(0.0)]
#[case::negative(-3.0)]
#[case::nan(f64::NAN)]
#[case::infinite(f64::INFINITY)]
fn invalid_k_is_rejected(#[case] k: f64) {
    let err = GraphSegmenter::new(4, k).expect_err("k must be positive and finite");
    assert_eq!(err.code(), SegmentErrorCode::InvalidK);
}

#[test]
fn chain_of_unit_edges_merges_into_one_component() {
    let mut edges = vec![Edge::new(0, 1, 1.0), Edge::new(1, 2, 1.0)];
    let mut segmenter =
        GraphSegmenter::with_config(3, 1.0, plain_fh_config()).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 1);
    assert!(segmenter.candidates().is_empty());
    assert!(segmenter.strongest_inter_component_edges().is_empty());

    let labels = segmenter.labels();
    assert_eq!(labels.len(), 3);
    assert!(labels.iter().all(|&label| label == labels[0]));
    assert_eq!(segmenter.component_size(labels[0]), 3);
}

#[test]
fn tight_gate_rejects_every_merge() {
    // With k = 0.1 every singleton gate is 0.1 while each connection
    // distance is 1, so no merge happens and both edges become candidates.
    let mut edges = vec![Edge::new(0, 1, 1.0), Edge::new(1, 2, 1.0)];
    let mut segmenter =
        GraphSegmenter::with_config(3, 0.1, plain_fh_config()).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 3);
    assert_eq!(segmenter.candidates().len(), 2);
    for edge in segmenter.candidates() {
        assert_ne!(
            segmenter.component_of(edge.source()),
            segmenter.component_of(edge.target()),
            "candidates must connect distinct components"
        );
    }
}

#[test]
fn empty_inputs_are_valid() {
    let mut segmenter = GraphSegmenter::new(0, 1.0).expect("k is positive");
    segmenter.run(&mut []);
    assert_eq!(segmenter.num_components(), 0);
    assert!(segmenter.labels().is_empty());

    let mut segmenter = GraphSegmenter::new(5, 1.0).expect("k is positive");
    segmenter.run(&mut []);
    assert_eq!(segmenter.num_components(), 5);
}

#[test]
fn non_positive_weights_are_skipped_silently() {
    let mut edges = vec![Edge::new(0, 1, 0.0), Edge::new(1, 2, -2.0)];
    let mut segmenter =
        GraphSegmenter::with_config(3, 10.0, plain_fh_config()).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 3);
    assert!(segmenter.candidates().is_empty());
}

#[test]
fn max_distance_is_monotone_and_sizes_track_membership() {
    let mut edges = vec![
        Edge::new(0, 1, 4.0),
        Edge::new(1, 2, 2.0),
        Edge::new(2, 3, 1.0),
        Edge::new(4, 5, 0.5),
    ];
    let mut segmenter =
        GraphSegmenter::with_config(6, 100.0, plain_fh_config()).expect("k is positive");
    segmenter.run(&mut edges);

    let labels = segmenter.labels();
    for root in segmenter.labels().iter().copied().collect::<std::collections::BTreeSet<_>>() {
        let members = labels.iter().filter(|&&label| label == root).count() as u32;
        assert_eq!(segmenter.component_size(root), members);
    }
}

#[test]
fn distance_normalization_uses_the_median_of_top_edges() {
    let mut edges = vec![
        Edge::new(0, 1, 4.0),
        Edge::new(1, 2, 2.0),
        Edge::new(2, 3, 1.0),
    ];
    let config = SegmenterConfig {
        use_modularity_guard: false,
        size_exponent: 1.0,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(4, 100.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    // Distances of the sorted edges are 0.25, 0.5, 1.0; the median is 0.5.
    assert!((segmenter.d_scale() - 0.5).abs() < 1e-15);
}

#[test]
fn even_sample_windows_average_the_central_distances() {
    let mut edges = vec![
        Edge::new(0, 1, 4.0),
        Edge::new(1, 2, 2.0),
        Edge::new(2, 3, 1.0),
        Edge::new(3, 4, 0.5),
    ];
    let config = SegmenterConfig {
        use_modularity_guard: false,
        size_exponent: 1.0,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(5, 100.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    // Distances of the sorted edges are 0.25, 0.5, 1.0, 2.0; the two
    // central ones average to 0.75.
    assert!((segmenter.d_scale() - 0.75).abs() < 1e-15);
}

#[rstest]
#[case::single_edge_window(1, 0.25)]
#[case::even_window_averages(2, 0.375)]
fn norm_sample_bound_limits_the_median_window(#[case] sample: usize, #[case] expected: f64) {
    let mut edges = vec![
        Edge::new(0, 1, 4.0),
        Edge::new(1, 2, 2.0),
        Edge::new(2, 3, 1.0),
    ];
    let config = SegmenterConfig {
        use_modularity_guard: false,
        size_exponent: 1.0,
        norm_sample_edges: sample,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(4, 100.0, config).expect("k is positive");
    segmenter.run(&mut edges);
    assert!((segmenter.d_scale() - expected).abs() < 1e-15);
}

#[test]
fn guard_rejects_the_weak_bridge_between_cliques() {
    let mut edges = bridged_triangles(&[(2, 3, 0.01)]);
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: true,
        anneal: false,
        ..SegmenterConfig::default()
    };
    // k = 400 keeps the FH gate permissive so the guard does the rejecting.
    let mut segmenter = GraphSegmenter::with_config(6, 400.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 2);
    assert_eq!(segmenter.ub_rejects(), 1);
    assert_eq!(segmenter.lb_accepts(), 4);
    assert_eq!(segmenter.ambiguous_count(), 0);
    assert_eq!(segmenter.candidates().len(), 1);
    assert!((segmenter.candidates()[0].weight() - 0.01).abs() < 1e-15);

    let crossings = segmenter.strongest_inter_component_edges();
    assert_eq!(crossings.len(), 1);
    let bridge = crossings[0];
    assert_eq!(bridge.source(), segmenter.component_of(2).min(segmenter.component_of(3)));
    assert_eq!(bridge.target(), segmenter.component_of(2).max(segmenter.component_of(3)));
    assert!((bridge.weight() - 0.01).abs() < 1e-15);
}

#[test]
fn without_guard_the_same_bridge_merges_the_cliques() {
    let mut edges = bridged_triangles(&[(2, 3, 0.01)]);
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: false,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(6, 400.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    // Pure FH result: the permissive gate lets the bridge through and no
    // guard counter moves.
    assert_eq!(segmenter.num_components(), 1);
    assert_eq!(segmenter.lb_accepts(), 0);
    assert_eq!(segmenter.ub_rejects(), 0);
    assert_eq!(segmenter.ambiguous_count(), 0);
}

#[test]
fn gate_rejection_does_not_touch_guard_counters() {
    let mut edges = bridged_triangles(&[(2, 3, 0.01)]);
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: true,
        anneal: false,
        ..SegmenterConfig::default()
    };
    // k = 50 closes the gate (distance 100 exceeds roughly 1 + 50/3.7) so
    // the bridge never reaches the guard.
    let mut segmenter = GraphSegmenter::with_config(6, 50.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 2);
    assert_eq!(segmenter.ub_rejects(), 0);
    assert_eq!(segmenter.candidates().len(), 1);
}

#[test]
fn strongest_edge_wins_per_component_pair() {
    let mut edges = bridged_triangles(&[(2, 3, 0.02), (0, 5, 0.01)]);
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: true,
        anneal: false,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(6, 400.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.num_components(), 2);
    // Candidates keep examination order, which is descending weight.
    assert_eq!(segmenter.candidates().len(), 2);
    assert!(segmenter.candidates()[0].weight() > segmenter.candidates()[1].weight());

    let crossings = segmenter.strongest_inter_component_edges();
    assert_eq!(crossings.len(), 1);
    assert!((crossings[0].weight() - 0.02).abs() < 1e-15);
}

/// A bridge whose ΔQ bounds straddle zero: ten pendant edges of weight 0.09
/// give each endpoint volume 0.55 while the bridge itself weighs 0.1, so
/// the lower bound is negative and the upper bound positive.
fn ambiguous_bridge() -> Vec<Edge> {
    let mut edges = vec![Edge::new(0, 1, 0.1)];
    for pendant in 0..5u32 {
        edges.push(Edge::new(0, 2 + pendant, 0.09));
        edges.push(Edge::new(1, 7 + pendant, 0.09));
    }
    edges
}

#[rstest]
#[case::accept(AmbiguousPolicy::Accept, true)]
#[case::reject(AmbiguousPolicy::Reject, false)]
fn ambiguous_policy_decides_the_merge(#[case] policy: AmbiguousPolicy, #[case] merged: bool) {
    let mut edges = ambiguous_bridge();
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: true,
        anneal: false,
        size_exponent: 1.0,
        ambiguous_policy: policy,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(12, 20.0, config).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.ambiguous_count(), 1);
    assert_eq!(segmenter.same_component(0, 1), merged);
}

#[rstest]
#[case::ample_margin(20.0, true)]
#[case::margin_too_thin(10.2, false)]
fn gate_margin_requires_headroom(#[case] k: f64, #[case] merged: bool) {
    // The bridge distance is 10; GateMargin demands five percent of the
    // gate as headroom, so k = 10.2 passes the gate but fails the margin.
    let mut edges = ambiguous_bridge();
    let config = SegmenterConfig {
        normalize_distances: false,
        use_modularity_guard: true,
        anneal: false,
        size_exponent: 1.0,
        ambiguous_policy: AmbiguousPolicy::GateMargin,
        ..SegmenterConfig::default()
    };
    let mut segmenter = GraphSegmenter::with_config(12, k, config).expect("k is positive");
    segmenter.run(&mut edges);

    assert_eq!(segmenter.ambiguous_count(), 1);
    assert_eq!(segmenter.same_component(0, 1), merged);
}

#[test]
fn candidate_capacity_hint_is_accepted() {
    let mut segmenter = GraphSegmenter::new(4, 1.0).expect("k is positive");
    segmenter.reserve_candidates(1024);
    let mut edges = vec![Edge::new(0, 1, 1.0)];
    segmenter.run(&mut edges);
    assert!(segmenter.candidates().len() <= 1024);
}
