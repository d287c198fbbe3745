//! Vigseg core library.
//!
//! Builds the Variable Interaction Graph (VIG) of a CNF formula and
//! partitions it into communities with a Felzenszwalb–Huttenlocher style
//! greedy segmenter. Each clause of size `s` distributes total mass 1
//! uniformly over its variable pairs, so the sum of all edge weights equals
//! the number of qualifying clauses; the builders and tests rely on that
//! property throughout.

mod cnf;
mod metrics;
mod modularity;
mod segment;
mod union_find;
mod vig;

pub use crate::{
    cnf::{Cnf, CnfError, CnfErrorCode},
    metrics::{ComponentSummary, component_sizes, summarize_components},
    modularity::modularity,
    segment::{
        AmbiguousPolicy, GraphSegmenter, SegmentError, SegmentErrorCode, SegmenterConfig,
    },
    union_find::DisjointSet,
    vig::{
        ClauseThreshold, Edge, Vig, VigBuildError, VigBuildErrorCode, VigBuilder, pair_weight,
    },
};
