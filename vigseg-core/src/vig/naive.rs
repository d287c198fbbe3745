//! Single-threaded reference VIG aggregation.

use std::collections::HashMap;

use tracing::debug;

use crate::cnf::Cnf;

use super::{ClauseThreshold, Edge, PairWeights, Vig, VigBuildError, pack_pair, unpack_pair};

/// Aggregates pair weights through a hash map keyed by the packed pair.
///
/// Output edge order follows the map's iteration order and is therefore
/// unspecified.
pub(super) fn build(cnf: &Cnf, threshold: ClauseThreshold) -> Result<Vig, VigBuildError> {
    let n = cnf.variable_count();
    let mut aggregate: HashMap<u64, f64> = HashMap::with_capacity(cnf.clause_count() * 2);
    let weights = PairWeights::up_to(64);

    for clause in cnf.clauses() {
        let size = clause.len();
        if !threshold.admits(size) {
            continue;
        }
        let pair_weight = weights.get(size);

        for (i, &lit_a) in clause.iter().enumerate() {
            let a = lit_a.unsigned_abs() - 1;
            if a >= n {
                return Err(VigBuildError::VariableOutOfRange {
                    variable: a,
                    variable_count: n,
                });
            }
            for &lit_b in &clause[i + 1..] {
                let b = lit_b.unsigned_abs() - 1;
                *aggregate.entry(pack_pair(a, b)).or_insert(0.0) += pair_weight;
            }
        }
    }

    let edges: Vec<Edge> = aggregate
        .into_iter()
        .map(|(key, weight)| {
            let (u, v) = unpack_pair(key);
            Edge::new(u, v, weight)
        })
        .collect();

    debug!(variables = n, edges = edges.len(), "built VIG (naive)");
    Ok(Vig::new(n, edges, 0, false))
}
