//! Strongest inter-component edge extraction.

use std::collections::HashSet;

use crate::vig::{Edge, pack_pair};

use super::GraphSegmenter;

impl GraphSegmenter {
    /// Returns at most one edge per unordered pair of final components: the
    /// strongest candidate between them.
    ///
    /// Candidates are stored in descending weight order, so the first edge
    /// seen for a pair is the strongest; iteration stops early once every
    /// possible component pair has been resolved. Endpoints of the returned
    /// edges are final component representatives with `source < target`.
    #[must_use]
    pub fn strongest_inter_component_edges(&self) -> Vec<Edge> {
        let components = u64::from(self.dsu.components());
        let pair_limit = components * components.saturating_sub(1) / 2;

        let mut seen: HashSet<u64> = HashSet::new();
        let mut strongest = Vec::new();
        for edge in &self.candidates {
            let a = self.dsu.find_readonly(edge.source());
            let b = self.dsu.find_readonly(edge.target());
            if a == b {
                continue;
            }
            let key = pack_pair(a.min(b), a.max(b));
            if seen.insert(key) {
                strongest.push(Edge::new(a, b, edge.weight()));
                if strongest.len() as u64 == pair_limit {
                    break;
                }
            }
        }
        strongest
    }
}
