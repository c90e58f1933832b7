//! Weighted co-occurrence graph between canonical entities.
//!
//! Every co-occurrence event (two entities on the same flight manifest, in the
//! same contact record, or above threshold in the same document) adds exactly
//! one to the undirected edge between them, and one to that edge's per-context
//! counter. Weights are plain sums, so shard-local graphs merge in any order
//! to the same totals.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoContext {
    Flight,
    Contact,
    Document,
}

impl CoContext {
    pub fn as_str(self) -> &'static str {
        match self {
            CoContext::Flight => "flight",
            CoContext::Contact => "contact",
            CoContext::Document => "document",
        }
    }
}

impl std::fmt::Display for CoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub weight: u64,
    pub contexts: BTreeMap<CoContext, u64>,
}

/// One neighbor of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub entity: String,
    pub weight: u64,
    pub contexts: BTreeMap<CoContext, u64>,
}

/// Result of a bounded shortest-path search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathOutcome {
    Found {
        path: Vec<String>,
        hops: usize,
        /// Weakest edge on the path; `None` for the zero-hop path.
        min_weight: Option<u64>,
    },
    NotConnected,
}

impl PathOutcome {
    pub fn hops(&self) -> Option<usize> {
        match self {
            PathOutcome::Found { hops, .. } => Some(*hops),
            PathOutcome::NotConnected => None,
        }
    }

    pub fn min_weight(&self) -> Option<u64> {
        match self {
            PathOutcome::Found { min_weight, .. } => *min_weight,
            PathOutcome::NotConnected => None,
        }
    }
}

/// Undirected graph stored as a symmetric adjacency map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    adjacency: BTreeMap<String, BTreeMap<String, Edge>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeMap::len).sum::<usize>() / 2
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.adjacency.contains_key(entity)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    /// Record one co-occurrence event. Self-loops and empty names are ignored.
    pub fn record(&mut self, a: &str, b: &str, context: CoContext) -> bool {
        self.add_weight(a, b, context, 1)
    }

    /// Record one event for every unordered pair of distinct names.
    ///
    /// Returns the number of pairs recorded.
    pub fn record_group<S: AsRef<str>>(&mut self, names: &[S], context: CoContext) -> usize {
        let unique: BTreeSet<&str> = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|n| !n.is_empty())
            .collect();
        let unique: Vec<&str> = unique.into_iter().collect();
        let mut recorded = 0;
        for (i, a) in unique.iter().enumerate() {
            for b in &unique[i + 1..] {
                if self.record(a, b, context) {
                    recorded += 1;
                }
            }
        }
        recorded
    }

    fn add_weight(&mut self, a: &str, b: &str, context: CoContext, amount: u64) -> bool {
        if a == b || a.is_empty() || b.is_empty() || amount == 0 {
            return false;
        }
        for (from, to) in [(a, b), (b, a)] {
            let edge = self
                .adjacency
                .entry(from.to_string())
                .or_default()
                .entry(to.to_string())
                .or_default();
            edge.weight += amount;
            *edge.contexts.entry(context).or_insert(0) += amount;
        }
        true
    }

    /// Sum another graph into this one.
    pub fn merge(&mut self, other: &RelationshipGraph) {
        for (a, neighbors) in &other.adjacency {
            for (b, edge) in neighbors {
                // Each undirected edge appears twice; take it from one side.
                if a < b {
                    for (&ctx, &n) in &edge.contexts {
                        self.add_weight(a, b, ctx, n);
                    }
                }
            }
        }
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.adjacency.get(a)?.get(b)
    }

    pub fn weight(&self, a: &str, b: &str) -> u64 {
        self.edge(a, b).map_or(0, |e| e.weight)
    }

    /// Heaviest edge touching `entity` (0 if isolated or unknown).
    pub fn max_weight_of(&self, entity: &str) -> u64 {
        self.adjacency
            .get(entity)
            .and_then(|n| n.values().map(|e| e.weight).max())
            .unwrap_or(0)
    }

    /// Neighbors by weight desc, then name; edges below `min_weight` are skipped.
    pub fn neighbors(&self, entity: &str, min_weight: u64) -> Vec<Connection> {
        let Some(neighbors) = self.adjacency.get(entity) else {
            return Vec::new();
        };
        let mut out: Vec<Connection> = neighbors
            .iter()
            .filter(|(_, e)| e.weight >= min_weight)
            .map(|(name, e)| Connection {
                entity: name.clone(),
                weight: e.weight,
                contexts: e.contexts.clone(),
            })
            .collect();
        out.sort_by(|x, y| y.weight.cmp(&x.weight).then_with(|| x.entity.cmp(&y.entity)));
        out
    }

    /// Shortest path from `from` to `to` within `max_hops` edges.
    ///
    /// Breadth-first by level, so work is bounded by the `max_hops`
    /// neighborhood. Among equal-length paths the one whose weakest edge is
    /// heaviest wins; remaining ties go to the lexicographically smaller
    /// predecessor. Edges lighter than `min_weight` are not traversed.
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        min_weight: u64,
    ) -> PathOutcome {
        if !self.contains(from) || !self.contains(to) {
            return PathOutcome::NotConnected;
        }
        if from == to {
            return PathOutcome::Found {
                path: vec![from.to_string()],
                hops: 0,
                min_weight: None,
            };
        }

        // node -> (depth, bottleneck so far, predecessor)
        let mut best: BTreeMap<&str, (usize, u64, Option<&str>)> = BTreeMap::new();
        best.insert(from, (0, u64::MAX, None));
        let mut frontier: VecDeque<&str> = VecDeque::from([from]);

        for depth in 1..=max_hops {
            let mut next: BTreeSet<&str> = BTreeSet::new();
            let mut level: Vec<&str> = frontier.drain(..).collect();
            level.sort_unstable();
            for u in level {
                let Some(&(_, u_bottleneck, _)) = best.get(u) else {
                    continue;
                };
                let Some(neighbors) = self.adjacency.get(u) else {
                    continue;
                };
                for (v, edge) in neighbors {
                    if edge.weight < min_weight {
                        continue;
                    }
                    let v = v.as_str();
                    let candidate = u_bottleneck.min(edge.weight);
                    match best.get(v) {
                        None => {
                            best.insert(v, (depth, candidate, Some(u)));
                            next.insert(v);
                        }
                        Some(&(d, b, _)) if d == depth && candidate > b => {
                            best.insert(v, (depth, candidate, Some(u)));
                        }
                        _ => {}
                    }
                }
            }
            if best.contains_key(to) {
                break;
            }
            if next.is_empty() {
                return PathOutcome::NotConnected;
            }
            frontier.extend(next);
        }

        let Some(&(hops, bottleneck, _)) = best.get(to) else {
            return PathOutcome::NotConnected;
        };

        let mut path = vec![to.to_string()];
        let mut cursor = to;
        while let Some(&(_, _, Some(prev))) = best.get(cursor) {
            path.push(prev.to_string());
            cursor = prev;
        }
        path.reverse();

        PathOutcome::Found {
            path,
            hops,
            min_weight: Some(bottleneck),
        }
    }
}
