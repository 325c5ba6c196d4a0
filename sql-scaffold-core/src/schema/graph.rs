//! Directed graph over table names (or anything hashable).

use std::collections::{HashSet, VecDeque};
use std::error::Error;
use std::fmt;
use std::hash::Hash;

use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicGraph<N> {
    /// Nodes that could not be ordered.
    pub remaining: Vec<N>,
}

impl<N: fmt::Debug> fmt::Display for CyclicGraph<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph contains a cycle among {:?}", self.remaining)
    }
}

impl<N: fmt::Debug> Error for CyclicGraph<N> {}

/// Nodes keep insertion order, which makes every traversal deterministic.
#[derive(Debug, Clone)]
pub struct Graph<N> {
    edges: IndexMap<N, Vec<N>>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self {
            edges: IndexMap::new(),
        }
    }
}

impl<N: Clone + Eq + Hash> Graph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        self.edges.entry(node).or_default();
    }

    /// `from` depends on `to`. Both ends become nodes.
    pub fn add_edge(&mut self, from: N, to: N) {
        let successors = self.edges.entry(from).or_default();
        if !successors.contains(&to) {
            successors.push(to.clone());
        }
        self.add_node(to);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.edges.keys()
    }

    pub fn successors(&self, node: &N) -> &[N] {
        self.edges.get(node).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, node: &N) -> bool {
        self.edges.contains_key(node)
    }

    /// Breadth-first walk from `seeds`. Every reached node is returned exactly
    /// once; `accept(node, origin)` decides whether the walk continues through
    /// `node` (`origin` is `None` for seeds).
    pub fn reachable_from<I, F>(&self, seeds: I, mut accept: F) -> Vec<N>
    where
        I: IntoIterator<Item = N>,
        F: FnMut(&N, Option<&N>) -> bool,
    {
        let mut visited: HashSet<N> = HashSet::new();
        let mut reached = vec![];
        let mut queue: VecDeque<(N, Option<N>)> = seeds.into_iter().map(|seed| (seed, None)).collect();
        while let Some((current, origin)) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            reached.push(current.clone());
            if accept(&current, origin.as_ref()) {
                for next in self.successors(&current) {
                    queue.push_back((next.clone(), Some(current.clone())));
                }
            }
        }
        reached
    }

    /// Every node after all of its successors. A node never waits on itself.
    pub fn sink_to_source(&self) -> Result<Vec<N>, CyclicGraph<N>> {
        let mut placed: HashSet<&N> = HashSet::with_capacity(self.edges.len());
        let mut order = Vec::with_capacity(self.edges.len());
        while order.len() < self.edges.len() {
            let ready = self.edges.iter().find(|(node, successors)| {
                !placed.contains(node)
                    && successors
                        .iter()
                        .all(|next| next == *node || placed.contains(next))
            });
            let Some((node, _)) = ready else {
                return Err(CyclicGraph {
                    remaining: self
                        .edges
                        .keys()
                        .filter(|node| !placed.contains(node))
                        .cloned()
                        .collect(),
                });
            };
            placed.insert(node);
            order.push(node.clone());
        }
        Ok(order)
    }
}
