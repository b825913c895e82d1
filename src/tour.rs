//! Tour representation for the PDP: a successor function over all nodes.

use crate::error::{Error, Result};
use crate::problem::{node_kind, partner, NodeKind, Problem};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cycle over nodes `0..2n` stored as `next[i] = j` (node `j`
/// immediately follows node `i`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Tour {
    next: Vec<usize>,
}

impl Tour {
    /// Wrap a successor array, checking that it forms one cycle through all nodes.
    pub fn from_successors(next: Vec<usize>) -> Result<Self> {
        let n = next.len();
        if n == 0 {
            return Err(Error::invalid_tour("empty successor array"));
        }
        if let Some(bad) = next.iter().find(|&&j| j >= n) {
            return Err(Error::invalid_tour(format!(
                "successor {bad} out of range for {n} nodes"
            )));
        }

        let mut seen = vec![false; n];
        let mut current = 0;
        for _ in 0..n {
            if seen[current] {
                return Err(Error::invalid_tour(format!(
                    "node {current} revisited before all nodes were covered"
                )));
            }
            seen[current] = true;
            current = next[current];
        }
        if current != 0 {
            return Err(Error::invalid_tour("walk does not return to the depot"));
        }

        Ok(Tour { next })
    }

    /// Build a tour from a visiting sequence; the depot may appear anywhere.
    pub fn from_sequence(sequence: &[usize]) -> Result<Self> {
        let n = sequence.len();
        let mut next = vec![usize::MAX; n];
        for (&from, &to) in sequence.iter().circular_tuple_windows() {
            if from >= n {
                return Err(Error::invalid_tour(format!(
                    "node {from} out of range for {n} nodes"
                )));
            }
            next[from] = to;
        }
        if n == 1 {
            next[0] = sequence[0];
        }
        Tour::from_successors(next)
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    /// The successor array.
    pub fn successors(&self) -> &[usize] {
        &self.next
    }

    pub fn successor(&self, node: usize) -> usize {
        self.next[node]
    }

    /// Predecessor view; the inverse permutation of the successor array.
    pub fn predecessors(&self) -> Vec<usize> {
        let mut pre = vec![0; self.next.len()];
        for (i, &j) in self.next.iter().enumerate() {
            pre[j] = i;
        }
        pre
    }

    /// Nodes in visiting order, starting at the depot.
    pub fn sequence(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.next.len());
        let mut current = 0;
        for _ in 0..self.next.len() {
            out.push(current);
            current = self.next[current];
        }
        out
    }

    /// Total Euclidean length of the cycle.
    pub fn cost(&self, problem: &Problem) -> f64 {
        self.next
            .iter()
            .enumerate()
            .map(|(i, &j)| problem.get_distance(i, j))
            .sum()
    }

    /// Every pickup is visited before its delivery.
    pub fn is_precedence_feasible(&self, pairs: usize) -> bool {
        let mut picked = vec![false; pairs + 1];
        for node in self.sequence() {
            match node_kind(node, pairs) {
                NodeKind::Depot => {}
                NodeKind::Pickup => picked[node] = true,
                NodeKind::Delivery => {
                    if !picked[node - pairs] {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Deliveries unload in reverse pickup order.
    pub fn is_lifo_feasible(&self, pairs: usize) -> bool {
        let mut stack = Vec::with_capacity(pairs);
        for node in self.sequence() {
            match node_kind(node, pairs) {
                NodeKind::Depot => {}
                NodeKind::Pickup => stack.push(node),
                NodeKind::Delivery => {
                    if stack.pop() != Some(node - pairs) {
                        return false;
                    }
                }
            }
        }
        stack.is_empty()
    }

    /// Excise the action's request pair and splice it back at its anchors.
    pub fn apply(&self, action: &Action, pairs: usize) -> Result<Tour> {
        let nodes = self.next.len();
        if nodes != 2 * pairs + 1 {
            return Err(Error::shape_mismatch(format!(
                "tour has {nodes} nodes, expected {}",
                2 * pairs + 1
            )));
        }
        let pickup = action.pickup(pairs)?;
        let delivery = partner(pickup, pairs);
        let (p_anchor, d_anchor) = (action.pickup_anchor, action.delivery_anchor);
        for anchor in [p_anchor, d_anchor] {
            if anchor >= nodes || anchor == pickup || anchor == delivery {
                return Err(Error::infeasible_step(format!(
                    "anchor {anchor} is not a valid insertion point for pair {}",
                    action.removal
                )));
            }
        }

        let mut next = self.next.clone();
        for node in [pickup, delivery] {
            let pre = next
                .iter()
                .position(|&j| j == node)
                .ok_or_else(|| Error::invalid_tour(format!("node {node} has no predecessor")))?;
            next[pre] = next[node];
            next[node] = node;
        }

        next[pickup] = next[p_anchor];
        next[p_anchor] = pickup;
        let d_anchor = if d_anchor == p_anchor { pickup } else { d_anchor };
        next[delivery] = next[d_anchor];
        next[d_anchor] = delivery;

        Tour::from_successors(next)
    }
}

impl TryFrom<Vec<usize>> for Tour {
    type Error = Error;

    fn try_from(next: Vec<usize>) -> Result<Self> {
        Tour::from_successors(next)
    }
}

impl From<Tour> for Vec<usize> {
    fn from(tour: Tour) -> Self {
        tour.next
    }
}

impl fmt::Debug for Tour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tour({})", self.sequence().iter().join(" -> "))
    }
}

/// One destroy/repair move: remove request pair `removal` (pickup
/// `removal + 1`) and reinsert its pickup after `pickup_anchor` and its
/// delivery after `delivery_anchor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub removal: usize,
    pub pickup_anchor: usize,
    pub delivery_anchor: usize,
}

impl Action {
    pub fn new(removal: usize, pickup_anchor: usize, delivery_anchor: usize) -> Self {
        Action {
            removal,
            pickup_anchor,
            delivery_anchor,
        }
    }

    /// Pickup node freed by this action.
    pub fn pickup(&self, pairs: usize) -> Result<usize> {
        if self.removal >= pairs {
            return Err(Error::shape_mismatch(format!(
                "removal index {} out of range for {pairs} pairs",
                self.removal
            )));
        }
        Ok(self.removal + 1)
    }

    /// Position of the anchor pair in a flattened `nodes x nodes` grid.
    pub fn flat_reinsertion(&self, nodes: usize) -> usize {
        self.pickup_anchor * nodes + self.delivery_anchor
    }

    /// Inverse of [`Action::flat_reinsertion`].
    pub fn from_flat(removal: usize, flat: usize, nodes: usize) -> Self {
        Action::new(removal, flat / nodes, flat % nodes)
    }
}
