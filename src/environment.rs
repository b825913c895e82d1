//! Environment collaborator: feasibility masks and action application.

use crate::error::{ensure_dim, Error, Result};
use crate::positional::StackSnapshot;
use crate::problem::{node_kind, partner, NodeKind, Problem};
use crate::tour::{Action, Tour};
use itertools::iproduct;
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

/// What the local-search core needs from the problem side.
pub trait Environment {
    /// Number of request pairs.
    fn pairs(&self) -> usize;

    /// `true` where reinserting the freed pair at `(pickup anchor, delivery anchor)`
    /// would break precedence or the loading discipline.
    fn swap_mask(
        &self,
        removed_pair: usize,
        visit_index: &[usize],
        top2: &[[usize; 2]],
    ) -> Result<Array2<bool>>;

    /// The tour obtained by applying `action`.
    fn apply(&self, tour: &Tour, action: &Action) -> Result<Tour>;

    fn node_count(&self) -> usize {
        2 * self.pairs() + 1
    }
}

/// Single-vehicle pickup-and-delivery with last-in-first-out loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdtspLifo {
    pairs: usize,
}

impl PdtspLifo {
    pub fn new(pairs: usize) -> Result<Self> {
        if pairs == 0 {
            return Err(Error::configuration("a PDP needs at least one request pair"));
        }
        Ok(PdtspLifo { pairs })
    }

    /// Check the tour covers all nodes once and respects precedence and LIFO.
    pub fn validate(&self, tour: &Tour) -> Result<()> {
        ensure_dim("tour length", tour.len(), self.node_count())?;
        if !tour.is_precedence_feasible(self.pairs) {
            return Err(Error::invalid_tour("a delivery precedes its pickup"));
        }
        if !tour.is_lifo_feasible(self.pairs) {
            return Err(Error::invalid_tour("deliveries violate last-in-first-out order"));
        }
        Ok(())
    }

    /// Random LIFO-feasible tour: at each stop either open a random unserved
    /// pickup or deliver the top of the stack.
    pub fn random_tour<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tour> {
        let mut pending: Vec<usize> = (1..=self.pairs).collect();
        pending.shuffle(rng);
        let mut stack = Vec::with_capacity(self.pairs);
        let mut sequence = Vec::with_capacity(self.node_count());
        sequence.push(0);
        while !pending.is_empty() || !stack.is_empty() {
            let deliver = pending.is_empty() || (!stack.is_empty() && rng.gen_bool(0.5));
            if deliver {
                if let Some(pickup) = stack.pop() {
                    sequence.push(partner(pickup, self.pairs));
                }
            } else if let Some(pickup) = pending.pop() {
                sequence.push(pickup);
                stack.push(pickup);
            }
        }
        Tour::from_sequence(&sequence)
    }

    /// Nearest-neighbour LIFO-feasible tour from the depot.
    pub fn nearest_neighbour_tour(&self, problem: &Problem) -> Result<Tour> {
        ensure_dim("problem pairs", problem.pairs, self.pairs)?;
        let mut open = vec![true; self.pairs + 1];
        open[0] = false;
        let mut stack: Vec<usize> = Vec::with_capacity(self.pairs);
        let mut sequence = vec![0];
        let mut current = 0;
        for _ in 0..2 * self.pairs {
            let deliverable = stack.last().map(|&p| partner(p, self.pairs));
            let next = (1..=self.pairs)
                .filter(|&p| open[p])
                .chain(deliverable)
                .min_by(|&a, &b| {
                    problem
                        .get_distance(current, a)
                        .total_cmp(&problem.get_distance(current, b))
                })
                .ok_or_else(|| Error::invalid_tour("no feasible continuation"))?;
            match node_kind(next, self.pairs) {
                NodeKind::Pickup => {
                    open[next] = false;
                    stack.push(next);
                }
                _ => {
                    stack.pop();
                }
            }
            sequence.push(next);
            current = next;
        }
        Tour::from_sequence(&sequence)
    }
}

/// Stack top seen after `node` once `ignored` is taken off the vehicle.
fn top_without(top2: &[usize; 2], ignored: usize) -> usize {
    if top2[0] == ignored {
        top2[1]
    } else {
        top2[0]
    }
}

impl Environment for PdtspLifo {
    fn pairs(&self) -> usize {
        self.pairs
    }

    fn swap_mask(
        &self,
        removed_pair: usize,
        visit_index: &[usize],
        top2: &[[usize; 2]],
    ) -> Result<Array2<bool>> {
        let nodes = self.node_count();
        ensure_dim("visit index length", visit_index.len(), nodes)?;
        ensure_dim("top2 length", top2.len(), nodes)?;
        if removed_pair >= self.pairs {
            return Err(Error::shape_mismatch(format!(
                "removal index {removed_pair} out of range for {} pairs",
                self.pairs
            )));
        }
        let pickup = removed_pair + 1;
        let delivery = partner(pickup, self.pairs);
        let order = |node: usize| visit_index[node] % nodes;
        let top = |node: usize| top_without(&top2[node], pickup);
        let freed = |node: usize| node == pickup || node == delivery;

        let mut mask = Array2::from_elem((nodes, nodes), true);
        for (i, j) in iproduct!(0..nodes, 0..nodes) {
            if freed(i) || freed(j) {
                continue;
            }
            mask[[i, j]] = order(i) > order(j) || top(i) != top(j);
        }
        Ok(mask)
    }

    fn apply(&self, tour: &Tour, action: &Action) -> Result<Tour> {
        tour.apply(action, self.pairs)
    }
}

/// Apply `action` to a depot-first visiting sequence by list edits.
pub fn apply_to_sequence(sequence: &[usize], action: &Action, pairs: usize) -> Result<Vec<usize>> {
    let pickup = action.pickup(pairs)?;
    let delivery = partner(pickup, pairs);
    let mut out: Vec<usize> = sequence
        .iter()
        .copied()
        .filter(|&n| n != pickup && n != delivery)
        .collect();
    let position = |seq: &[usize], node: usize| {
        seq.iter()
            .position(|&n| n == node)
            .ok_or_else(|| Error::infeasible_step(format!("anchor {node} is not in the tour")))
    };

    let p_at = position(&out, action.pickup_anchor)?;
    out.insert(p_at + 1, pickup);
    let d_anchor = if action.delivery_anchor == action.pickup_anchor {
        pickup
    } else {
        action.delivery_anchor
    };
    let d_at = position(&out, d_anchor)?;
    out.insert(d_at + 1, delivery);
    Ok(out)
}

/// Top-2 view per node from fold snapshots, indexed by node id.
pub fn top2_by_node(snapshots: &[StackSnapshot]) -> Vec<[usize; 2]> {
    let mut out = vec![[0, 0]; snapshots.len()];
    for snap in snapshots {
        out[snap.node] = snap.top2;
    }
    out
}
