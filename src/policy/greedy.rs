//! Myopic geometric baseline with an epsilon-random fallback.

use super::{removal_mask, uniform_choice, Choice, ReinsertionRequest, SelectionPolicy, StepContext};
use crate::config::PolicyKind;
use crate::error::{Error, Result};
use crate::problem::partner;
use itertools::iproduct;
use ndarray::{Array3, ArrayView2, Axis};
use rand::{Rng, RngCore};

/// Scores moves by Euclidean cost deltas; with probability `epsilon` the
/// uniform-random alternative is taken instead.
#[derive(Debug, Clone, Copy)]
pub struct EpsilonGreedyPolicy {
    epsilon: f64,
}

impl EpsilonGreedyPolicy {
    pub fn new(epsilon: f64) -> Self {
        EpsilonGreedyPolicy { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn explore(&self, rng: &mut dyn RngCore) -> bool {
        rng.gen::<f64>() < self.epsilon
    }
}

fn distance(coords: &ArrayView2<f64>, a: usize, b: usize) -> f64 {
    let dx = coords[[a, 0]] - coords[[b, 0]];
    let dy = coords[[a, 1]] - coords[[b, 1]];
    (dx * dx + dy * dy).sqrt()
}

/// Lowest-index maximum among unmasked scores.
fn masked_argmax(scores: &[f64], mask: &[bool]) -> Result<usize> {
    scores
        .iter()
        .zip(mask)
        .enumerate()
        .filter(|(_, (_, &masked))| !masked)
        .fold(None, |best: Option<(usize, f64)>, (i, (&s, _))| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| Error::infeasible_step("every candidate is masked"))
}

/// Detour saved by removing each pair: sum over its two nodes of
/// `d(pre, v) + d(v, post) - d(pre, post)`.
pub fn removal_savings(coords: &ArrayView2<f64>, successors: &[usize], pairs: usize) -> Vec<f64> {
    let mut pre = vec![0; successors.len()];
    for (i, &j) in successors.iter().enumerate() {
        pre[j] = i;
    }
    let saving = |v: usize| {
        let (p, n) = (pre[v], successors[v]);
        distance(coords, p, v) + distance(coords, v, n) - distance(coords, p, n)
    };
    (1..=pairs).map(|k| saving(k) + saving(k + pairs)).collect()
}

/// Negated insertion cost of every anchor cell once the freed pair is excised.
pub fn insertion_scores(
    coords: &ArrayView2<f64>,
    successors: &[usize],
    pickup: usize,
    pairs: usize,
) -> Vec<f64> {
    let nodes = successors.len();
    let delivery = partner(pickup, pairs);
    let mut next = successors.to_vec();
    for node in [pickup, delivery] {
        if let Some(pre) = next.iter().position(|&j| j == node) {
            next[pre] = next[node];
            next[node] = node;
        }
    }
    let insert_cost = |x: usize, i: usize| {
        distance(coords, x, i) + distance(coords, x, next[i]) - distance(coords, i, next[i])
    };
    let cost_p: Vec<f64> = (0..nodes).map(|i| insert_cost(pickup, i)).collect();
    let cost_d: Vec<f64> = (0..nodes).map(|j| insert_cost(delivery, j)).collect();
    iproduct!(0..nodes, 0..nodes)
        .map(|(i, j)| -(cost_p[i] + cost_d[j]))
        .collect()
}

fn coords_of(features: &Array3<f64>, b: usize) -> ArrayView2<'_, f64> {
    features.index_axis(Axis(0), b)
}

impl SelectionPolicy for EpsilonGreedyPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Greedy
    }

    fn select_removal(&self, ctx: &StepContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Choice>> {
        let pairs = ctx.pairs();
        ctx.tours
            .iter()
            .enumerate()
            .map(|(b, tour)| {
                if let Some(action) = ctx.fixed_action(b) {
                    return Ok(Choice::untracked(action.removal));
                }
                let mask = removal_mask(pairs, ctx.previous[b]);
                let index = if self.explore(&mut *rng) {
                    uniform_choice(&mask, &mut *rng)?
                } else {
                    let coords = coords_of(ctx.features, b);
                    masked_argmax(&removal_savings(&coords, tour.successors(), pairs), &mask)?
                };
                Ok(Choice::untracked(index))
            })
            .collect()
    }

    fn select_reinsertion(
        &self,
        ctx: &StepContext<'_>,
        request: &ReinsertionRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Choice>> {
        let pairs = ctx.pairs();
        let nodes = 2 * pairs + 1;
        ctx.tours
            .iter()
            .zip(request.masks)
            .enumerate()
            .map(|(b, (tour, mask))| {
                if let Some(action) = ctx.fixed_action(b) {
                    return Ok(Choice::untracked(action.flat_reinsertion(nodes)));
                }
                let cells: Vec<bool> = mask.iter().copied().collect();
                let index = if self.explore(&mut *rng) {
                    uniform_choice(&cells, &mut *rng)?
                } else {
                    let coords = coords_of(ctx.features, b);
                    let pickup = request.removed[b] + 1;
                    let scores = insertion_scores(&coords, tour.successors(), pickup, pairs);
                    masked_argmax(&scores, &cells)?
                };
                Ok(Choice::untracked(index))
            })
            .collect()
    }
}
