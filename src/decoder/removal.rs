//! Removal decoder: one logit per request pair.
//!
//! A node's score approximates the saving of excising it and reconnecting
//! its neighbours, expressed in attention space:
//! `q(pre)·k(node) + q(node)·k(post) - q(pre)·k(post)`.
//! Variants differ only in which nodes stand in for `pre` and `post`.

use crate::config::RemovalVariant;
use crate::error::{ensure_dim, Result};
use crate::history::HISTORY_DEPTH;
use crate::nn::attention::project_heads;
use crate::nn::{init_uniform, Mlp};
use crate::problem::partner;
use crate::tour::Tour;
use ndarray::{s, Array2, Array3, Array4};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How far to walk along the tour when choosing a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Direct,
    Second,
    /// Direct neighbour, or one further when the direct one is the node's pair partner
    SkipPartner,
}

/// Neighbours used for one compatibility channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourRule {
    pub pre: Hop,
    pub post: Hop,
}

const ORIGIN_RULES: [NeighbourRule; 1] = [NeighbourRule {
    pre: Hop::Direct,
    post: Hop::Direct,
}];
const GLITCH_RULES: [NeighbourRule; 1] = [NeighbourRule {
    pre: Hop::Direct,
    post: Hop::Second,
}];
const UPDATE1_RULES: [NeighbourRule; 1] = [NeighbourRule {
    pre: Hop::SkipPartner,
    post: Hop::SkipPartner,
}];
const UPDATE2_RULES: [NeighbourRule; 3] = [
    NeighbourRule {
        pre: Hop::Direct,
        post: Hop::Direct,
    },
    NeighbourRule {
        pre: Hop::Direct,
        post: Hop::Second,
    },
    NeighbourRule {
        pre: Hop::Second,
        post: Hop::Direct,
    },
];

impl RemovalVariant {
    pub fn rules(self) -> &'static [NeighbourRule] {
        match self {
            RemovalVariant::Origin => &ORIGIN_RULES,
            RemovalVariant::Glitch => &GLITCH_RULES,
            RemovalVariant::Update1 => &UPDATE1_RULES,
            RemovalVariant::Update2 => &UPDATE2_RULES,
        }
    }

    fn head_dim(self, dim: usize, n_heads: usize) -> usize {
        match self {
            RemovalVariant::Update2 => dim / n_heads,
            _ => dim,
        }
    }

    /// Hidden widths of the aggregator MLP.
    fn aggregator_widths(self) -> (usize, usize) {
        match self {
            RemovalVariant::Update2 => (64, 32),
            _ => (32, 32),
        }
    }
}

fn hop(index: &[usize], node: usize, hop: Hop, pairs: usize) -> usize {
    let direct = index[node];
    match hop {
        Hop::Direct => direct,
        Hop::Second => index[direct],
        Hop::SkipPartner if node != 0 && direct == partner(node, pairs) => index[direct],
        Hop::SkipPartner => direct,
    }
}

/// Query/key projections of one neighbour rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub w_query: Array3<f64>,
    pub w_key: Array3<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalDecoder {
    pub variant: RemovalVariant,
    pub n_heads: usize,
    pub projections: Vec<Projection>,
    pub agg: Mlp,
}

impl RemovalDecoder {
    pub fn new<R: Rng + ?Sized>(
        variant: RemovalVariant,
        n_heads: usize,
        dim: usize,
        rng: &mut R,
    ) -> Self {
        let hidden = variant.head_dim(dim, n_heads);
        let projections = variant
            .rules()
            .iter()
            .map(|_| Projection {
                w_query: init_uniform((n_heads, dim, hidden), rng),
                w_key: init_uniform((n_heads, dim, hidden), rng),
            })
            .collect();
        let (ff, emb) = variant.aggregator_widths();
        let input = 2 * n_heads * variant.rules().len() + HISTORY_DEPTH;
        RemovalDecoder {
            variant,
            n_heads,
            projections,
            agg: Mlp::new(input, ff, emb, rng),
        }
    }

    /// Per-node compatibility `(heads, batch, nodes)` for one rule; the depot column is kept.
    fn node_scores(
        &self,
        h_hat: &Array3<f64>,
        tours: &[Tour],
        rule: NeighbourRule,
        projection: &Projection,
    ) -> Array3<f64> {
        let (batch, nodes, _) = h_hat.dim();
        let pairs = nodes / 2;
        let q: Array4<f64> = project_heads(h_hat, &projection.w_query);
        let k: Array4<f64> = project_heads(h_hat, &projection.w_key);

        let mut out = Array3::zeros((self.n_heads, batch, nodes));
        for (b, tour) in tours.iter().enumerate() {
            let pre_index = tour.predecessors();
            let post_index = tour.successors();
            for node in 0..nodes {
                let pre = hop(&pre_index, node, rule.pre, pairs);
                let post = hop(post_index, node, rule.post, pairs);
                for h in 0..self.n_heads {
                    let q_pre = q.slice(s![h, b, pre, ..]);
                    let k_post = k.slice(s![h, b, post, ..]);
                    out[[h, b, node]] = q_pre.dot(&k.slice(s![h, b, node, ..]))
                        + q.slice(s![h, b, node, ..]).dot(&k_post)
                        - q_pre.dot(&k_post);
                }
            }
        }
        out
    }

    /// Raw aggregator output `(batch, pairs)`, before range bounding and masking.
    pub fn forward(
        &self,
        h_hat: &Array3<f64>,
        tours: &[Tour],
        history: &Array3<f64>,
    ) -> Result<Array2<f64>> {
        let (batch, nodes, _) = h_hat.dim();
        let pairs = nodes / 2;
        ensure_dim("tour batch", tours.len(), batch)?;
        for tour in tours {
            ensure_dim("tour length", tour.len(), nodes)?;
        }
        ensure_dim("history batch", history.dim().0, batch)?;
        ensure_dim("history depth", history.dim().1, HISTORY_DEPTH)?;
        ensure_dim("history pairs", history.dim().2, pairs)?;

        let scores: Vec<Array3<f64>> = self
            .variant
            .rules()
            .iter()
            .zip(&self.projections)
            .map(|(&rule, projection)| self.node_scores(h_hat, tours, rule, projection))
            .collect();

        let heads = self.n_heads;
        let width = self.agg.input_dim();
        let mut logits = Array2::zeros((batch, pairs));
        for b in 0..batch {
            let mut features = Array2::<f64>::zeros((pairs, width));
            for k in 0..pairs {
                let mut row = features.row_mut(k);
                let (pickup, delivery) = (k + 1, k + 1 + pairs);
                for (r, score) in scores.iter().enumerate() {
                    for h in 0..heads {
                        row[2 * heads * r + h] = score[[h, b, pickup]];
                        row[2 * heads * r + heads + h] = score[[h, b, delivery]];
                    }
                }
                let offset = 2 * heads * scores.len();
                for d in 0..HISTORY_DEPTH {
                    row[offset + d] = history[[b, d, k]];
                }
            }
            logits.row_mut(b).assign(&self.agg.forward(&features.view()));
        }
        Ok(logits)
    }
}
