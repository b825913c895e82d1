//! Node feature embedding and the synthesized attention encoder.
//!
//! Each layer fuses content self-attention with the structural positional
//! score before the softmax. The positional score is computed once per step
//! from the cyclic position embeddings and passed through every layer as-is.

use crate::config::{EmbeddingKind, ModelConfig, NormalizationKind};
use crate::error::{ensure_dim, Result};
use crate::nn::attention::{combine_heads, head_scores, project_heads, MultiHeadAttention};
use crate::nn::norm::Normalization;
use crate::nn::{init_uniform, relu, FeedForward, Linear};
use ndarray::{concatenate, s, Array2, Array3, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Raw coordinate width of every node.
pub const NODE_DIM: usize = 2;

/// Maps `(batch, nodes, NODE_DIM)` coordinates to content embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureEmbedding {
    Origin(Linear),
    Sep {
        depot: Linear,
        pickup: Linear,
        delivery: Linear,
    },
    Pair {
        depot: Linear,
        /// Sees pickup and delivery coordinates side by side
        pickup: Linear,
        delivery: Linear,
    },
}

impl FeatureEmbedding {
    pub fn new<R: Rng + ?Sized>(kind: EmbeddingKind, dim: usize, rng: &mut R) -> Self {
        match kind {
            EmbeddingKind::Origin => FeatureEmbedding::Origin(Linear::new(NODE_DIM, dim, false, rng)),
            EmbeddingKind::Sep => FeatureEmbedding::Sep {
                depot: Linear::new(NODE_DIM, dim, true, rng),
                pickup: Linear::new(NODE_DIM, dim, true, rng),
                delivery: Linear::new(NODE_DIM, dim, true, rng),
            },
            EmbeddingKind::Pair => FeatureEmbedding::Pair {
                depot: Linear::new(NODE_DIM, dim, true, rng),
                pickup: Linear::new(2 * NODE_DIM, dim, true, rng),
                delivery: Linear::new(NODE_DIM, dim, true, rng),
            },
        }
    }

    pub fn forward(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let (depot, pickup, delivery) = match self {
            FeatureEmbedding::Origin(linear) => return Ok(linear.forward3(x)),
            FeatureEmbedding::Sep {
                depot,
                pickup,
                delivery,
            }
            | FeatureEmbedding::Pair {
                depot,
                pickup,
                delivery,
            } => (depot, pickup, delivery),
        };

        let half = x.dim().1 / 2;
        let depot_x = x.slice(s![.., 0..1, ..]);
        let pickup_x = x.slice(s![.., 1..=half, ..]);
        let delivery_x = x.slice(s![.., half + 1.., ..]);
        let pickup_in = match self {
            FeatureEmbedding::Pair { .. } => concatenate(Axis(2), &[pickup_x, delivery_x])?,
            _ => pickup_x.to_owned(),
        };

        let depot_h = depot.forward3(&depot_x.to_owned());
        let pickup_h = pickup.forward3(&pickup_in);
        let delivery_h = delivery.forward3(&delivery_x.to_owned());
        Ok(concatenate(
            Axis(1),
            &[depot_h.view(), pickup_h.view(), delivery_h.view()],
        )?)
    }
}

/// Attention whose per-head weights blend content and positional scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAttention {
    pub n_heads: usize,
    pub w_query: Array3<f64>,
    pub w_key: Array3<f64>,
    pub w_val: Array3<f64>,
    /// `2*heads -> 2*heads -> heads`
    pub score_aggr: [Linear; 2],
    pub w_out: Array3<f64>,
}

impl SynthesizedAttention {
    pub fn new<R: Rng + ?Sized>(n_heads: usize, dim: usize, rng: &mut R) -> Self {
        let hidden = dim / n_heads;
        SynthesizedAttention {
            n_heads,
            w_query: init_uniform((n_heads, dim, hidden), rng),
            w_key: init_uniform((n_heads, dim, hidden), rng),
            w_val: init_uniform((n_heads, dim, hidden), rng),
            score_aggr: [
                Linear::new(2 * n_heads, 2 * n_heads, true, rng),
                Linear::new(2 * n_heads, n_heads, true, rng),
            ],
            w_out: init_uniform((n_heads, hidden, dim), rng),
        }
    }

    /// `h`: `(batch, nodes, dim)`, `aux`: `(heads, batch, nodes, nodes)`.
    pub fn forward(&self, h: &Array3<f64>, aux: &Array4<f64>) -> Array3<f64> {
        let (batch, nodes, _) = h.dim();
        let heads = self.n_heads;
        let q = project_heads(h, &self.w_query);
        let k = project_heads(h, &self.w_key);
        let v = project_heads(h, &self.w_val);
        let content = head_scores(&q, &k);

        let mut attn = Array4::<f64>::zeros((heads, batch, nodes, nodes));
        for b in 0..batch {
            // one row per (query, key) cell, channels = content heads ++ aux heads
            let mut raw = Array2::<f64>::zeros((nodes * nodes, 2 * heads));
            for i in 0..nodes {
                for j in 0..nodes {
                    let mut row = raw.row_mut(i * nodes + j);
                    for hd in 0..heads {
                        row[hd] = content[[hd, b, i, j]];
                        row[heads + hd] = aux[[hd, b, i, j]];
                    }
                }
            }
            let hidden = self.score_aggr[0].forward(&raw.view()).mapv(relu);
            let fused = self.score_aggr[1].forward(&hidden.view());
            for i in 0..nodes {
                for j in 0..nodes {
                    for hd in 0..heads {
                        attn[[hd, b, i, j]] = fused[[i * nodes + j, hd]];
                    }
                }
            }
        }

        crate::nn::softmax_lanes(&mut attn, Axis(3));
        combine_heads(&attn, &v, &self.w_out)
    }
}

/// Synthesized attention and feed-forward sub-layers, each followed by
/// residual-add-then-normalise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderLayer {
    pub attention: SynthesizedAttention,
    pub attention_norm: Normalization,
    pub feed_forward: FeedForward,
    pub feed_forward_norm: Normalization,
}

impl EncoderLayer {
    pub fn new<R: Rng + ?Sized>(
        n_heads: usize,
        dim: usize,
        feed_forward_hidden: usize,
        normalization: NormalizationKind,
        rng: &mut R,
    ) -> Self {
        EncoderLayer {
            attention: SynthesizedAttention::new(n_heads, dim, rng),
            attention_norm: Normalization::new(dim, normalization),
            feed_forward: FeedForward::new(dim, feed_forward_hidden, false, rng),
            feed_forward_norm: Normalization::new(dim, normalization),
        }
    }

    pub fn forward(&self, h: &Array3<f64>, aux: &Array4<f64>) -> Array3<f64> {
        let attended = self.attention.forward(h, aux) + h;
        let h1 = self.attention_norm.forward(&attended);
        let fed = self.feed_forward.forward(&h1) + &h1;
        self.feed_forward_norm.forward(&fed)
    }
}

/// Feature embedding, positional score and the stack of encoder layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    pub embedding_dim: usize,
    pub n_heads: usize,
    pub embedding: FeatureEmbedding,
    /// Score-only self-attention over the positional embeddings
    pub position_score: MultiHeadAttention,
    pub layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let dim = config.embedding_dim;
        let heads = config.n_heads;
        Encoder {
            embedding_dim: dim,
            n_heads: heads,
            embedding: FeatureEmbedding::new(config.embedding_kind, dim, rng),
            position_score: MultiHeadAttention::new(heads, dim, dim, None, dim, rng),
            layers: (0..config.n_encode_layers)
                .map(|_| {
                    EncoderLayer::new(
                        heads,
                        dim,
                        config.feed_forward_hidden,
                        config.normalization,
                        rng,
                    )
                })
                .collect(),
        }
    }

    /// Unscaled positional compatibility `(heads, batch, nodes, nodes)`.
    pub fn auxiliary_scores(&self, positions: &Array3<f64>) -> Array4<f64> {
        self.position_score.scores(positions, positions, false)
    }

    /// `features`: `(batch, nodes, NODE_DIM)`, `positions`: `(batch, nodes, dim)`.
    /// Returns `h_wave`, `(batch, nodes, dim)`.
    pub fn forward(&self, features: &Array3<f64>, positions: &Array3<f64>) -> Result<Array3<f64>> {
        let (batch, nodes, node_dim) = features.dim();
        ensure_dim("feature width", node_dim, NODE_DIM)?;
        ensure_dim("positional batch", positions.dim().0, batch)?;
        ensure_dim("positional nodes", positions.dim().1, nodes)?;
        ensure_dim("positional width", positions.dim().2, self.embedding_dim)?;

        let aux = self.auxiliary_scores(positions);
        let mut h = self.embedding.forward(features)?;
        for layer in &self.layers {
            h = layer.forward(&h, &aux);
        }
        Ok(h)
    }
}
