//! Value network scoring the current state of each instance.

use crate::config::ModelConfig;
use crate::error::{ensure_dim, Error, Result};
use crate::nn::attention::MultiHeadAttention;
use crate::nn::norm::Normalization;
use crate::nn::{max_pool, FeedForward, Linear, Mlp};
use ndarray::{concatenate, Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// One self-attention block: attention and feed-forward, each with a skip
/// connection followed by normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticEncoder {
    pub attention: MultiHeadAttention,
    pub attention_norm: Normalization,
    pub feed_forward: FeedForward,
    pub feed_forward_norm: Normalization,
}

impl CriticEncoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let dim = config.embedding_dim;
        CriticEncoder {
            attention: MultiHeadAttention::new(config.n_heads, dim, dim, Some(dim), dim, rng),
            attention_norm: Normalization::new(dim, config.normalization),
            feed_forward: FeedForward::new(dim, config.feed_forward_hidden, true, rng),
            feed_forward_norm: Normalization::new(dim, config.normalization),
        }
    }

    pub fn forward(&self, h: &Array3<f64>) -> Result<Array3<f64>> {
        let attended = self
            .attention
            .forward(h, h, h)
            .ok_or_else(|| Error::configuration("critic attention has no value projection"))?;
        let h1 = self.attention_norm.forward(&(attended + h));
        let fed = self.feed_forward.forward(&h1) + &h1;
        Ok(self.feed_forward_norm.forward(&fed))
    }
}

/// Pools node embeddings and maps them, with the best cost so far, to a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticDecoder {
    pub project_graph: Linear,
    pub project_node: Linear,
    pub value_head: Mlp,
}

impl CriticDecoder {
    pub fn new<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Self {
        let half = dim / 2;
        CriticDecoder {
            project_graph: Linear::new(dim, half, true, rng),
            project_node: Linear::new(dim, half, true, rng),
            value_head: Mlp::new(2 * half + 1, dim, 64, rng),
        }
    }

    /// Projection of the mean-pooled node embeddings, `(batch, dim/2)`.
    pub fn graph_feature(&self, h: &Array3<f64>) -> Result<Array2<f64>> {
        let mean = h
            .mean_axis(Axis(1))
            .ok_or_else(|| Error::shape_mismatch("critic needs at least one node"))?;
        Ok(self.project_graph.forward(&mean.view()))
    }

    pub fn forward(&self, h: &Array3<f64>, best_cost: &[f64]) -> Result<Vec<f64>> {
        let batch = h.dim().0;
        ensure_dim("best-cost batch", best_cost.len(), batch)?;

        let mut fused = self.project_node.forward3(h);
        let graph = self.graph_feature(h)?;
        for (mut instance, g) in fused.axis_iter_mut(Axis(0)).zip(graph.rows()) {
            for mut row in instance.rows_mut() {
                row += &g;
            }
        }
        let mean = fused
            .mean_axis(Axis(1))
            .ok_or_else(|| Error::shape_mismatch("critic needs at least one node"))?;
        let maximum = max_pool(&fused);
        let cost = Array2::from_shape_vec((batch, 1), best_cost.to_vec())?;
        let input = concatenate(Axis(1), &[mean.view(), maximum.view(), cost.view()])?;
        Ok(self.value_head.forward(&input.view()).to_vec())
    }
}

/// State-value estimate used as the policy-gradient baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critic {
    pub encoder: CriticEncoder,
    pub decoder: CriticDecoder,
}

impl Critic {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
        Ok(Critic {
            encoder: CriticEncoder::new(config, &mut rng),
            decoder: CriticDecoder::new(config.embedding_dim, &mut rng),
        })
    }

    /// `h_wave`: `(batch, nodes, dim)` actor embeddings; one value per instance.
    pub fn forward(&self, h_wave: &Array3<f64>, best_cost: &[f64]) -> Result<Vec<f64>> {
        let h = self.encoder.forward(h_wave)?;
        self.decoder.forward(&h, best_cost)
    }
}
