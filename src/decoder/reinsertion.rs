//! Reinsertion decoder: a logit for every (pickup anchor, delivery anchor) cell.

use crate::error::{ensure_dim, Result};
use crate::nn::attention::MultiHeadAttention;
use crate::nn::Mlp;
use crate::tour::Tour;
use ndarray::{s, Array2, Array3, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinsertionDecoder {
    pub n_heads: usize,
    /// Freed node against each anchor's own embedding
    pub insert_before: MultiHeadAttention,
    /// Freed node against each anchor's successor embedding
    pub insert_after: MultiHeadAttention,
    pub agg: Mlp,
}

impl ReinsertionDecoder {
    pub fn new<R: Rng + ?Sized>(n_heads: usize, dim: usize, rng: &mut R) -> Self {
        ReinsertionDecoder {
            n_heads,
            insert_before: MultiHeadAttention::new(n_heads, dim, dim, None, dim * n_heads, rng),
            insert_after: MultiHeadAttention::new(n_heads, dim, dim, None, dim * n_heads, rng),
            agg: Mlp::new(4 * n_heads, 32, 32, rng),
        }
    }

    /// Raw surface `(batch, nodes, nodes)`; rows index the pickup anchor,
    /// columns the delivery anchor.
    pub fn forward(
        &self,
        h_hat: &Array3<f64>,
        pickups: &[usize],
        deliveries: &[usize],
        tours: &[Tour],
    ) -> Result<Array3<f64>> {
        let (batch, nodes, dim) = h_hat.dim();
        ensure_dim("pickup batch", pickups.len(), batch)?;
        ensure_dim("delivery batch", deliveries.len(), batch)?;
        ensure_dim("tour batch", tours.len(), batch)?;

        let heads = self.n_heads;
        let mut out = Array3::zeros((batch, nodes, nodes));
        for (b, tour) in tours.iter().enumerate() {
            ensure_dim("tour length", tour.len(), nodes)?;
            let h_b = h_hat.index_axis(Axis(0), b);
            let anchors = h_b.to_owned().insert_axis(Axis(0));
            let mut successors = Array3::<f64>::zeros((1, nodes, dim));
            for (node, &next) in tour.successors().iter().enumerate() {
                successors.slice_mut(s![0, node, ..]).assign(&h_b.row(next));
            }

            let freed = |node: usize| h_b.slice(s![node..node + 1, ..]).to_owned().insert_axis(Axis(0));
            let (h_pickup, h_delivery) = (freed(pickups[b]), freed(deliveries[b]));

            // each (heads, 1, 1, nodes)
            let channels: [Array4<f64>; 4] = [
                self.insert_before.scores(&h_pickup, &anchors, false),
                self.insert_after.scores(&h_pickup, &successors, false),
                self.insert_before.scores(&h_delivery, &anchors, false),
                self.insert_after.scores(&h_delivery, &successors, false),
            ];

            let mut features = Array2::<f64>::zeros((nodes * nodes, 4 * heads));
            for i in 0..nodes {
                for j in 0..nodes {
                    let mut row = features.row_mut(i * nodes + j);
                    for h in 0..heads {
                        row[h] = channels[0][[h, 0, 0, i]];
                        row[heads + h] = channels[1][[h, 0, 0, i]];
                        row[2 * heads + h] = channels[2][[h, 0, 0, j]];
                        row[3 * heads + h] = channels[3][[h, 0, 0, j]];
                    }
                }
            }
            let cells = self.agg.forward(&features.view());
            out.index_axis_mut(Axis(0), b)
                .assign(&cells.into_shape((nodes, nodes))?);
        }
        Ok(out)
    }
}
