//! Learned removal and reinsertion decoders.

pub mod reinsertion;
pub mod removal;

use crate::config::ModelConfig;
use crate::distribution::{apply_mask, bound_logit, MASKED_LOGIT};
use crate::error::{ensure_dim, Error, Result};
use crate::nn::{max_pool, Linear};
use crate::tour::Tour;
use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use self::reinsertion::ReinsertionDecoder;
use self::removal::RemovalDecoder;

/// Both decoders plus the shared input projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NnsDecoder {
    pub v_range: f64,
    pub project_node: Linear,
    pub project_graph: Linear,
    pub removal: RemovalDecoder,
    pub reinsertion: ReinsertionDecoder,
}

impl NnsDecoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let dim = config.embedding_dim;
        NnsDecoder {
            v_range: config.v_range,
            removal: RemovalDecoder::new(config.removal_variant, config.n_heads, dim, rng),
            reinsertion: ReinsertionDecoder::new(config.n_heads, dim, rng),
            project_graph: Linear::new(dim, dim, false, rng),
            project_node: Linear::new(dim, dim, false, rng),
        }
    }

    /// `h_hat = W_node h_wave + W_graph max(h_wave)`.
    pub fn project(&self, h_wave: &Array3<f64>) -> Array3<f64> {
        let mut h_hat = self.project_node.forward3(h_wave);
        let graph = self.project_graph.forward(&max_pool(h_wave).view());
        for (mut instance, g) in h_hat.axis_iter_mut(Axis(0)).zip(graph.rows()) {
            for mut row in instance.rows_mut() {
                row += &g;
            }
        }
        h_hat
    }

    /// Bounded removal logits `(batch, pairs)`; the previous step's pair is
    /// masked whenever another pair is available.
    pub fn removal_logits(
        &self,
        h_hat: &Array3<f64>,
        tours: &[Tour],
        history: &Array3<f64>,
        previous: &[Option<usize>],
    ) -> Result<Array2<f64>> {
        ensure_dim("previous-action batch", previous.len(), h_hat.dim().0)?;
        let mut logits = self.removal.forward(h_hat, tours, history)?;
        let v_range = self.v_range;
        logits.mapv_inplace(|x| bound_logit(x, v_range));

        let pairs = logits.ncols();
        for (mut row, prev) in logits.rows_mut().into_iter().zip(previous) {
            if let Some(prev) = *prev {
                if prev < pairs && pairs > 1 {
                    row[prev] = MASKED_LOGIT;
                }
            }
        }
        Ok(logits)
    }

    /// Bounded, feasibility-masked reinsertion logits `(batch, nodes, nodes)`.
    pub fn reinsertion_logits(
        &self,
        h_hat: &Array3<f64>,
        removed: &[usize],
        tours: &[Tour],
        masks: &[Array2<bool>],
    ) -> Result<Array3<f64>> {
        let (batch, nodes, _) = h_hat.dim();
        let pairs = nodes / 2;
        ensure_dim("mask batch", masks.len(), batch)?;
        let pickups = removed
            .iter()
            .map(|&r| {
                if r < pairs {
                    Ok(r + 1)
                } else {
                    Err(Error::shape_mismatch(format!(
                        "removal index {r} out of range for {pairs} pairs"
                    )))
                }
            })
            .collect::<Result<Vec<usize>>>()?;
        let deliveries: Vec<usize> = pickups.iter().map(|p| p + pairs).collect();

        let mut logits = self
            .reinsertion
            .forward(h_hat, &pickups, &deliveries, tours)?;
        let v_range = self.v_range;
        logits.mapv_inplace(|x| bound_logit(x, v_range));

        for (mut surface, mask) in logits.axis_iter_mut(Axis(0)).zip(masks) {
            if mask.dim() != (nodes, nodes) {
                return Err(Error::shape_mismatch(format!(
                    "mask is {:?}, expected ({nodes}, {nodes})",
                    mask.dim()
                )));
            }
            apply_mask(surface.iter_mut(), mask.iter().copied());
        }
        Ok(logits)
    }
}
