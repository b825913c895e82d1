//! Normalisation layers applied after residual connections.

use crate::config::NormalizationKind;
use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalization {
    pub kind: NormalizationKind,
    /// Affine scale, absent for `Layer`
    pub weight: Option<Array1<f64>>,
    pub bias: Option<Array1<f64>>,
}

impl Normalization {
    pub fn new(dim: usize, kind: NormalizationKind) -> Self {
        let affine = kind != NormalizationKind::Layer;
        Normalization {
            kind,
            weight: affine.then(|| Array1::ones(dim)),
            bias: affine.then(|| Array1::zeros(dim)),
        }
    }

    /// `(batch, nodes, dim) -> (batch, nodes, dim)`
    pub fn forward(&self, x: &Array3<f64>) -> Array3<f64> {
        let mut out = x.clone();
        match self.kind {
            NormalizationKind::Layer => {
                // unbiased variance over (nodes, dim) of each instance
                for mut instance in out.axis_iter_mut(Axis(0)) {
                    let count = instance.len() as f64;
                    let mean = instance.sum() / count;
                    let ss = instance.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean));
                    let var = if count > 1.0 { ss / (count - 1.0) } else { 0.0 };
                    let denom = (var + EPS).sqrt();
                    instance.mapv_inplace(|v| (v - mean) / denom);
                }
            }
            NormalizationKind::Batch => {
                for mut feature in out.axis_iter_mut(Axis(2)) {
                    standardize(feature.iter_mut());
                }
            }
            NormalizationKind::Instance => {
                for mut instance in out.axis_iter_mut(Axis(0)) {
                    for mut feature in instance.axis_iter_mut(Axis(1)) {
                        standardize(feature.iter_mut());
                    }
                }
            }
        }

        if let (Some(weight), Some(bias)) = (&self.weight, &self.bias) {
            for mut row in out.lanes_mut(Axis(2)) {
                row.zip_mut_with(weight, |v, &w| *v *= w);
                row += bias;
            }
        }
        out
    }
}

/// Biased standardisation of the yielded values.
fn standardize<'a>(values: impl Iterator<Item = &'a mut f64>) {
    let mut values: Vec<&mut f64> = values.collect();
    let count = values.len().max(1) as f64;
    let mean = values.iter().map(|v| **v).sum::<f64>() / count;
    let var = values.iter().map(|v| (**v - mean) * (**v - mean)).sum::<f64>() / count;
    let denom = (var + EPS).sqrt();
    for v in values.iter_mut() {
        **v = (**v - mean) / denom;
    }
}
