//! Dense building blocks shared by the encoder, decoders and critic.

pub mod attention;
pub mod norm;

use ndarray::{Array, Array1, Array2, Array3, ArrayView2, Axis, Dimension, ShapeBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Parameters drawn from `U(-1/sqrt(fan), 1/sqrt(fan))`, `fan` being the last axis length.
pub fn init_uniform<R, D, Sh>(shape: Sh, rng: &mut R) -> Array<f64, D>
where
    R: Rng + ?Sized,
    D: Dimension,
    Sh: ShapeBuilder<Dim = D>,
{
    let mut param = Array::zeros(shape);
    let fan = param.shape().last().copied().unwrap_or(1).max(1);
    let stdv = 1.0 / (fan as f64).sqrt();
    param.mapv_inplace(|_| rng.gen_range(-stdv..=stdv));
    param
}

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Affine map `x W + b` over the last axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    /// `(in, out)`
    pub weight: Array2<f64>,
    pub bias: Option<Array1<f64>>,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(input: usize, output: usize, bias: bool, rng: &mut R) -> Self {
        let stdv = 1.0 / (input.max(1) as f64).sqrt();
        let weight = Array2::from_shape_simple_fn((input, output), || rng.gen_range(-stdv..=stdv));
        let bias = bias.then(|| Array1::from_shape_simple_fn(output, || rng.gen_range(-stdv..=stdv)));
        Linear { weight, bias }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// `(rows, in) -> (rows, out)`
    pub fn forward(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.dot(&self.weight);
        if let Some(bias) = &self.bias {
            out += bias;
        }
        out
    }

    /// `(batch, rows, in) -> (batch, rows, out)`
    pub fn forward3(&self, x: &Array3<f64>) -> Array3<f64> {
        let (batch, rows, _) = x.dim();
        let mut out = Array3::zeros((batch, rows, self.output_dim()));
        for (b, xb) in x.axis_iter(Axis(0)).enumerate() {
            out.index_axis_mut(Axis(0), b).assign(&self.forward(&xb));
        }
        out
    }
}

/// Three-layer ReLU network ending in a single output per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    pub fc1: Linear,
    pub fc2: Linear,
    pub fc3: Linear,
}

impl Mlp {
    pub fn new<R: Rng + ?Sized>(
        input: usize,
        feed_forward: usize,
        embedding: usize,
        rng: &mut R,
    ) -> Self {
        Mlp {
            fc1: Linear::new(input, feed_forward, true, rng),
            fc2: Linear::new(feed_forward, embedding, true, rng),
            fc3: Linear::new(embedding, 1, true, rng),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.fc1.input_dim()
    }

    /// `(rows, in) -> (rows,)`
    pub fn forward(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        let hidden = self.fc1.forward(x).mapv(relu);
        let hidden = self.fc2.forward(&hidden.view()).mapv(relu);
        self.fc3.forward(&hidden.view()).column(0).to_owned()
    }
}

/// Position-wise feed-forward block; a single linear map when `hidden == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedForward {
    pub layers: Vec<Linear>,
}

impl FeedForward {
    pub fn new<R: Rng + ?Sized>(dim: usize, hidden: usize, bias: bool, rng: &mut R) -> Self {
        let layers = if hidden > 0 {
            vec![
                Linear::new(dim, hidden, bias, rng),
                Linear::new(hidden, dim, bias, rng),
            ]
        } else {
            vec![Linear::new(dim, dim, bias, rng)]
        };
        FeedForward { layers }
    }

    pub fn forward(&self, x: &Array3<f64>) -> Array3<f64> {
        let last = self.layers.len().saturating_sub(1);
        let mut out = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward3(&out);
            if i < last {
                out.mapv_inplace(relu);
            }
        }
        out
    }
}

/// Max over the node axis: `(batch, nodes, dim) -> (batch, dim)`.
pub fn max_pool(x: &Array3<f64>) -> Array2<f64> {
    x.fold_axis(Axis(1), f64::NEG_INFINITY, |&acc, &v| acc.max(v))
}

/// In-place softmax along every lane of `axis`.
pub fn softmax_lanes<D: Dimension>(x: &mut Array<f64, D>, axis: Axis) {
    for mut lane in x.lanes_mut(axis) {
        let max = lane.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
}

