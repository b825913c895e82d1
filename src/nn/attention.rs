//! Multi-head attention with a score-only mode.

use super::{init_uniform, softmax_lanes};
use ndarray::{s, Array2, Array3, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Project `(batch, n, in)` with per-head weights `(heads, in, hidden)`
/// into `(heads, batch, n, hidden)`.
pub fn project_heads(x: &Array3<f64>, weights: &Array3<f64>) -> Array4<f64> {
    let (batch, n, _) = x.dim();
    let (heads, _, hidden) = weights.dim();
    let mut out = Array4::zeros((heads, batch, n, hidden));
    for h in 0..heads {
        let w = weights.index_axis(Axis(0), h);
        for b in 0..batch {
            out.slice_mut(s![h, b, .., ..])
                .assign(&x.index_axis(Axis(0), b).dot(&w));
        }
    }
    out
}

/// Per-head inner products `(heads, batch, nq, hidden) x (heads, batch, nk, hidden)
/// -> (heads, batch, nq, nk)`.
pub fn head_scores(q: &Array4<f64>, k: &Array4<f64>) -> Array4<f64> {
    let (heads, batch, nq, _) = q.dim();
    let nk = k.dim().2;
    let mut out = Array4::zeros((heads, batch, nq, nk));
    for h in 0..heads {
        for b in 0..batch {
            let qb = q.slice(s![h, b, .., ..]);
            let kb = k.slice(s![h, b, .., ..]);
            out.slice_mut(s![h, b, .., ..]).assign(&qb.dot(&kb.t()));
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    pub n_heads: usize,
    pub hidden_dim: usize,
    pub out_dim: usize,
    pub w_query: Array3<f64>,
    pub w_key: Array3<f64>,
    /// Present only when the layer produces values, not just scores
    pub w_val: Option<Array3<f64>>,
    pub w_out: Option<Array3<f64>>,
}

impl MultiHeadAttention {
    /// `in_val_dim = None` builds a score-only layer.
    pub fn new<R: Rng + ?Sized>(
        n_heads: usize,
        in_query_dim: usize,
        in_key_dim: usize,
        in_val_dim: Option<usize>,
        out_dim: usize,
        rng: &mut R,
    ) -> Self {
        let hidden_dim = out_dim / n_heads;
        let w_query = init_uniform((n_heads, in_query_dim, hidden_dim), rng);
        let w_key = init_uniform((n_heads, in_key_dim, hidden_dim), rng);
        let (w_val, w_out) = match in_val_dim {
            Some(in_val_dim) => (
                Some(init_uniform((n_heads, in_val_dim, hidden_dim), rng)),
                Some(init_uniform((n_heads, hidden_dim, out_dim), rng)),
            ),
            None => (None, None),
        };
        MultiHeadAttention {
            n_heads,
            hidden_dim,
            out_dim,
            w_query,
            w_key,
            w_val,
            w_out,
        }
    }

    pub fn norm_factor(&self) -> f64 {
        1.0 / (self.hidden_dim as f64).sqrt()
    }

    /// Compatibility `(heads, batch, nq, nk)`, optionally scaled by `1/sqrt(hidden)`.
    pub fn scores(&self, q: &Array3<f64>, k: &Array3<f64>, scaled: bool) -> Array4<f64> {
        let queries = project_heads(q, &self.w_query);
        let keys = project_heads(k, &self.w_key);
        let mut compatibility = head_scores(&queries, &keys);
        if scaled {
            compatibility *= self.norm_factor();
        }
        compatibility
    }

    /// Full attention: `(batch, nq, out)`. A score-only layer returns `None`.
    pub fn forward(&self, q: &Array3<f64>, k: &Array3<f64>, v: &Array3<f64>) -> Option<Array3<f64>> {
        let (w_val, w_out) = (self.w_val.as_ref()?, self.w_out.as_ref()?);
        let mut attn = self.scores(q, k, true);
        softmax_lanes(&mut attn, Axis(3));
        let values = project_heads(v, w_val);
        Some(combine_heads(&attn, &values, w_out))
    }
}

/// `sum_h softmax_h . V_h . W_out_h` for every batch entry.
pub fn combine_heads(attn: &Array4<f64>, values: &Array4<f64>, w_out: &Array3<f64>) -> Array3<f64> {
    let (heads, batch, nq, _) = attn.dim();
    let out_dim = w_out.dim().2;
    let mut out = Array3::zeros((batch, nq, out_dim));
    for b in 0..batch {
        let mut acc = Array2::<f64>::zeros((nq, out_dim));
        for h in 0..heads {
            let heads_hb = attn.slice(s![h, b, .., ..]).dot(&values.slice(s![h, b, .., ..]));
            acc += &heads_hb.dot(&w_out.index_axis(Axis(0), h));
        }
        out.index_axis_mut(Axis(0), b).assign(&acc);
    }
    out
}
