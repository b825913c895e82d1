//! Categorical distributions over masked logits.

use crate::error::{Error, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;

/// Logit written into infeasible cells; its probability underflows to exactly 0.
pub const MASKED_LOGIT: f64 = -1e20;

fn is_masked(logit: f64) -> bool {
    logit <= MASKED_LOGIT * 0.5
}

/// Overwrite every cell whose mask entry is `true` with [`MASKED_LOGIT`].
pub fn apply_mask<'a>(logits: impl Iterator<Item = &'a mut f64>, mask: impl Iterator<Item = bool>) {
    for (logit, masked) in logits.zip(mask) {
        if masked {
            *logit = MASKED_LOGIT;
        }
    }
}

/// `v_range * tanh(x)`
pub fn bound_logit(x: f64, v_range: f64) -> f64 {
    x.tanh() * v_range
}

#[derive(Debug, Clone)]
pub struct Categorical {
    probs: Vec<f64>,
    log_probs: Vec<f64>,
    index: WeightedIndex<f64>,
}

impl Categorical {
    /// Softmax over `logits`; fails when every option is masked.
    pub fn from_logits(logits: &[f64]) -> Result<Self> {
        if logits.is_empty() {
            return Err(Error::infeasible_step("no options to choose from"));
        }
        if logits.iter().all(|&l| is_masked(l)) {
            return Err(Error::infeasible_step(format!(
                "all {} options are masked",
                logits.len()
            )));
        }

        let max = logits
            .iter()
            .copied()
            .filter(|&l| !is_masked(l))
            .fold(f64::NEG_INFINITY, f64::max);
        let shifted: Vec<f64> = logits.iter().map(|&l| l - max).collect();
        let log_sum = shifted.iter().map(|&l| l.exp()).sum::<f64>().ln();
        let log_probs: Vec<f64> = shifted.iter().map(|&l| l - log_sum).collect();
        let probs: Vec<f64> = log_probs.iter().map(|&l| l.exp()).collect();
        let index = WeightedIndex::new(probs.iter().copied())
            .map_err(|err| Error::infeasible_step(format!("cannot sample: {err}")))?;

        Ok(Categorical {
            probs,
            log_probs,
            index,
        })
    }

    /// Uniform over the options whose mask entry is `false`.
    pub fn uniform(mask: impl Iterator<Item = bool>) -> Result<Self> {
        let logits: Vec<f64> = mask
            .map(|masked| if masked { MASKED_LOGIT } else { 0.0 })
            .collect();
        Categorical::from_logits(&logits)
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn log_prob(&self, index: usize) -> f64 {
        self.log_probs
            .get(index)
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Shannon entropy in nats; zero-probability options contribute nothing.
    pub fn entropy(&self) -> f64 {
        self.probs
            .iter()
            .zip(&self.log_probs)
            .filter(|(&p, _)| p > 0.0)
            .map(|(&p, &lp)| -p * lp)
            .sum()
    }

    /// Index of the most probable option (lowest index on ties).
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &p) in self.probs.iter().enumerate() {
            if p > self.probs[best] {
                best = i;
            }
        }
        best
    }

    /// Draw an option; zero-probability options are never returned.
    pub fn sample(&self, rng: &mut dyn RngCore) -> usize {
        self.index.sample(rng)
    }
}
