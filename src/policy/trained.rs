//! Policy sampling from the learned decoders.

use super::{Choice, ReinsertionRequest, SelectionPolicy, StepContext};
use crate::config::{DecodeStrategy, PolicyKind};
use crate::distribution::Categorical;
use crate::error::Result;
use ndarray::Axis;
use rand::RngCore;

#[derive(Debug, Clone, Copy)]
pub struct TrainedPolicy {
    decode: DecodeStrategy,
}

impl TrainedPolicy {
    pub fn new(decode: DecodeStrategy) -> Self {
        TrainedPolicy { decode }
    }

    fn pick(&self, dist: &Categorical, rng: &mut dyn RngCore) -> usize {
        match self.decode {
            DecodeStrategy::Sample => dist.sample(rng),
            DecodeStrategy::Greedy => dist.argmax(),
        }
    }
}

impl SelectionPolicy for TrainedPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Trained
    }

    fn requires_embeddings(&self) -> bool {
        true
    }

    fn select_removal(&self, ctx: &StepContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Choice>> {
        let h_hat = ctx.require_h_hat()?;
        let logits = ctx
            .decoder
            .removal_logits(h_hat, ctx.tours, ctx.history, ctx.previous)?;

        logits
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(b, row)| {
                let dist = Categorical::from_logits(&row.to_vec())?;
                let index = match ctx.fixed_action(b) {
                    Some(action) => action.removal,
                    None => self.pick(&dist, &mut *rng),
                };
                Ok(Choice {
                    index,
                    log_prob: if ctx.training { dist.log_prob(index) } else { 0.0 },
                    entropy: None,
                })
            })
            .collect()
    }

    fn select_reinsertion(
        &self,
        ctx: &StepContext<'_>,
        request: &ReinsertionRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Choice>> {
        let h_hat = ctx.require_h_hat()?;
        let logits =
            ctx.decoder
                .reinsertion_logits(h_hat, request.removed, ctx.tours, request.masks)?;
        let nodes = logits.dim().1;

        logits
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(b, surface)| {
                let flat: Vec<f64> = surface.iter().copied().collect();
                let dist = Categorical::from_logits(&flat)?;
                let index = match ctx.fixed_action(b) {
                    Some(action) => action.flat_reinsertion(nodes),
                    None => self.pick(&dist, &mut *rng),
                };
                let entropy = (ctx.training && request.need_entropy).then(|| dist.entropy());
                Ok(Choice {
                    index,
                    log_prob: if ctx.training { dist.log_prob(index) } else { 0.0 },
                    entropy,
                })
            })
            .collect()
    }
}
