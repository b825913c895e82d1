//! Uniform-random baseline.

use super::{removal_mask, uniform_choice, Choice, ReinsertionRequest, SelectionPolicy, StepContext};
use crate::config::PolicyKind;
use crate::error::Result;
use rand::RngCore;

/// Ignores learned logits; every unmasked option is equally likely.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformRandomPolicy;

impl SelectionPolicy for UniformRandomPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Random
    }

    fn select_removal(&self, ctx: &StepContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Choice>> {
        let pairs = ctx.pairs();
        (0..ctx.batch_size())
            .map(|b| {
                let index = match ctx.fixed_action(b) {
                    Some(action) => action.removal,
                    None => uniform_choice(&removal_mask(pairs, ctx.previous[b]), &mut *rng)?,
                };
                Ok(Choice::untracked(index))
            })
            .collect()
    }

    fn select_reinsertion(
        &self,
        ctx: &StepContext<'_>,
        request: &ReinsertionRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Choice>> {
        let nodes = ctx.features.dim().1;
        request
            .masks
            .iter()
            .enumerate()
            .map(|(b, mask)| {
                let cells: Vec<bool> = mask.iter().copied().collect();
                let index = match ctx.fixed_action(b) {
                    Some(action) => action.flat_reinsertion(nodes),
                    None => uniform_choice(&cells, &mut *rng)?,
                };
                Ok(Choice::untracked(index))
            })
            .collect()
    }
}
