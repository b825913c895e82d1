//! Selection policies: interchangeable strategies producing the removal and
//! reinsertion halves of an action.

pub mod greedy;
pub mod random;
pub mod trained;

use crate::config::{ModelConfig, PolicyKind};
use crate::decoder::NnsDecoder;
use crate::error::{Error, Result};
use crate::tour::{Action, Tour};
use ndarray::{Array2, Array3};
use rand::seq::SliceRandom;
use rand::RngCore;
use std::fmt;

pub use self::greedy::EpsilonGreedyPolicy;
pub use self::random::UniformRandomPolicy;
pub use self::trained::TrainedPolicy;

/// Everything a policy may look at during one step.
pub struct StepContext<'a> {
    /// `(batch, nodes, 2)` coordinates
    pub features: &'a Array3<f64>,
    pub tours: &'a [Tour],
    /// Projected embeddings, present when the policy asked for them
    pub h_hat: Option<&'a Array3<f64>>,
    pub decoder: &'a NnsDecoder,
    /// `(batch, HISTORY_DEPTH, pairs)`
    pub history: &'a Array3<f64>,
    /// Pair removed by the previous step of each instance
    pub previous: &'a [Option<usize>],
    /// Externally chosen actions whose likelihood is requested
    pub fixed: Option<&'a [Action]>,
    pub training: bool,
}

impl StepContext<'_> {
    pub fn batch_size(&self) -> usize {
        self.tours.len()
    }

    pub fn pairs(&self) -> usize {
        self.features.dim().1 / 2
    }

    fn fixed_action(&self, b: usize) -> Option<Action> {
        self.fixed.and_then(|f| f.get(b).copied())
    }

    fn require_h_hat(&self) -> Result<&Array3<f64>> {
        self.h_hat
            .ok_or_else(|| Error::shape_mismatch("trained policy requires node embeddings"))
    }
}

/// Reinsertion-specific inputs.
pub struct ReinsertionRequest<'a> {
    /// Removed pair per instance
    pub removed: &'a [usize],
    /// Environment masks, `true` = infeasible
    pub masks: &'a [Array2<bool>],
    pub need_entropy: bool,
}

/// One categorical decision for one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Choice {
    pub index: usize,
    /// Zero when the choice is not trainable or log-probabilities are off
    pub log_prob: f64,
    pub entropy: Option<f64>,
}

impl Choice {
    pub fn untracked(index: usize) -> Self {
        Choice {
            index,
            log_prob: 0.0,
            entropy: None,
        }
    }
}

pub trait SelectionPolicy: fmt::Debug {
    fn kind(&self) -> PolicyKind;

    /// Whether the orchestrator must run the encoder for this policy.
    fn requires_embeddings(&self) -> bool {
        false
    }

    /// Pick the pair to remove for every instance.
    fn select_removal(&self, ctx: &StepContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Choice>>;

    /// Pick a flattened `(pickup anchor, delivery anchor)` cell for every instance.
    fn select_reinsertion(
        &self,
        ctx: &StepContext<'_>,
        request: &ReinsertionRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Choice>>;
}

/// Build the configured policy.
pub fn build_policy(config: &ModelConfig) -> Box<dyn SelectionPolicy> {
    match config.policy {
        PolicyKind::Trained => Box::new(TrainedPolicy::new(config.decode)),
        PolicyKind::Random => Box::new(UniformRandomPolicy),
        PolicyKind::Greedy => Box::new(EpsilonGreedyPolicy::new(config.greedy_epsilon)),
    }
}

/// Removal candidates of one instance: every pair except the previous one,
/// unless it is the only pair.
pub(crate) fn removal_mask(pairs: usize, previous: Option<usize>) -> Vec<bool> {
    (0..pairs)
        .map(|k| pairs > 1 && previous == Some(k))
        .collect()
}

/// Uniform choice among the unmasked options.
pub(crate) fn uniform_choice(mask: &[bool], rng: &mut dyn RngCore) -> Result<usize> {
    let open: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, &masked)| !masked)
        .map(|(i, _)| i)
        .collect();
    open.choose(rng)
        .copied()
        .ok_or_else(|| Error::infeasible_step(format!("all {} options are masked", mask.len())))
}
