//! The action orchestrator: one destroy/repair decision per instance and step.
//!
//! A step walks `Idle -> Removing -> Reinserting -> Applied` and returns to
//! `Idle`. Positional state is derived from the tours first, the encoder runs
//! once if the policy needs embeddings, then the removal choice fixes the freed
//! pair whose feasibility mask conditions the reinsertion choice.

use crate::config::{ModelConfig, PolicyKind};
use crate::decoder::NnsDecoder;
use crate::encoder::{Encoder, NODE_DIM};
use crate::environment::Environment;
use crate::error::{ensure_dim, Error, Result};
use crate::history::HISTORY_DEPTH;
use crate::policy::{build_policy, ReinsertionRequest, SelectionPolicy, StepContext};
use crate::positional::{batch_embeddings, PositionalEncoder, PositionalState};
use crate::tour::{Action, Tour};
use crate::utils::{load_json, save_json};
use log::{debug, trace};
use ndarray::{Array2, Array3};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Phase of the step state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    Removing,
    Reinserting,
    Applied,
}

impl StepPhase {
    /// The phase that follows this one; `Applied` loops back to `Idle`.
    pub fn next(self) -> StepPhase {
        let next = match self {
            StepPhase::Idle => StepPhase::Removing,
            StepPhase::Removing => StepPhase::Reinserting,
            StepPhase::Reinserting => StepPhase::Applied,
            StepPhase::Applied => StepPhase::Idle,
        };
        trace!("step phase {:?} -> {:?}", self, next);
        next
    }
}

/// Inputs of one step for a batch of instances.
pub struct StepInput<'a> {
    /// `(batch, nodes, 2)` node coordinates
    pub features: &'a Array3<f64>,
    pub tours: &'a [Tour],
    /// `(batch, HISTORY_DEPTH, pairs)` one-hot removal history
    pub history: &'a Array3<f64>,
    /// Action applied by the previous step, if any
    pub previous: &'a [Option<Action>],
    /// Report the likelihood of these actions instead of choosing new ones
    pub fixed: Option<&'a [Action]>,
    pub need_entropy: bool,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub actions: Vec<Action>,
    /// Sum of both decoders' log-probabilities; zero for untrained policies
    /// and outside training.
    pub log_likelihood: Vec<f64>,
    /// Reinsertion entropy, only when training and requested
    pub entropy: Option<Vec<f64>>,
}

/// Learned parameters together with the settings needed to rebuild an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: ModelConfig,
    pub pairs: usize,
    pub encoder: Encoder,
    pub decoder: NnsDecoder,
}

#[derive(Debug)]
pub struct Actor {
    config: ModelConfig,
    pairs: usize,
    positional: PositionalEncoder,
    encoder: Encoder,
    decoder: NnsDecoder,
    policy: Box<dyn SelectionPolicy>,
    training: bool,
}

impl Actor {
    /// Build an actor for problems with `pairs` request pairs.
    pub fn new(config: ModelConfig, pairs: usize) -> Result<Self> {
        config.validate()?;
        if pairs == 0 {
            return Err(Error::configuration("a PDP needs at least one request pair"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let encoder = Encoder::new(&config, &mut rng);
        let decoder = NnsDecoder::new(&config, &mut rng);
        debug!(
            "actor: {} pairs, {} heads, dim {}, {} layers, removal {}, policy {}",
            pairs,
            config.n_heads,
            config.embedding_dim,
            config.n_encode_layers,
            config.removal_variant,
            config.policy
        );
        Ok(Self::assemble(config, pairs, encoder, decoder))
    }

    fn assemble(config: ModelConfig, pairs: usize, encoder: Encoder, decoder: NnsDecoder) -> Self {
        Actor {
            positional: PositionalEncoder::new(2 * pairs + 1, config.embedding_dim),
            policy: build_policy(&config),
            config,
            pairs,
            encoder,
            decoder,
            training: false,
        }
    }

    /// Replace the configured selection policy.
    pub fn with_policy(mut self, policy: Box<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn pairs(&self) -> usize {
        self.pairs
    }

    pub fn node_count(&self) -> usize {
        2 * self.pairs + 1
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn positional(&self) -> &PositionalEncoder {
        &self.positional
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &NnsDecoder {
        &self.decoder
    }

    /// Contextual node embeddings `h_wave` of the current tours.
    pub fn embed(&self, features: &Array3<f64>, tours: &[Tour]) -> Result<Array3<f64>> {
        let states = self.positional.encode_batch(tours, false)?;
        self.encoder.forward(features, &batch_embeddings(&states))
    }

    fn check_input(&self, input: &StepInput<'_>) -> Result<()> {
        let batch = input.tours.len();
        let nodes = self.node_count();
        let (f_batch, f_nodes, f_dim) = input.features.dim();
        ensure_dim("feature batch", f_batch, batch)?;
        ensure_dim("feature nodes", f_nodes, nodes)?;
        ensure_dim("feature width", f_dim, NODE_DIM)?;
        let (h_batch, h_depth, h_pairs) = input.history.dim();
        ensure_dim("history batch", h_batch, batch)?;
        ensure_dim("history depth", h_depth, HISTORY_DEPTH)?;
        ensure_dim("history pairs", h_pairs, self.pairs)?;
        ensure_dim("previous-action batch", input.previous.len(), batch)?;
        if let Some(fixed) = input.fixed {
            ensure_dim("fixed-action batch", fixed.len(), batch)?;
        }
        Ok(())
    }

    /// Choose one action per instance (or score the fixed ones).
    pub fn step<E: Environment>(
        &self,
        env: &E,
        input: &StepInput<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<StepOutput> {
        self.check_input(input)?;
        ensure_dim("environment pairs", env.pairs(), self.pairs)?;
        let nodes = self.node_count();
        let mut phase = StepPhase::Idle;

        let states = self.positional.encode_batch(input.tours, true)?;
        let h_hat = if self.policy.requires_embeddings() {
            let h_wave = self
                .encoder
                .forward(input.features, &batch_embeddings(&states))?;
            Some(self.decoder.project(&h_wave))
        } else {
            None
        };
        let previous: Vec<Option<usize>> =
            input.previous.iter().map(|a| a.as_ref().map(|a| a.removal)).collect();
        let ctx = StepContext {
            features: input.features,
            tours: input.tours,
            h_hat: h_hat.as_ref(),
            decoder: &self.decoder,
            history: input.history,
            previous: &previous,
            fixed: input.fixed,
            training: self.training,
        };

        phase = phase.next();
        let removals = self.policy.select_removal(&ctx, rng)?;
        let removed: Vec<usize> = removals.iter().map(|c| c.index).collect();
        if let Some(&bad) = removed.iter().find(|&&r| r >= self.pairs) {
            return Err(Error::shape_mismatch(format!(
                "removal index {bad} out of range for {} pairs",
                self.pairs
            )));
        }

        phase = phase.next();
        let masks = removed
            .iter()
            .zip(&states)
            .map(|(&r, state)| swap_mask(env, r, state))
            .collect::<Result<Vec<Array2<bool>>>>()?;
        let request = ReinsertionRequest {
            removed: &removed,
            masks: &masks,
            need_entropy: input.need_entropy,
        };
        let reinsertions = self.policy.select_reinsertion(&ctx, &request, rng)?;
        ensure_dim("reinsertion batch", reinsertions.len(), removed.len())?;

        let actions = removed
            .iter()
            .zip(&reinsertions)
            .map(|(&r, c)| Action::from_flat(r, c.index, nodes))
            .collect::<Vec<Action>>();
        if input.fixed.is_none() {
            for (action, mask) in actions.iter().zip(&masks) {
                if mask[[action.pickup_anchor, action.delivery_anchor]] {
                    return Err(Error::infeasible_step(format!(
                        "policy chose masked cell ({}, {})",
                        action.pickup_anchor, action.delivery_anchor
                    )));
                }
            }
        }

        let log_likelihood = removals
            .iter()
            .zip(&reinsertions)
            .map(|(a, b)| a.log_prob + b.log_prob)
            .collect();
        let entropy = if self.training && input.need_entropy {
            reinsertions.iter().map(|c| c.entropy).collect()
        } else {
            None
        };

        phase = phase.next();
        debug!("step over {} instances: {:?}", actions.len(), actions);
        phase.next();

        Ok(StepOutput {
            actions,
            log_likelihood,
            entropy,
        })
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            config: self.config.clone(),
            pairs: self.pairs,
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
        }
    }

    pub fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self> {
        checkpoint.config.validate()?;
        if checkpoint.pairs == 0 {
            return Err(Error::configuration("a PDP needs at least one request pair"));
        }
        ensure_dim(
            "checkpoint embedding width",
            checkpoint.encoder.embedding_dim,
            checkpoint.config.embedding_dim,
        )?;
        Ok(Self::assemble(
            checkpoint.config,
            checkpoint.pairs,
            checkpoint.encoder,
            checkpoint.decoder,
        ))
    }

    /// Save the learned parameters as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(&self.checkpoint(), path)
    }

    /// Load an actor saved with [`Actor::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_checkpoint(load_json(path)?)
    }
}

fn swap_mask<E: Environment>(env: &E, removed: usize, state: &PositionalState) -> Result<Array2<bool>> {
    let top2 = state
        .top2
        .as_deref()
        .ok_or_else(|| Error::shape_mismatch("stack state was not computed"))?;
    env.swap_mask(removed, &state.visit_index, top2)
}
