//! # NLS-PDP
//!
//! Neural destroy-and-repair local search for single-vehicle pickup-and-delivery
//! routing with last-in-first-out loading.
//!
//! Every step removes one request pair from the current tour and reinserts its
//! pickup and delivery elsewhere. A synthesized-attention encoder fuses node
//! content with the tour's cyclic positional state, and two attention decoders
//! score the removal and the reinsertion. The reinsertion is restricted by a
//! feasibility mask derived from the tour's loading stack.

pub mod actor;
pub mod config;
pub mod critic;
pub mod decoder;
pub mod distribution;
pub mod encoder;
pub mod environment;
pub mod error;
pub mod history;
pub mod nn;
pub mod policy;
pub mod positional;
pub mod problem;
pub mod tour;
pub mod utils;

pub use crate::actor::Actor;
pub use crate::error::{Error, Result};

use crate::actor::StepInput;
use crate::config::SearchConfig;
use crate::environment::{Environment, PdtspLifo};
use crate::history::SelectionHistory;
use crate::problem::{batch_features, Problem};
use crate::tour::{Action, Tour};
use crate::utils::SearchStatistics;

use log::{debug, info, warn};
use ndarray::Array3;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};

/// Improvements smaller than this are treated as ties.
const IMPROVEMENT_TOLERANCE: f64 = 1e-9;

/// Inference driver running the actor over a batch of instances.
pub struct NeuralSearch {
    pub problems: Vec<Problem>,
    pub environment: PdtspLifo,
    pub actor: Actor,
    pub config: SearchConfig,
    pub features: Array3<f64>,
    pub tours: Vec<Tour>,
    pub best_tours: Vec<Tour>,
    pub best_costs: Vec<f64>,
    pub initial_costs: Vec<f64>,
    pub history: SelectionHistory,
    pub previous: Vec<Option<Action>>,
    pub steps: usize,
    pub improving_steps: usize,
    pub run_time: Duration,
    pub start_time: Instant,
}

impl NeuralSearch {
    /// Create a search over `problems`, starting from the given feasible tours.
    pub fn new(
        problems: Vec<Problem>,
        tours: Vec<Tour>,
        actor: Actor,
        config: SearchConfig,
    ) -> Result<Self> {
        if problems.is_empty() {
            return Err(Error::configuration("the search needs at least one instance"));
        }
        if tours.len() != problems.len() {
            return Err(Error::shape_mismatch(format!(
                "{} tours for {} instances",
                tours.len(),
                problems.len()
            )));
        }
        let environment = PdtspLifo::new(actor.pairs())?;
        for (problem, tour) in problems.iter().zip(&tours) {
            if problem.pairs != actor.pairs() {
                return Err(Error::shape_mismatch(format!(
                    "instance {} has {} pairs, the actor expects {}",
                    problem.name,
                    problem.pairs,
                    actor.pairs()
                )));
            }
            environment.validate(tour)?;
        }

        let features = batch_features(&problems)?;
        let costs: Vec<f64> = problems
            .iter()
            .zip(&tours)
            .map(|(problem, tour)| tour.cost(problem))
            .collect();
        let batch = problems.len();
        Ok(NeuralSearch {
            history: SelectionHistory::new(batch, actor.pairs()),
            previous: vec![None; batch],
            best_tours: tours.clone(),
            best_costs: costs.clone(),
            initial_costs: costs,
            problems,
            environment,
            actor,
            config,
            features,
            tours,
            steps: 0,
            improving_steps: 0,
            run_time: Duration::from_secs(0),
            start_time: Instant::now(),
        })
    }

    /// Run local search until the termination criteria are met.
    pub fn run(&mut self) -> Result<&[Tour]> {
        self.start_time = Instant::now();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        info!(
            "starting {} search over {} instances (max {} steps)",
            self.actor.policy_kind(),
            self.problems.len(),
            self.config.max_steps
        );

        while !self.should_terminate() {
            self.step(&mut rng)?;
        }

        self.run_time = self.start_time.elapsed();
        info!(
            "search finished after {} steps, mean best cost {:.2}",
            self.steps,
            mean(&self.best_costs)
        );
        Ok(&self.best_tours)
    }

    /// One destroy/repair step over the whole batch.
    pub fn step(&mut self, rng: &mut dyn RngCore) -> Result<()> {
        let output = {
            let input = StepInput {
                features: &self.features,
                tours: &self.tours,
                history: self.history.table(),
                previous: &self.previous,
                fixed: None,
                need_entropy: false,
            };
            self.actor.step(&self.environment, &input, rng)?
        };

        let mut improved = false;
        let mut applied = vec![None; output.actions.len()];
        for (b, action) in output.actions.iter().enumerate() {
            let next = self.environment.apply(&self.tours[b], action)?;
            if let Err(err) = self.environment.validate(&next) {
                warn!("instance {b}: discarding {:?}: {err}", action);
                continue;
            }
            let cost = next.cost(&self.problems[b]);
            if cost < self.best_costs[b] - IMPROVEMENT_TOLERANCE {
                debug!(
                    "instance {b}: improved {:.4} -> {:.4}",
                    self.best_costs[b], cost
                );
                self.best_costs[b] = cost;
                self.best_tours[b] = next.clone();
                improved = true;
            }
            self.tours[b] = next;
            applied[b] = Some(*action);
        }

        self.record_applied(&applied)?;
        self.steps += 1;
        if improved {
            self.improving_steps += 1;
        }
        Ok(())
    }

    /// Update history and tabu state with the actions that were applied;
    /// `None` leaves an instance's entries untouched.
    pub fn record_applied(&mut self, applied: &[Option<Action>]) -> Result<()> {
        let removed: Vec<Option<usize>> = applied
            .iter()
            .map(|a| a.as_ref().map(|a| a.removal))
            .collect();
        self.history.record(&removed)?;
        for (previous, action) in self.previous.iter_mut().zip(applied) {
            if action.is_some() {
                *previous = *action;
            }
        }
        Ok(())
    }

    /// Check if the termination criteria are met.
    fn should_terminate(&self) -> bool {
        if self.steps >= self.config.max_steps {
            return true;
        }

        if let Some(time_limit) = self.config.time_limit {
            if Instant::now().duration_since(self.start_time) >= time_limit {
                return true;
            }
        }

        false
    }

    /// Batch-averaged statistics of the search so far.
    pub fn statistics(&self) -> SearchStatistics {
        SearchStatistics {
            steps: self.steps,
            runtime: self.run_time,
            initial_cost: mean(&self.initial_costs),
            best_cost: mean(&self.best_costs),
            improving_steps: self.improving_steps,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
