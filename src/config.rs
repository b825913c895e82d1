//! Configuration parameters for the neural local-search model and driver.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Normalisation applied after each residual connection of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationKind {
    Layer,
    Batch,
    Instance,
}

/// How raw node coordinates are turned into content embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingKind {
    /// One linear map shared by all nodes.
    Origin,
    /// Separate maps for depot, pickups and deliveries.
    Sep,
    /// Like `Sep`, pickups also see their delivery's coordinates.
    Pair,
}

/// Strategy used to score request pairs for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalVariant {
    Origin,
    Glitch,
    Update1,
    Update2,
}

/// Which selection policy drives each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    Trained,
    Random,
    Greedy,
}

/// How the trained policy turns a distribution into a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeStrategy {
    Sample,
    Greedy,
}

macro_rules! named_enum {
    ($ty:ident, $what:literal, { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(Error::configuration(format!(
                        concat!("unsupported ", $what, ": {}"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($ty::$variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

named_enum!(NormalizationKind, "normalization", {
    "layer" => Layer,
    "batch" => Batch,
    "instance" => Instance,
});

named_enum!(EmbeddingKind, "embedding type", {
    "origin" => Origin,
    "sep" => Sep,
    "pair" => Pair,
});

named_enum!(RemovalVariant, "removal decoder variant", {
    "origin" => Origin,
    "glitch" => Glitch,
    "update1" => Update1,
    "update2" => Update2,
});

named_enum!(PolicyKind, "selection policy", {
    "trained" => Trained,
    "random" => Random,
    "greedy" => Greedy,
});

named_enum!(DecodeStrategy, "decode strategy", {
    "sample" => Sample,
    "greedy" => Greedy,
});

/// Hyper-parameters of the actor network and its selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of attention heads
    pub n_heads: usize,
    /// Width of node embeddings
    pub embedding_dim: usize,
    /// Hidden width of the position-wise feed-forward blocks (0 = single linear)
    pub feed_forward_hidden: usize,
    /// Number of synthesized attention layers
    pub n_encode_layers: usize,
    pub normalization: NormalizationKind,
    pub embedding_kind: EmbeddingKind,
    pub removal_variant: RemovalVariant,
    pub policy: PolicyKind,
    pub decode: DecodeStrategy,
    /// Logits are squashed into `[-v_range, v_range]`
    pub v_range: f64,
    /// Probability that the greedy baseline takes a random action instead
    pub greedy_epsilon: f64,
    /// Seed for parameter initialisation
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            n_heads: 4,
            embedding_dim: 64,
            feed_forward_hidden: 64,
            n_encode_layers: 3,
            normalization: NormalizationKind::Layer,
            embedding_kind: EmbeddingKind::Origin,
            removal_variant: RemovalVariant::Origin,
            policy: PolicyKind::Trained,
            decode: DecodeStrategy::Sample,
            v_range: 6.0,
            greedy_epsilon: 0.1,
            seed: 1234,
        }
    }
}

impl ModelConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        ModelConfig::default()
    }

    pub fn with_n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_feed_forward_hidden(mut self, hidden: usize) -> Self {
        self.feed_forward_hidden = hidden;
        self
    }

    pub fn with_n_encode_layers(mut self, layers: usize) -> Self {
        self.n_encode_layers = layers;
        self
    }

    pub fn with_normalization(mut self, normalization: NormalizationKind) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_embedding_kind(mut self, kind: EmbeddingKind) -> Self {
        self.embedding_kind = kind;
        self
    }

    pub fn with_removal_variant(mut self, variant: RemovalVariant) -> Self {
        self.removal_variant = variant;
        self
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_decode(mut self, decode: DecodeStrategy) -> Self {
        self.decode = decode;
        self
    }

    pub fn with_v_range(mut self, v_range: f64) -> Self {
        self.v_range = v_range;
        self
    }

    pub fn with_greedy_epsilon(mut self, epsilon: f64) -> Self {
        self.greedy_epsilon = epsilon;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject combinations the network cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.n_heads == 0 {
            return Err(Error::configuration("n_heads must be positive"));
        }
        if self.embedding_dim < 2 || self.embedding_dim % self.n_heads != 0 {
            return Err(Error::configuration(format!(
                "embedding_dim {} must be at least 2 and divisible by n_heads {}",
                self.embedding_dim, self.n_heads
            )));
        }
        if !(self.v_range.is_finite() && self.v_range > 0.0) {
            return Err(Error::configuration(format!(
                "v_range must be positive, got {}",
                self.v_range
            )));
        }
        if !(0.0..=1.0).contains(&self.greedy_epsilon) {
            return Err(Error::configuration(format!(
                "greedy_epsilon must lie in [0, 1], got {}",
                self.greedy_epsilon
            )));
        }
        Ok(())
    }
}

/// Settings of the inference driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of destroy/repair steps per run
    pub max_steps: usize,
    /// Optional time limit for a run
    pub time_limit: Option<Duration>,
    /// Seed for action sampling
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_steps: 1000,
            time_limit: None,
            seed: 42,
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        SearchConfig::default()
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_time_limit(mut self, duration: Duration) -> Self {
        self.time_limit = Some(duration);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
