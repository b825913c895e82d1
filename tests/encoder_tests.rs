//! Tests for the feature embedding, normalisation and synthesized attention encoder.

use nls_pdp::config::{EmbeddingKind, ModelConfig, NormalizationKind};
use nls_pdp::encoder::{Encoder, FeatureEmbedding};
use nls_pdp::environment::PdtspLifo;
use nls_pdp::error::Error;
use nls_pdp::nn::norm::Normalization;
use nls_pdp::positional::{batch_embeddings, PositionalEncoder};
use nls_pdp::problem::{batch_features, Problem};
use nls_pdp::tour::Tour;
use ndarray::{Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A small model configuration that keeps tests fast.
fn create_small_config() -> ModelConfig {
    ModelConfig::new()
        .with_n_heads(2)
        .with_embedding_dim(8)
        .with_feed_forward_hidden(16)
        .with_n_encode_layers(2)
}

/// Random instances with random feasible tours and their positional embeddings.
fn create_batch(pairs: usize, batch: usize, dim: usize) -> (Array3<f64>, Vec<Tour>, Array3<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let env = PdtspLifo::new(pairs).unwrap();
    let problems: Vec<Problem> = (0..batch)
        .map(|i| Problem::random(format!("p{i}"), pairs, &mut rng).unwrap())
        .collect();
    let tours: Vec<Tour> = (0..batch).map(|_| env.random_tour(&mut rng).unwrap()).collect();
    let positional = PositionalEncoder::new(2 * pairs + 1, dim);
    let states = positional.encode_batch(&tours, false).unwrap();
    (batch_features(&problems).unwrap(), tours, batch_embeddings(&states))
}

#[test]
fn test_encoder_output_shape_for_every_variant() {
    let (features, _, positions) = create_batch(3, 2, 8);
    for kind in [EmbeddingKind::Origin, EmbeddingKind::Sep, EmbeddingKind::Pair] {
        for norm in [
            NormalizationKind::Layer,
            NormalizationKind::Batch,
            NormalizationKind::Instance,
        ] {
            let config = create_small_config()
                .with_embedding_kind(kind)
                .with_normalization(norm);
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            let encoder = Encoder::new(&config, &mut rng);
            let h = encoder.forward(&features, &positions).unwrap();
            assert_eq!(h.dim(), (2, 7, 8));
            assert!(h.iter().all(|v| v.is_finite()));
        }
    }
}

#[test]
fn test_feature_embedding_shapes() {
    let (features, _, _) = create_batch(4, 3, 8);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for kind in [EmbeddingKind::Origin, EmbeddingKind::Sep, EmbeddingKind::Pair] {
        let embedding = FeatureEmbedding::new(kind, 6, &mut rng);
        assert_eq!(embedding.forward(&features).unwrap().dim(), (3, 9, 6));
    }
}

#[test]
fn test_same_seed_gives_same_encoder() {
    let (features, _, positions) = create_batch(2, 2, 8);
    let config = create_small_config();
    let a = Encoder::new(&config, &mut ChaCha8Rng::seed_from_u64(3));
    let b = Encoder::new(&config, &mut ChaCha8Rng::seed_from_u64(3));
    assert_eq!(
        a.forward(&features, &positions).unwrap(),
        b.forward(&features, &positions).unwrap()
    );
}

#[test]
fn test_tour_order_changes_embeddings() {
    let (features, _, _) = create_batch(3, 1, 8);
    let config = create_small_config();
    let encoder = Encoder::new(&config, &mut ChaCha8Rng::seed_from_u64(4));
    let positional = PositionalEncoder::new(7, 8);

    let embed = |sequence: &[usize]| {
        let tour = Tour::from_sequence(sequence).unwrap();
        let states = positional.encode_batch(&[tour], false).unwrap();
        encoder.forward(&features, &batch_embeddings(&states)).unwrap()
    };
    let a = embed(&[0, 1, 4, 2, 5, 3, 6]);
    let b = embed(&[0, 3, 2, 1, 4, 5, 6]);
    let diff = (&a - &b).iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    assert!(diff > 1e-9);
}

#[test]
fn test_auxiliary_scores_shape() {
    let (_, _, positions) = create_batch(2, 3, 8);
    let encoder = Encoder::new(&create_small_config(), &mut ChaCha8Rng::seed_from_u64(5));
    assert_eq!(encoder.auxiliary_scores(&positions).dim(), (2, 3, 5, 5));
}

#[test]
fn test_encoder_rejects_mismatched_inputs() {
    let (features, _, positions) = create_batch(2, 2, 8);
    let encoder = Encoder::new(&create_small_config(), &mut ChaCha8Rng::seed_from_u64(6));

    let wide = Array3::<f64>::zeros((2, 5, 3));
    let err = encoder.forward(&wide, &positions).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));

    let short = positions.index_axis(Axis(0), 0).to_owned().insert_axis(Axis(0));
    let err = encoder.forward(&features, &short).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
}

#[test]
fn test_layer_normalization_standardises_instances() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let x = Array3::from_shape_simple_fn((2, 5, 4), || rng.gen_range(-3.0..3.0));
    let out = Normalization::new(4, NormalizationKind::Layer).forward(&x);

    for instance in out.axis_iter(Axis(0)) {
        let n = instance.len() as f64;
        let mean = instance.sum() / n;
        let var = instance.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / (n - 1.0);
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-3);
    }
}

#[test]
fn test_batch_normalization_standardises_features() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let x = Array3::from_shape_simple_fn((3, 4, 2), || rng.gen_range(0.0..10.0));
    let out = Normalization::new(2, NormalizationKind::Batch).forward(&x);

    for feature in out.axis_iter(Axis(2)) {
        let n = feature.len() as f64;
        let mean = feature.sum() / n;
        let var = feature.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / n;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-3);
    }
}

#[test]
fn test_instance_normalization_standardises_each_instance() {
    let mut rng = ChaCha8Rng::seed_from_u64(10);
    let x = Array3::from_shape_simple_fn((2, 6, 3), || rng.gen_range(-1.0..5.0));
    let out = Normalization::new(3, NormalizationKind::Instance).forward(&x);

    for instance in out.axis_iter(Axis(0)) {
        for feature in instance.axis_iter(Axis(1)) {
            let mean = feature.sum() / feature.len() as f64;
            assert!(mean.abs() < 1e-9);
        }
    }
}
