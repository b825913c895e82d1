//! Tests for the removal and reinsertion decoders.

use nls_pdp::config::{ModelConfig, RemovalVariant};
use nls_pdp::decoder::removal::NeighbourRule;
use nls_pdp::distribution::{Categorical, MASKED_LOGIT};
use nls_pdp::environment::PdtspLifo;
use nls_pdp::error::Error;
use nls_pdp::history::SelectionHistory;
use nls_pdp::problem::{batch_features, Problem};
use nls_pdp::tour::Tour;
use nls_pdp::Actor;
use ndarray::{Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Decoder inputs for `batch` random instances: `h_hat`, tours and an empty history.
fn create_decoder_inputs(
    actor: &Actor,
    batch: usize,
    seed: u64,
) -> (Array3<f64>, Vec<Tour>, SelectionHistory) {
    let pairs = actor.pairs();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let env = PdtspLifo::new(pairs).unwrap();
    let problems: Vec<Problem> = (0..batch)
        .map(|i| Problem::random(format!("p{i}"), pairs, &mut rng).unwrap())
        .collect();
    let tours: Vec<Tour> = (0..batch).map(|_| env.random_tour(&mut rng).unwrap()).collect();
    let features = batch_features(&problems).unwrap();
    let h_wave = actor.embed(&features, &tours).unwrap();
    (
        actor.decoder().project(&h_wave),
        tours,
        SelectionHistory::new(batch, pairs),
    )
}

fn create_actor(variant: RemovalVariant, pairs: usize) -> Actor {
    let config = ModelConfig::new()
        .with_n_heads(2)
        .with_embedding_dim(8)
        .with_feed_forward_hidden(8)
        .with_n_encode_layers(1)
        .with_removal_variant(variant);
    Actor::new(config, pairs).unwrap()
}

#[test]
fn test_variant_rule_sets() {
    assert_eq!(RemovalVariant::Origin.rules().len(), 1);
    assert_eq!(RemovalVariant::Glitch.rules().len(), 1);
    assert_eq!(RemovalVariant::Update1.rules().len(), 1);
    assert_eq!(RemovalVariant::Update2.rules().len(), 3);
    let first: NeighbourRule = RemovalVariant::Update2.rules()[0];
    assert_eq!(first, RemovalVariant::Origin.rules()[0]);
}

#[test]
fn test_removal_logits_are_bounded() {
    for variant in [
        RemovalVariant::Origin,
        RemovalVariant::Glitch,
        RemovalVariant::Update1,
        RemovalVariant::Update2,
    ] {
        let actor = create_actor(variant, 4);
        let (h_hat, tours, history) = create_decoder_inputs(&actor, 3, 1);
        let logits = actor
            .decoder()
            .removal_logits(&h_hat, &tours, history.table(), &[None, None, None])
            .unwrap();
        let v_range = actor.config().v_range;
        assert_eq!(logits.dim(), (3, 4));
        assert!(logits.iter().all(|&l| l.abs() <= v_range));
    }
}

#[test]
fn test_previous_pair_is_never_reselected() {
    let actor = create_actor(RemovalVariant::Origin, 4);
    let (h_hat, tours, history) = create_decoder_inputs(&actor, 2, 2);
    let previous = [Some(2), Some(0)];
    let logits = actor
        .decoder()
        .removal_logits(&h_hat, &tours, history.table(), &previous)
        .unwrap();
    assert_eq!(logits[[0, 2]], MASKED_LOGIT);
    assert_eq!(logits[[1, 0]], MASKED_LOGIT);

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for (row, prev) in logits.axis_iter(Axis(0)).zip(previous) {
        let dist = Categorical::from_logits(&row.to_vec()).unwrap();
        assert_eq!(dist.probs()[prev.unwrap()], 0.0);
        for _ in 0..200 {
            assert_ne!(Some(dist.sample(&mut rng)), prev);
        }
    }
}

#[test]
fn test_single_pair_is_never_tabu() {
    let actor = create_actor(RemovalVariant::Origin, 1);
    let (h_hat, tours, history) = create_decoder_inputs(&actor, 1, 4);
    let logits = actor
        .decoder()
        .removal_logits(&h_hat, &tours, history.table(), &[Some(0)])
        .unwrap();
    assert!(logits[[0, 0]] > MASKED_LOGIT);
}

#[test]
fn test_history_only_touches_its_pair() {
    let actor = create_actor(RemovalVariant::Origin, 3);
    let (h_hat, tours, mut history) = create_decoder_inputs(&actor, 1, 5);
    let before = actor
        .decoder()
        .removal
        .forward(&h_hat, &tours, history.table())
        .unwrap();
    history.push(&[1]).unwrap();
    assert_eq!(history.table()[[0, 0, 1]], 1.0);
    let after = actor
        .decoder()
        .removal
        .forward(&h_hat, &tours, history.table())
        .unwrap();
    assert_eq!(before[[0, 0]], after[[0, 0]]);
    assert_eq!(before[[0, 2]], after[[0, 2]]);
}

#[test]
fn test_random_masks_receive_no_mass() {
    let actor = create_actor(RemovalVariant::Origin, 3);
    let (h_hat, tours, _) = create_decoder_inputs(&actor, 2, 6);
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..30 {
        let masks: Vec<Array2<bool>> = (0..2)
            .map(|_| {
                let mut mask = Array2::from_shape_simple_fn((7, 7), || rng.gen_bool(0.7));
                mask[[rng.gen_range(0..7), rng.gen_range(0..7)]] = false;
                mask
            })
            .collect();
        let removed = [rng.gen_range(0..3), rng.gen_range(0..3)];
        let logits = actor
            .decoder()
            .reinsertion_logits(&h_hat, &removed, &tours, &masks)
            .unwrap();

        for (surface, mask) in logits.axis_iter(Axis(0)).zip(&masks) {
            let dist = Categorical::from_logits(&surface.iter().copied().collect::<Vec<_>>()).unwrap();
            for (p, &masked) in dist.probs().iter().zip(mask.iter()) {
                if masked {
                    assert_eq!(*p, 0.0);
                }
            }
            let total: f64 = dist.probs().iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn test_single_feasible_cell_is_certain() {
    let actor = create_actor(RemovalVariant::Origin, 3);
    let (h_hat, tours, _) = create_decoder_inputs(&actor, 1, 8);
    let mut mask = Array2::from_elem((7, 7), true);
    mask[[2, 5]] = false;

    let logits = actor
        .decoder()
        .reinsertion_logits(&h_hat, &[0], &tours, &[mask])
        .unwrap();
    let dist = Categorical::from_logits(&logits.iter().copied().collect::<Vec<_>>()).unwrap();
    let cell = 2 * 7 + 5;
    assert_eq!(dist.probs()[cell], 1.0);
    assert_eq!(dist.argmax(), cell);
    assert_eq!(dist.log_prob(cell), 0.0);
    assert_eq!(dist.entropy(), 0.0);

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    for _ in 0..50 {
        assert_eq!(dist.sample(&mut rng), cell);
    }
}

#[test]
fn test_fully_masked_surface_fails_loudly() {
    let actor = create_actor(RemovalVariant::Origin, 2);
    let (h_hat, tours, _) = create_decoder_inputs(&actor, 1, 10);
    let logits = actor
        .decoder()
        .reinsertion_logits(&h_hat, &[1], &tours, &[Array2::from_elem((5, 5), true)])
        .unwrap();
    let err = Categorical::from_logits(&logits.iter().copied().collect::<Vec<_>>()).unwrap_err();
    assert!(matches!(err, Error::InfeasibleStep(_)));
}

#[test]
fn test_reinsertion_rejects_bad_inputs() {
    let actor = create_actor(RemovalVariant::Origin, 2);
    let (h_hat, tours, _) = create_decoder_inputs(&actor, 1, 11);

    let err = actor
        .decoder()
        .reinsertion_logits(&h_hat, &[0], &tours, &[Array2::from_elem((4, 4), false)])
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));

    let err = actor
        .decoder()
        .reinsertion_logits(&h_hat, &[2], &tours, &[Array2::from_elem((5, 5), false)])
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));

    let err = actor
        .decoder()
        .reinsertion_logits(&h_hat, &[0], &tours, &[])
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
}
