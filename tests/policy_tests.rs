//! Tests for the trained, uniform-random and epsilon-greedy selection policies.

use nls_pdp::actor::{StepInput, StepOutput};
use nls_pdp::config::{DecodeStrategy, ModelConfig, PolicyKind};
use nls_pdp::environment::{Environment, PdtspLifo};
use nls_pdp::history::SelectionHistory;
use nls_pdp::policy::greedy::{insertion_scores, removal_savings};
use nls_pdp::policy::{build_policy, EpsilonGreedyPolicy};
use nls_pdp::positional::PositionalEncoder;
use nls_pdp::problem::{batch_features, Problem};
use nls_pdp::tour::{Action, Tour};
use nls_pdp::Actor;
use ndarray::{Array3, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random instances, their features and random feasible tours.
struct Fixture {
    problems: Vec<Problem>,
    features: Array3<f64>,
    tours: Vec<Tour>,
    history: SelectionHistory,
    env: PdtspLifo,
}

fn create_fixture(pairs: usize, batch: usize, seed: u64) -> Fixture {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let env = PdtspLifo::new(pairs).unwrap();
    let problems: Vec<Problem> = (0..batch)
        .map(|i| Problem::random(format!("p{i}"), pairs, &mut rng).unwrap())
        .collect();
    let tours = (0..batch).map(|_| env.random_tour(&mut rng).unwrap()).collect();
    Fixture {
        features: batch_features(&problems).unwrap(),
        problems,
        tours,
        history: SelectionHistory::new(batch, pairs),
        env,
    }
}

fn create_actor(policy: PolicyKind, pairs: usize) -> Actor {
    let config = ModelConfig::new()
        .with_n_heads(2)
        .with_embedding_dim(8)
        .with_feed_forward_hidden(8)
        .with_n_encode_layers(1)
        .with_policy(policy);
    Actor::new(config, pairs).unwrap()
}

fn run_step(
    actor: &Actor,
    fixture: &Fixture,
    previous: &[Option<Action>],
    fixed: Option<&[Action]>,
    need_entropy: bool,
    seed: u64,
) -> StepOutput {
    let input = StepInput {
        features: &fixture.features,
        tours: &fixture.tours,
        history: fixture.history.table(),
        previous,
        fixed,
        need_entropy,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    actor.step(&fixture.env, &input, &mut rng).unwrap()
}

/// Masked cells of the tour for the given removal.
fn swap_mask(fixture: &Fixture, b: usize, removal: usize) -> ndarray::Array2<bool> {
    let nodes = fixture.tours[b].len();
    let state = PositionalEncoder::new(nodes, 4)
        .encode(&fixture.tours[b], true)
        .unwrap();
    fixture
        .env
        .swap_mask(removal, &state.visit_index, state.top2.as_deref().unwrap())
        .unwrap()
}

#[test]
fn test_build_policy_kinds() {
    for kind in [PolicyKind::Trained, PolicyKind::Random, PolicyKind::Greedy] {
        let policy = build_policy(&ModelConfig::new().with_policy(kind));
        assert_eq!(policy.kind(), kind);
        assert_eq!(policy.requires_embeddings(), kind == PolicyKind::Trained);
    }
}

#[test]
fn test_removal_savings_on_a_line() {
    let problem =
        Problem::new("Line".to_string(), &[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]).unwrap();
    let features = problem.features();
    let tour = Tour::from_sequence(&[0, 1, 2]).unwrap();
    let savings = removal_savings(&features.view(), tour.successors(), 1);
    assert_eq!(savings.len(), 1);
    assert!((savings[0] - 2.0).abs() < 1e-12);

    let scores = insertion_scores(&features.view(), tour.successors(), 1, 1);
    assert_eq!(scores.len(), 9);
    // both freed nodes go back next to the depot: 2 * d(0,1) + 2 * d(0,2)
    assert!((scores[0] + 6.0).abs() < 1e-12);
}

#[test]
fn test_greedy_is_deterministic_without_exploration() {
    let fixture = create_fixture(5, 3, 1);
    let actor = Actor::new(
        ModelConfig::new()
            .with_n_heads(2)
            .with_embedding_dim(8)
            .with_policy(PolicyKind::Greedy)
            .with_greedy_epsilon(0.0),
        5,
    )
    .unwrap();
    let previous = vec![None; 3];

    let first = run_step(&actor, &fixture, &previous, None, false, 1);
    for seed in 2..10 {
        let again = run_step(&actor, &fixture, &previous, None, false, seed);
        assert_eq!(again.actions, first.actions);
    }
    assert!(first.log_likelihood.iter().all(|&l| l == 0.0));
}

#[test]
fn test_greedy_picks_best_geometric_move() {
    let fixture = create_fixture(4, 2, 2);
    let actor = create_actor(PolicyKind::Greedy, 4)
        .with_policy(Box::new(EpsilonGreedyPolicy::new(0.0)));
    let output = run_step(&actor, &fixture, &[None, None], None, false, 3);

    for (b, action) in output.actions.iter().enumerate() {
        let coords = fixture.features.index_axis(Axis(0), b);
        let successors = fixture.tours[b].successors();

        let savings = removal_savings(&coords, successors, 4);
        let best = savings.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(savings[action.removal], best);

        let mask = swap_mask(&fixture, b, action.removal);
        let scores = insertion_scores(&coords, successors, action.removal + 1, 4);
        let best_cell = scores
            .iter()
            .zip(mask.iter())
            .filter(|(_, &masked)| !masked)
            .map(|(&s, _)| s)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(scores[action.flat_reinsertion(9)], best_cell);
    }
}

#[test]
fn test_random_policy_respects_masks_and_tabu() {
    let fixture = create_fixture(4, 4, 3);
    let actor = create_actor(PolicyKind::Random, 4);
    let previous: Vec<Option<Action>> = (0..4).map(|b| Some(Action::new(b % 4, 0, 0))).collect();

    for seed in 0..40 {
        let output = run_step(&actor, &fixture, &previous, None, true, seed);
        assert!(output.entropy.is_none());
        for (b, action) in output.actions.iter().enumerate() {
            assert_ne!(action.removal, b % 4);
            let mask = swap_mask(&fixture, b, action.removal);
            assert!(!mask[[action.pickup_anchor, action.delivery_anchor]]);
            assert_eq!(output.log_likelihood[b], 0.0);
        }
    }
}

#[test]
fn test_every_policy_yields_feasible_tours() {
    for kind in [PolicyKind::Trained, PolicyKind::Random, PolicyKind::Greedy] {
        let fixture = create_fixture(3, 3, 4);
        let actor = create_actor(kind, 3);
        for seed in 0..10 {
            let output = run_step(&actor, &fixture, &[None, None, None], None, false, seed);
            assert_eq!(output.actions.len(), 3);
            for (b, action) in output.actions.iter().enumerate() {
                let next = fixture.env.apply(&fixture.tours[b], action).unwrap();
                fixture.env.validate(&next).unwrap();
                assert!(next.cost(&fixture.problems[b]) > 0.0);
            }
        }
    }
}

#[test]
fn test_trained_policy_likelihood_and_entropy() {
    let fixture = create_fixture(4, 3, 5);
    let mut actor = create_actor(PolicyKind::Trained, 4);

    let idle = run_step(&actor, &fixture, &[None, None, None], None, true, 1);
    assert!(idle.log_likelihood.iter().all(|&l| l == 0.0));
    assert!(idle.entropy.is_none());

    actor.set_training(true);
    let output = run_step(&actor, &fixture, &[None, None, None], None, true, 1);
    assert!(output
        .log_likelihood
        .iter()
        .all(|&l| l.is_finite() && l <= 0.0));
    let entropy = output.entropy.unwrap();
    assert_eq!(entropy.len(), 3);
    assert!(entropy.iter().all(|&e| e > 0.0));

    let without = run_step(&actor, &fixture, &[None, None, None], None, false, 1);
    assert!(without.entropy.is_none());
}

#[test]
fn test_fixed_actions_are_scored_not_resampled() {
    let fixture = create_fixture(4, 2, 6);
    let mut actor = create_actor(PolicyKind::Trained, 4);
    actor.set_training(true);
    let previous = [None, None];

    let sampled = run_step(&actor, &fixture, &previous, None, false, 7);
    for seed in 8..12 {
        let scored = run_step(&actor, &fixture, &previous, Some(sampled.actions.as_slice()), false, seed);
        assert_eq!(scored.actions, sampled.actions);
        for (a, b) in scored.log_likelihood.iter().zip(&sampled.log_likelihood) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}

#[test]
fn test_greedy_decode_of_trained_policy_is_deterministic() {
    let fixture = create_fixture(3, 2, 7);
    let config = ModelConfig::new()
        .with_n_heads(2)
        .with_embedding_dim(8)
        .with_n_encode_layers(1)
        .with_decode(DecodeStrategy::Greedy);
    let actor = Actor::new(config, 3).unwrap();

    let first = run_step(&actor, &fixture, &[None, None], None, false, 1);
    let second = run_step(&actor, &fixture, &[None, None], None, false, 99);
    assert_eq!(first.actions, second.actions);
}
