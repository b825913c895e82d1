//! Benchmarks for the neural local-search step.

#[cfg(feature = "bench")]
extern crate criterion;

#[cfg(feature = "bench")]
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nls_pdp::actor::StepInput;
use nls_pdp::config::{ModelConfig, PolicyKind};
use nls_pdp::environment::PdtspLifo;
use nls_pdp::history::SelectionHistory;
use nls_pdp::positional::{fold_stack_states, visit_sequence, PositionalEncoder};
use nls_pdp::problem::{batch_features, Problem};
use nls_pdp::tour::Tour;
use nls_pdp::Actor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random instances with random feasible tours.
fn create_benchmark_batch(pairs: usize, batch: usize) -> (Vec<Problem>, Vec<Tour>) {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let env = PdtspLifo::new(pairs).expect("valid pair count");
    (0..batch)
        .map(|i| {
            let problem = Problem::random(format!("bench-{i}"), pairs, &mut rng).expect("instance");
            let tour = env.random_tour(&mut rng).expect("tour");
            (problem, tour)
        })
        .unzip()
}

#[cfg(feature = "bench")]
fn benchmark_positional(c: &mut Criterion) {
    let mut group = c.benchmark_group("positional");

    for pairs in [10, 20, 50].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(pairs), pairs, |b, &pairs| {
            let (_, tours) = create_benchmark_batch(pairs, 16);
            let encoder = PositionalEncoder::new(2 * pairs + 1, 64);

            b.iter(|| encoder.encode_batch(&tours, true).expect("encode"));
        });
    }

    group.bench_function("fold_stack_states", |b| {
        let (_, tours) = create_benchmark_batch(50, 1);
        let sequence = visit_sequence(&tours[0]);
        b.iter(|| fold_stack_states(&sequence, 50, 1));
    });

    group.finish();
}

#[cfg(feature = "bench")]
fn benchmark_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");

    for policy in [PolicyKind::Trained, PolicyKind::Random, PolicyKind::Greedy] {
        group.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, &policy| {
            let pairs = 10;
            let (problems, tours) = create_benchmark_batch(pairs, 8);
            let features = batch_features(&problems).expect("features");
            let history = SelectionHistory::new(tours.len(), pairs);
            let previous = vec![None; tours.len()];
            let env = PdtspLifo::new(pairs).expect("env");
            let config = ModelConfig::new()
                .with_policy(policy)
                .with_embedding_dim(32)
                .with_n_encode_layers(2);
            let actor = Actor::new(config, pairs).expect("actor");
            let mut rng = ChaCha8Rng::seed_from_u64(11);

            b.iter(|| {
                let input = StepInput {
                    features: &features,
                    tours: &tours,
                    history: history.table(),
                    previous: &previous,
                    fixed: None,
                    need_entropy: false,
                };
                actor.step(&env, &input, &mut rng).expect("step")
            });
        });
    }

    group.finish();
}

#[cfg(feature = "bench")]
criterion_group!(benches, benchmark_positional, benchmark_step);

#[cfg(feature = "bench")]
criterion_main!(benches);
