//! Basic example of using the NLS-PDP library.

use clap::Parser;
use nls_pdp::config::{ModelConfig, PolicyKind, RemovalVariant, SearchConfig};
use nls_pdp::environment::PdtspLifo;
use nls_pdp::problem::Problem;
use nls_pdp::utils::{format_duration, print_tour_visualization, save_tour};
use nls_pdp::{Actor, NeuralSearch};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(about = "Neural local search on a pickup-and-delivery instance")]
struct Args {
    /// Instance file (name line, then one "x y" line per node); random if absent
    #[arg(short, long)]
    instance: Option<PathBuf>,

    /// Request pairs of the random instance
    #[arg(short, long, default_value_t = 10)]
    pairs: usize,

    /// Selection policy: trained, random or greedy
    #[arg(long, default_value = "greedy")]
    policy: PolicyKind,

    /// Removal decoder: origin, glitch, update1 or update2
    #[arg(long, default_value = "origin")]
    removal: RemovalVariant,

    #[arg(long, default_value_t = 200)]
    steps: usize,

    /// Time limit in seconds
    #[arg(long)]
    time_limit: Option<u64>,

    /// Load actor parameters from this checkpoint
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    let problem = match &args.instance {
        Some(path) => {
            println!("Loading problem from: {}", path.display());
            Problem::from_file(path)?
        }
        None => Problem::random(format!("random-{}", args.pairs), args.pairs, &mut rng)?,
    };
    println!(
        "Loaded problem: {} with {} request pairs",
        problem.name, problem.pairs
    );

    let actor = match &args.checkpoint {
        Some(path) => Actor::load(path)?,
        None => {
            let config = ModelConfig::new()
                .with_policy(args.policy)
                .with_removal_variant(args.removal)
                .with_seed(args.seed);
            Actor::new(config, problem.pairs)?
        }
    };

    let environment = PdtspLifo::new(problem.pairs)?;
    let initial = environment.nearest_neighbour_tour(&problem)?;
    println!("Initial distance: {:.2}", initial.cost(&problem));

    let mut search_config = SearchConfig::new()
        .with_max_steps(args.steps)
        .with_seed(args.seed);
    if let Some(seconds) = args.time_limit {
        search_config = search_config.with_time_limit(Duration::from_secs(seconds));
    }

    println!("Starting {} search", actor.policy_kind());
    let mut search = NeuralSearch::new(vec![problem.clone()], vec![initial], actor, search_config)?;
    let start_time = Instant::now();
    let best = search.run()?[0].clone();
    let runtime = start_time.elapsed();

    println!("Search completed in {}", format_duration(runtime));
    println!("{}", search.statistics().format());

    let output_path = format!("{}.tour", problem.name);
    println!("Saving tour to: {}", output_path);
    save_tour(&best, &problem, &output_path)?;

    print_tour_visualization(&best, &problem);

    Ok(())
}
