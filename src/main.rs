//! evocore CLI - Run an evolution or meta-evolution from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use evocore::{
    checkpoint::Checkpoint,
    compute::{
        Domain, DomainRegistry,
        evolution::{EvolutionEngine, MetaOptimizer},
    },
    domains,
    error::{ErrorCode, EvoError, LogErr, Result, error_string},
    schema::{EngineConfig, LoggingSection, MetaParams},
};

fn print_usage(program: &str) {
    eprintln!("Usage: {} <config.json> [--resume <checkpoint>]", program);
    eprintln!("       {} --example", program);
    eprintln!("       {} --info <checkpoint>", program);
    eprintln!();
    eprintln!("Run an evolution (or a meta-evolution when the config has a");
    eprintln!("\"meta\" section) from JSON configuration.");
    eprintln!();
    eprintln!("Environment overrides: LOG_LEVEL, CUDA_DEVICE, CHECKPOINT_DIR, NUM_THREADS");
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("evocore");

    let outcome = match args.get(1).map(String::as_str) {
        None | Some("-h") | Some("--help") => {
            print_usage(program);
            std::process::exit(1);
        }
        Some("--example") => print_example_config(),
        Some("--info") => match args.get(2) {
            Some(path) => print_info(PathBuf::from(path)),
            None => {
                print_usage(program);
                std::process::exit(1);
            }
        },
        Some(config_path) => {
            let resume = match (args.get(2).map(String::as_str), args.get(3)) {
                (Some("--resume"), Some(path)) => Some(PathBuf::from(path)),
                (None, _) => None,
                _ => {
                    print_usage(program);
                    std::process::exit(1);
                }
            };
            run(PathBuf::from(config_path), resume)
        }
    };

    match outcome {
        Ok(code) => println!("Status {}: {}", code.as_i32(), code),
        Err(e) => {
            let code = e.code().as_i32();
            eprintln!("Error {} ({}): {}", code, error_string(code), e);
            std::process::exit(1);
        }
    }
}

fn print_example_config() -> Result<ErrorCode> {
    println!("{}", EngineConfig::example().to_json_pretty()?);
    Ok(ErrorCode::Ok)
}

fn print_info(path: PathBuf) -> Result<ErrorCode> {
    let checkpoint = Checkpoint::load(&path)?;
    println!("{}: {}", path.display(), checkpoint.info());
    if let Some(meta) = &checkpoint.meta {
        print!("{}", meta);
    }
    Ok(ErrorCode::Ok)
}

fn init_logging(logging: &LoggingSection) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(logging.level_filter()?);
    if let Some(path) = &logging.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(EvoError::FileWrite)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    // A logger installed earlier (e.g. by a test harness) wins.
    let _ = builder.try_init();
    Ok(())
}

fn run(config_path: PathBuf, resume: Option<PathBuf>) -> Result<ErrorCode> {
    let mut config = EngineConfig::from_json_file(&config_path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    init_logging(&config.logging)?;

    let mut registry = DomainRegistry::new();
    domains::register_builtin(&mut registry)?;
    let domain = registry
        .require(&config.evolution.domain)
        .log_context("Domain lookup")?;

    println!("evocore");
    println!("=======");
    println!("Domain: {} ({} bytes)", domain.name(), domain.genome_size());
    println!(
        "Population: {}, generations: {}, seed: {}",
        config.evolution.population_size, config.evolution.max_generations, config.evolution.seed
    );
    println!();

    if config.meta.is_some() {
        run_meta(config, domain)
    } else {
        run_single(config, domain, resume)
    }
}

fn run_single(
    config: EngineConfig,
    domain: Arc<dyn Domain>,
    resume: Option<PathBuf>,
) -> Result<ErrorCode> {
    let max_generations = config.evolution.max_generations;
    let mut engine = EvolutionEngine::new(config, domain)?;
    if let Some(path) = resume {
        let checkpoint = Checkpoint::load(&path).log_context("Loading checkpoint")?;
        engine.restore(&checkpoint)?;
        println!("Resumed from {} at generation {}", path.display(), checkpoint.generation);
    }

    let report_every = (max_generations / 10).max(1);
    let result = engine.run_with_callback(|progress| {
        if progress.generation % report_every == 0 {
            println!(
                "  Generation {}/{}: best={:.6}, avg={:.6}, stagnant={}",
                progress.generation,
                progress.max_generations,
                progress.best_fitness,
                progress.avg_fitness,
                progress.stagnation_count
            );
        }
    })?;

    let stats = &result.stats;
    println!();
    println!("Stopped: {:?} after {} generations", stats.stop_reason, stats.generations);
    println!("Best fitness: {:.6}", stats.best_fitness);
    println!("Final average: {:.6}", stats.final_avg_fitness);
    println!("Best genome: {}", result.best_genome);
    println!(
        "Time: {:.2}s ({} evaluations, {:.1}/s)",
        stats.elapsed_seconds, stats.total_evaluations, stats.evaluations_per_second
    );

    let batch = engine.evaluator().stats();
    if batch.gpu_batches > 0 {
        println!(
            "GPU: {} batches, {:.3} ms avg, {} fallbacks",
            batch.gpu_batches,
            batch.avg_gpu_time_ms(),
            batch.fallbacks
        );
    }

    Ok(stats.stop_reason.code())
}

fn run_meta(config: EngineConfig, domain: Arc<dyn Domain>) -> Result<ErrorCode> {
    let mut optimizer = MetaOptimizer::new(config, domain, MetaParams::default())?;
    let result = optimizer.run()?;

    println!();
    println!(
        "Meta-evolution: {} generations, {} inner runs{}",
        result.generations,
        result.inner_runs,
        if result.converged { ", converged" } else { "" }
    );
    println!("Best meta-fitness: {:.6}", result.best_fitness);
    print!("{}", result.best_params);

    Ok(if result.converged {
        ErrorCode::Converged
    } else {
        ErrorCode::MaxGenerations
    })
}
