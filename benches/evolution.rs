//! Benchmarks for batch evaluation, breeding and short engine runs.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use evocore::{
    compute::{
        BatchEvaluator, Domain, DomainFitness, EvoRng, Genome, Population,
        evolution::EvolutionEngine, operators::{BreedingPlan, breed_generation},
    },
    domains::{NeedleDomain, SphereDomain},
    schema::EngineConfig,
};

fn random_population(domain: &dyn Domain, size: usize, seed: u64) -> Population {
    let mut rng = EvoRng::new(seed);
    let mut population = Population::new(size).unwrap();
    for _ in 0..size {
        let mut genome = Genome::new(domain.genome_size()).unwrap();
        genome.set_size(domain.genome_size()).unwrap();
        domain.random_init(&mut genome, &mut rng).unwrap();
        let fitness = domain.fitness(&genome);
        population.add(&genome, fitness).unwrap();
    }
    population
}

fn bench_batch_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_evaluate");
    let domain = SphereDomain::default();

    for threads in [1, 4] {
        for count in [100, 1000] {
            let population = random_population(&domain, count, 7);
            let views: Vec<&[u8]> = population.iter().map(|i| i.genome.as_bytes()).collect();
            let mut scores = vec![0.0; count];
            let mut evaluator = BatchEvaluator::new(threads).unwrap();
            let fitness = DomainFitness(&domain);

            group.bench_with_input(
                BenchmarkId::new(format!("sphere_t{}", threads), count),
                &count,
                |b, _| {
                    b.iter(|| {
                        evaluator
                            .evaluate(black_box(&views), &mut scores, &fitness)
                            .unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_breed_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("breed_generation");
    let domain = NeedleDomain::default();

    for size in [100, 500, 2000] {
        let base = random_population(&domain, size, 11);
        let plan = BreedingPlan {
            target_size: size,
            culling_ratio: 0.25,
            immigrant_rate: 0.05,
            ..BreedingPlan::default()
        };

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let mut rng = EvoRng::new(3);
            b.iter(|| {
                let mut population = base.clone();
                breed_generation(black_box(&mut population), &plan, &domain, &mut rng).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_engine_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_run");
    group.sample_size(10);

    for (name, domain) in [
        ("sphere", Arc::new(SphereDomain::default()) as Arc<dyn Domain>),
        ("needle", Arc::new(NeedleDomain::default()) as Arc<dyn Domain>),
    ] {
        let mut config = EngineConfig::default();
        config.evolution.domain = name.into();
        config.evolution.population_size = 200;
        config.evolution.max_generations = 20;
        config.checkpoint.enabled = false;

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut engine = EvolutionEngine::new(config.clone(), domain.clone()).unwrap();
                black_box(engine.run().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_batch_evaluate,
    bench_breed_generation,
    bench_engine_run
);
criterion_main!(benches);
