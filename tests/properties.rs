//! Property-based tests for operator, container and codec invariants.

use proptest::prelude::*;

use evocore::{
    checkpoint::Checkpoint,
    compute::{
        ARENA_ALIGNMENT, Arena, EvoRng, Genome, Population,
        operators::{mutate_bytes, uniform_crossover},
    },
    schema::{FIELDS, META_FIELD_COUNT, MetaParams},
};

fn fitness() -> impl Strategy<Value = f64> {
    prop_oneof![
        1 => Just(f64::NAN),
        6 => -1e6..1e6f64,
    ]
}

fn population(genomes: &[Vec<u8>], fitness: &[f64]) -> Population {
    let mut population = Population::new(genomes.len().max(1)).unwrap();
    for (bytes, &f) in genomes.iter().zip(fitness) {
        population.add(&Genome::from_data(bytes).unwrap(), f).unwrap();
    }
    population
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_crossover_identical_parents(
        parent in prop::collection::vec(any::<u8>(), 0..256),
        seed in any::<u64>()
    ) {
        let mut rng = EvoRng::new(seed);
        let (c1, c2) = uniform_crossover(&parent, &parent, &mut rng);
        prop_assert_eq!(&c1, &parent);
        prop_assert_eq!(&c2, &parent);
    }

    #[test]
    fn prop_crossover_lengths(
        p1 in prop::collection::vec(any::<u8>(), 0..64),
        p2 in prop::collection::vec(any::<u8>(), 0..64),
        seed in any::<u64>()
    ) {
        let mut rng = EvoRng::new(seed);
        let (c1, c2) = uniform_crossover(&p1, &p2, &mut rng);
        prop_assert_eq!(c1.len(), p1.len().max(p2.len()));
        prop_assert_eq!(c2.len(), p1.len().min(p2.len()));
    }

    #[test]
    fn prop_zero_rate_mutation_is_identity(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
        seed in any::<u64>()
    ) {
        let mut mutated = bytes.clone();
        let mut rng = EvoRng::new(seed);
        prop_assert_eq!(mutate_bytes(&mut mutated, 0.0, &mut rng), 0);
        prop_assert_eq!(mutated, bytes);
    }

    #[test]
    fn prop_clone_has_zero_distance(bytes in prop::collection::vec(any::<u8>(), 1..128)) {
        let genome = Genome::from_data(&bytes).unwrap();
        let copy = genome.clone();
        prop_assert_eq!(genome.distance(&copy).unwrap(), 0);
    }

    #[test]
    fn prop_sort_orders_with_nan_last(values in prop::collection::vec(fitness(), 1..64)) {
        let genomes: Vec<Vec<u8>> = (0..values.len()).map(|i| vec![i as u8]).collect();
        let mut population = population(&genomes, &values);
        population.sort();

        let sorted: Vec<f64> = population.iter().map(|i| i.fitness).collect();
        let first_nan = sorted.iter().position(|f| f.is_nan()).unwrap_or(sorted.len());
        prop_assert!(sorted[first_nan..].iter().all(|f| f.is_nan()));
        prop_assert!(sorted[..first_nan].windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn prop_tournament_in_bounds(
        values in prop::collection::vec(fitness(), 1..64),
        k in 1usize..10,
        seed in any::<u64>()
    ) {
        let genomes: Vec<Vec<u8>> = (0..values.len()).map(|i| vec![i as u8]).collect();
        let population = population(&genomes, &values);
        let mut rng = EvoRng::new(seed);
        for _ in 0..16 {
            prop_assert!(population.tournament_select(k, &mut rng).unwrap() < population.len());
        }
    }

    #[test]
    fn prop_arena_alignment_and_rewind(sizes in prop::collection::vec(0usize..300, 1..32)) {
        let mut arena = Arena::new(4096);
        for &size in &sizes {
            if let Some(block) = arena.alloc(size) {
                prop_assert_eq!(arena.slice(block).as_ptr() as usize % ARENA_ALIGNMENT, 0);
                prop_assert!(block.end() <= arena.capacity());
            }
        }

        arena.reset();
        prop_assert_eq!(arena.used(), 0);

        let mark = arena.snapshot();
        let first = arena.alloc(sizes[0]);
        prop_assert!(arena.rewind(mark));
        prop_assert_eq!(arena.alloc(sizes[0]), first);
    }

    #[test]
    fn prop_meta_clamp_is_valid(
        values in prop::collection::vec(-1e5..1e5f64, META_FIELD_COUNT),
        seed in any::<u64>()
    ) {
        let mut array = [0.0; META_FIELD_COUNT];
        array.copy_from_slice(&values);
        let mut params = MetaParams::from_array(&array);
        params.clamp();
        prop_assert!(params.validate().is_ok());

        let mut rng = EvoRng::new(seed);
        for _ in 0..8 {
            params.mutate(&mut rng).unwrap();
            prop_assert!(params.validate().is_ok());
        }
        for (field, value) in FIELDS.iter().zip(params.to_array()) {
            prop_assert!(value >= field.min && value <= field.max);
        }
    }

    #[test]
    fn prop_checkpoint_binary_roundtrip(
        genomes in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..48), 1..24),
        seed in any::<u64>(),
        generation in 0u64..1_000_000
    ) {
        let mut rng = EvoRng::new(seed);
        let values: Vec<f64> = genomes.iter().map(|_| rng.unit() * 100.0 - 50.0).collect();
        let mut population = population(&genomes, &values);
        population.set_generation(generation);
        population.update_stats();

        let checkpoint = Checkpoint::capture(&population, "sphere")
            .with_meta(MetaParams::default())
            .with_user_data(vec![1, 2, 3]);
        let decoded = Checkpoint::from_bytes(&checkpoint.to_bytes(false).unwrap()).unwrap();
        prop_assert_eq!(&decoded, &checkpoint);

        let restored = decoded.to_population().unwrap();
        prop_assert_eq!(restored.generation(), generation);
        prop_assert_eq!(restored.individuals(), population.individuals());
    }
}
