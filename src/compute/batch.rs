//! Batch fitness evaluation across an accelerator or a CPU worker pool.
//!
//! # Overview
//!
//! [`BatchEvaluator::evaluate`] scores a batch of equally sized genomes and
//! writes one fitness per genome, in input order. Routing:
//!
//! | Condition | Path |
//! |---|---|
//! | accelerator disabled, absent, no kernel, or batch does not fit | CPU |
//! | accelerator enabled and batch fits | accelerator, CPU on any error |
//!
//! The CPU path splits the batch into `ceil(count / threads)` chunks on a
//! rayon pool; every worker owns a disjoint slice of the output.
//!
//! The accelerator path needs a device form of the fitness function, a
//! [`FitnessKernel`]. Plain closures have none and always run on the CPU.
//!
//! # Example
//!
//! ```rust
//! use evocore::compute::BatchEvaluator;
//!
//! let genomes: Vec<Vec<u8>> = (0..64u8).map(|i| vec![i; 16]).collect();
//! let views: Vec<&[u8]> = genomes.iter().map(|g| g.as_slice()).collect();
//! let mut scores = vec![0.0; views.len()];
//!
//! let mut evaluator = BatchEvaluator::new(4).unwrap();
//! let fitness = |g: &[u8]| g.iter().map(|&b| b as f64).sum::<f64>();
//! let result = evaluator.evaluate(&views, &mut scores, &fitness).unwrap();
//!
//! assert_eq!(result.evaluated, 64);
//! assert_eq!(scores[2], 32.0);
//! ```

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{EvoError, Result};

use super::arena::Arena;
use super::gpu::GpuError;

/// Batches at or below this size are evaluated on the calling thread.
pub const PARALLEL_THRESHOLD: usize = 10;

/// Upper bound on detected worker threads.
pub const MAX_DETECTED_THREADS: usize = 16;

/// Batch size suggested when no accelerator is present.
pub const DEFAULT_CPU_BATCH_SIZE: usize = 100;

/// Largest batch an accelerator recommends.
pub const MAX_RECOMMENDED_BATCH: usize = 10_000;

/// WGSL source of a device fitness function.
///
/// `source` must define `fn fitness(genome: u32, len: u32) -> f32`. It may
/// call `genome_byte(genome, i)` to read byte `i` of genome number `genome`.
/// The CPU form of the same function must produce identical values for the
/// two paths to be interchangeable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitnessKernel {
    label: String,
    source: String,
}

impl FitnessKernel {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }

    /// Counts bytes equal to `target`.
    pub fn byte_match(target: u8) -> Self {
        Self::new(
            format!("byte_match_{:02x}", target),
            format!(
                "fn fitness(genome: u32, len: u32) -> f32 {{
    var count: u32 = 0u;
    for (var i: u32 = 0u; i < len; i = i + 1u) {{
        if (genome_byte(genome, i) == {}u) {{
            count = count + 1u;
        }}
    }}
    return f32(count);
}}
",
                target
            ),
        )
    }

    /// Sum of `byte[i] * (i % 7 + 1)`.
    pub fn weighted_byte_sum() -> Self {
        Self::new(
            "weighted_byte_sum",
            "fn fitness(genome: u32, len: u32) -> f32 {
    var total: u32 = 0u;
    for (var i: u32 = 0u; i < len; i = i + 1u) {
        total = total + genome_byte(genome, i) * (i % 7u + 1u);
    }
    return f32(total);
}
",
        )
    }

    /// Cache key for compiled pipelines.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A fitness function the batch evaluator can run.
pub trait BatchFitness: Sync {
    /// CPU evaluation of one genome.
    fn evaluate(&self, genome: &[u8]) -> f64;

    /// Device form, if any.
    fn kernel(&self) -> Option<&FitnessKernel> {
        None
    }
}

impl<F> BatchFitness for F
where
    F: Fn(&[u8]) -> f64 + Sync,
{
    fn evaluate(&self, genome: &[u8]) -> f64 {
        self(genome)
    }
}

/// Count of bytes equal to a target; runs on both paths.
#[derive(Debug, Clone)]
pub struct ByteMatchCount {
    target: u8,
    kernel: FitnessKernel,
}

impl ByteMatchCount {
    pub fn new(target: u8) -> Self {
        Self {
            target,
            kernel: FitnessKernel::byte_match(target),
        }
    }
}

impl BatchFitness for ByteMatchCount {
    fn evaluate(&self, genome: &[u8]) -> f64 {
        genome.iter().filter(|&&b| b == self.target).count() as f64
    }

    fn kernel(&self) -> Option<&FitnessKernel> {
        Some(&self.kernel)
    }
}

/// Position-weighted byte sum; runs on both paths.
///
/// Values stay exact in `f32` for genomes up to 9 KiB.
#[derive(Debug, Clone)]
pub struct WeightedByteSum {
    kernel: FitnessKernel,
}

impl Default for WeightedByteSum {
    fn default() -> Self {
        Self {
            kernel: FitnessKernel::weighted_byte_sum(),
        }
    }
}

impl BatchFitness for WeightedByteSum {
    fn evaluate(&self, genome: &[u8]) -> f64 {
        genome
            .iter()
            .enumerate()
            .map(|(i, &b)| b as u64 * (i as u64 % 7 + 1))
            .sum::<u64>() as f64
    }

    fn kernel(&self) -> Option<&FitnessKernel> {
        Some(&self.kernel)
    }
}

/// Device-side evaluation strategy.
pub trait Accelerator: Send {
    /// Adapter description for logs.
    fn name(&self) -> &str;

    /// Whether `count` genomes of `genome_size` bytes fit in device memory.
    fn can_fit(&self, count: usize, genome_size: usize) -> bool;

    /// Evaluate `count` genomes packed at `stride`-byte intervals
    /// (`stride` is `genome_size` rounded up to a multiple of 4).
    fn evaluate(
        &mut self,
        packed: &[u8],
        count: usize,
        genome_size: usize,
        kernel: &FitnessKernel,
    ) -> std::result::Result<Vec<f32>, GpuError>;

    /// Block until all submitted device work has completed.
    fn synchronize(&self) -> std::result::Result<(), GpuError>;

    /// Largest batch worth submitting for this genome size.
    fn recommend_batch_size(&self, genome_size: usize) -> usize;
}

/// Which path evaluated a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalPath {
    Cpu,
    Accelerator,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchResult {
    pub evaluated: usize,
    pub gpu_time_ms: f64,
    pub cpu_time_ms: f64,
    pub path: EvalPath,
}

/// Cumulative evaluator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_evaluations: u64,
    pub gpu_evaluations: u64,
    pub cpu_evaluations: u64,
    pub gpu_batches: u64,
    pub cpu_batches: u64,
    pub fallbacks: u64,
    pub total_gpu_time_ms: f64,
    pub total_cpu_time_ms: f64,
}

impl BatchStats {
    /// Mean accelerator time per batch.
    pub fn avg_gpu_time_ms(&self) -> f64 {
        if self.gpu_batches == 0 {
            0.0
        } else {
            self.total_gpu_time_ms / self.gpu_batches as f64
        }
    }

    /// Mean CPU time per batch.
    pub fn avg_cpu_time_ms(&self) -> f64 {
        if self.cpu_batches == 0 {
            0.0
        } else {
            self.total_cpu_time_ms / self.cpu_batches as f64
        }
    }
}

/// Number of workers for a `num_threads` setting (0 = detect).
pub fn resolve_thread_count(num_threads: usize) -> usize {
    if num_threads > 0 {
        return num_threads;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DETECTED_THREADS)
}

/// Dispatcher between the CPU pool and an optional accelerator.
pub struct BatchEvaluator {
    threads: usize,
    pool: Option<rayon::ThreadPool>,
    accelerator: Option<Box<dyn Accelerator>>,
    accelerator_enabled: bool,
    max_batch_size: usize,
    scratch: Arena<'static>,
    stats: BatchStats,
}

impl BatchEvaluator {
    /// CPU-only evaluator with `num_threads` workers (0 = detect cores).
    pub fn new(num_threads: usize) -> Result<Self> {
        let threads = resolve_thread_count(num_threads);
        let pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("evocore-eval-{}", i))
                .build()
                .map_err(|e| EvoError::invalid_arg(format!("worker pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            threads,
            pool,
            accelerator: None,
            accelerator_enabled: false,
            max_batch_size: 0,
            scratch: Arena::new(0),
            stats: BatchStats::default(),
        })
    }

    /// Attach an accelerator and enable it.
    pub fn with_accelerator(mut self, accelerator: Box<dyn Accelerator>) -> Self {
        log::info!("Batch evaluator using accelerator: {}", accelerator.name());
        self.accelerator = Some(accelerator);
        self.accelerator_enabled = true;
        self
    }

    /// Size of the host staging arena used to pack accelerator uploads.
    pub fn with_scratch_capacity(mut self, capacity: usize) -> Self {
        self.scratch = Arena::new(capacity);
        self
    }

    /// Cap on genomes per accelerator submission (0 = accelerator's choice).
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    pub fn accelerator_enabled(&self) -> bool {
        self.accelerator_enabled && self.accelerator.is_some()
    }

    pub fn set_accelerator_enabled(&mut self, enabled: bool) {
        self.accelerator_enabled = enabled;
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BatchStats::default();
    }

    /// Wait for outstanding device work.
    pub fn synchronize(&self) -> Result<()> {
        if let Some(acc) = &self.accelerator {
            acc.synchronize()?;
        }
        Ok(())
    }

    /// Batch size to aim for with genomes of `genome_size` bytes.
    pub fn recommend_batch_size(&self, genome_size: usize) -> usize {
        match &self.accelerator {
            Some(acc) if self.accelerator_enabled => {
                let recommended = acc.recommend_batch_size(genome_size);
                if self.max_batch_size > 0 {
                    recommended.min(self.max_batch_size)
                } else {
                    recommended
                }
            }
            _ => DEFAULT_CPU_BATCH_SIZE,
        }
    }

    fn accelerator_fits(&self, count: usize, genome_size: usize) -> bool {
        if !self.accelerator_enabled || genome_size == 0 {
            return false;
        }
        if self.max_batch_size > 0 && count > self.max_batch_size {
            return false;
        }
        self.accelerator
            .as_ref()
            .is_some_and(|acc| acc.can_fit(count, genome_size))
    }

    /// Score `genomes` into `out`. All genomes must have the same size.
    pub fn evaluate<F>(
        &mut self,
        genomes: &[&[u8]],
        out: &mut [f64],
        fitness: &F,
    ) -> Result<BatchResult>
    where
        F: BatchFitness + ?Sized,
    {
        if genomes.len() != out.len() {
            return Err(EvoError::invalid_arg(format!(
                "{} genomes but {} output slots",
                genomes.len(),
                out.len()
            )));
        }
        let count = genomes.len();
        let genome_size = genomes.first().map_or(0, |g| g.len());
        if genomes.iter().any(|g| g.len() != genome_size) {
            return Err(EvoError::invalid_arg(
                "batch genomes must all have the same size",
            ));
        }

        if count > 0
            && let Some(kernel) = fitness.kernel()
            && self.accelerator_fits(count, genome_size)
        {
            let start = Instant::now();
            match self.evaluate_accelerated(genomes, out, genome_size, kernel) {
                Ok(()) => {
                    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                    self.stats.total_evaluations += count as u64;
                    self.stats.gpu_evaluations += count as u64;
                    self.stats.gpu_batches += 1;
                    self.stats.total_gpu_time_ms += elapsed;
                    return Ok(BatchResult {
                        evaluated: count,
                        gpu_time_ms: elapsed,
                        cpu_time_ms: 0.0,
                        path: EvalPath::Accelerator,
                    });
                }
                Err(e) => {
                    self.stats.fallbacks += 1;
                    log::warn!("Accelerator evaluation failed, using CPU: {}", e);
                }
            }
        }

        let start = Instant::now();
        self.evaluate_cpu(genomes, out, fitness);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        self.stats.total_evaluations += count as u64;
        self.stats.cpu_evaluations += count as u64;
        self.stats.cpu_batches += 1;
        self.stats.total_cpu_time_ms += elapsed;

        Ok(BatchResult {
            evaluated: count,
            gpu_time_ms: 0.0,
            cpu_time_ms: elapsed,
            path: EvalPath::Cpu,
        })
    }

    /// CPU path: equal chunks across the worker pool.
    fn evaluate_cpu<F>(&self, genomes: &[&[u8]], out: &mut [f64], fitness: &F)
    where
        F: BatchFitness + ?Sized,
    {
        let count = genomes.len();
        if self.pool.is_none() || count <= PARALLEL_THRESHOLD {
            for (slot, genome) in out.iter_mut().zip(genomes) {
                *slot = fitness.evaluate(genome);
            }
            return;
        }

        let chunk = count.div_ceil(self.threads);
        let mut run = || {
            out.par_chunks_mut(chunk)
                .zip(genomes.par_chunks(chunk))
                .for_each(|(slots, batch)| {
                    for (slot, genome) in slots.iter_mut().zip(batch) {
                        *slot = fitness.evaluate(genome);
                    }
                });
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Accelerator path: pack, upload once, dispatch, read back.
    fn evaluate_accelerated(
        &mut self,
        genomes: &[&[u8]],
        out: &mut [f64],
        genome_size: usize,
        kernel: &FitnessKernel,
    ) -> std::result::Result<(), GpuError> {
        let stride = packed_stride(genome_size);
        let total = stride * genomes.len();

        self.scratch.reset();
        let heap;
        let packed: &[u8] = match self.scratch.calloc(total) {
            Some(block) => {
                pack_genomes(genomes, stride, self.scratch.slice_mut(block));
                self.scratch.slice(block)
            }
            None => {
                let mut buf = vec![0u8; total];
                pack_genomes(genomes, stride, &mut buf);
                heap = buf;
                &heap
            }
        };

        let accelerator = self.accelerator.as_mut().ok_or(GpuError::NoAdapter)?;
        let scores = accelerator.evaluate(packed, genomes.len(), genome_size, kernel)?;
        if scores.len() != out.len() {
            return Err(GpuError::Readback(format!(
                "expected {} scores, device returned {}",
                out.len(),
                scores.len()
            )));
        }

        for (slot, score) in out.iter_mut().zip(scores) {
            *slot = score as f64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvaluator")
            .field("threads", &self.threads)
            .field("accelerator", &self.accelerator.as_ref().map(|a| a.name()))
            .field("accelerator_enabled", &self.accelerator_enabled)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Genome size rounded up to whole 32-bit words.
pub fn packed_stride(genome_size: usize) -> usize {
    genome_size.div_ceil(4).max(1) * 4
}

/// Copy genomes into `dst` at `stride`-byte intervals. Padding is left as is.
fn pack_genomes(genomes: &[&[u8]], stride: usize, dst: &mut [u8]) {
    for (slot, genome) in dst.chunks_exact_mut(stride).zip(genomes) {
        slot[..genome.len()].copy_from_slice(genome);
    }
}
