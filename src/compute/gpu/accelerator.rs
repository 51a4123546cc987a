//! GPU Accelerator - batched fitness evaluation on a wgpu device.

use std::collections::HashMap;

use super::GpuError;
use crate::compute::batch::{Accelerator, FitnessKernel, MAX_RECOMMENDED_BATCH, packed_stride};

// Embed shader prelude at compile time
const BATCH_FITNESS_PRELUDE: &str = include_str!("shaders/batch_fitness.wgsl");

/// Threads per workgroup in the batch fitness shader.
pub const WORKGROUP_SIZE: u32 = 64;

/// Uniform buffer struct for the batch fitness shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BatchParams {
    count: u32,
    genome_size: u32,
    words_per_genome: u32,
    _pad: u32,
}

/// A device allocation tracked against the accelerator's memory budget.
#[derive(Debug)]
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl DeviceBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Batch fitness evaluator backed by a GPU.
pub struct GpuAccelerator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
    params_buffer: wgpu::Buffer,
    memory_budget: u64,
    max_binding_size: u64,
    allocated: u64,
    max_batch_size: usize,
}

impl GpuAccelerator {
    /// Open a device and prepare the batch pipeline layout.
    ///
    /// `device_index` is advisory: wgpu selects the high-performance
    /// adapter. `max_batch_size` of 0 uses the dispatch limit.
    pub async fn new(device_index: usize, max_batch_size: usize) -> Result<Self, GpuError> {
        // 1. Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // 2. Request adapter
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let info = adapter.get_info();
        if device_index > 0 {
            log::info!(
                "Requested GPU device {}, using adapter {}",
                device_index,
                info.name
            );
        }

        // 3. Request device and queue
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Evocore GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let limits = device.limits();
        let dispatch_limit =
            limits.max_compute_workgroups_per_dimension as usize * WORKGROUP_SIZE as usize;
        let max_batch_size = if max_batch_size == 0 {
            dispatch_limit
        } else {
            max_batch_size.min(dispatch_limit)
        };

        // 4. Create bind group layout
        let bind_group_layout = create_batch_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Batch Fitness Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Batch Params"),
            size: std::mem::size_of::<BatchParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        log::info!(
            "GPU accelerator ready: {} ({:?}), max batch {}",
            info.name,
            info.backend,
            max_batch_size
        );

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            params_buffer,
            memory_budget: limits.max_buffer_size,
            max_binding_size: limits.max_storage_buffer_binding_size as u64,
            allocated: 0,
            max_batch_size,
        })
    }

    /// Device memory not yet claimed by live [`DeviceBuffer`]s.
    pub fn free_memory(&self) -> u64 {
        self.memory_budget.saturating_sub(self.allocated)
    }

    pub fn total_memory(&self) -> u64 {
        self.memory_budget
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Allocate a storage buffer of at least `size` bytes.
    pub fn malloc(&mut self, size: u64) -> Result<DeviceBuffer, GpuError> {
        let size = size.max(4).div_ceil(4) * 4;
        if size > self.free_memory() {
            return Err(GpuError::OutOfDeviceMemory {
                requested: size,
                available: self.free_memory(),
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Evocore Device Buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.allocated += size;
        Ok(DeviceBuffer { buffer, size })
    }

    /// Release a buffer and return its size to the budget.
    pub fn free(&mut self, buffer: DeviceBuffer) {
        self.allocated = self.allocated.saturating_sub(buffer.size);
        buffer.buffer.destroy();
    }

    /// Upload `data` to the start of `dst`. Short writes are zero-padded to
    /// a multiple of 4 bytes.
    pub fn memcpy_h2d(&self, dst: &DeviceBuffer, data: &[u8]) -> Result<(), GpuError> {
        let padded_len = data.len().div_ceil(4) * 4;
        if padded_len as u64 > dst.size {
            return Err(GpuError::InvalidCopy(format!(
                "{} bytes into a {} byte buffer",
                data.len(),
                dst.size
            )));
        }
        if padded_len == data.len() {
            self.queue.write_buffer(&dst.buffer, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_len, 0);
            self.queue.write_buffer(&dst.buffer, 0, &padded);
        }
        Ok(())
    }

    /// Download the first `len` bytes of `src`.
    pub fn memcpy_d2h(&self, src: &DeviceBuffer, len: usize) -> Result<Vec<u8>, GpuError> {
        if len as u64 > src.size {
            return Err(GpuError::InvalidCopy(format!(
                "{} bytes from a {} byte buffer",
                len, src.size
            )));
        }
        let copy_size = (len.div_ceil(4) * 4).max(4) as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Evocore Staging Buffer"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &staging, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = self.read_staging(&staging, len)?;
        staging.destroy();
        Ok(bytes)
    }

    /// Map a staging buffer and copy out `len` bytes.
    fn read_staging(&self, staging: &wgpu::Buffer, len: usize) -> Result<Vec<u8>, GpuError> {
        let buffer_slice = staging.slice(..);

        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        rx.recv()
            .map_err(|_| GpuError::Readback("map callback dropped".into()))??;

        let bytes = {
            let data = buffer_slice.get_mapped_range();
            data[..len].to_vec()
        };
        staging.unmap();
        Ok(bytes)
    }

    /// Compiled pipeline for `kernel`, building it on first use.
    fn pipeline(&mut self, kernel: &FitnessKernel) -> &wgpu::ComputePipeline {
        let device = &self.device;
        let layout = &self.pipeline_layout;
        self.pipelines
            .entry(kernel.label().to_string())
            .or_insert_with(|| {
                log::debug!("Compiling fitness kernel {}", kernel.label());
                let source = format!("{}\n{}", BATCH_FITNESS_PRELUDE, kernel.source());
                let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(kernel.label()),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.label()),
                    layout: Some(layout),
                    module: &shader,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
    }

    fn dispatch(
        &mut self,
        genomes: &DeviceBuffer,
        scores: &DeviceBuffer,
        count: usize,
        genome_size: usize,
        kernel: &FitnessKernel,
    ) {
        let params = BatchParams {
            count: count as u32,
            genome_size: genome_size as u32,
            words_per_genome: (packed_stride(genome_size) / 4) as u32,
            _pad: 0,
        };
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        // Populate the cache before borrowing the rest of self.
        self.pipeline(kernel);
        let Some(pipeline) = self.pipelines.get(kernel.label()) else {
            return;
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Batch Fitness Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: genomes.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scores.buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Batch Fitness Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Batch Fitness Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups((count as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Accelerator for GpuAccelerator {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn can_fit(&self, count: usize, genome_size: usize) -> bool {
        if count == 0 || count > self.max_batch_size {
            return false;
        }
        let packed = (count * packed_stride(genome_size)) as u64;
        let scores = (count * 4) as u64;
        packed <= self.max_binding_size
            && (count * genome_size * 2) as u64 + scores <= self.free_memory()
    }

    fn evaluate(
        &mut self,
        packed: &[u8],
        count: usize,
        genome_size: usize,
        kernel: &FitnessKernel,
    ) -> Result<Vec<f32>, GpuError> {
        let stride = packed_stride(genome_size);
        if packed.len() != count * stride {
            return Err(GpuError::InvalidCopy(format!(
                "packed batch is {} bytes, expected {}",
                packed.len(),
                count * stride
            )));
        }

        let genome_buffer = self.malloc(packed.len() as u64)?;
        let score_buffer = match self.malloc((count * 4) as u64) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.free(genome_buffer);
                return Err(e);
            }
        };

        let result = self
            .memcpy_h2d(&genome_buffer, packed)
            .and_then(|()| {
                self.dispatch(&genome_buffer, &score_buffer, count, genome_size, kernel);
                self.memcpy_d2h(&score_buffer, count * 4)
            });

        self.free(genome_buffer);
        self.free(score_buffer);

        let bytes = result?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn synchronize(&self) -> Result<(), GpuError> {
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        Ok(())
    }

    fn recommend_batch_size(&self, genome_size: usize) -> usize {
        let per_genome = (2 * genome_size.max(1)) as u64;
        ((self.free_memory() / per_genome) as usize)
            .min(self.max_batch_size)
            .clamp(1, MAX_RECOMMENDED_BATCH)
    }
}

impl std::fmt::Debug for GpuAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuAccelerator")
            .field("adapter", &self.adapter_name)
            .field("memory_budget", &self.memory_budget)
            .field("allocated", &self.allocated)
            .field("kernels", &self.pipelines.len())
            .finish()
    }
}

fn create_batch_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Batch Fitness Bind Group Layout"),
        entries: &[
            // Params
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Packed genomes
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Scores
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::batch::{BatchFitness, ByteMatchCount, WeightedByteSum};

    fn accelerator() -> Option<GpuAccelerator> {
        match pollster::block_on(GpuAccelerator::new(0, 0)) {
            Ok(acc) => Some(acc),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU accelerator: {}", e),
        }
    }

    fn packed_batch(count: usize, genome_size: usize) -> (Vec<Vec<u8>>, Vec<u8>) {
        let stride = packed_stride(genome_size);
        let genomes: Vec<Vec<u8>> = (0..count)
            .map(|i| {
                (0..genome_size)
                    .map(|j| ((i * 17 + j * 29) % 256) as u8)
                    .collect()
            })
            .collect();
        let mut packed = vec![0u8; count * stride];
        for (slot, g) in packed.chunks_exact_mut(stride).zip(&genomes) {
            slot[..genome_size].copy_from_slice(g);
        }
        (genomes, packed)
    }

    #[test]
    fn test_memcpy_roundtrip() {
        let Some(mut acc) = accelerator() else {
            return;
        };
        let buffer = acc.malloc(10).unwrap();
        assert_eq!(buffer.size(), 12);
        acc.memcpy_h2d(&buffer, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        let back = acc.memcpy_d2h(&buffer, 10).unwrap();
        assert_eq!(back, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        let before = acc.free_memory();
        acc.free(buffer);
        assert_eq!(acc.free_memory(), before + 12);
    }

    #[test]
    fn test_malloc_over_budget() {
        let Some(mut acc) = accelerator() else {
            return;
        };
        let too_big = acc.total_memory() + 4;
        assert!(matches!(
            acc.malloc(too_big),
            Err(GpuError::OutOfDeviceMemory { .. })
        ));
    }

    #[test]
    fn test_gpu_cpu_equivalence() {
        let Some(mut acc) = accelerator() else {
            return;
        };
        let (genomes, packed) = packed_batch(300, 37);

        for fitness in [
            Box::new(WeightedByteSum::default()) as Box<dyn BatchFitness>,
            Box::new(ByteMatchCount::new(0x55)),
        ] {
            let kernel = fitness.kernel().unwrap().clone();
            let scores = acc.evaluate(&packed, 300, 37, &kernel).unwrap();
            assert_eq!(scores.len(), 300);
            for (g, score) in genomes.iter().zip(&scores) {
                assert_eq!(*score as f64, fitness.evaluate(g));
            }
        }
    }
}
