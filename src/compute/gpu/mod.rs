//! GPU batch evaluation backend using WebGPU (wgpu).

mod accelerator;

pub use accelerator::{DeviceBuffer, GpuAccelerator, WORKGROUP_SIZE};

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("Out of device memory: requested {requested} bytes, {available} available")]
    OutOfDeviceMemory { requested: u64, available: u64 },

    #[error("Invalid copy: {0}")]
    InvalidCopy(String),

    #[error("Readback failed: {0}")]
    Readback(String),
}
