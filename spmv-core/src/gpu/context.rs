use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytemuck::Pod;
use cfg_if::cfg_if;
use wgpu::{util::DeviceExt, PollType};

use crate::error::SpmvError;

/// WGPU device and queue, with host/device transfer counters.
#[derive(Debug, Clone)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    /// Bytes uploaded through the instrumented helpers.
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    /// Bytes read back through the instrumented helpers.
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
}

impl GpuContext {
    /// Requests a high-performance adapter with 64-bit float shader support.
    pub(crate) async fn new() -> Result<Self, SpmvError> {
        log::info!("Initializing WGPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| SpmvError::WgpuInitError("No suitable adapter found".to_string()))?;

        log::info!("Selected adapter: {:?}", adapter.get_info());

        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            return Err(SpmvError::WgpuInitError(
                "Adapter does not support 64-bit floats in shaders".to_string(),
            ));
        }

        let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
        // row index, column ids, values, x and y
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(5);
        log::debug!("Requested limits: {:?}", limits);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("spmv device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::SHADER_F64,
                required_limits: limits,
            })
            .await
            .map_err(|e| SpmvError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        log::debug!("Device features: {:?}", device.features());

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
        })
    }

    pub(crate) fn create_gpu_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let byte_len = contents.len() as u64;
        log::trace!("Creating GPU buffer '{}' with {} bytes", label, byte_len);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.bytes_to_gpu.fetch_add(byte_len, Ordering::Relaxed);
        buffer
    }

    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::trace!("Creating empty GPU buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Reads `element_count` values of `buffer` back to the host.
    pub(crate) async fn read_buffer_to_cpu<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        element_count: usize,
    ) -> Result<Vec<T>, SpmvError> {
        let size_bytes = (element_count * std::mem::size_of::<T>()) as u64;
        if size_bytes == 0 {
            return Ok(Vec::new());
        }
        if buffer.size() < size_bytes {
            return Err(SpmvError::Internal(format!(
                "GPU buffer size ({}) is smaller than the requested read ({})",
                buffer.size(),
                size_bytes
            )));
        }

        let staging_buffer = self.create_empty_buffer(
            "spmv readback staging",
            size_bytes,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("spmv readback encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging_buffer, 0, size_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if let Err(e) = sender.send(result) {
                log::error!("Failed to send map result back: {:?}", e);
            }
        });
        self.bytes_from_gpu.fetch_add(size_bytes, Ordering::Relaxed);

        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                let _ = self.device.poll(PollType::Wait);
            }
        }

        match receiver.await {
            Ok(Ok(())) => {
                let result = {
                    let data = buffer_slice.get_mapped_range();
                    bytemuck::cast_slice::<u8, T>(&data).to_vec()
                };
                staging_buffer.unmap();
                Ok(result)
            }
            Ok(Err(e)) => Err(SpmvError::WgpuError(format!("Buffer mapping failed: {}", e))),
            Err(_) => Err(SpmvError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    pub(crate) fn get_transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
    }
}
