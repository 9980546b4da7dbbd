//! WGPU-backed accelerated CSR products.

mod context;
mod ops;

use std::sync::Arc;

use crate::error::SpmvError;
use context::GpuContext;
use ops::SpmvPipeline;

/// A GPU device able to run the accelerated kernels.
///
/// Cloning shares the device; attach one to any number of matrices.
#[derive(Debug, Clone)]
pub struct GpuAccelerator {
    context: Arc<GpuContext>,
    pipeline: Arc<SpmvPipeline>,
}

impl GpuAccelerator {
    pub async fn new() -> Result<Self, SpmvError> {
        let context = GpuContext::new().await?;
        let pipeline = SpmvPipeline::new(&context);
        log::info!("GPU accelerator created");
        Ok(Self {
            context: Arc::new(context),
            pipeline: Arc::new(pipeline),
        })
    }

    /// Blocking version of [`GpuAccelerator::new`].
    pub fn new_blocking() -> Result<Self, SpmvError> {
        pollster::block_on(Self::new())
    }

    /// Bytes transferred as (to device, from device).
    pub fn transfer_stats(&self) -> (u64, u64) {
        self.context.get_transfer_stats()
    }

    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats()
    }

    /// `y = A.x`, blocking until the result is back on the host.
    pub(crate) fn spmv_csr(
        &self,
        row_index: &[usize],
        col_id: &[usize],
        values: &[f64],
        x: &[f64],
        y: &mut [f64],
    ) -> Result<(), SpmvError> {
        pollster::block_on(ops::spmv_csr(
            &self.context,
            &self.pipeline,
            row_index,
            col_id,
            values,
            x,
            y,
        ))
    }
}
