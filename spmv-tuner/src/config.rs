use std::sync::Arc;
use std::time::Duration;

use spmv_core::{Halo, MeshConnectivity, ThreadNumbering};

#[cfg(feature = "gpu")]
use spmv_core::GpuAccelerator;

use crate::error::TunerError;

/// Parameters of a tuning run.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Minimum wall-clock time of each measurement.
    pub t_measure: Duration,
    /// Weight of the symmetric case, in `[0, 1]`.
    pub sym_weight: f64,
    /// Weight of the block case, in `[0, 1]`.
    pub block_weight: f64,
    /// Expected number of products per coefficient assignment, used to
    /// amortize the assignment cost. Ignored outside `1..10000`.
    pub n_min_products: usize,
    /// Device for the accelerated variants; they are skipped without one.
    #[cfg(feature = "gpu")]
    pub accelerator: Option<GpuAccelerator>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            t_measure: Duration::from_millis(100),
            sym_weight: 0.5,
            block_weight: 0.0,
            n_min_products: 50,
            #[cfg(feature = "gpu")]
            accelerator: None,
        }
    }
}

impl TunerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(
        t_measure: Duration,
        sym_weight: f64,
        block_weight: f64,
        n_min_products: usize,
    ) -> Self {
        Self {
            t_measure,
            sym_weight,
            block_weight,
            n_min_products,
            ..Self::default()
        }
    }

    #[cfg(feature = "gpu")]
    pub fn with_accelerator(mut self, accelerator: GpuAccelerator) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    pub fn validate(&self) -> Result<(), TunerError> {
        for (name, w) in [("sym_weight", self.sym_weight), ("block_weight", self.block_weight)] {
            if !(0.0..=1.0).contains(&w) {
                return Err(TunerError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }

    /// Amortized assignment cost per product, or zero when not amortized.
    pub(crate) fn overhead(&self, assign_cost: f64) -> f64 {
        if assign_cost > 0.0 && self.n_min_products > 0 && self.n_min_products < 10000 {
            assign_cost / self.n_min_products as f64
        } else {
            0.0
        }
    }

    pub(crate) fn has_accelerator(&self) -> bool {
        #[cfg(feature = "gpu")]
        {
            self.accelerator.is_some()
        }
        #[cfg(not(feature = "gpu"))]
        {
            false
        }
    }
}

/// The local mesh a run builds its matrices on.
#[derive(Debug, Clone)]
pub struct MeshInput<'m> {
    pub connectivity: MeshConnectivity<'m>,
    pub halo: Option<Arc<dyn Halo>>,
    pub numbering: Option<ThreadNumbering>,
}

impl<'m> MeshInput<'m> {
    pub fn new(connectivity: MeshConnectivity<'m>) -> Self {
        Self {
            connectivity,
            halo: None,
            numbering: None,
        }
    }

    pub fn with_halo(mut self, halo: Arc<dyn Halo>) -> Self {
        self.halo = Some(halo);
        self
    }

    pub fn with_numbering(mut self, numbering: ThreadNumbering) -> Self {
        self.numbering = Some(numbering);
        self
    }

    pub fn n_cells(&self) -> usize {
        self.connectivity.n_cells
    }

    pub fn n_cells_ext(&self) -> usize {
        self.connectivity.n_cells_ext
    }

    pub fn n_faces(&self) -> usize {
        self.connectivity.face_cell.len()
    }

    pub(crate) fn check(&self) -> Result<(), TunerError> {
        if self.n_cells() == 0 {
            return Err(TunerError::EmptyMesh("no local cells".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_validated() {
        assert!(TunerConfig::default().validate().is_ok());
        let c = TunerConfig::with_params(Duration::from_millis(1), 1.5, 0.0, 10);
        assert!(matches!(c.validate(), Err(TunerError::InvalidConfig(_))));
    }

    #[test]
    fn test_overhead_amortization_window() {
        let mut c = TunerConfig::new();
        c.n_min_products = 10;
        assert_eq!(c.overhead(2.0), 0.2);
        c.n_min_products = 0;
        assert_eq!(c.overhead(2.0), 0.0);
        c.n_min_products = 10000;
        assert_eq!(c.overhead(2.0), 0.0);
    }
}
