//! Synthetic coefficients and vectors, and matrix setup for a variant.

use std::sync::Arc;

use spmv_core::{BlockSize, Matrix, MatrixKind, MatrixStructure, SpmvError};

use crate::config::{MeshInput, TunerConfig};
use crate::variant::VariantRecord;

/// Diagonal block size used for block operations.
pub const BLOCK_SIZE: [usize; 4] = [3, 3, 3, 9];

/// Arrays sized for both scalar and 3x3 block products.
#[derive(Debug, Clone)]
pub(crate) struct Workload {
    pub da: Vec<f64>,
    /// Interleaved pairs; the symmetric case reads the first `n_faces` values.
    pub xa: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Workload {
    /// Smooth values used when timing.
    pub fn for_timing(mesh: &MeshInput<'_>) -> Self {
        let n_ext = mesh.n_cells_ext();
        let n_faces = mesh.n_faces();
        let [_, vs, _, bs] = BLOCK_SIZE;
        let mut xa = vec![0.0; 2 * n_faces];
        for (f, pair) in xa.chunks_exact_mut(2).enumerate() {
            let v = 0.5 * (1.0 + f as f64 / n_faces as f64);
            pair[0] = v;
            pair[1] = -v;
        }
        Self {
            da: (0..n_ext * bs).map(|i| 1.0 + i as f64 / n_ext as f64).collect(),
            xa,
            x: (0..n_ext * vs).map(|i| i as f64 / n_ext as f64).collect(),
            y: vec![0.0; n_ext * vs],
        }
    }

    /// Oscillating values used when checking variants against each other.
    pub fn for_check(mesh: &MeshInput<'_>) -> Self {
        let n_ext = mesh.n_cells_ext();
        let n_faces = mesh.n_faces();
        let [_, vs, _, bs] = BLOCK_SIZE;
        let mut xa = vec![0.0; 2 * n_faces];
        for (f, pair) in xa.chunks_exact_mut(2).enumerate() {
            let v = 0.5 * (0.9 + (f as f64).cos());
            pair[0] = v;
            pair[1] = -v;
        }
        Self {
            da: (0..n_ext * bs).map(|i| 1.0 + (i as f64).cos()).collect(),
            xa,
            x: (0..n_ext * vs).map(|i| (i as f64).sin()).collect(),
            y: vec![0.0; n_ext * vs],
        }
    }
}

pub(crate) fn block_size(block: bool) -> Result<BlockSize, SpmvError> {
    if block {
        BlockSize::from_array(BLOCK_SIZE)
    } else {
        Ok(BlockSize::SCALAR)
    }
}

pub(crate) fn create_structure(
    kind: MatrixKind,
    mesh: &MeshInput<'_>,
) -> Result<Arc<MatrixStructure>, SpmvError> {
    let structure = MatrixStructure::create(
        kind,
        true,
        &mesh.connectivity,
        mesh.halo.clone(),
        mesh.numbering.clone(),
    )?;
    Ok(Arc::new(structure))
}

/// Creates a matrix running `record`'s kernels.
pub(crate) fn create_matrix<'a>(
    structure: &Arc<MatrixStructure>,
    record: &VariantRecord,
    config: &TunerConfig,
) -> Matrix<'a> {
    let mut m = Matrix::create_tuned(structure.clone(), &record.variant);
    attach(&mut m, config);
    m
}

#[cfg(feature = "gpu")]
fn attach(m: &mut Matrix<'_>, config: &TunerConfig) {
    if let Some(accelerator) = &config.accelerator {
        m.attach_accelerator(accelerator.clone());
    }
}

#[cfg(not(feature = "gpu"))]
fn attach(_m: &mut Matrix<'_>, _config: &TunerConfig) {}
