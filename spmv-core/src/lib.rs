//! # SpMV Core Library
//!
//! Sparse matrix structures built from face connectivity, coefficient
//! storage in several layouts, and the matrix-vector product kernels.

#[cfg(feature = "native")]
mod atomic;
pub mod block;
pub mod coeffs;
pub mod comm;
pub mod error;
pub mod halo;
pub mod kernels;
pub mod matrix;
pub mod numbering;
mod sort;
pub mod structure;
pub mod traits;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use block::BlockSize;
pub use comm::{Collective, SingleRank};
pub use error::SpmvError;
pub use halo::{GhostSource, Halo, HaloType, PeriodicHalo, RotationMode};
pub use kernels::{Kernel, DEFAULT_LOOP_LENGTH};
pub use matrix::{slot, Matrix, MatrixVariant};
pub use numbering::{FaceRenumbering, ThreadNumbering};
pub use structure::{CsrStructure, MatrixKind, MatrixStructure, MeshConnectivity, StructureData};
pub use traits::Operator;

#[cfg(feature = "gpu")]
pub use gpu::GpuAccelerator;
