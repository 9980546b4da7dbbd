//! Matrix facade: a structure, its coefficients and the product kernels.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::BlockSize;
use crate::coeffs::{Assignment, Coefficients, Values};
use crate::error::SpmvError;
use crate::halo::{pre_multiply_sync, RotationMode};
use crate::kernels::{Kernel, KernelInput, DEFAULT_LOOP_LENGTH};
use crate::structure::{MatrixKind, MatrixStructure};
use crate::traits::Operator;

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;

/// Index of the kernel slot for a product flavor.
pub fn slot(block: bool, exclude_diag: bool) -> usize {
    usize::from(block) * 2 + usize::from(exclude_diag)
}

/// A kernel choice for each product flavor, as produced by tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixVariant {
    pub name: String,
    pub kind: MatrixKind,
    pub loop_length: usize,
    /// Indexed by [`slot`].
    pub kernels: [Option<Kernel>; 4],
}

impl MatrixVariant {
    pub fn new(name: impl Into<String>, kind: MatrixKind) -> Self {
        Self {
            name: name.into(),
            kind,
            loop_length: 0,
            kernels: [None; 4],
        }
    }

    pub fn kernel(&self, block: bool, exclude_diag: bool) -> Option<Kernel> {
        self.kernels[slot(block, exclude_diag)]
    }
}

/// A sparse matrix bound to a shared structure.
///
/// Coefficients mapped with [`Matrix::set_coefficients`] are borrowed for
/// `'a`; use [`Matrix::release_coefficients`] to end the borrow while
/// keeping copied values.
#[derive(Debug)]
pub struct Matrix<'a> {
    structure: Arc<MatrixStructure>,
    block: BlockSize,
    loop_length: usize,
    rotation_mode: RotationMode,
    coeffs: Coefficients<'a>,
    kernels: [Option<Kernel>; 4],
    #[cfg(feature = "gpu")]
    accelerator: Option<GpuAccelerator>,
}

impl<'a> Matrix<'a> {
    /// Creates a matrix with the default kernels of the structure's kind.
    pub fn create(structure: Arc<MatrixStructure>) -> Self {
        let kind = structure.kind();
        let loop_length = DEFAULT_LOOP_LENGTH;
        let [scalar, block] = Kernel::defaults(kind, structure.numbering().is_some(), loop_length);

        let exdiag = |k: Option<Kernel>, is_block: bool| match k {
            Some(k) if k.supports_exclude_diag() => Some(k),
            Some(_) => Kernel::baseline(kind, is_block),
            None => None,
        };
        let kernels = [scalar, exdiag(scalar, false), block, exdiag(block, true)];

        log::debug!(
            "Created {} matrix, kernels: {}",
            kind,
            kernels
                .iter()
                .map(|k| k.map_or("none", |k| k.name()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            coeffs: Coefficients::new(kind),
            structure,
            block: BlockSize::SCALAR,
            loop_length,
            rotation_mode: RotationMode::default(),
            kernels,
            #[cfg(feature = "gpu")]
            accelerator: None,
        }
    }

    /// Creates a matrix using the kernels of a tuned variant.
    ///
    /// A variant of another kind is ignored and the defaults are kept.
    pub fn create_tuned(structure: Arc<MatrixStructure>, variant: &MatrixVariant) -> Self {
        let mut m = Self::create(structure);
        if variant.kind != m.kind() {
            log::debug!(
                "Variant '{}' is for {} matrices, keeping {} defaults",
                variant.name,
                variant.kind,
                m.kind()
            );
            return m;
        }
        let prefetching = variant.kernels.iter().flatten().any(|k| k.uses_loop_length());
        if variant.loop_length == 0 && prefetching {
            log::debug!(
                "Variant '{}' prefetches with no loop length, keeping {}",
                variant.name,
                m.loop_length
            );
        } else {
            m.loop_length = variant.loop_length;
        }
        for (slot, k) in m.kernels.iter_mut().zip(&variant.kernels) {
            if k.is_some() {
                *slot = *k;
            }
        }
        m
    }

    pub fn structure(&self) -> &Arc<MatrixStructure> {
        &self.structure
    }

    pub fn kind(&self) -> MatrixKind {
        self.structure.kind()
    }

    pub fn n_rows(&self) -> usize {
        self.structure.n_rows()
    }

    pub fn n_columns(&self) -> usize {
        self.structure.n_columns()
    }

    /// Diagonal block size of the assigned coefficients.
    pub fn diag_block_size(&self) -> Result<BlockSize, SpmvError> {
        match self.kind() {
            MatrixKind::Native | MatrixKind::Msr => Ok(self.block),
            kind => Err(SpmvError::UnsupportedForKind {
                operation: "diag_block_size",
                kind,
            }),
        }
    }

    pub fn loop_length(&self) -> usize {
        self.loop_length
    }

    /// Rows (or faces) per cache block in the blocked and prefetching kernels.
    ///
    /// Zero is refused while a prefetching kernel is installed.
    pub fn set_loop_length(&mut self, loop_length: usize) -> Result<(), SpmvError> {
        if loop_length == 0 {
            if let Some(k) = self.kernels.iter().flatten().find(|k| k.uses_loop_length()) {
                return Err(SpmvError::UnsupportedOperation(format!(
                    "kernel {} needs a nonzero loop length",
                    k
                )));
            }
        }
        self.loop_length = loop_length;
        Ok(())
    }

    pub fn rotation_mode(&self) -> RotationMode {
        self.rotation_mode
    }

    pub fn set_rotation_mode(&mut self, mode: RotationMode) {
        self.rotation_mode = mode;
    }

    pub fn kernel(&self, block: bool, exclude_diag: bool) -> Option<Kernel> {
        self.kernels[slot(block, exclude_diag)]
    }

    /// Installs `kernel` for one product flavor.
    pub fn set_kernel(
        &mut self,
        block: bool,
        exclude_diag: bool,
        kernel: Kernel,
    ) -> Result<(), SpmvError> {
        if kernel.kind() != self.kind() {
            return Err(SpmvError::UnsupportedOperation(format!(
                "kernel {} applies to {} matrices, not {}",
                kernel,
                kernel.kind(),
                self.kind()
            )));
        }
        if !kernel.supports(block, exclude_diag) {
            return Err(SpmvError::UnsupportedOperation(format!(
                "kernel {} does not handle {}{}products",
                kernel,
                if block { "block " } else { "" },
                if exclude_diag { "diagonal-excluded " } else { "" }
            )));
        }
        if kernel.uses_loop_length() && self.loop_length == 0 {
            return Err(SpmvError::UnsupportedOperation(format!(
                "kernel {} needs a nonzero loop length",
                kernel
            )));
        }
        self.kernels[slot(block, exclude_diag)] = Some(kernel);
        Ok(())
    }

    #[cfg(feature = "gpu")]
    pub fn attach_accelerator(&mut self, accelerator: GpuAccelerator) {
        self.accelerator = Some(accelerator);
    }

    fn assign(&mut self, request: Assignment<'a, '_>) -> Result<(), SpmvError> {
        if !request.block.is_scalar() && !self.kind().supports_blocks() {
            return Err(SpmvError::UnsupportedForKind {
                operation: "block diagonal coefficients",
                kind: self.kind(),
            });
        }
        self.coeffs.assign(&self.structure, &request)?;
        self.block = request.block;
        Ok(())
    }

    /// Maps the caller's arrays where the layout allows it.
    ///
    /// Non-symmetric `xa` holds interleaved `(a_ij, a_ji)` pairs per face.
    pub fn set_coefficients(
        &mut self,
        symmetric: bool,
        block: BlockSize,
        da: Option<&'a [f64]>,
        xa: Option<&'a [f64]>,
    ) -> Result<(), SpmvError> {
        self.assign(Assignment {
            symmetric,
            interleaved: true,
            block,
            loop_length: self.loop_length,
            da: da.map(Values::Mapped),
            xa: xa.map(Values::Mapped),
        })
    }

    /// Scalar variant of [`Matrix::set_coefficients`] where non-symmetric
    /// `xa` holds all `a_ij` values followed by all `a_ji` values.
    pub fn set_coefficients_noninterleaved(
        &mut self,
        symmetric: bool,
        da: Option<&'a [f64]>,
        xa: Option<&'a [f64]>,
    ) -> Result<(), SpmvError> {
        self.assign(Assignment {
            symmetric,
            interleaved: false,
            block: BlockSize::SCALAR,
            loop_length: self.loop_length,
            da: da.map(Values::Mapped),
            xa: xa.map(Values::Mapped),
        })
    }

    /// Like [`Matrix::set_coefficients`], but always copies.
    pub fn copy_coefficients(
        &mut self,
        symmetric: bool,
        block: BlockSize,
        da: Option<&[f64]>,
        xa: Option<&[f64]>,
    ) -> Result<(), SpmvError> {
        self.assign(Assignment {
            symmetric,
            interleaved: true,
            block,
            loop_length: self.loop_length,
            da: da.map(Values::Copied),
            xa: xa.map(Values::Copied),
        })
    }

    /// Ends the borrow on mapped arrays. Copied values stay usable; mapped
    /// ones read as zero until coefficients are assigned again.
    pub fn release_coefficients<'n>(self) -> Matrix<'n> {
        let mut coeffs = self.coeffs;
        coeffs.release();
        Matrix {
            structure: self.structure,
            block: self.block,
            loop_length: self.loop_length,
            rotation_mode: self.rotation_mode,
            coeffs: coeffs.detach(),
            kernels: self.kernels,
            #[cfg(feature = "gpu")]
            accelerator: self.accelerator,
        }
    }

    /// Copies the diagonal (block diagonals: their diagonal entries) into `da`.
    pub fn get_diagonal(&self, da: &mut [f64]) -> Result<(), SpmvError> {
        self.coeffs.copy_diagonal(&self.structure, &self.block, da)
    }

    fn check_vectors(&self, x: &[f64], y: &[f64]) -> Result<(), SpmvError> {
        let needed = self.n_columns() * self.block.vector_stride;
        if x.len() < needed || y.len() < needed {
            return Err(SpmvError::InvalidDimensions(format!(
                "vectors of {} and {} values, {} required",
                x.len(),
                y.len(),
                needed
            )));
        }
        Ok(())
    }

    fn multiply(&self, exclude_diag: bool, x: &[f64], y: &mut [f64]) -> Result<(), SpmvError> {
        let block = !self.block.is_scalar();
        let kernel = self.kernel(block, exclude_diag).ok_or_else(|| {
            let what = if block { "Block matrix" } else { "Matrix" };
            SpmvError::MissingKernel(format!(
                "{} is missing a vector multiply function ({} format{}).",
                what,
                self.kind(),
                if exclude_diag { ", diagonal excluded" } else { "" }
            ))
        })?;

        let input = KernelInput {
            structure: &self.structure,
            coeffs: &self.coeffs,
            block: self.block,
            loop_length: self.loop_length,
            #[cfg(feature = "gpu")]
            accelerator: self.accelerator.as_ref(),
        };
        kernel.multiply(&input, exclude_diag, x, y)
    }

    fn sync(&self, x: &mut [f64], y: &mut [f64]) -> Result<(), SpmvError> {
        pre_multiply_sync(
            self.rotation_mode,
            self.structure.halo().map(|h| &**h),
            &self.block,
            self.n_rows(),
            self.n_columns(),
            x,
            y,
        )
    }

    /// `y = A.x`, after updating the ghost values of `x`.
    pub fn vector_multiply(&self, x: &mut [f64], y: &mut [f64]) -> Result<(), SpmvError> {
        self.check_vectors(x, y)?;
        self.sync(x, y)?;
        self.multiply(false, x, y)
    }

    /// `y = A.x`, with the ghost values of `x` already up to date.
    pub fn vector_multiply_nosync(&self, x: &[f64], y: &mut [f64]) -> Result<(), SpmvError> {
        self.check_vectors(x, y)?;
        self.multiply(false, x, y)
    }

    /// `y = (A - D).x`, after updating the ghost values of `x`.
    pub fn exdiag_vector_multiply(&self, x: &mut [f64], y: &mut [f64]) -> Result<(), SpmvError> {
        self.check_vectors(x, y)?;
        self.sync(x, y)?;
        self.multiply(true, x, y)
    }
}

impl Operator for Matrix<'_> {
    fn dims(&self) -> (usize, usize) {
        (self.n_rows(), self.n_columns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::MeshConnectivity;

    const CHAIN: [[usize; 2]; 2] = [[1, 2], [2, 3]];

    fn chain_structure(kind: MatrixKind) -> Arc<MatrixStructure> {
        let mesh = MeshConnectivity::new(3, 3, &CHAIN);
        Arc::new(MatrixStructure::create(kind, true, &mesh, None, None).unwrap())
    }

    #[test]
    fn test_chain_product_for_every_kind() {
        let da = [2.0, 3.0, 4.0];
        let xa = [1.0, 1.0];
        for kind in MatrixKind::ALL {
            let mut m = Matrix::create(chain_structure(kind));
            m.set_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))
                .unwrap();
            let mut x = vec![1.0; 3];
            let mut y = vec![0.0; 3];
            m.vector_multiply(&mut x, &mut y).unwrap();
            assert_eq!(y, vec![3.0, 5.0, 5.0], "{}", kind);

            m.exdiag_vector_multiply(&mut x, &mut y).unwrap();
            assert_eq!(y, vec![1.0, 2.0, 1.0], "{}", kind);
        }
    }

    #[test]
    fn test_diag_block_size_support() {
        for kind in MatrixKind::ALL {
            let m = Matrix::create(chain_structure(kind));
            assert_eq!(m.diag_block_size().is_ok(), kind.supports_blocks(), "{}", kind);
        }
    }

    #[test]
    fn test_blocks_rejected_for_row_kinds() {
        let da = [1.0; 27];
        let mut m = Matrix::create(chain_structure(MatrixKind::Csr));
        let res = m.copy_coefficients(true, BlockSize::square(3), Some(&da), None);
        assert!(matches!(res, Err(SpmvError::UnsupportedForKind { .. })));
    }

    #[test]
    fn test_missing_kernel_is_reported() {
        let mut variant = MatrixVariant::new("partial", MatrixKind::Csr);
        variant.kernels[slot(false, false)] = Some(Kernel::Csr);
        let mut m = Matrix::create_tuned(chain_structure(MatrixKind::Csr), &variant);
        m.kernels = variant.kernels;
        let mut x = vec![1.0; 3];
        let mut y = vec![0.0; 3];
        match m.exdiag_vector_multiply(&mut x, &mut y) {
            Err(SpmvError::MissingKernel(msg)) => {
                assert!(msg.starts_with("Matrix is missing a vector multiply function"))
            }
            other => panic!("expected MissingKernel, got {:?}", other),
        }
    }

    #[test]
    fn test_create_tuned_ignores_other_kind() {
        let mut variant = MatrixVariant::new("MSR", MatrixKind::Msr);
        variant.kernels = [Some(Kernel::MsrPrefetch); 4];
        variant.loop_length = 7;
        let m = Matrix::create_tuned(chain_structure(MatrixKind::Native), &variant);
        assert_eq!(m.loop_length(), DEFAULT_LOOP_LENGTH);
        assert_eq!(m.kernel(false, false).unwrap().kind(), MatrixKind::Native);

        let m = Matrix::create_tuned(chain_structure(MatrixKind::Msr), &variant);
        assert_eq!(m.loop_length(), 7);
        assert_eq!(m.kernel(false, true), Some(Kernel::MsrPrefetch));
    }

    #[test]
    fn test_set_kernel_validation() {
        let mut m = Matrix::create(chain_structure(MatrixKind::Csr));
        assert!(m.set_kernel(false, true, Kernel::CsrPrefetch).is_err());
        assert!(m.set_kernel(false, false, Kernel::Msr).is_err());
        assert!(m.set_kernel(false, false, Kernel::CsrPrefetch).is_ok());
        assert_eq!(m.kernel(false, false), Some(Kernel::CsrPrefetch));
    }

    #[test]
    fn test_tuned_prefetch_keeps_a_loop_length() {
        let mut variant = MatrixVariant::new("CSR, with prefetch", MatrixKind::Csr);
        variant.kernels[slot(false, false)] = Some(Kernel::CsrPrefetch);
        let m = Matrix::create_tuned(chain_structure(MatrixKind::Csr), &variant);
        assert_eq!(m.loop_length(), DEFAULT_LOOP_LENGTH);
        assert_eq!(m.kernel(false, false), Some(Kernel::CsrPrefetch));
    }

    #[test]
    fn test_prefetch_needs_loop_length() {
        let mut m = Matrix::create(chain_structure(MatrixKind::Msr));
        assert!(m.set_kernel(false, false, Kernel::MsrPrefetch).is_ok());
        assert!(m.set_loop_length(0).is_err());
        assert_eq!(m.loop_length(), DEFAULT_LOOP_LENGTH);

        assert!(m.set_kernel(false, false, Kernel::Msr).is_ok());
        assert!(m.set_loop_length(0).is_ok());
        assert!(m.set_kernel(false, false, Kernel::MsrPrefetch).is_err());
        assert_eq!(m.kernel(false, false), Some(Kernel::Msr));
    }

    #[test]
    fn test_operator_dims_include_ghosts() {
        let faces = [[1, 2], [2, 3]];
        let mesh = MeshConnectivity::new(2, 3, &faces);
        let s = Arc::new(MatrixStructure::create(MatrixKind::Csr, true, &mesh, None, None).unwrap());
        let m = Matrix::create(s);
        assert_eq!(m.dims(), (2, 3));
        assert!(!m.is_square());
        assert!(Matrix::create(chain_structure(MatrixKind::Msr)).is_square());
    }

    #[test]
    fn test_short_vectors_are_rejected() {
        let m = Matrix::create(chain_structure(MatrixKind::Native));
        let x = vec![1.0; 2];
        let mut y = vec![0.0; 3];
        assert!(matches!(
            m.vector_multiply_nosync(&x, &mut y),
            Err(SpmvError::InvalidDimensions(_))
        ));
    }
}
