//! Matrix-vector product kernels.
//!
//! Every kernel writes `y = A.x` (or `y = (A-D).x`) on rows `[0, n_rows)`
//! and leaves the ghost rows `[n_rows, n_cols)` of `y` at zero.

pub(crate) mod csr;
pub(crate) mod csr_sym;
pub(crate) mod msr;
pub(crate) mod msr_sym;
pub(crate) mod native;

use std::fmt;

use cfg_if::cfg_if;
use serde::{Deserialize, Serialize};

use crate::block::BlockSize;
use crate::coeffs::Coefficients;
use crate::error::SpmvError;
use crate::structure::{MatrixKind, MatrixStructure};

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;

/// Default number of rows or faces processed per cache block.
pub const DEFAULT_LOOP_LENGTH: usize = 508;

/// Product kernels, each bound to one matrix kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kernel {
    Native,
    NativeBlock,
    Native3x3,
    NativeThreaded,
    NativeBlockThreaded,
    /// Face loop split in cache blocks, products stored before accumulation.
    NativeBull,
    /// One sweep per face side.
    NativeVector,
    Csr,
    CsrPrefetch,
    CsrAccelerated,
    CsrSym,
    /// Upper triangle expanded on the host, product on the device.
    CsrSymAccelerated,
    Msr,
    MsrBlock,
    MsrPrefetch,
    MsrAccelerated,
    MsrSym,
    MsrSymAccelerated,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Native => "native",
            Kernel::NativeBlock => "native, blocked",
            Kernel::Native3x3 => "native, 3x3 blocks",
            Kernel::NativeThreaded => "native, threaded",
            Kernel::NativeBlockThreaded => "native, blocked, threaded",
            Kernel::NativeBull => "native, Bull algorithm",
            Kernel::NativeVector => "native, vector",
            Kernel::Csr => "CSR",
            Kernel::CsrPrefetch => "CSR, with prefetch",
            Kernel::CsrAccelerated => "CSR, accelerated",
            Kernel::CsrSym => "CSR_SYM",
            Kernel::CsrSymAccelerated => "CSR_SYM, accelerated",
            Kernel::Msr => "MSR",
            Kernel::MsrBlock => "MSR, blocked",
            Kernel::MsrPrefetch => "MSR, with prefetch",
            Kernel::MsrAccelerated => "MSR, accelerated",
            Kernel::MsrSym => "MSR_SYM",
            Kernel::MsrSymAccelerated => "MSR_SYM, accelerated",
        }
    }

    pub fn kind(&self) -> MatrixKind {
        match self {
            Kernel::Native
            | Kernel::NativeBlock
            | Kernel::Native3x3
            | Kernel::NativeThreaded
            | Kernel::NativeBlockThreaded
            | Kernel::NativeBull
            | Kernel::NativeVector => MatrixKind::Native,
            Kernel::Csr | Kernel::CsrPrefetch | Kernel::CsrAccelerated => MatrixKind::Csr,
            Kernel::CsrSym | Kernel::CsrSymAccelerated => MatrixKind::CsrSym,
            Kernel::Msr | Kernel::MsrBlock | Kernel::MsrPrefetch | Kernel::MsrAccelerated => {
                MatrixKind::Msr
            }
            Kernel::MsrSym | Kernel::MsrSymAccelerated => MatrixKind::MsrSym,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Kernel::NativeBlock | Kernel::Native3x3 | Kernel::NativeBlockThreaded | Kernel::MsrBlock
        )
    }

    pub fn supports_exclude_diag(&self) -> bool {
        !matches!(
            self,
            Kernel::CsrPrefetch | Kernel::CsrAccelerated | Kernel::CsrSymAccelerated
        )
    }

    /// Whether the kernel may fill slot `(block, exclude_diag)`.
    pub fn supports(&self, block: bool, exclude_diag: bool) -> bool {
        self.is_block() == block && (!exclude_diag || self.supports_exclude_diag())
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(
            self,
            Kernel::CsrAccelerated
                | Kernel::CsrSymAccelerated
                | Kernel::MsrAccelerated
                | Kernel::MsrSymAccelerated
        )
    }

    /// Prefetching kernels gather `x` in chunks of the matrix loop length.
    pub fn uses_loop_length(&self) -> bool {
        matches!(self, Kernel::CsrPrefetch | Kernel::MsrPrefetch)
    }

    /// Kernels installed by a plain matrix creation, as `[scalar, block]`.
    pub fn defaults(
        kind: MatrixKind,
        threaded: bool,
        loop_length: usize,
    ) -> [Option<Kernel>; 2] {
        let prefetch = loop_length > 0 && n_threads() == 1;
        match kind {
            MatrixKind::Native if threaded => {
                [Some(Kernel::NativeThreaded), Some(Kernel::NativeBlockThreaded)]
            }
            MatrixKind::Native => [Some(Kernel::Native), Some(Kernel::NativeBlock)],
            MatrixKind::Csr if prefetch => [Some(Kernel::CsrPrefetch), None],
            MatrixKind::Csr => [Some(Kernel::Csr), None],
            MatrixKind::CsrSym => [Some(Kernel::CsrSym), None],
            MatrixKind::Msr if prefetch => [Some(Kernel::MsrPrefetch), Some(Kernel::MsrBlock)],
            MatrixKind::Msr => [Some(Kernel::Msr), Some(Kernel::MsrBlock)],
            MatrixKind::MsrSym => [Some(Kernel::MsrSym), None],
        }
    }

    /// Baseline kernel of `kind` for the given slot, if the kind has one.
    pub fn baseline(kind: MatrixKind, block: bool) -> Option<Kernel> {
        match (kind, block) {
            (MatrixKind::Native, false) => Some(Kernel::Native),
            (MatrixKind::Native, true) => Some(Kernel::NativeBlock),
            (MatrixKind::Csr, false) => Some(Kernel::Csr),
            (MatrixKind::CsrSym, false) => Some(Kernel::CsrSym),
            (MatrixKind::Msr, false) => Some(Kernel::Msr),
            (MatrixKind::Msr, true) => Some(Kernel::MsrBlock),
            (MatrixKind::MsrSym, false) => Some(Kernel::MsrSym),
            _ => None,
        }
    }

    /// Runs the product; `x` and `y` hold `n_cols` rows of `vector_stride` values.
    pub(crate) fn multiply(
        &self,
        input: &KernelInput<'_, '_>,
        exclude_diag: bool,
        x: &[f64],
        y: &mut [f64],
    ) -> Result<(), SpmvError> {
        if exclude_diag && !self.supports_exclude_diag() {
            return Err(SpmvError::ExcludeDiagUnsupported {
                kernel: self.name(),
            });
        }
        let s = input.structure;
        let b = &input.block;
        let mismatch = || {
            SpmvError::Internal(format!(
                "kernel {} applied to a {} matrix",
                self.name(),
                s.kind()
            ))
        };

        match (self, input.coeffs) {
            (Kernel::Native, Coefficients::Native(c)) => {
                native::mat_vec(c, s, exclude_diag, x, y);
            }
            (Kernel::NativeBlock, Coefficients::Native(c)) => {
                native::b_mat_vec(c, s, b, exclude_diag, x, y);
            }
            (Kernel::Native3x3, Coefficients::Native(c)) => {
                if b.is_3x3() {
                    native::mat_vec_3_3(c, s, exclude_diag, x, y);
                } else {
                    native::b_mat_vec(c, s, b, exclude_diag, x, y);
                }
            }
            (Kernel::NativeThreaded, Coefficients::Native(c)) => {
                native::mat_vec_threaded(c, s, exclude_diag, x, y);
            }
            (Kernel::NativeBlockThreaded, Coefficients::Native(c)) => {
                native::b_mat_vec_threaded(c, s, b, exclude_diag, x, y);
            }
            (Kernel::NativeBull, Coefficients::Native(c)) => {
                native::mat_vec_bull(c, s, input.loop_length, exclude_diag, x, y);
            }
            (Kernel::NativeVector, Coefficients::Native(c)) => {
                native::mat_vec_vector(c, s, exclude_diag, x, y);
            }
            (Kernel::Csr, Coefficients::Csr(c)) => {
                csr::mat_vec(c, s, exclude_diag, x, y)?;
            }
            (Kernel::CsrPrefetch, Coefficients::Csr(c)) => {
                csr::mat_vec_prefetch(c, s, input.loop_length, x, y)?;
            }
            (Kernel::CsrAccelerated, Coefficients::Csr(c)) => {
                cfg_if! {
                    if #[cfg(feature = "gpu")] {
                        csr::mat_vec_accelerated(c, s, input.accelerator()?, x, y)?;
                    } else {
                        let _ = c;
                        return Err(accelerator_missing());
                    }
                }
            }
            (Kernel::CsrSym, Coefficients::Csr(c)) => {
                csr_sym::mat_vec(c, s, exclude_diag, x, y)?;
            }
            (Kernel::CsrSymAccelerated, Coefficients::Csr(c)) => {
                cfg_if! {
                    if #[cfg(feature = "gpu")] {
                        csr_sym::mat_vec_accelerated(c, s, input.accelerator()?, x, y)?;
                    } else {
                        let _ = c;
                        return Err(accelerator_missing());
                    }
                }
            }
            (Kernel::Msr, Coefficients::Msr(c)) => {
                msr::mat_vec(c, s, exclude_diag, x, y)?;
            }
            (Kernel::MsrBlock, Coefficients::Msr(c)) => {
                msr::b_mat_vec(c, s, b, exclude_diag, x, y)?;
            }
            (Kernel::MsrPrefetch, Coefficients::Msr(c)) => {
                msr::mat_vec_prefetch(c, s, input.loop_length, exclude_diag, x, y)?;
            }
            (Kernel::MsrAccelerated, Coefficients::Msr(c)) => {
                cfg_if! {
                    if #[cfg(feature = "gpu")] {
                        msr::mat_vec_accelerated(c, s, input.accelerator()?, exclude_diag, x, y)?;
                    } else {
                        let _ = c;
                        return Err(accelerator_missing());
                    }
                }
            }
            (Kernel::MsrSym, Coefficients::Msr(c)) => {
                msr_sym::mat_vec(c, s, exclude_diag, x, y)?;
            }
            (Kernel::MsrSymAccelerated, Coefficients::Msr(c)) => {
                cfg_if! {
                    if #[cfg(feature = "gpu")] {
                        msr_sym::mat_vec_accelerated(c, s, input.accelerator()?, exclude_diag, x, y)?;
                    } else {
                        let _ = c;
                        return Err(accelerator_missing());
                    }
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(not(feature = "gpu"))]
fn accelerator_missing() -> SpmvError {
    SpmvError::UnsupportedOperation(
        "accelerated kernels require the `gpu` feature".to_string(),
    )
}

/// Everything a kernel reads besides the vectors.
pub(crate) struct KernelInput<'m, 'a> {
    pub structure: &'m MatrixStructure,
    pub coeffs: &'m Coefficients<'a>,
    pub block: BlockSize,
    pub loop_length: usize,
    #[cfg(feature = "gpu")]
    pub accelerator: Option<&'m GpuAccelerator>,
}

#[cfg(feature = "gpu")]
impl KernelInput<'_, '_> {
    fn accelerator(&self) -> Result<&GpuAccelerator, SpmvError> {
        self.accelerator.ok_or_else(|| {
            SpmvError::UnsupportedOperation(
                "no accelerator attached to the matrix".to_string(),
            )
        })
    }
}

/// Worker threads available to the row-parallel kernels.
pub fn n_threads() -> usize {
    cfg_if! {
        if #[cfg(feature = "native")] {
            rayon::current_num_threads()
        } else {
            1
        }
    }
}

/// Calls `f(ii, &mut y[ii])` for each row, in parallel when threading is enabled.
pub(crate) fn for_each_row<F>(y: &mut [f64], f: F)
where
    F: Fn(usize, &mut f64) + Send + Sync,
{
    cfg_if! {
        if #[cfg(feature = "native")] {
            use rayon::prelude::*;
            y.par_iter_mut().enumerate().for_each(|(ii, v)| f(ii, v));
        } else {
            y.iter_mut().enumerate().for_each(|(ii, v)| f(ii, v));
        }
    }
}

/// Block version of [`for_each_row`]: `f` receives the `stride` values of row `ii`.
pub(crate) fn for_each_block_row<F>(y: &mut [f64], stride: usize, f: F)
where
    F: Fn(usize, &mut [f64]) + Send + Sync,
{
    cfg_if! {
        if #[cfg(feature = "native")] {
            use rayon::prelude::*;
            y.par_chunks_mut(stride).enumerate().for_each(|(ii, v)| f(ii, v));
        } else {
            y.chunks_mut(stride).enumerate().for_each(|(ii, v)| f(ii, v));
        }
    }
}
