use thiserror::Error;

use crate::structure::MatrixKind;

#[derive(Error, Debug)]
pub enum SpmvError {
    #[error("Handling of matrices in {0} format is not operational yet")]
    UnsupportedKind(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid face connectivity: {0}")]
    InvalidTopology(String),

    #[error("Invalid thread numbering: {0}")]
    InvalidNumbering(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Not supported with {kind} matrices: {operation}")]
    UnsupportedForKind {
        operation: &'static str,
        kind: MatrixKind,
    },

    #[error("Assigning non-symmetric matrix coefficients to a matrix in a {0} format")]
    NonSymmetricCoefficients(MatrixKind),

    #[error("Matrix product variant using {kernel} does not handle case with excluded diagonal")]
    ExcludeDiagUnsupported { kernel: &'static str },

    #[error("{0}")]
    MissingKernel(String),

    #[error(
        "Periodicity with rotation is not supported with the \"ignore\" rotation mode; \
         use a non-synchronizing product with an external halo update instead"
    )]
    RotationIgnored,

    #[error("Halo exchange failed: {0}")]
    Halo(String),

    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
