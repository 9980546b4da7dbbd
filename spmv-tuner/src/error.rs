use spmv_core::SpmvError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error(transparent)]
    Spmv(#[from] SpmvError),

    #[error("Invalid tuning configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty mesh: {0}")]
    EmptyMesh(String),
}
