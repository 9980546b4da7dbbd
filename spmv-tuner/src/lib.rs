//! # SpMV Tuner
//!
//! Compares the product kernels of `spmv-core` on a given mesh: a check mode
//! reporting the deviation of each variant from a reference, and a tuning
//! mode timing them and selecting the fastest matrix kind and kernels.

pub mod catalogue;
pub mod check;
pub mod config;
pub mod error;
pub mod report;
pub mod timing;
pub mod tune;
pub mod variant;
mod workload;

pub use catalogue::{build_variant_list, CatalogueOptions};
pub use check::{variant_test, CheckEntry, CheckReport};
pub use config::{MeshInput, TunerConfig};
pub use error::TunerError;
pub use report::{OperationChoice, TuningReport};
pub use tune::variant_tuned;
pub use variant::{Coverage, Operation, VariantRecord};
pub use workload::BLOCK_SIZE;
