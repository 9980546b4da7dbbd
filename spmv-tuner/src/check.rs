//! Cross-checks every catalogued variant against the first one run.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spmv_core::{Collective, MatrixKind, MatrixStructure};

use crate::catalogue::{build_variant_list, CatalogueOptions};
use crate::config::{MeshInput, TunerConfig};
use crate::error::TunerError;
use crate::variant::{Coverage, Operation, VariantRecord};
use crate::workload::{block_size, create_matrix, create_structure, Workload};

/// Maximum deviation of one variant on one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub variant: String,
    pub operation: Operation,
    pub max_diff: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub entries: Vec<CheckEntry>,
}

impl CheckReport {
    /// Largest deviation over all entries.
    pub fn max_diff(&self) -> f64 {
        self.entries.iter().map(|e| e.max_diff).fold(0.0, f64::max)
    }

    /// Entries whose deviation exceeds `tolerance`.
    pub fn failures(&self, tolerance: f64) -> impl Iterator<Item = &CheckEntry> {
        self.entries.iter().filter(move |e| !(e.max_diff <= tolerance))
    }
}

/// Runs the check over all symmetry and block combinations.
///
/// For each combination, every variant of the catalogue multiplies the same
/// coefficients and vector, and its result is compared with the first
/// variant that handled the operation.
pub fn variant_test(
    mesh: &MeshInput<'_>,
    config: &TunerConfig,
    collective: &dyn Collective,
) -> Result<CheckReport, TunerError> {
    mesh.check()?;

    log::info!(
        target: "spmv::perf",
        "Checking matrix structure and operation variants (diff/reference):"
    );

    let options = CatalogueOptions {
        threaded: mesh.numbering.is_some(),
        accelerated: config.has_accelerator(),
    };
    let mut report = CheckReport::default();
    for symmetric in [false, true] {
        for block in [false, true] {
            let variants =
                build_variant_list(Coverage::exactly(symmetric), Coverage::exactly(block), options);
            check_variants(&variants, mesh, config, collective, &mut report)?;
        }
    }
    Ok(report)
}

/// Checks `variants` against the first of them handling each operation.
pub fn check_variants(
    variants: &[VariantRecord],
    mesh: &MeshInput<'_>,
    config: &TunerConfig,
    collective: &dyn Collective,
    report: &mut CheckReport,
) -> Result<(), TunerError> {
    let mut data = Workload::for_check(mesh);
    let mut structures: HashMap<MatrixKind, Arc<MatrixStructure>> = HashMap::new();

    for block in [false, true] {
        let b = block_size(block)?;
        let n_values = mesh.n_cells() * b.vector_stride;

        for symmetric in [false, true] {
            for exclude_diag in [false, true] {
                let op = Operation::new(block, symmetric, exclude_diag);
                let mut reference: Option<Vec<f64>> = None;

                for v in variants {
                    if !v.symmetry.allows(symmetric) || v.kernel(block, exclude_diag).is_none() {
                        continue;
                    }
                    let structure = match structures.get(&v.kind()) {
                        Some(s) => s.clone(),
                        None => {
                            let s = create_structure(v.kind(), mesh)?;
                            structures.insert(v.kind(), s.clone());
                            s
                        }
                    };

                    let mut m = create_matrix(&structure, v, config);
                    m.set_coefficients(symmetric, b, Some(&data.da), Some(&data.xa))?;
                    let mut x = data.x.clone();
                    if exclude_diag {
                        m.exdiag_vector_multiply(&mut x, &mut data.y)?;
                    } else {
                        m.vector_multiply(&mut x, &mut data.y)?;
                    }

                    let y = &data.y[..n_values];
                    match &reference {
                        None => reference = Some(y.to_vec()),
                        Some(yr) => {
                            let local = y
                                .iter()
                                .zip(yr)
                                .map(|(a, b)| (a - b).abs())
                                .fold(0.0, f64::max);
                            let max_diff = collective.all_reduce_max(local);
                            log::info!(
                                target: "spmv::perf",
                                "{:<32} {:<32} : {:12.5e}",
                                v.name(),
                                op.name(),
                                max_diff
                            );
                            report.entries.push(CheckEntry {
                                variant: v.name().to_string(),
                                operation: op,
                                max_diff,
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
