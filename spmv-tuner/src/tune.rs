//! Timing of the catalogued variants and selection of the fastest one.
//!
//! Selection is local to the calling rank; only the reporting goes through
//! the [`Collective`].

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use spmv_core::{Collective, MatrixKind, MatrixStructure, MatrixVariant, SpmvError};

use crate::catalogue::{build_variant_list, CatalogueOptions};
use crate::config::{MeshInput, TunerConfig};
use crate::error::TunerError;
use crate::report::{self, OperationChoice, TuningReport};
use crate::timing;
use crate::variant::{fill_index, Coverage, Operation, VariantRecord};
use crate::workload::{block_size, create_matrix, create_structure, Workload};

/// Times every catalogued variant on `mesh` and selects the best kind and
/// kernels for the weighted mix of operations in `config`.
pub fn variant_tuned(
    mesh: &MeshInput<'_>,
    config: &TunerConfig,
    collective: &dyn Collective,
) -> Result<TuningReport, TunerError> {
    config.validate()?;
    mesh.check()?;

    let symmetry = Coverage::from_weight(config.sym_weight);
    let blocks = Coverage::from_weight(config.block_weight);
    let options = CatalogueOptions {
        threaded: mesh.numbering.is_some(),
        accelerated: config.has_accelerator(),
    };

    let mut variants = build_variant_list(symmetry, blocks, options);
    log::debug!(
        "Tuning {} variants ({:?} symmetry, {:?} blocks) on {} cells, {} faces",
        variants.len(),
        symmetry,
        blocks,
        mesh.n_cells(),
        mesh.n_faces()
    );
    measure_variants(&mut variants, mesh, config)?;

    report::log_structure_costs(&variants, collective);
    for &block in blocks.values() {
        for &symmetric in symmetry.values() {
            report::log_assign_costs(&variants, block, symmetric, collective);
        }
    }
    for &block in blocks.values() {
        for &symmetric in symmetry.values() {
            for exclude_diag in [false, true] {
                let op = Operation::new(block, symmetric, exclude_diag);
                report::log_spmv_costs(&variants, op, collective);
            }
        }
    }

    let kind_speedup = kind_speedups(&variants, config);
    let kind = best_kind(&kind_speedup);
    let (selected, choice_ids) = select_kernels(&variants, kind, symmetry);
    report::log_selection(&variants, &choice_ids, collective);

    let choices = Operation::ALL
        .iter()
        .filter_map(|&op| {
            let v = &variants[choice_ids[op.index()]?];
            Some(OperationChoice {
                operation: op,
                variant: v.name().to_string(),
                cost: v.spmv_cost(op)?,
            })
        })
        .collect();

    Ok(TuningReport {
        n_ranks: collective.n_ranks(),
        kind_speedup,
        selected,
        choices,
        candidates: variants,
    })
}

/// Fills the structure, assignment and product costs of `variants`.
///
/// Structure creation and coefficient assignment are timed once per kind,
/// on the first variant of each run of variants sharing a kind.
pub fn measure_variants(
    variants: &mut [VariantRecord],
    mesh: &MeshInput<'_>,
    config: &TunerConfig,
) -> Result<(), TunerError> {
    let mut data = Workload::for_timing(mesh);
    let mut current: Option<(MatrixKind, Arc<MatrixStructure>)> = None;

    for v in variants.iter_mut() {
        let kind = v.kind();
        let mut test_assign = false;

        let structure = match &current {
            Some((k, s)) if *k == kind => s.clone(),
            _ => {
                test_assign = true;
                let mut created = None;
                let cost = timing::measure(config.t_measure, || {
                    created = Some(create_structure(kind, mesh)?);
                    Ok::<(), SpmvError>(())
                })?;
                v.structure_cost = Some(cost);
                let s = created.ok_or_else(|| {
                    SpmvError::Internal(format!("no {} structure was created", kind))
                })?;
                current = Some((kind, s.clone()));
                s
            }
        };

        let mut m = create_matrix(&structure, v, config);

        for block in [false, true] {
            if !v.handles_block(block) {
                continue;
            }
            let b = block_size(block)?;
            let last = mesh.n_cells() * b.vector_stride - 1;

            for &symmetric in v.symmetry.values() {
                if test_assign {
                    let cost = timing::measure(config.t_measure, || {
                        m.set_coefficients(symmetric, b, Some(&data.da), Some(&data.xa))
                    })?;
                    v.assign_cost[fill_index(block, symmetric)] = Some(cost);
                } else {
                    m.set_coefficients(symmetric, b, Some(&data.da), Some(&data.xa))?;
                }

                for exclude_diag in [false, true] {
                    if v.kernel(block, exclude_diag).is_none() {
                        continue;
                    }
                    let cost = timing::measure(config.t_measure, || {
                        if exclude_diag {
                            m.exdiag_vector_multiply(&mut data.x, &mut data.y)?;
                        } else {
                            m.vector_multiply(&mut data.x, &mut data.y)?;
                        }
                        black_box(data.y[last]);
                        Ok::<(), SpmvError>(())
                    })?;
                    let op = Operation::new(block, symmetric, exclude_diag);
                    v.spmv_cost[op.index()] = Some(cost);
                }
            }
        }
    }
    Ok(())
}

/// Weighted speedup of each kind over the first variant.
///
/// For each full-matrix operation, a kind scores the best speedup of its
/// variants, with the assignment cost amortized over
/// `config.n_min_products` products. A kind missing an operation that has a
/// non-zero weight scores -1.
pub fn kind_speedups(variants: &[VariantRecord], config: &TunerConfig) -> Vec<(MatrixKind, f64)> {
    let Some(reference) = variants.first() else {
        return Vec::new();
    };

    let mut overhead: HashMap<MatrixKind, [f64; 4]> = HashMap::new();
    for v in variants {
        let entry = overhead.entry(v.kind()).or_insert([0.0; 4]);
        for (o, cost) in entry.iter_mut().zip(&v.assign_cost) {
            if let Some(c) = cost {
                *o = config.overhead(*c);
            }
        }
    }
    let overhead_of = |kind: MatrixKind, fill: usize| overhead.get(&kind).map_or(0.0, |o| o[fill]);

    let mut best: HashMap<MatrixKind, [f64; 8]> = HashMap::new();
    for v in variants {
        let entry = best.entry(v.kind()).or_insert([-1.0; 8]);
        for block in [false, true] {
            for symmetric in [false, true] {
                let op = Operation::new(block, symmetric, false);
                let fill = op.fill_index();
                if let (Some(r), Some(c)) = (reference.spmv_cost(op), v.spmv_cost(op)) {
                    let speedup =
                        (r + overhead_of(reference.kind(), fill)) / (c + overhead_of(v.kind(), fill));
                    if entry[op.index()] < speedup {
                        entry[op.index()] = speedup;
                    }
                }
            }
        }
    }

    let (sw, bw) = (config.sym_weight, config.block_weight);
    MatrixKind::ALL
        .iter()
        .map(|&kind| {
            let s = best.get(&kind).copied().unwrap_or([-1.0; 8]);
            let mut speedup = (1.0 - bw) * (1.0 - sw) * s[0]
                + (1.0 - bw) * sw * s[2]
                + bw * (1.0 - sw) * s[4]
                + bw * sw * s[6];
            let required = [
                (bw < 1.0 && sw < 1.0, s[0]),
                (bw < 1.0 && sw > 0.0, s[2]),
                (bw > 0.0 && sw < 1.0, s[4]),
                (bw > 0.0 && sw > 0.0, s[6]),
            ];
            if required.iter().any(|&(needed, s)| needed && s < 0.0) {
                speedup = -1.0;
            }
            (kind, speedup)
        })
        .collect()
}

/// Kind with the highest positive speedup; native when none qualifies.
pub fn best_kind(kind_speedup: &[(MatrixKind, f64)]) -> MatrixKind {
    let mut best = (MatrixKind::Native, 0.0);
    for &(kind, speedup) in kind_speedup {
        if speedup > best.1 {
            best = (kind, speedup);
        }
    }
    best.0
}

/// Builds the variant of `kind` using the cheapest measured kernel for each
/// operation.
///
/// Returns the variant and, per operation, the index of the chosen
/// candidate. When the symmetric and non-symmetric choices for a slot
/// differ, the non-symmetric one fills the slot.
pub fn select_kernels(
    variants: &[VariantRecord],
    kind: MatrixKind,
    symmetry: Coverage,
) -> (VariantRecord, [Option<usize>; 8]) {
    let mut r = VariantRecord::new(MatrixVariant::new(kind.name(), kind), symmetry);
    let mut chosen: [Option<usize>; 8] = [None; 8];

    for (v_id, v) in variants.iter().enumerate() {
        if v.kind() != kind {
            continue;
        }
        if v.structure_cost.is_some() {
            r.structure_cost = v.structure_cost;
        }
        for (rc, vc) in r.assign_cost.iter_mut().zip(&v.assign_cost) {
            if vc.is_some() {
                *rc = *vc;
            }
        }
        for op in Operation::ALL {
            let Some(cost) = v.spmv_cost(op) else {
                continue;
            };
            if r.spmv_cost(op).map_or(true, |best| cost < best) {
                r.spmv_cost[op.index()] = Some(cost);
                chosen[op.index()] = Some(v_id);
            }
        }
    }

    for block in [false, true] {
        for exclude_diag in [false, true] {
            let sym = Operation::new(block, true, exclude_diag);
            let nonsym = Operation::new(block, false, exclude_diag);
            let pick = chosen[nonsym.index()].or(chosen[sym.index()]);
            if let Some(v_id) = pick {
                let v = &variants[v_id];
                r.variant.kernels[nonsym.slot()] = v.kernel(block, exclude_diag);
                r.variant.loop_length = r.variant.loop_length.max(v.variant.loop_length);
            }
        }
    }

    (r, chosen)
}
