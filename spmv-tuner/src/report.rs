//! Performance tables, logged under the `spmv::perf` target.
//!
//! With more than one rank, each timing is shown as mean/min/max across
//! ranks.

use serde::{Deserialize, Serialize};
use spmv_core::{Collective, MatrixKind};

use crate::variant::{Operation, VariantRecord};

const TARGET: &str = "spmv::perf";

/// Variant chosen for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationChoice {
    pub operation: Operation,
    pub variant: String,
    pub cost: f64,
}

/// Outcome of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub n_ranks: usize,
    /// Weighted speedup of each kind over the reference; negative when the
    /// kind lacks a required operation.
    pub kind_speedup: Vec<(MatrixKind, f64)>,
    pub selected: VariantRecord,
    pub choices: Vec<OperationChoice>,
    pub candidates: Vec<VariantRecord>,
}

#[derive(Debug, Clone, Copy)]
struct Spread {
    mean: f64,
    min: f64,
    max: f64,
}

fn spread(collective: &dyn Collective, value: f64) -> Spread {
    Spread {
        mean: collective.all_reduce_sum(value) / collective.n_ranks() as f64,
        min: collective.all_reduce_min(value),
        max: collective.all_reduce_max(value),
    }
}

fn title(text: &str) {
    log::info!(target: TARGET, "");
    log::info!(target: TARGET, "{}", text);
    log::info!(target: TARGET, "{}", "-".repeat(text.len()));
}

fn time_header(collective: &dyn Collective, speedup: bool) {
    if collective.n_ranks() > 1 {
        log::info!(
            target: TARGET,
            "  {:24} {:>12} {:>12} {:>12}{}",
            "",
            "mean (s)",
            "min",
            "max",
            if speedup { format!(" {:>8} {:>8} {:>8}", "mean", "min", "max") } else { String::new() }
        );
    } else {
        let tail = if speedup { format!(" {:>8}", "speedup") } else { String::new() };
        log::info!(target: TARGET, "  {:24} {:>12}{}", "", "time (s)", tail);
    }
}

fn time_row(collective: &dyn Collective, name: &str, t: f64, speedup: Option<f64>) {
    if collective.n_ranks() > 1 {
        let t = spread(collective, t);
        let s = speedup.map(|s| spread(collective, s));
        log::info!(
            target: TARGET,
            "  {:<24} {:12.5e} {:12.5e} {:12.5e}{}",
            name,
            t.mean,
            t.min,
            t.max,
            s.map_or(String::new(), |s| format!(" {:8.4} {:8.4} {:8.4}", s.mean, s.min, s.max))
        );
    } else {
        log::info!(
            target: TARGET,
            "  {:<24} {:12.5e}{}",
            name,
            t,
            speedup.map_or(String::new(), |s| format!(" {:8.4}", s))
        );
    }
}

/// Structure creation costs.
pub fn log_structure_costs(variants: &[VariantRecord], collective: &dyn Collective) {
    title("matrix structure creation/destruction");
    time_header(collective, false);
    for v in variants {
        if let Some(t) = v.structure_cost {
            time_row(collective, v.name(), t, None);
        }
    }
}

/// Coefficient assignment costs for one fill type.
pub fn log_assign_costs(
    variants: &[VariantRecord],
    block: bool,
    symmetric: bool,
    collective: &dyn Collective,
) {
    let mut text = String::new();
    if symmetric {
        text.push_str("symmetric ");
    }
    if block {
        text.push_str("block ");
    }
    text.push_str("matrix coefficients assign");
    title(&text);
    time_header(collective, false);
    for v in variants {
        if let Some(t) = v.assign_cost(block, symmetric) {
            time_row(collective, v.name(), t, None);
        }
    }
}

/// Product costs for one operation, with the speedup over the first variant.
pub fn log_spmv_costs(variants: &[VariantRecord], op: Operation, collective: &dyn Collective) {
    title(op.name());
    time_header(collective, true);
    let reference = variants.first().and_then(|r| r.spmv_cost(op));
    for v in variants {
        if let Some(t) = v.spmv_cost(op) {
            let speedup = reference.map_or(0.0, |r| r / t);
            time_row(collective, v.name(), t, Some(speedup));
        }
    }
}

/// Logs which variant each operation uses.
///
/// `selected[op]` indexes into `variants`. With several ranks, the number
/// of ranks choosing each variant is shown instead.
pub fn log_selection(
    variants: &[VariantRecord],
    selected: &[Option<usize>; 8],
    collective: &dyn Collective,
) {
    title("Selected matrix operation implementations:");

    if collective.n_ranks() > 1 {
        let mut counts = vec![0u64; variants.len() * 8];
        for (op_id, v_id) in selected.iter().enumerate() {
            if let Some(v_id) = *v_id {
                counts[v_id * 8 + op_id] = 1;
            }
        }
        collective.all_reduce_sum_counts(&mut counts);
        for op in Operation::ALL {
            let total: u64 = (0..variants.len()).map(|v| counts[v * 8 + op.index()]).sum();
            if total == 0 {
                continue;
            }
            log::info!(target: TARGET, "  -{}:", op.name());
            for (v_id, v) in variants.iter().enumerate() {
                let n = counts[v_id * 8 + op.index()];
                if n > 0 {
                    log::info!(target: TARGET, "    {:<32} : {} ranks", v.name(), n);
                }
            }
        }
    } else {
        for op in Operation::ALL {
            if let Some(v_id) = selected[op.index()] {
                log::info!(
                    target: TARGET,
                    "  {:<44} : {}",
                    op.name(),
                    variants[v_id].name()
                );
            }
        }
    }
}
