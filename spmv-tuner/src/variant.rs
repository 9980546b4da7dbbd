//! Candidate variants and the operations they are measured on.

use std::fmt;

use serde::{Deserialize, Serialize};
use spmv_core::{slot, Kernel, MatrixKind, MatrixVariant};

/// One of the eight measured product flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub block: bool,
    pub symmetric: bool,
    pub exclude_diag: bool,
}

impl Operation {
    /// All operations, in index order.
    pub const ALL: [Operation; 8] = [
        Operation::new(false, false, false),
        Operation::new(false, false, true),
        Operation::new(false, true, false),
        Operation::new(false, true, true),
        Operation::new(true, false, false),
        Operation::new(true, false, true),
        Operation::new(true, true, false),
        Operation::new(true, true, true),
    ];

    pub const fn new(block: bool, symmetric: bool, exclude_diag: bool) -> Self {
        Self {
            block,
            symmetric,
            exclude_diag,
        }
    }

    pub fn index(&self) -> usize {
        usize::from(self.block) * 4 + usize::from(self.symmetric) * 2 + usize::from(self.exclude_diag)
    }

    /// Kernel slot used by this operation.
    pub fn slot(&self) -> usize {
        slot(self.block, self.exclude_diag)
    }

    /// Index of the coefficient fill type (block, symmetry) behind this operation.
    pub fn fill_index(&self) -> usize {
        fill_index(self.block, self.symmetric)
    }

    pub fn name(&self) -> &'static str {
        match (self.block, self.symmetric, self.exclude_diag) {
            (false, false, false) => "y <- A.x",
            (false, false, true) => "y <- (A-D).x",
            (false, true, false) => "Symmetric y <- A.x",
            (false, true, true) => "Symmetric y <- (A-D).x",
            (true, false, false) => "Block y <- A.x",
            (true, false, true) => "Block y <- (A-D).x",
            (true, true, false) => "Block symmetric y <- A.x",
            (true, true, true) => "Block symmetric y <- (A-D).x",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn fill_index(block: bool, symmetric: bool) -> usize {
    usize::from(block) * 2 + usize::from(symmetric)
}

/// Which values of a boolean flag a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coverage {
    /// Flag off only.
    Without,
    /// Flag on only.
    Only,
    Both,
}

impl Coverage {
    /// Coverage implied by a weight in `[0, 1]`.
    pub fn from_weight(weight: f64) -> Self {
        if weight <= 0.0 {
            Coverage::Without
        } else if weight < 1.0 {
            Coverage::Both
        } else {
            Coverage::Only
        }
    }

    pub fn exactly(flag: bool) -> Self {
        if flag {
            Coverage::Only
        } else {
            Coverage::Without
        }
    }

    pub fn allows(&self, flag: bool) -> bool {
        match self {
            Coverage::Without => !flag,
            Coverage::Only => flag,
            Coverage::Both => true,
        }
    }

    pub fn values(&self) -> &'static [bool] {
        match self {
            Coverage::Without => &[false],
            Coverage::Only => &[true],
            Coverage::Both => &[false, true],
        }
    }
}

/// A candidate (or selected) variant with its measured costs, in seconds.
///
/// Costs are `None` until measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant: MatrixVariant,
    /// Coefficient symmetry the variant was measured with.
    pub symmetry: Coverage,
    pub structure_cost: Option<f64>,
    /// Indexed by `block * 2 + symmetric`.
    pub assign_cost: [Option<f64>; 4],
    /// Indexed by [`Operation::index`].
    pub spmv_cost: [Option<f64>; 8],
}

impl VariantRecord {
    pub fn new(variant: MatrixVariant, symmetry: Coverage) -> Self {
        Self {
            variant,
            symmetry,
            structure_cost: None,
            assign_cost: [None; 4],
            spmv_cost: [None; 8],
        }
    }

    pub fn name(&self) -> &str {
        &self.variant.name
    }

    pub fn kind(&self) -> MatrixKind {
        self.variant.kind
    }

    pub fn kernel(&self, block: bool, exclude_diag: bool) -> Option<Kernel> {
        self.variant.kernel(block, exclude_diag)
    }

    /// Whether the variant has a kernel for either diagonal flavor of `block`.
    pub fn handles_block(&self, block: bool) -> bool {
        self.kernel(block, false).is_some() || self.kernel(block, true).is_some()
    }

    pub fn assign_cost(&self, block: bool, symmetric: bool) -> Option<f64> {
        self.assign_cost[fill_index(block, symmetric)]
    }

    pub fn spmv_cost(&self, op: Operation) -> Option<f64> {
        self.spmv_cost[op.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_indices_follow_names() {
        for (i, op) in Operation::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
        assert_eq!(Operation::ALL[3].name(), "Symmetric y <- (A-D).x");
        assert_eq!(Operation::ALL[6].name(), "Block symmetric y <- A.x");
        assert_eq!(Operation::ALL[5].slot(), 3);
        assert_eq!(Operation::ALL[6].fill_index(), 3);
    }

    #[test]
    fn test_coverage_from_weight() {
        assert_eq!(Coverage::from_weight(0.0), Coverage::Without);
        assert_eq!(Coverage::from_weight(0.3), Coverage::Both);
        assert_eq!(Coverage::from_weight(1.0), Coverage::Only);
        assert_eq!(Coverage::Both.values(), &[false, true]);
        assert!(!Coverage::Only.allows(false));
    }
}
