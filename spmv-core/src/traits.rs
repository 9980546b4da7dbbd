use std::fmt::Debug;

use crate::block::BlockSize;
use crate::coeffs::Assignment;
use crate::error::SpmvError;
use crate::structure::MatrixStructure;

/// A linear operator with a row/column extent.
/// Columns include ghost cells, so the operator is usually not square.
pub trait Operator: Debug {
    /// Returns the dimensions as (rows, columns).
    fn dims(&self) -> (usize, usize);

    fn rows(&self) -> usize {
        self.dims().0
    }

    fn cols(&self) -> usize {
        self.dims().1
    }

    /// Checks whether the operator has no ghost columns.
    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}

impl Operator for MatrixStructure {
    fn dims(&self) -> (usize, usize) {
        (self.n_rows(), self.n_columns())
    }
}

/// Per-kind coefficient storage.
///
/// `'a` bounds arrays mapped from the caller.
pub trait CoefficientStore<'a>: Debug {
    /// Maps or copies the values of `request` into the store.
    fn assign(
        &mut self,
        structure: &MatrixStructure,
        request: &Assignment<'a, '_>,
    ) -> Result<(), SpmvError>;

    /// Forgets mapped arrays; owned arrays remain valid.
    fn release(&mut self);

    /// Writes the diagonal into `da` (`b.vector_stride` values per row).
    fn copy_diagonal(
        &self,
        structure: &MatrixStructure,
        b: &BlockSize,
        da: &mut [f64],
    ) -> Result<(), SpmvError>;
}
