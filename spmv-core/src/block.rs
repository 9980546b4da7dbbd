//! Diagonal block descriptor and the small dense helpers shared by the kernels.

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::SpmvError;

/// Sizes of a diagonal block.
///
/// The four extents follow the usual layout convention:
/// useful block size, vector block stride, matrix line stride and
/// matrix line × column stride. Strides may exceed the useful size
/// to allow padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSize {
    pub extent: usize,
    pub vector_stride: usize,
    pub row_stride: usize,
    pub block_stride: usize,
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::SCALAR
    }
}

impl BlockSize {
    pub const SCALAR: BlockSize = BlockSize {
        extent: 1,
        vector_stride: 1,
        row_stride: 1,
        block_stride: 1,
    };

    /// Creates a validated block descriptor.
    pub fn new(
        extent: usize,
        vector_stride: usize,
        row_stride: usize,
        block_stride: usize,
    ) -> Result<Self, SpmvError> {
        if extent == 0 {
            return Err(SpmvError::InvalidDimensions(
                "block extent must be at least 1".to_string(),
            ));
        }
        if vector_stride < extent || row_stride < extent {
            return Err(SpmvError::InvalidDimensions(format!(
                "block strides ({}, {}) must not be smaller than the block extent ({})",
                vector_stride, row_stride, extent
            )));
        }
        if block_stride < row_stride * (extent - 1) + extent {
            return Err(SpmvError::InvalidDimensions(format!(
                "block line*column stride ({}) too small for extent {} and line stride {}",
                block_stride, extent, row_stride
            )));
        }
        Ok(Self {
            extent,
            vector_stride,
            row_stride,
            block_stride,
        })
    }

    /// Unpadded `n × n` blocks.
    pub fn square(n: usize) -> Self {
        Self {
            extent: n,
            vector_stride: n,
            row_stride: n,
            block_stride: n * n,
        }
    }

    pub fn from_array(sizes: [usize; 4]) -> Result<Self, SpmvError> {
        Self::new(sizes[0], sizes[1], sizes[2], sizes[3])
    }

    pub fn as_array(&self) -> [usize; 4] {
        [
            self.extent,
            self.vector_stride,
            self.row_stride,
            self.block_stride,
        ]
    }

    pub fn is_scalar(&self) -> bool {
        self.block_stride == 1
    }

    pub fn is_3x3(&self) -> bool {
        self.extent == 3 && self.vector_stride == 3 && self.row_stride == 3 && self.block_stride == 9
    }
}

/// `y[b] = A[b] . x[b]` for the dense diagonal block of row `b_id`.
#[inline]
pub(crate) fn dense_b_ax(b_id: usize, b: &BlockSize, a: &[f64], x: &[f64], y: &mut [f64]) {
    let a_blk = &a[b_id * b.block_stride..];
    let x_blk = &x[b_id * b.vector_stride..b_id * b.vector_stride + b.extent];
    for ii in 0..b.extent {
        let a_row = &a_blk[ii * b.row_stride..ii * b.row_stride + b.extent];
        y[b_id * b.vector_stride + ii] = a_row.iter().zip(x_blk).map(|(a, x)| a * x).sum();
    }
}

/// Fixed 3×3 version of [`dense_b_ax`].
#[inline]
pub(crate) fn dense_3_3_ax(b_id: usize, a: &[f64], x: &[f64], y: &mut [f64]) {
    let a = &a[b_id * 9..b_id * 9 + 9];
    let x = &x[b_id * 3..b_id * 3 + 3];
    let y = &mut y[b_id * 3..b_id * 3 + 3];
    y[0] = a[0] * x[0] + a[1] * x[1] + a[2] * x[2];
    y[1] = a[3] * x[0] + a[4] * x[1] + a[5] * x[2];
    y[2] = a[6] * x[0] + a[7] * x[1] + a[8] * x[2];
}

/// `y = da . x` over the first `n_rows` entries, or zero without a diagonal.
pub(crate) fn diag_vec_p_l(da: Option<&[f64]>, x: &[f64], y: &mut [f64], n_rows: usize) {
    match da {
        Some(da) => {
            for ((y, d), x) in y[..n_rows].iter_mut().zip(&da[..n_rows]).zip(&x[..n_rows]) {
                *y = d * x;
            }
        }
        None => zero_range(y, 0, n_rows),
    }
}

/// Block version of [`diag_vec_p_l`].
pub(crate) fn b_diag_vec_p_l(
    da: Option<&[f64]>,
    x: &[f64],
    y: &mut [f64],
    n_rows: usize,
    b: &BlockSize,
) {
    match da {
        Some(da) if b.is_3x3() => {
            for ii in 0..n_rows {
                dense_3_3_ax(ii, da, x, y);
            }
        }
        Some(da) => {
            for ii in 0..n_rows {
                dense_b_ax(ii, b, da, x, y);
            }
        }
        None => b_zero_range(y, 0, n_rows, b),
    }
}

pub(crate) fn zero_range<T: Zero + Copy>(y: &mut [T], start: usize, end: usize) {
    if start < end {
        y[start..end].fill(T::zero());
    }
}

/// Zeroes the useful components of rows `start..end`, leaving padding untouched.
pub(crate) fn b_zero_range<T: Zero + Copy>(y: &mut [T], start: usize, end: usize, b: &BlockSize) {
    if b.extent == b.vector_stride {
        zero_range(y, start * b.vector_stride, end * b.vector_stride);
        return;
    }
    for ii in start..end {
        y[ii * b.vector_stride..ii * b.vector_stride + b.extent].fill(T::zero());
    }
}
