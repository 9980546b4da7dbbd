use crate::block::zero_range;
use crate::coeffs::CsrCoeffs;
use crate::error::SpmvError;
use crate::kernels::for_each_row;
use crate::structure::{CsrStructure, MatrixStructure};

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;

/// Row-compressed part of a structure, or an error for the native kind.
pub(crate) fn row_structure(s: &MatrixStructure) -> Result<&CsrStructure, SpmvError> {
    s.csr().ok_or_else(|| s.internal("row-compressed product"))
}

/// Values present for every stored entry; otherwise the product is zero.
pub(crate) fn assigned(values: &[f64], ms: &CsrStructure) -> bool {
    !values.is_empty() && values.len() >= ms.nnz()
}

#[inline]
pub(crate) fn row_dot(ms: &CsrStructure, values: &[f64], ii: usize, x: &[f64]) -> f64 {
    let (start, end) = (ms.row_index[ii], ms.row_index[ii + 1]);
    ms.col_id[start..end]
        .iter()
        .zip(&values[start..end])
        .map(|(&jj, v)| v * x[jj])
        .sum()
}

pub(crate) fn mat_vec(
    c: &CsrCoeffs,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    if !assigned(&c.val, ms) {
        zero_range(y, 0, n_cols);
        return Ok(());
    }

    let val = &c.val;
    if exclude_diag {
        for_each_row(&mut y[..n_rows], |ii, yi| {
            let (start, end) = (ms.row_index[ii], ms.row_index[ii + 1]);
            *yi = ms.col_id[start..end]
                .iter()
                .zip(&val[start..end])
                .filter(|&(&jj, _)| jj != ii)
                .map(|(&jj, v)| v * x[jj])
                .sum();
        });
    } else {
        for_each_row(&mut y[..n_rows], |ii, yi| {
            *yi = row_dot(ms, val, ii, x);
        });
    }
    zero_range(y, n_rows, n_cols);
    Ok(())
}

/// Gathers the `x` values of `loop_length` rows into a contiguous buffer
/// before the product.
///
/// [`Matrix`](crate::Matrix) never installs this kernel with a zero loop
/// length; a zero reaching here gathers all rows in one chunk.
pub(crate) fn mat_vec_prefetch(
    c: &CsrCoeffs,
    s: &MatrixStructure,
    loop_length: usize,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    if !assigned(&c.val, ms) {
        zero_range(y, 0, n_cols);
        return Ok(());
    }

    let mut prefetch = c
        .prefetch
        .lock()
        .map_err(|_| SpmvError::Internal("CSR prefetch buffer lock poisoned".to_string()))?;
    let l = if loop_length == 0 { n_rows.max(1) } else { loop_length };
    let ri = &ms.row_index;

    for start in (0..n_rows).step_by(l) {
        let end = (start + l).min(n_rows);
        let (k0, k1) = (ri[start], ri[end]);
        if prefetch.len() < k1 - k0 {
            prefetch.resize(k1 - k0, 0.0);
        }
        for (p, &jj) in prefetch.iter_mut().zip(&ms.col_id[k0..k1]) {
            *p = x[jj];
        }
        for ii in start..end {
            let (a, b) = (ri[ii], ri[ii + 1]);
            y[ii] = c.val[a..b]
                .iter()
                .zip(&prefetch[a - k0..b - k0])
                .map(|(v, p)| v * p)
                .sum();
        }
    }
    zero_range(y, n_rows, n_cols);
    Ok(())
}

#[cfg(feature = "gpu")]
pub(crate) fn mat_vec_accelerated(
    c: &CsrCoeffs,
    s: &MatrixStructure,
    accelerator: &GpuAccelerator,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    if !assigned(&c.val, ms) {
        zero_range(y, 0, n_cols);
        return Ok(());
    }
    accelerator.spmv_csr(
        &ms.row_index,
        &ms.col_id,
        &c.val,
        &x[..n_cols],
        &mut y[..n_rows],
    )?;
    zero_range(y, n_rows, n_cols);
    Ok(())
}
