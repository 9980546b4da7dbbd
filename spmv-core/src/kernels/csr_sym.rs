use crate::block::zero_range;
use crate::coeffs::CsrCoeffs;
use crate::error::SpmvError;
use crate::kernels::csr::{assigned, row_structure};
use crate::structure::MatrixStructure;

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;
#[cfg(feature = "gpu")]
use crate::structure::CsrStructure;

/// Upper-triangle product: each stored entry updates both of its rows.
pub(crate) fn mat_vec(
    c: &CsrCoeffs,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    zero_range(y, 0, n_cols);
    if !assigned(&c.val, ms) {
        return Ok(());
    }

    for ii in 0..n_rows {
        let x_ii = x[ii];
        let mut sii = 0.0;
        for kk in ms.row_index[ii]..ms.row_index[ii + 1] {
            let jj = ms.col_id[kk];
            let v = c.val[kk];
            if jj == ii {
                if !exclude_diag {
                    sii += v * x_ii;
                }
            } else {
                sii += v * x[jj];
                if jj < n_rows {
                    y[jj] += v * x_ii;
                }
            }
        }
        y[ii] += sii;
    }
    Ok(())
}

/// Full row-compressed copy of an upper-triangle pattern: each off-diagonal
/// entry `(ii, jj)` also appears as `(jj, ii)` when `jj` is a local row.
#[cfg(feature = "gpu")]
pub(crate) fn expand_upper(
    ms: &CsrStructure,
    values: &[f64],
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let n_rows = ms.n_rows;
    let mut counts = vec![0usize; n_rows];
    for ii in 0..n_rows {
        for &jj in ms.row(ii) {
            counts[ii] += 1;
            if jj != ii && jj < n_rows {
                counts[jj] += 1;
            }
        }
    }

    let mut row_index = Vec::with_capacity(n_rows + 1);
    row_index.push(0);
    for c in &counts {
        let last = row_index[row_index.len() - 1];
        row_index.push(last + c);
    }

    let nnz = row_index[n_rows];
    let mut col_id = vec![0usize; nnz];
    let mut val = vec![0.0; nnz];
    let mut fill = row_index[..n_rows].to_vec();
    for ii in 0..n_rows {
        for k in ms.row_index[ii]..ms.row_index[ii + 1] {
            let (jj, v) = (ms.col_id[k], values[k]);
            col_id[fill[ii]] = jj;
            val[fill[ii]] = v;
            fill[ii] += 1;
            if jj != ii && jj < n_rows {
                col_id[fill[jj]] = ii;
                val[fill[jj]] = v;
                fill[jj] += 1;
            }
        }
    }
    (row_index, col_id, val)
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

    zero_range(y, 0, n_cols);
    if !assigned(&c.val, ms) {
        return Ok(());
    }
    let (row_index, col_id, val) = expand_upper(ms, &c.val);
    accelerator.spmv_csr(&row_index, &col_id, &val, &x[..n_cols], &mut y[..n_rows])?;
    zero_range(y, n_rows, n_cols);
    Ok(())
}
