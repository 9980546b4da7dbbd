use crate::block::{diag_vec_p_l, zero_range};
use crate::coeffs::MsrCoeffs;
use crate::error::SpmvError;
use crate::kernels::csr::{assigned, row_structure};
use crate::structure::MatrixStructure;

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;
#[cfg(feature = "gpu")]
use crate::kernels::csr_sym::expand_upper;

pub(crate) fn mat_vec(
    c: &MsrCoeffs<'_>,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    let da = if exclude_diag { None } else { c.d_val.as_slice() };
    diag_vec_p_l(da, x, y, n_rows);
    zero_range(y, n_rows, n_cols);

    if !assigned(&c.x_val, ms) {
        return Ok(());
    }

    for ii in 0..n_rows {
        let x_ii = x[ii];
        let mut sii = 0.0;
        for kk in ms.row_index[ii]..ms.row_index[ii + 1] {
            let jj = ms.col_id[kk];
            let v = c.x_val[kk];
            sii += v * x[jj];
            if jj < n_rows {
                y[jj] += v * x_ii;
            }
        }
        y[ii] += sii;
    }
    Ok(())
}

/// Extradiagonal product on the accelerator, diagonal added on the host.
#[cfg(feature = "gpu")]
pub(crate) fn mat_vec_accelerated(
    c: &MsrCoeffs<'_>,
    s: &MatrixStructure,
    accelerator: &GpuAccelerator,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);

    if assigned(&c.x_val, ms) {
        let (row_index, col_id, val) = expand_upper(ms, &c.x_val);
        accelerator.spmv_csr(&row_index, &col_id, &val, &x[..n_cols], &mut y[..n_rows])?;
    } else {
        zero_range(y, 0, n_rows);
    }
    if !exclude_diag {
        if let Some(da) = c.d_val.as_slice() {
            for (ii, yi) in y[..n_rows].iter_mut().enumerate() {
                *yi += da[ii] * x[ii];
            }
        }
    }
    zero_range(y, n_rows, n_cols);
    Ok(())
}
