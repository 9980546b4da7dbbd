use crate::block::{b_zero_range, zero_range, BlockSize};
use crate::coeffs::MsrCoeffs;
use crate::error::SpmvError;
use crate::kernels::csr::{assigned, row_dot, row_structure};
use crate::kernels::{for_each_block_row, for_each_row};
use crate::structure::MatrixStructure;

#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;

fn diagonal<'c>(c: &'c MsrCoeffs<'_>, exclude_diag: bool) -> Option<&'c [f64]> {
    if exclude_diag {
        None
    } else {
        c.d_val.as_slice()
    }
}

pub(crate) fn mat_vec(
    c: &MsrCoeffs<'_>,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);
    let da = diagonal(c, exclude_diag);
    let xa = assigned(&c.x_val, ms).then_some(c.x_val.as_slice());

    for_each_row(&mut y[..n_rows], |ii, yi| {
        let mut sii = xa.map_or(0.0, |xa| row_dot(ms, xa, ii, x));
        if let Some(da) = da {
            sii += da[ii] * x[ii];
        }
        *yi = sii;
    });
    zero_range(y, n_rows, n_cols);
    Ok(())
}

pub(crate) fn b_mat_vec(
    c: &MsrCoeffs<'_>,
    s: &MatrixStructure,
    b: &BlockSize,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);
    let da = diagonal(c, exclude_diag);
    let xa = assigned(&c.x_val, ms).then_some(c.x_val.as_slice());
    let (vs, extent) = (b.vector_stride, b.extent);

    for_each_block_row(&mut y[..n_rows * vs], vs, |ii, y_row| {
        let x_ii = &x[ii * vs..ii * vs + extent];
        for (kk, out) in y_row[..extent].iter_mut().enumerate() {
            *out = match da {
                Some(da) => {
                    let a_row = &da[ii * b.block_stride + kk * b.row_stride..];
                    a_row[..extent].iter().zip(x_ii).map(|(a, x)| a * x).sum()
                }
                None => 0.0,
            };
        }
        if let Some(xa) = xa {
            for k in ms.row_index[ii]..ms.row_index[ii + 1] {
                let jj = ms.col_id[k];
                for (kk, out) in y_row[..extent].iter_mut().enumerate() {
                    *out += xa[k] * x[jj * vs + kk];
                }
            }
        }
    });
    b_zero_range(y, n_rows, n_cols, b);
    Ok(())
}

/// Gathers `x` for chunks of `loop_length` rows, each row's entries
/// followed by its own `x[ii]`.
///
/// [`Matrix`](crate::Matrix) never installs this kernel with a zero loop
/// length; a zero reaching here gathers all rows in one chunk.
pub(crate) fn mat_vec_prefetch(
    c: &MsrCoeffs<'_>,
    s: &MatrixStructure,
    loop_length: usize,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    let ms = row_structure(s)?;
    let (n_rows, n_cols) = (ms.n_rows, ms.n_cols);
    let da = diagonal(c, exclude_diag);
    let xa = assigned(&c.x_val, ms).then_some(c.x_val.as_slice());

    let mut prefetch = c
        .prefetch
        .lock()
        .map_err(|_| SpmvError::Internal("MSR prefetch buffer lock poisoned".to_string()))?;
    let l = if loop_length == 0 { n_rows.max(1) } else { loop_length };
    let ri = &ms.row_index;

    for start in (0..n_rows).step_by(l) {
        let end = (start + l).min(n_rows);
        let needed = ri[end] - ri[start] + (end - start);
        if prefetch.len() < needed {
            prefetch.resize(needed, 0.0);
        }

        let mut p = 0;
        for ii in start..end {
            for &jj in ms.row(ii) {
                prefetch[p] = x[jj];
                p += 1;
            }
            prefetch[p] = x[ii];
            p += 1;
        }

        let mut p = 0;
        for ii in start..end {
            let (a, b) = (ri[ii], ri[ii + 1]);
            let gathered = &prefetch[p..p + (b - a)];
            let mut sii = xa.map_or(0.0, |xa| {
                xa[a..b].iter().zip(gathered).map(|(v, x)| v * x).sum()
            });
            p += b - a;
            if let Some(da) = da {
                sii += da[ii] * prefetch[p];
            }
            p += 1;
            y[ii] = sii;
        }
    }
    zero_range(y, n_rows, n_cols);
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
        accelerator.spmv_csr(
            &ms.row_index,
            &ms.col_id,
            &c.x_val,
            &x[..n_cols],
            &mut y[..n_rows],
        )?;
    } else {
        zero_range(y, 0, n_rows);
    }
    if let Some(da) = diagonal(c, exclude_diag) {
        for (ii, yi) in y[..n_rows].iter_mut().enumerate() {
            *yi += da[ii] * x[ii];
        }
    }
    zero_range(y, n_rows, n_cols);
    Ok(())
}
