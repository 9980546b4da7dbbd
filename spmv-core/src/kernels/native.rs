//! Kernels for the native (diagonal + face list) layout.

use cfg_if::cfg_if;

use crate::block::{b_diag_vec_p_l, b_zero_range, diag_vec_p_l, zero_range, BlockSize};
use crate::coeffs::NativeCoeffs;
use crate::structure::MatrixStructure;

/// Extradiagonal pair `(a_ij, a_ji)` of a face.
#[inline]
fn face_pair(xa: &[f64], symmetric: bool, face_id: usize) -> (f64, f64) {
    if symmetric {
        (xa[face_id], xa[face_id])
    } else {
        (xa[2 * face_id], xa[2 * face_id + 1])
    }
}

fn diagonal<'c>(c: &'c NativeCoeffs<'_>, exclude_diag: bool) -> Option<&'c [f64]> {
    if exclude_diag {
        None
    } else {
        c.da.as_slice()
    }
}

pub(crate) fn mat_vec(
    c: &NativeCoeffs<'_>,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) {
    let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
    diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows);
    zero_range(y, n_rows, n_cols);

    if let Some(xa) = c.xa.as_slice() {
        if c.symmetric {
            for (face_id, &[ii, jj]) in s.faces().iter().enumerate() {
                y[ii] += xa[face_id] * x[jj];
                y[jj] += xa[face_id] * x[ii];
            }
        } else {
            for (face_id, &[ii, jj]) in s.faces().iter().enumerate() {
                y[ii] += xa[2 * face_id] * x[jj];
                y[jj] += xa[2 * face_id + 1] * x[ii];
            }
        }
        zero_range(y, n_rows, n_cols);
    }
}

pub(crate) fn b_mat_vec(
    c: &NativeCoeffs<'_>,
    s: &MatrixStructure,
    b: &BlockSize,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) {
    let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
    b_diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows, b);
    b_zero_range(y, n_rows, n_cols, b);

    if let Some(xa) = c.xa.as_slice() {
        let vs = b.vector_stride;
        for (face_id, &[ii, jj]) in s.faces().iter().enumerate() {
            let (a_ij, a_ji) = face_pair(xa, c.symmetric, face_id);
            for kk in 0..b.extent {
                y[ii * vs + kk] += a_ij * x[jj * vs + kk];
                y[jj * vs + kk] += a_ji * x[ii * vs + kk];
            }
        }
        b_zero_range(y, n_rows, n_cols, b);
    }
}

pub(crate) fn mat_vec_3_3(
    c: &NativeCoeffs<'_>,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) {
    let b = BlockSize::square(3);
    let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
    b_diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows, &b);
    b_zero_range(y, n_rows, n_cols, &b);

    if let Some(xa) = c.xa.as_slice() {
        for (face_id, &[ii, jj]) in s.faces().iter().enumerate() {
            let (a_ij, a_ji) = face_pair(xa, c.symmetric, face_id);
            y[ii * 3] += a_ij * x[jj * 3];
            y[ii * 3 + 1] += a_ij * x[jj * 3 + 1];
            y[ii * 3 + 2] += a_ij * x[jj * 3 + 2];
            y[jj * 3] += a_ji * x[ii * 3];
            y[jj * 3 + 1] += a_ji * x[ii * 3 + 1];
            y[jj * 3 + 2] += a_ji * x[ii * 3 + 2];
        }
        b_zero_range(y, n_rows, n_cols, &b);
    }
}

/// Native product with faces split in cache blocks of `loop_length`:
/// the products of a block are computed first, then accumulated.
pub(crate) fn mat_vec_bull(
    c: &NativeCoeffs<'_>,
    s: &MatrixStructure,
    loop_length: usize,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) {
    let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
    diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows);
    zero_range(y, n_rows, n_cols);

    let Some(xa) = c.xa.as_slice() else {
        return;
    };
    let faces = s.faces();
    let l = if loop_length == 0 {
        faces.len().max(1)
    } else {
        loop_length
    };
    let mut y_i = vec![0.0; l];
    let mut y_j = vec![0.0; l];

    for (chunk_id, chunk) in faces.chunks(l).enumerate() {
        let base = chunk_id * l;
        for (k, &[ii, jj]) in chunk.iter().enumerate() {
            let (a_ij, a_ji) = face_pair(xa, c.symmetric, base + k);
            y_i[k] = a_ij * x[jj];
            y_j[k] = a_ji * x[ii];
        }
        for (k, &[ii, _]) in chunk.iter().enumerate() {
            y[ii] += y_i[k];
        }
        for (k, &[_, jj]) in chunk.iter().enumerate() {
            y[jj] += y_j[k];
        }
    }
    zero_range(y, n_rows, n_cols);
}

/// Native product with one sweep per face side.
pub(crate) fn mat_vec_vector(
    c: &NativeCoeffs<'_>,
    s: &MatrixStructure,
    exclude_diag: bool,
    x: &[f64],
    y: &mut [f64],
) {
    let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
    diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows);
    zero_range(y, n_rows, n_cols);

    let Some(xa) = c.xa.as_slice() else {
        return;
    };
    let faces = s.faces();
    let (stride, offset) = if c.symmetric { (1, 0) } else { (2, 1) };
    for (face_id, &[ii, jj]) in faces.iter().enumerate() {
        y[ii] += xa[stride * face_id] * x[jj];
    }
    for (face_id, &[ii, jj]) in faces.iter().enumerate() {
        y[jj] += xa[stride * face_id + offset] * x[ii];
    }
    zero_range(y, n_rows, n_cols);
}

cfg_if! {
    if #[cfg(feature = "native")] {
        use rayon::prelude::*;

        use crate::atomic::{store_into, to_atomic};

        /// Faces of one group are spread over the threads of the numbering;
        /// groups run one after the other.
        pub(crate) fn mat_vec_threaded(
            c: &NativeCoeffs<'_>,
            s: &MatrixStructure,
            exclude_diag: bool,
            x: &[f64],
            y: &mut [f64],
        ) {
            let Some(numbering) = s.numbering() else {
                return mat_vec(c, s, exclude_diag, x, y);
            };
            let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
            diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows);
            zero_range(y, n_rows, n_cols);

            let Some(xa) = c.xa.as_slice() else {
                return;
            };
            let faces = s.faces();
            let symmetric = c.symmetric;
            let acc = to_atomic(&y[..n_cols]);
            for g_id in 0..numbering.n_groups() {
                (0..numbering.n_threads()).into_par_iter().for_each(|t_id| {
                    for face_id in numbering.range(t_id, g_id) {
                        let [ii, jj] = faces[face_id];
                        let (a_ij, a_ji) = face_pair(xa, symmetric, face_id);
                        acc[ii].fetch_add(a_ij * x[jj]);
                        acc[jj].fetch_add(a_ji * x[ii]);
                    }
                });
            }
            store_into(&acc[..n_rows], y);
            zero_range(y, n_rows, n_cols);
        }

        pub(crate) fn b_mat_vec_threaded(
            c: &NativeCoeffs<'_>,
            s: &MatrixStructure,
            b: &BlockSize,
            exclude_diag: bool,
            x: &[f64],
            y: &mut [f64],
        ) {
            let Some(numbering) = s.numbering() else {
                return b_mat_vec(c, s, b, exclude_diag, x, y);
            };
            let (n_rows, n_cols) = (s.n_rows(), s.n_columns());
            b_diag_vec_p_l(diagonal(c, exclude_diag), x, y, n_rows, b);
            b_zero_range(y, n_rows, n_cols, b);

            let Some(xa) = c.xa.as_slice() else {
                return;
            };
            let faces = s.faces();
            let symmetric = c.symmetric;
            let (vs, extent) = (b.vector_stride, b.extent);
            let acc = to_atomic(&y[..n_cols * vs]);
            for g_id in 0..numbering.n_groups() {
                (0..numbering.n_threads()).into_par_iter().for_each(|t_id| {
                    for face_id in numbering.range(t_id, g_id) {
                        let [ii, jj] = faces[face_id];
                        let (a_ij, a_ji) = face_pair(xa, symmetric, face_id);
                        for kk in 0..extent {
                            acc[ii * vs + kk].fetch_add(a_ij * x[jj * vs + kk]);
                            acc[jj * vs + kk].fetch_add(a_ji * x[ii * vs + kk]);
                        }
                    }
                });
            }
            store_into(&acc[..n_rows * vs], y);
            b_zero_range(y, n_rows, n_cols, b);
        }
    } else {
        pub(crate) fn mat_vec_threaded(
            c: &NativeCoeffs<'_>,
            s: &MatrixStructure,
            exclude_diag: bool,
            x: &[f64],
            y: &mut [f64],
        ) {
            mat_vec(c, s, exclude_diag, x, y)
        }

        pub(crate) fn b_mat_vec_threaded(
            c: &NativeCoeffs<'_>,
            s: &MatrixStructure,
            b: &BlockSize,
            exclude_diag: bool,
            x: &[f64],
            y: &mut [f64],
        ) {
            b_mat_vec(c, s, b, exclude_diag, x, y)
        }
    }
}
