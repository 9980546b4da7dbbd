//! Thread-group numbering of faces.
//!
//! Faces are split into groups processed one after the other; inside a
//! group, each thread owns a contiguous face range, and no two threads of
//! the same group may touch the same cell.

use std::ops::Range;

use crate::error::SpmvError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNumbering {
    n_threads: usize,
    n_groups: usize,
    /// Face range bounds; `(t_id * n_groups + g_id) * 2` is the start and
    /// the following entry the (exclusive) end for thread `t_id` of group `g_id`.
    group_index: Vec<usize>,
}

impl ThreadNumbering {
    pub fn new(
        n_threads: usize,
        n_groups: usize,
        group_index: Vec<usize>,
    ) -> Result<Self, SpmvError> {
        if n_threads == 0 || n_groups == 0 {
            return Err(SpmvError::InvalidNumbering(
                "thread and group counts must be positive".to_string(),
            ));
        }
        if group_index.len() != n_threads * n_groups * 2 {
            return Err(SpmvError::InvalidNumbering(format!(
                "group index length ({}) must be 2 * n_threads * n_groups ({})",
                group_index.len(),
                n_threads * n_groups * 2
            )));
        }
        if group_index.chunks_exact(2).any(|r| r[0] > r[1]) {
            return Err(SpmvError::InvalidNumbering(
                "group index range start exceeds its end".to_string(),
            ));
        }
        Ok(Self {
            n_threads,
            n_groups,
            group_index,
        })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    pub fn group_index(&self) -> &[usize] {
        &self.group_index
    }

    /// Face range handled by thread `t_id` in group `g_id`.
    pub fn range(&self, t_id: usize, g_id: usize) -> Range<usize> {
        let base = (t_id * self.n_groups + g_id) * 2;
        self.group_index[base]..self.group_index[base + 1]
    }

    /// Checks that the ranges cover each of the `faces` exactly once and
    /// that threads of one group never share a cell.
    pub(crate) fn validate(&self, faces: &[[usize; 2]], n_cells_ext: usize) -> Result<(), SpmvError> {
        let n_faces = faces.len();
        let mut covered = vec![false; n_faces];
        // (group, thread) stamp of the last writer of each cell.
        let mut owner: Vec<Option<(usize, usize)>> = vec![None; n_cells_ext];

        for g_id in 0..self.n_groups {
            for t_id in 0..self.n_threads {
                let range = self.range(t_id, g_id);
                if range.end > n_faces {
                    return Err(SpmvError::InvalidNumbering(format!(
                        "range {:?} of thread {} in group {} exceeds the face count ({})",
                        range, t_id, g_id, n_faces
                    )));
                }
                for face_id in range {
                    if covered[face_id] {
                        return Err(SpmvError::InvalidNumbering(format!(
                            "face {} is assigned more than once",
                            face_id
                        )));
                    }
                    covered[face_id] = true;
                    for &cell in &faces[face_id] {
                        match owner[cell] {
                            Some((g, t)) if g == g_id && t != t_id => {
                                return Err(SpmvError::InvalidNumbering(format!(
                                    "cell {} is shared by threads {} and {} in group {}",
                                    cell, t, t_id, g_id
                                )));
                            }
                            _ => owner[cell] = Some((g_id, t_id)),
                        }
                    }
                }
            }
        }

        if let Some(face_id) = covered.iter().position(|c| !c) {
            return Err(SpmvError::InvalidNumbering(format!(
                "face {} is not assigned to any thread",
                face_id
            )));
        }
        Ok(())
    }
}

/// A thread numbering together with the face permutation it requires.
#[derive(Debug, Clone)]
pub struct FaceRenumbering {
    pub numbering: ThreadNumbering,
    /// `order[new_id]` is the original id of the face placed at `new_id`.
    pub order: Vec<usize>,
}

impl FaceRenumbering {
    /// Greedy face coloring: faces of one color share no cell, so each color
    /// becomes a group split into `n_threads` contiguous ranges.
    ///
    /// `face_cell` uses 1-based cell ids, as the mesh supplies them.
    pub fn from_face_coloring(
        n_cells_ext: usize,
        face_cell: &[[usize; 2]],
        n_threads: usize,
    ) -> Result<Self, SpmvError> {
        let n_threads = n_threads.max(1);
        let mut cell_colors: Vec<Vec<usize>> = vec![Vec::new(); n_cells_ext];
        let mut face_color = Vec::with_capacity(face_cell.len());
        let mut n_colors = 0;

        for (face_id, pair) in face_cell.iter().enumerate() {
            let [ii, jj] = to_zero_based(face_id, pair, n_cells_ext)?;
            let mut color = 0;
            while cell_colors[ii].contains(&color) || cell_colors[jj].contains(&color) {
                color += 1;
            }
            cell_colors[ii].push(color);
            if jj != ii {
                cell_colors[jj].push(color);
            }
            face_color.push(color);
            n_colors = n_colors.max(color + 1);
        }

        let mut color_faces: Vec<Vec<usize>> = vec![Vec::new(); n_colors.max(1)];
        for (face_id, &color) in face_color.iter().enumerate() {
            color_faces[color].push(face_id);
        }

        let n_groups = color_faces.len();
        let mut group_index = vec![0usize; n_threads * n_groups * 2];
        let mut order = Vec::with_capacity(face_cell.len());

        for (g_id, faces) in color_faces.iter().enumerate() {
            let start = order.len();
            let chunk = faces.len().div_ceil(n_threads);
            for t_id in 0..n_threads {
                let t_start = (start + t_id * chunk).min(start + faces.len());
                let t_end = (t_start + chunk).min(start + faces.len());
                group_index[(t_id * n_groups + g_id) * 2] = t_start;
                group_index[(t_id * n_groups + g_id) * 2 + 1] = t_end;
            }
            order.extend_from_slice(faces);
        }

        log::debug!(
            "Face coloring: {} faces in {} groups for {} threads",
            face_cell.len(),
            n_groups,
            n_threads
        );

        Ok(Self {
            numbering: ThreadNumbering::new(n_threads, n_groups, group_index)?,
            order,
        })
    }

    /// Reorders a per-face array holding `stride` values per face.
    pub fn apply<T: Copy>(&self, values: &[T], stride: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(values.len());
        for &face_id in &self.order {
            out.extend_from_slice(&values[face_id * stride..(face_id + 1) * stride]);
        }
        out
    }
}

/// Converts a 1-based face → cell pair to 0-based ids, checking bounds.
pub(crate) fn to_zero_based(
    face_id: usize,
    pair: &[usize; 2],
    n_cells_ext: usize,
) -> Result<[usize; 2], SpmvError> {
    let mut out = [0usize; 2];
    for (o, &c) in out.iter_mut().zip(pair) {
        if c == 0 || c > n_cells_ext {
            return Err(SpmvError::InvalidTopology(format!(
                "face {} references cell {} outside 1..={}",
                face_id, c, n_cells_ext
            )));
        }
        *o = c - 1;
    }
    Ok(out)
}
