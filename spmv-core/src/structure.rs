//! Matrix structures (nonzero patterns) built from face → cell connectivity.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SpmvError;
use crate::halo::{check_dimensions, Halo};
use crate::numbering::{to_zero_based, ThreadNumbering};
use crate::sort::sort_local;

/// Sparse storage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatrixKind {
    /// Diagonal array plus the raw face list.
    Native,
    /// Compressed sparse row.
    Csr,
    /// Compressed sparse row, upper triangle only.
    CsrSym,
    /// Modified compressed sparse row (diagonal stored apart).
    Msr,
    /// Modified compressed sparse row, upper triangle only.
    MsrSym,
}

impl MatrixKind {
    pub const ALL: [MatrixKind; 5] = [
        MatrixKind::Native,
        MatrixKind::Csr,
        MatrixKind::CsrSym,
        MatrixKind::Msr,
        MatrixKind::MsrSym,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MatrixKind::Native => "native",
            MatrixKind::Csr => "CSR",
            MatrixKind::CsrSym => "symmetric CSR",
            MatrixKind::Msr => "MSR",
            MatrixKind::MsrSym => "symmetric MSR",
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            MatrixKind::Native => "diagonal + faces",
            MatrixKind::Csr => "Compressed Sparse Row",
            MatrixKind::CsrSym => "symmetric Compressed Sparse Row",
            MatrixKind::Msr => "Modified Compressed Sparse Row",
            MatrixKind::MsrSym => "symmetric Modified Compressed Sparse Row",
        }
    }

    /// Position in [`MatrixKind::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Kinds storing only one extradiagonal entry per face.
    pub fn is_symmetric_storage(&self) -> bool {
        matches!(self, MatrixKind::CsrSym | MatrixKind::MsrSym)
    }

    /// Kinds whose coefficient store accepts diagonal blocks.
    pub fn supports_blocks(&self) -> bool {
        matches!(self, MatrixKind::Native | MatrixKind::Msr)
    }

    /// Kinds keeping the diagonal in a separate array.
    pub fn separate_diagonal(&self) -> bool {
        matches!(self, MatrixKind::Native | MatrixKind::Msr | MatrixKind::MsrSym)
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatrixKind {
    type Err = SpmvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(MatrixKind::Native),
            "csr" => Ok(MatrixKind::Csr),
            "csr_sym" | "symmetric csr" => Ok(MatrixKind::CsrSym),
            "msr" => Ok(MatrixKind::Msr),
            "msr_sym" | "symmetric msr" => Ok(MatrixKind::MsrSym),
            _ => Err(SpmvError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Cell counts and 1-based face → cell pairs supplied by the mesh.
#[derive(Debug, Clone, Copy)]
pub struct MeshConnectivity<'m> {
    pub n_cells: usize,
    pub n_cells_ext: usize,
    pub face_cell: &'m [[usize; 2]],
}

impl<'m> MeshConnectivity<'m> {
    pub fn new(n_cells: usize, n_cells_ext: usize, face_cell: &'m [[usize; 2]]) -> Self {
        Self {
            n_cells,
            n_cells_ext,
            face_cell,
        }
    }
}

/// Row-compressed storage shared by the CSR and MSR kinds (and their
/// symmetric variants, which only keep the upper triangle).
#[derive(Debug, Clone)]
pub struct CsrStructure {
    pub(crate) n_rows: usize,
    pub(crate) n_cols: usize,
    /// Maximum number of entries in a row.
    pub(crate) n_cols_max: usize,
    pub(crate) have_diag: bool,
    pub(crate) symmetric: bool,
    /// `false` when duplicate entries were merged (incremental assembly).
    pub(crate) direct_assembly: bool,
    pub(crate) row_index: Vec<usize>,
    pub(crate) col_id: Vec<usize>,
}

impl CsrStructure {
    /// Full pattern: every face adds an entry to both of its rows.
    fn new(have_diag: bool, n_rows: usize, n_cols: usize, faces: &[[usize; 2]]) -> Self {
        let diag_elts = usize::from(have_diag);
        let mut ccount = vec![diag_elts; n_cols];
        for &[ii, jj] in faces {
            ccount[ii] += 1;
            ccount[jj] += 1;
        }

        let row_index = prefix_sum(&ccount[..n_rows]);
        let mut col_id = vec![0usize; row_index[n_rows]];

        for (ii, count) in ccount.iter_mut().enumerate().take(n_rows) {
            if have_diag {
                col_id[row_index[ii]] = ii;
            }
            *count = diag_elts;
        }
        for &[ii, jj] in faces {
            if ii < n_rows {
                col_id[row_index[ii] + ccount[ii]] = jj;
                ccount[ii] += 1;
            }
            if jj < n_rows {
                col_id[row_index[jj] + ccount[jj]] = ii;
                ccount[jj] += 1;
            }
        }

        Self::finalize(have_diag, false, n_rows, n_cols, row_index, col_id)
    }

    /// Upper pattern: every face adds one entry, in the row of its smaller cell.
    fn new_symmetric(have_diag: bool, n_rows: usize, n_cols: usize, faces: &[[usize; 2]]) -> Self {
        let diag_elts = usize::from(have_diag);
        let mut ccount = vec![diag_elts; n_rows];
        for &[ii, jj] in faces {
            let row = ii.min(jj);
            if row < n_rows {
                ccount[row] += 1;
            }
        }

        let row_index = prefix_sum(&ccount);
        let mut col_id = vec![0usize; row_index[n_rows]];

        for (ii, count) in ccount.iter_mut().enumerate() {
            if have_diag {
                col_id[row_index[ii]] = ii;
            }
            *count = diag_elts;
        }
        for &[ii, jj] in faces {
            let (row, col) = if ii < jj { (ii, jj) } else { (jj, ii) };
            if row < n_rows {
                col_id[row_index[row] + ccount[row]] = col;
                ccount[row] += 1;
            }
        }

        Self::finalize(have_diag, true, n_rows, n_cols, row_index, col_id)
    }

    /// Sorts rows and merges duplicates.
    fn finalize(
        have_diag: bool,
        symmetric: bool,
        n_rows: usize,
        n_cols: usize,
        mut row_index: Vec<usize>,
        mut col_id: Vec<usize>,
    ) -> Self {
        let mut n_cols_max = row_index
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0);
        let mut direct_assembly = true;

        if n_cols_max > 1 {
            for ii in 0..n_rows {
                let row = &mut col_id[row_index[ii]..row_index[ii + 1]];
                sort_local(row);
                if row.windows(2).any(|w| w[0] == w[1]) {
                    direct_assembly = false;
                }
            }
        }

        if !direct_assembly {
            let nnz_ini = col_id.len();
            let mut kk = 0;
            let mut row_start = 0;
            for ii in 0..n_rows {
                let row_end = row_index[ii + 1];
                let mut prev = None;
                for jj in row_start..row_end {
                    let c = col_id[jj];
                    if prev != Some(c) {
                        col_id[kk] = c;
                        kk += 1;
                        prev = Some(c);
                    }
                }
                row_start = row_end;
                row_index[ii + 1] = kk;
            }
            debug_assert!(kk < nnz_ini);
            col_id.truncate(kk);
            col_id.shrink_to_fit();
            n_cols_max = row_index
                .windows(2)
                .map(|w| w[1] - w[0])
                .max()
                .unwrap_or(0);
            log::debug!(
                "Compacted row structure from {} to {} entries (incremental assembly)",
                nnz_ini,
                kk
            );
        }

        Self {
            n_rows,
            n_cols,
            n_cols_max,
            have_diag,
            symmetric,
            direct_assembly,
            row_index,
            col_id,
        }
    }

    pub fn row_index(&self) -> &[usize] {
        &self.row_index
    }

    pub fn col_id(&self) -> &[usize] {
        &self.col_id
    }

    pub fn nnz(&self) -> usize {
        self.col_id.len()
    }

    pub fn n_cols_max(&self) -> usize {
        self.n_cols_max
    }

    pub fn direct_assembly(&self) -> bool {
        self.direct_assembly
    }

    pub fn have_diag(&self) -> bool {
        self.have_diag
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Column ids of row `ii`.
    pub fn row(&self, ii: usize) -> &[usize] {
        &self.col_id[self.row_index[ii]..self.row_index[ii + 1]]
    }

    /// Position of entry `(ii, jj)` in the value array.
    pub(crate) fn find(&self, ii: usize, jj: usize) -> Option<usize> {
        let start = self.row_index[ii];
        self.row(ii).binary_search(&jj).ok().map(|k| start + k)
    }
}

fn prefix_sum(counts: &[usize]) -> Vec<usize> {
    let mut index = Vec::with_capacity(counts.len() + 1);
    index.push(0);
    let mut acc = 0;
    for &c in counts {
        acc += c;
        index.push(acc);
    }
    index
}

#[derive(Debug, Clone)]
pub enum StructureData {
    /// Face-based storage: the face list itself is the pattern.
    Native,
    Csr(CsrStructure),
}

/// Immutable nonzero pattern shared by any number of matrices.
#[derive(Debug, Clone)]
pub struct MatrixStructure {
    kind: MatrixKind,
    n_cells: usize,
    n_cells_ext: usize,
    /// 0-based face → cell pairs.
    faces: Vec<[usize; 2]>,
    data: StructureData,
    halo: Option<Arc<dyn Halo>>,
    numbering: Option<ThreadNumbering>,
}

impl MatrixStructure {
    /// Builds the structure of the given kind.
    ///
    /// MSR kinds never keep the diagonal in the pattern; `have_diag` only
    /// applies to the CSR kinds.
    pub fn create(
        kind: MatrixKind,
        have_diag: bool,
        mesh: &MeshConnectivity<'_>,
        halo: Option<Arc<dyn Halo>>,
        numbering: Option<ThreadNumbering>,
    ) -> Result<Self, SpmvError> {
        let MeshConnectivity {
            n_cells,
            n_cells_ext,
            face_cell,
        } = *mesh;

        if n_cells_ext < n_cells {
            return Err(SpmvError::InvalidDimensions(format!(
                "cells with ghosts ({}) fewer than local cells ({})",
                n_cells_ext, n_cells
            )));
        }

        let faces = face_cell
            .iter()
            .enumerate()
            .map(|(face_id, pair)| to_zero_based(face_id, pair, n_cells_ext))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(halo) = &halo {
            check_dimensions(halo.as_ref(), n_cells, n_cells_ext)?;
        }
        if let Some(numbering) = &numbering {
            numbering.validate(&faces, n_cells_ext)?;
        }

        let data = match kind {
            MatrixKind::Native => StructureData::Native,
            MatrixKind::Csr => {
                StructureData::Csr(CsrStructure::new(have_diag, n_cells, n_cells_ext, &faces))
            }
            MatrixKind::CsrSym => StructureData::Csr(CsrStructure::new_symmetric(
                have_diag,
                n_cells,
                n_cells_ext,
                &faces,
            )),
            MatrixKind::Msr => {
                StructureData::Csr(CsrStructure::new(false, n_cells, n_cells_ext, &faces))
            }
            MatrixKind::MsrSym => StructureData::Csr(CsrStructure::new_symmetric(
                false,
                n_cells,
                n_cells_ext,
                &faces,
            )),
        };

        match &data {
            StructureData::Native => log::debug!(
                "Created {} structure: {} cells, {} with ghosts, {} faces",
                kind,
                n_cells,
                n_cells_ext,
                face_cell.len()
            ),
            StructureData::Csr(s) => log::debug!(
                "Created {} structure: {} rows, {} columns, {} entries, max row length {}, {} assembly",
                kind,
                n_cells,
                n_cells_ext,
                s.nnz(),
                s.n_cols_max,
                if s.direct_assembly { "direct" } else { "incremental" }
            ),
        }

        Ok(Self {
            kind,
            n_cells,
            n_cells_ext,
            faces,
            data,
            halo,
            numbering,
        })
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn n_rows(&self) -> usize {
        self.n_cells
    }

    pub fn n_columns(&self) -> usize {
        self.n_cells_ext
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// 0-based face → cell pairs.
    pub fn faces(&self) -> &[[usize; 2]] {
        &self.faces
    }

    pub fn data(&self) -> &StructureData {
        &self.data
    }

    pub fn csr(&self) -> Option<&CsrStructure> {
        match &self.data {
            StructureData::Csr(s) => Some(s),
            StructureData::Native => None,
        }
    }

    pub fn halo(&self) -> Option<&Arc<dyn Halo>> {
        self.halo.as_ref()
    }

    pub fn numbering(&self) -> Option<&ThreadNumbering> {
        self.numbering.as_ref()
    }

    pub(crate) fn internal(&self, operation: &'static str) -> SpmvError {
        SpmvError::Internal(format!(
            "{}: structure data does not match the {} kind",
            operation, self.kind
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(n: usize, faces: &[[usize; 2]]) -> MeshConnectivity<'_> {
        MeshConnectivity::new(n, n, faces)
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in MatrixKind::ALL {
            assert_eq!(kind.name().parse::<MatrixKind>().unwrap(), kind);
            assert_eq!(MatrixKind::ALL[kind.index()], kind);
        }
        match "ELL".parse::<MatrixKind>() {
            Err(SpmvError::UnsupportedKind(name)) => assert_eq!(name, "ELL"),
            other => panic!("expected UnsupportedKind, got {:?}", other),
        }
    }

    #[test]
    fn test_csr_row_sums() {
        let faces = [[1, 2], [2, 3], [1, 3], [3, 4]];
        let s = MatrixStructure::create(MatrixKind::Csr, true, &mesh(4, &faces), None, None)
            .unwrap();
        let csr = s.csr().unwrap();
        assert_eq!(csr.nnz(), 2 * faces.len() + 4);
        assert_eq!(csr.row(0), &[0, 1, 2]);
        assert_eq!(csr.row(2), &[0, 1, 2, 3]);
        assert!(csr.direct_assembly());
        assert_eq!(csr.n_cols_max(), 4);
    }

    #[test]
    fn test_msr_has_no_diagonal() {
        let faces = [[1, 2], [2, 3]];
        let s = MatrixStructure::create(MatrixKind::Msr, true, &mesh(3, &faces), None, None)
            .unwrap();
        let csr = s.csr().unwrap();
        assert_eq!(csr.nnz(), 4);
        assert_eq!(csr.row(1), &[0, 2]);
        assert!(!csr.have_diag());
    }

    #[test]
    fn test_symmetric_rows_use_smaller_index() {
        let faces = [[2, 1], [3, 2], [1, 3]];
        let s = MatrixStructure::create(MatrixKind::CsrSym, true, &mesh(3, &faces), None, None)
            .unwrap();
        let csr = s.csr().unwrap();
        assert_eq!(csr.row(0), &[0, 1, 2]);
        assert_eq!(csr.row(1), &[1, 2]);
        assert_eq!(csr.row(2), &[2]);
        assert_eq!(csr.nnz(), faces.len() + 3);
    }

    #[test]
    fn test_duplicates_are_compacted() {
        let faces = [[1, 2], [2, 1], [2, 3], [2, 3], [3, 4]];
        let s = MatrixStructure::create(MatrixKind::Csr, false, &mesh(4, &faces), None, None)
            .unwrap();
        let csr = s.csr().unwrap();
        assert!(!csr.direct_assembly());
        assert!(csr.nnz() < 2 * faces.len());
        assert_eq!(csr.nnz(), 6);
        for ii in 0..4 {
            assert!(csr.row(ii).windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(csr.row(1), &[0, 2]);
        assert_eq!(csr.row_index()[4], csr.nnz());
    }

    #[test]
    fn test_ghost_columns_are_kept_but_ghost_rows_dropped() {
        // 3 local cells, 1 ghost cell (id 4).
        let faces = [[1, 2], [2, 3], [3, 4]];
        let m = MeshConnectivity::new(3, 4, &faces);
        let s = MatrixStructure::create(MatrixKind::Csr, true, &m, None, None).unwrap();
        let csr = s.csr().unwrap();
        assert_eq!(csr.row_index().len(), 4);
        assert_eq!(csr.row(2), &[1, 2, 3]);
        assert_eq!(s.n_columns(), 4);
    }

    #[test]
    fn test_invalid_faces_are_rejected() {
        let faces = [[1, 5]];
        let res = MatrixStructure::create(MatrixKind::Native, true, &mesh(4, &faces), None, None);
        assert!(matches!(res, Err(SpmvError::InvalidTopology(_))));

        let m = MeshConnectivity::new(4, 3, &[]);
        let res = MatrixStructure::create(MatrixKind::Native, true, &m, None, None);
        assert!(matches!(res, Err(SpmvError::InvalidDimensions(_))));
    }

    #[test]
    fn test_long_rows_are_sorted() {
        // Star: cell 1 connected to 30 others, listed in reverse order.
        let faces: Vec<[usize; 2]> = (2..=31).rev().map(|c| [c, 1]).collect();
        let s = MatrixStructure::create(MatrixKind::Csr, true, &mesh(31, &faces), None, None)
            .unwrap();
        let row = s.csr().unwrap().row(0);
        assert_eq!(row.len(), 31);
        assert!(row.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(s.csr().unwrap().find(0, 17), Some(17));
    }
}
