//! Coefficient storage for each matrix kind.
//!
//! Arrays are either mapped (borrowed from the caller for `'a`) or owned.
//! Releasing a store forgets mapped arrays and keeps owned ones.

use std::borrow::Cow;
use std::sync::Mutex;

use crate::block::BlockSize;
use crate::error::SpmvError;
use crate::structure::{CsrStructure, MatrixKind, MatrixStructure, StructureData};
use crate::traits::CoefficientStore;

/// A coefficient array: unset, borrowed from the caller, or owned.
#[derive(Debug, Clone, Default)]
pub struct CoeffArray<'a>(Option<Cow<'a, [f64]>>);

impl<'a> CoeffArray<'a> {
    pub fn unset() -> Self {
        Self(None)
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.0, Some(Cow::Borrowed(_)))
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.0, Some(Cow::Owned(_)))
    }

    pub fn as_slice(&self) -> Option<&[f64]> {
        self.0.as_deref()
    }

    pub(crate) fn map(&mut self, values: &'a [f64]) {
        self.0 = Some(Cow::Borrowed(values));
    }

    /// Copies `values`, reusing an owned buffer when there is one.
    pub(crate) fn copy_from(&mut self, values: &[f64]) {
        self.owned_buffer(values.len()).copy_from_slice(values);
    }

    /// Owned buffer of `len` values, allocated or resized as needed.
    pub(crate) fn owned_buffer(&mut self, len: usize) -> &mut [f64] {
        if !self.is_owned() {
            self.0 = Some(Cow::Owned(Vec::with_capacity(len)));
        }
        let v = self
            .0
            .get_or_insert_with(|| Cow::Owned(Vec::new()))
            .to_mut();
        v.resize(len, 0.0);
        v.as_mut_slice()
    }

    pub(crate) fn clear(&mut self) {
        self.0 = None;
    }

    /// Forgets a mapped array; owned arrays are kept.
    pub(crate) fn release(&mut self) {
        if self.is_mapped() {
            self.0 = None;
        }
    }

    /// Keeps only owned data, dropping the borrow on the caller's memory.
    pub(crate) fn detach<'n>(self) -> CoeffArray<'n> {
        match self.0 {
            Some(Cow::Owned(v)) => CoeffArray(Some(Cow::Owned(v))),
            _ => CoeffArray(None),
        }
    }
}

/// A caller array, either kept by reference for `'a` or copied.
#[derive(Debug, Clone, Copy)]
pub enum Values<'a, 'r> {
    Mapped(&'a [f64]),
    Copied(&'r [f64]),
}

impl<'a, 'r> Values<'a, 'r> {
    pub fn as_slice(&self) -> &[f64] {
        match self {
            Values::Mapped(v) => *v,
            Values::Copied(v) => *v,
        }
    }

    /// Stores the first `len` values into `target`.
    fn store(&self, target: &mut CoeffArray<'a>, len: usize) {
        match *self {
            Values::Mapped(v) => target.map(v),
            Values::Copied(v) => target.copy_from(&v[..len]),
        }
    }
}

/// Values passed to a coefficient assignment.
#[derive(Debug, Clone, Copy)]
pub struct Assignment<'a, 'r> {
    pub symmetric: bool,
    /// Non-symmetric extradiagonal values given as `(a_ij, a_ji)` pairs
    /// rather than as two half arrays.
    pub interleaved: bool,
    pub block: BlockSize,
    pub loop_length: usize,
    pub da: Option<Values<'a, 'r>>,
    pub xa: Option<Values<'a, 'r>>,
}

impl Assignment<'_, '_> {
    pub fn da(&self) -> Option<&[f64]> {
        self.da.as_ref().map(Values::as_slice)
    }

    pub fn xa(&self) -> Option<&[f64]> {
        self.xa.as_ref().map(Values::as_slice)
    }
}

fn check_len(what: &str, values: &[f64], needed: usize) -> Result<(), SpmvError> {
    if values.len() < needed {
        return Err(SpmvError::InvalidDimensions(format!(
            "{} holds {} values, {} required",
            what,
            values.len(),
            needed
        )));
    }
    Ok(())
}

/// Expected extradiagonal length for `n_faces` faces.
fn xa_len(symmetric: bool, n_faces: usize) -> usize {
    if symmetric {
        n_faces
    } else {
        2 * n_faces
    }
}

/// Maps or copies a diagonal array of `n_rows` blocks.
fn assign_diagonal<'a>(
    target: &mut CoeffArray<'a>,
    da: Option<Values<'a, '_>>,
    n_rows: usize,
    b: &BlockSize,
) -> Result<(), SpmvError> {
    match da {
        Some(da) => {
            let needed = n_rows * b.block_stride;
            check_len("diagonal array", da.as_slice(), needed)?;
            da.store(target, needed);
        }
        None => target.clear(),
    }
    Ok(())
}

/// Extracts the diagonal from a separate (possibly blocked) diagonal array.
fn diagonal_separate(
    da_src: Option<&[f64]>,
    n_rows: usize,
    b: &BlockSize,
    da: &mut [f64],
) -> Result<(), SpmvError> {
    if b.is_scalar() {
        check_len("diagonal output", da, n_rows)?;
        match da_src {
            Some(src) => da[..n_rows].copy_from_slice(&src[..n_rows]),
            None => da[..n_rows].fill(0.0),
        }
        return Ok(());
    }
    check_len("diagonal output", da, n_rows * b.vector_stride)?;
    for ii in 0..n_rows {
        for jj in 0..b.extent {
            da[ii * b.vector_stride + jj] = match da_src {
                Some(src) => src[ii * b.block_stride + jj * b.row_stride + jj],
                None => 0.0,
            };
        }
    }
    Ok(())
}

/// Coefficients of a native (diagonal + faces) matrix.
#[derive(Debug, Default)]
pub struct NativeCoeffs<'a> {
    pub(crate) symmetric: bool,
    pub(crate) da: CoeffArray<'a>,
    /// One value per face if symmetric, interleaved pairs otherwise.
    pub(crate) xa: CoeffArray<'a>,
}

impl<'a> CoefficientStore<'a> for NativeCoeffs<'a> {
    fn assign(
        &mut self,
        structure: &MatrixStructure,
        request: &Assignment<'a, '_>,
    ) -> Result<(), SpmvError> {
        let n_faces = structure.n_faces();
        self.symmetric = request.symmetric;

        assign_diagonal(&mut self.da, request.da, structure.n_rows(), &request.block)?;

        match request.xa {
            Some(values) => {
                let xa = values.as_slice();
                let needed = xa_len(request.symmetric, n_faces);
                check_len("extradiagonal array", xa, needed)?;
                if request.symmetric || request.interleaved {
                    values.store(&mut self.xa, needed);
                } else {
                    if !request.block.is_scalar() {
                        return Err(SpmvError::UnsupportedOperation(
                            "non-interleaved extradiagonal values require a scalar matrix"
                                .to_string(),
                        ));
                    }
                    let (xa1, xa2) = xa.split_at(n_faces);
                    let buf = self.xa.owned_buffer(needed);
                    for (face_id, pair) in buf.chunks_exact_mut(2).enumerate() {
                        pair[0] = xa1[face_id];
                        pair[1] = xa2[face_id];
                    }
                }
            }
            None => self.xa.clear(),
        }

        log::trace!(
            "Native coefficients assigned: symmetric={}, diagonal {}, extradiagonal {}",
            self.symmetric,
            describe(&self.da),
            describe(&self.xa)
        );
        Ok(())
    }

    fn release(&mut self) {
        self.da.release();
        self.xa.release();
    }

    fn copy_diagonal(
        &self,
        structure: &MatrixStructure,
        b: &BlockSize,
        da: &mut [f64],
    ) -> Result<(), SpmvError> {
        diagonal_separate(self.da.as_slice(), structure.n_rows(), b, da)
    }
}

fn describe(a: &CoeffArray<'_>) -> &'static str {
    if a.is_mapped() {
        "mapped"
    } else if a.is_owned() {
        "owned"
    } else {
        "unset"
    }
}

/// Writes extradiagonal values into row-compressed storage.
///
/// The symmetric layout keeps one entry per face, in the row of its
/// smaller cell.
fn scatter_extradiag(
    ms: &CsrStructure,
    faces: &[[usize; 2]],
    symmetric: bool,
    interleaved: bool,
    xa: &[f64],
    val: &mut [f64],
) -> Result<(), SpmvError> {
    let n_faces = faces.len();
    let n_rows = ms.n_rows;
    let direct = ms.direct_assembly;

    let mut put = |ii: usize, jj: usize, v: f64| -> Result<(), SpmvError> {
        let kk = ms.find(ii, jj).ok_or_else(|| {
            SpmvError::Internal(format!("entry ({}, {}) missing from matrix structure", ii, jj))
        })?;
        if direct {
            val[kk] = v;
        } else {
            val[kk] += v;
        }
        Ok(())
    };

    for (face_id, &[ii, jj]) in faces.iter().enumerate() {
        if ms.symmetric {
            let (row, col) = if ii < jj { (ii, jj) } else { (jj, ii) };
            if row < n_rows {
                put(row, col, xa[face_id])?;
            }
            continue;
        }
        let (a_ij, a_ji) = if symmetric {
            (xa[face_id], xa[face_id])
        } else if interleaved {
            (xa[2 * face_id], xa[2 * face_id + 1])
        } else {
            (xa[face_id], xa[n_faces + face_id])
        };
        if ii < n_rows {
            put(ii, jj, a_ij)?;
        }
        if jj < n_rows {
            put(jj, ii, a_ji)?;
        }
    }
    Ok(())
}

/// Common assignment of the row-compressed value array.
///
/// The diagonal is written only when the structure stores it.
fn assign_row_values(
    kind: MatrixKind,
    structure: &MatrixStructure,
    request: &Assignment<'_, '_>,
    val: &mut Vec<f64>,
) -> Result<(), SpmvError> {
    let StructureData::Csr(ms) = structure.data() else {
        return Err(structure.internal("coefficient assignment"));
    };

    if ms.symmetric && !request.symmetric && request.xa.is_some() {
        return Err(SpmvError::NonSymmetricCoefficients(kind));
    }

    val.resize(ms.nnz(), 0.0);
    if !ms.direct_assembly || request.xa.is_none() {
        val.fill(0.0);
    }

    if ms.have_diag {
        let n_rows = ms.n_rows;
        if let Some(da) = request.da() {
            check_len("diagonal array", da, n_rows)?;
        }
        for ii in 0..n_rows {
            let kk = if ms.symmetric {
                ms.row_index[ii]
            } else {
                ms.find(ii, ii).ok_or_else(|| {
                    SpmvError::Internal(format!("diagonal entry {} missing", ii))
                })?
            };
            val[kk] = request.da().map_or(0.0, |da| da[ii]);
        }
    }

    if let Some(xa) = request.xa() {
        check_len(
            "extradiagonal array",
            xa,
            xa_len(request.symmetric, structure.n_faces()),
        )?;
        scatter_extradiag(
            ms,
            structure.faces(),
            request.symmetric,
            request.interleaved,
            xa,
            val,
        )?;
    }
    Ok(())
}

/// Prefetch scratch length for chunks of `loop_length` rows.
fn prefetch_len(ms: &CsrStructure, loop_length: usize) -> usize {
    if loop_length == 0 {
        return 0;
    }
    ((ms.n_cols_max + 1) * loop_length).max(ms.nnz() + ms.n_rows)
}

fn reject_blocks(kind: MatrixKind, b: &BlockSize) -> Result<(), SpmvError> {
    if b.is_scalar() {
        Ok(())
    } else {
        Err(SpmvError::UnsupportedForKind {
            operation: "block diagonal coefficients",
            kind,
        })
    }
}

/// Coefficients of CSR and symmetric CSR matrices (always owned).
#[derive(Debug)]
pub struct CsrCoeffs {
    pub(crate) kind: MatrixKind,
    pub(crate) val: Vec<f64>,
    pub(crate) prefetch: Mutex<Vec<f64>>,
}

impl CsrCoeffs {
    pub(crate) fn new(kind: MatrixKind) -> Self {
        Self {
            kind,
            val: Vec::new(),
            prefetch: Mutex::new(Vec::new()),
        }
    }
}

impl<'a> CoefficientStore<'a> for CsrCoeffs {
    fn assign(
        &mut self,
        structure: &MatrixStructure,
        request: &Assignment<'a, '_>,
    ) -> Result<(), SpmvError> {
        reject_blocks(self.kind, &request.block)?;
        assign_row_values(self.kind, structure, request, &mut self.val)?;

        if let (Some(ms), Ok(buf)) = (structure.csr(), self.prefetch.get_mut()) {
            let len = prefetch_len(ms, request.loop_length);
            if buf.len() < len {
                buf.resize(len, 0.0);
            }
        }
        log::trace!("{} coefficients assigned ({} values)", self.kind, self.val.len());
        Ok(())
    }

    fn release(&mut self) {}

    fn copy_diagonal(
        &self,
        structure: &MatrixStructure,
        _b: &BlockSize,
        da: &mut [f64],
    ) -> Result<(), SpmvError> {
        let ms = structure
            .csr()
            .ok_or_else(|| structure.internal("get_diagonal"))?;
        check_len("diagonal output", da, ms.n_rows)?;
        for (ii, d) in da.iter_mut().enumerate().take(ms.n_rows) {
            *d = if self.val.is_empty() {
                0.0
            } else if ms.symmetric && ms.have_diag {
                self.val[ms.row_index[ii]]
            } else {
                ms.find(ii, ii).map_or(0.0, |kk| self.val[kk])
            };
        }
        Ok(())
    }
}

/// Coefficients of MSR and symmetric MSR matrices.
#[derive(Debug)]
pub struct MsrCoeffs<'a> {
    pub(crate) kind: MatrixKind,
    pub(crate) d_val: CoeffArray<'a>,
    pub(crate) x_val: Vec<f64>,
    pub(crate) prefetch: Mutex<Vec<f64>>,
}

impl<'a> MsrCoeffs<'a> {
    pub(crate) fn new(kind: MatrixKind) -> Self {
        Self {
            kind,
            d_val: CoeffArray::unset(),
            x_val: Vec::new(),
            prefetch: Mutex::new(Vec::new()),
        }
    }
}

impl<'a> CoefficientStore<'a> for MsrCoeffs<'a> {
    fn assign(
        &mut self,
        structure: &MatrixStructure,
        request: &Assignment<'a, '_>,
    ) -> Result<(), SpmvError> {
        if self.kind == MatrixKind::MsrSym {
            reject_blocks(self.kind, &request.block)?;
        }
        assign_row_values(self.kind, structure, request, &mut self.x_val)?;
        assign_diagonal(&mut self.d_val, request.da, structure.n_rows(), &request.block)?;

        if let (Some(ms), Ok(buf)) = (structure.csr(), self.prefetch.get_mut()) {
            let len = prefetch_len(ms, request.loop_length);
            if buf.len() < len {
                buf.resize(len, 0.0);
            }
        }
        log::trace!(
            "{} coefficients assigned: diagonal {}, {} extradiagonal values",
            self.kind,
            describe(&self.d_val),
            self.x_val.len()
        );
        Ok(())
    }

    fn release(&mut self) {
        self.d_val.release();
    }

    fn copy_diagonal(
        &self,
        structure: &MatrixStructure,
        b: &BlockSize,
        da: &mut [f64],
    ) -> Result<(), SpmvError> {
        diagonal_separate(self.d_val.as_slice(), structure.n_rows(), b, da)
    }
}

/// Coefficient store of any kind.
#[derive(Debug)]
pub enum Coefficients<'a> {
    Native(NativeCoeffs<'a>),
    Csr(CsrCoeffs),
    Msr(MsrCoeffs<'a>),
}

impl<'a> Coefficients<'a> {
    pub fn new(kind: MatrixKind) -> Self {
        match kind {
            MatrixKind::Native => Coefficients::Native(NativeCoeffs::default()),
            MatrixKind::Csr | MatrixKind::CsrSym => Coefficients::Csr(CsrCoeffs::new(kind)),
            MatrixKind::Msr | MatrixKind::MsrSym => Coefficients::Msr(MsrCoeffs::new(kind)),
        }
    }

    fn store(&self) -> &dyn CoefficientStore<'a> {
        match self {
            Coefficients::Native(c) => c,
            Coefficients::Csr(c) => c,
            Coefficients::Msr(c) => c,
        }
    }

    fn store_mut(&mut self) -> &mut dyn CoefficientStore<'a> {
        match self {
            Coefficients::Native(c) => c,
            Coefficients::Csr(c) => c,
            Coefficients::Msr(c) => c,
        }
    }

    pub(crate) fn assign(
        &mut self,
        structure: &MatrixStructure,
        request: &Assignment<'a, '_>,
    ) -> Result<(), SpmvError> {
        self.store_mut().assign(structure, request)
    }

    pub(crate) fn release(&mut self) {
        self.store_mut().release()
    }

    pub(crate) fn copy_diagonal(
        &self,
        structure: &MatrixStructure,
        b: &BlockSize,
        da: &mut [f64],
    ) -> Result<(), SpmvError> {
        self.store().copy_diagonal(structure, b, da)
    }

    /// Drops every borrow on caller memory, keeping owned arrays.
    pub(crate) fn detach<'n>(self) -> Coefficients<'n> {
        match self {
            Coefficients::Native(c) => Coefficients::Native(NativeCoeffs {
                symmetric: c.symmetric,
                da: c.da.detach(),
                xa: c.xa.detach(),
            }),
            Coefficients::Csr(c) => Coefficients::Csr(c),
            Coefficients::Msr(c) => Coefficients::Msr(MsrCoeffs {
                kind: c.kind,
                d_val: c.d_val.detach(),
                x_val: c.x_val,
                prefetch: c.prefetch,
            }),
        }
    }
}
