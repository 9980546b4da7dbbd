use std::sync::Arc;

use spmv_core::{
    BlockSize, FaceRenumbering, Halo, Kernel, Matrix, MatrixKind, MatrixStructure,
    MeshConnectivity, PeriodicHalo, SpmvError, ThreadNumbering,
};

/// Compares products row by row, relative to the largest expected magnitude
/// (at least 1) so long rows with large sums get proportionate slack.
fn assert_rows_close(actual: &[f64], expected: &[f64], rtol: f64) {
    assert_eq!(actual.len(), expected.len(), "product lengths differ");
    let scale = expected.iter().fold(1.0f64, |m, v| m.max(v.abs()));
    let off: Vec<(usize, f64, f64)> = actual
        .iter()
        .zip(expected)
        .enumerate()
        .filter(|(_, (a, e))| !((*a - *e).abs() <= rtol * scale))
        .map(|(i, (a, e))| (i, *a, *e))
        .take(5)
        .collect();
    assert!(
        off.is_empty(),
        "rows differ beyond {:e} (scale {}): (row, got, expected) {:?}",
        rtol,
        scale,
        off
    );
}

/// Random mesh: a chain through the local cells, extra random faces, and
/// faces joining local cells to ghosts. Cell ids are 1-based.
struct TestMesh {
    n_cells: usize,
    n_cells_ext: usize,
    face_cell: Vec<[usize; 2]>,
}

impl TestMesh {
    fn random(seed: u64, n_cells: usize, n_ghosts: usize, n_extra: usize) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let n_cells_ext = n_cells + n_ghosts;
        let mut face_cell: Vec<[usize; 2]> = (1..n_cells).map(|i| [i, i + 1]).collect();
        for _ in 0..n_extra {
            let a = rng.usize(1..=n_cells);
            let mut b = rng.usize(1..=n_cells);
            while b == a {
                b = rng.usize(1..=n_cells);
            }
            face_cell.push([a, b]);
        }
        for g in 0..n_ghosts {
            face_cell.push([rng.usize(1..=n_cells), n_cells + g + 1]);
        }
        rng.shuffle(&mut face_cell);
        Self {
            n_cells,
            n_cells_ext,
            face_cell,
        }
    }

    fn n_faces(&self) -> usize {
        self.face_cell.len()
    }

    fn connectivity(&self) -> MeshConnectivity<'_> {
        MeshConnectivity::new(self.n_cells, self.n_cells_ext, &self.face_cell)
    }

    fn structure(&self, kind: MatrixKind) -> Result<Arc<MatrixStructure>, SpmvError> {
        Ok(Arc::new(MatrixStructure::create(
            kind,
            true,
            &self.connectivity(),
            None,
            None,
        )?))
    }

    fn threaded_structure(
        &self,
        n_threads: usize,
    ) -> Result<(Arc<MatrixStructure>, FaceRenumbering, TestMesh), SpmvError> {
        let renumbering =
            FaceRenumbering::from_face_coloring(self.n_cells_ext, &self.face_cell, n_threads)?;
        let mesh = TestMesh {
            n_cells: self.n_cells,
            n_cells_ext: self.n_cells_ext,
            face_cell: renumbering.apply(&self.face_cell, 1),
        };
        let structure = MatrixStructure::create(
            MatrixKind::Native,
            true,
            &mesh.connectivity(),
            None,
            Some(renumbering.numbering.clone()),
        )?;
        Ok((Arc::new(structure), renumbering, mesh))
    }
}

struct TestData {
    da: Vec<f64>,
    xa: Vec<f64>,
    x: Vec<f64>,
}

impl TestData {
    fn random(seed: u64, mesh: &TestMesh, symmetric: bool, b: &BlockSize) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let n_xa = if symmetric { mesh.n_faces() } else { 2 * mesh.n_faces() };
        Self {
            da: (0..mesh.n_cells * b.block_stride)
                .map(|_| 1.0 + rng.f64())
                .collect(),
            xa: (0..n_xa).map(|_| rng.f64() - 0.5).collect(),
            x: (0..mesh.n_cells_ext * b.vector_stride)
                .map(|_| rng.f64() * 2.0 - 1.0)
                .collect(),
        }
    }

    /// Dense-style reference product over the face list (interleaved `xa`).
    fn reference(
        &self,
        mesh: &TestMesh,
        symmetric: bool,
        b: &BlockSize,
        exclude_diag: bool,
    ) -> Vec<f64> {
        let vs = b.vector_stride;
        let mut y = vec![0.0; mesh.n_cells_ext * vs];
        if !exclude_diag {
            for ii in 0..mesh.n_cells {
                for k in 0..b.extent {
                    y[ii * vs + k] = (0..b.extent)
                        .map(|l| {
                            self.da[ii * b.block_stride + k * b.row_stride + l]
                                * self.x[ii * vs + l]
                        })
                        .sum();
                }
            }
        }
        for (f, &[i, j]) in mesh.face_cell.iter().enumerate() {
            let (ii, jj) = (i - 1, j - 1);
            let (a_ij, a_ji) = if symmetric {
                (self.xa[f], self.xa[f])
            } else {
                (self.xa[2 * f], self.xa[2 * f + 1])
            };
            for k in 0..b.extent {
                if ii < mesh.n_cells {
                    y[ii * vs + k] += a_ij * self.x[jj * vs + k];
                }
                if jj < mesh.n_cells {
                    y[jj * vs + k] += a_ji * self.x[ii * vs + k];
                }
            }
        }
        y
    }
}

fn scalar_kernels(kind: MatrixKind) -> Vec<Kernel> {
    match kind {
        MatrixKind::Native => vec![
            Kernel::Native,
            Kernel::NativeThreaded,
            Kernel::NativeBull,
            Kernel::NativeVector,
        ],
        MatrixKind::Csr => vec![Kernel::Csr, Kernel::CsrPrefetch],
        MatrixKind::CsrSym => vec![Kernel::CsrSym],
        MatrixKind::Msr => vec![Kernel::Msr, Kernel::MsrPrefetch],
        MatrixKind::MsrSym => vec![Kernel::MsrSym],
    }
}

fn run(
    m: &mut Matrix<'_>,
    kernel: Kernel,
    block: bool,
    exclude_diag: bool,
    x: &[f64],
    n: usize,
) -> Result<Vec<f64>, SpmvError> {
    m.set_kernel(block, exclude_diag, kernel)?;
    let mut x = x.to_vec();
    let mut y = vec![f64::NAN; n];
    if exclude_diag {
        m.exdiag_vector_multiply(&mut x, &mut y)?;
    } else {
        m.vector_multiply(&mut x, &mut y)?;
    }
    Ok(y)
}

#[test]
fn test_scalar_kernels_match_reference() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(42, 60, 6, 90);
    let b = BlockSize::SCALAR;

    for kind in MatrixKind::ALL {
        for symmetric in [true, false] {
            if kind.is_symmetric_storage() && !symmetric {
                continue;
            }
            let data = TestData::random(7, &mesh, symmetric, &b);
            let mut m = Matrix::create(mesh.structure(kind)?);
            m.set_loop_length(8)?;
            m.set_coefficients(symmetric, b, Some(&data.da), Some(&data.xa))?;

            for kernel in scalar_kernels(kind) {
                for exclude_diag in [false, true] {
                    if !kernel.supports(false, exclude_diag) {
                        continue;
                    }
                    let y = run(&mut m, kernel, false, exclude_diag, &data.x, mesh.n_cells_ext)?;
                    let expected = data.reference(&mesh, symmetric, &b, exclude_diag);
                    assert_rows_close(&y, &expected, 1e-12);
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_block_kernels_match_reference() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(3, 40, 4, 50);
    let padded = BlockSize::new(3, 4, 4, 12)?;

    for b in [BlockSize::square(3), BlockSize::square(2), padded] {
        for symmetric in [true, false] {
            let data = TestData::random(11, &mesh, symmetric, &b);
            for (kind, kernels) in [
                (
                    MatrixKind::Native,
                    vec![Kernel::NativeBlock, Kernel::Native3x3, Kernel::NativeBlockThreaded],
                ),
                (MatrixKind::Msr, vec![Kernel::MsrBlock]),
            ] {
                let mut m = Matrix::create(mesh.structure(kind)?);
                m.copy_coefficients(symmetric, b, Some(&data.da), Some(&data.xa))?;
                assert_eq!(m.diag_block_size()?, b);

                for kernel in kernels {
                    for exclude_diag in [false, true] {
                        let y = run(
                            &mut m,
                            kernel,
                            true,
                            exclude_diag,
                            &data.x,
                            mesh.n_cells_ext * b.vector_stride,
                        )?;
                        let expected = data.reference(&mesh, symmetric, &b, exclude_diag);
                        // padding is never written
                        let useful = |v: &[f64]| -> Vec<f64> {
                            v.chunks(b.vector_stride)
                                .flat_map(|c| c[..b.extent].to_vec())
                                .collect()
                        };
                        assert_rows_close(&useful(&y), &useful(&expected), 1e-12);
                    }
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_threaded_native_with_face_coloring() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(5, 200, 10, 400);
    let (structure, renumbering, renumbered) = mesh.threaded_structure(4)?;
    assert!(structure.numbering().is_some());

    let b = BlockSize::SCALAR;
    let data = TestData::random(9, &mesh, false, &b);
    let xa = renumbering.apply(&data.xa, 2);

    let mut m = Matrix::create(structure);
    assert_eq!(m.kernel(false, false), Some(Kernel::NativeThreaded));
    m.set_coefficients(false, b, Some(&data.da), Some(&xa))?;

    let mut x = data.x.clone();
    let mut y = vec![0.0; mesh.n_cells_ext];
    m.vector_multiply(&mut x, &mut y)?;

    let renumbered_data = TestData {
        da: data.da.clone(),
        xa,
        x: data.x.clone(),
    };
    let expected = renumbered_data.reference(&renumbered, false, &b, false);
    assert_rows_close(&y, &expected, 1e-12);
    Ok(())
}

#[test]
fn test_numbering_sharing_cells_is_rejected() {
    let faces = [[1, 2], [2, 3]];
    let mesh = MeshConnectivity::new(3, 3, &faces);
    let numbering = ThreadNumbering::new(2, 1, vec![0, 1, 1, 2]).unwrap();
    let res = MatrixStructure::create(MatrixKind::Native, true, &mesh, None, Some(numbering));
    assert!(matches!(res, Err(SpmvError::InvalidNumbering(_))));
}

#[test]
fn test_threaded_product_needs_a_valid_numbering() -> Result<(), SpmvError> {
    // Both faces touch cell 2: two threads of one group would write it together.
    let faces = [[1, 2], [2, 3]];
    let mesh = MeshConnectivity::new(3, 3, &faces);
    let shared = ThreadNumbering::new(2, 1, vec![0, 1, 1, 2])?;
    match MatrixStructure::create(MatrixKind::Native, true, &mesh, None, Some(shared)) {
        Err(SpmvError::InvalidNumbering(msg)) => assert!(msg.contains("shared")),
        other => panic!("expected InvalidNumbering, got {:?}", other.map(|_| ())),
    }

    // The same faces placed in two groups run one after the other.
    let split = ThreadNumbering::new(1, 2, vec![0, 1, 1, 2])?;
    let structure = Arc::new(MatrixStructure::create(
        MatrixKind::Native,
        true,
        &mesh,
        None,
        Some(split),
    )?);
    let mut m = Matrix::create(structure);
    assert_eq!(m.kernel(false, false), Some(Kernel::NativeThreaded));
    m.copy_coefficients(true, BlockSize::SCALAR, Some(&[2.0, 3.0, 4.0][..]), Some(&[1.0, 1.0][..]))?;
    let mut x = vec![1.0; 3];
    let mut y = vec![f64::NAN; 3];
    m.vector_multiply(&mut x, &mut y)?;
    assert_eq!(y, vec![3.0, 5.0, 5.0]);
    Ok(())
}

#[test]
fn test_threaded_block_native_with_face_coloring() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(21, 120, 8, 200);
    let (structure, renumbering, renumbered) = mesh.threaded_structure(3)?;
    let b = BlockSize::square(3);
    let data = TestData::random(13, &mesh, true, &b);
    let xa = renumbering.apply(&data.xa, 1);

    let mut m = Matrix::create(structure);
    assert_eq!(m.kernel(true, false), Some(Kernel::NativeBlockThreaded));
    m.copy_coefficients(true, b, Some(&data.da), Some(&xa))?;

    let renumbered_data = TestData {
        da: data.da.clone(),
        xa,
        x: data.x.clone(),
    };
    for exclude_diag in [false, true] {
        let y = run(
            &mut m,
            Kernel::NativeBlockThreaded,
            true,
            exclude_diag,
            &data.x,
            mesh.n_cells_ext * b.vector_stride,
        )?;
        let expected = renumbered_data.reference(&renumbered, true, &b, exclude_diag);
        assert_rows_close(&y, &expected, 1e-12);
    }
    Ok(())
}

#[test]
fn test_exdiag_with_zero_extradiagonal_is_zero() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(1, 20, 2, 20);
    let da: Vec<f64> = (0..mesh.n_cells).map(|i| 1.0 + i as f64).collect();
    let xa = vec![0.0; mesh.n_faces()];
    for kind in MatrixKind::ALL {
        let mut m = Matrix::create(mesh.structure(kind)?);
        m.set_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))?;
        let mut x = vec![1.0; mesh.n_cells_ext];
        let mut y = vec![1.0; mesh.n_cells_ext];
        m.exdiag_vector_multiply(&mut x, &mut y)?;
        assert!(y.iter().all(|&v| v == 0.0), "{}: {:?}", kind, y);
    }
    Ok(())
}

#[test]
fn test_release_detaches_mapped_arrays() -> Result<(), SpmvError> {
    let faces = [[1, 2], [2, 3]];
    let mesh = MeshConnectivity::new(3, 3, &faces);

    for kind in MatrixKind::ALL {
        let structure = Arc::new(MatrixStructure::create(kind, true, &mesh, None, None)?);

        let mapped: Matrix<'static> = {
            let da = vec![2.0, 3.0, 4.0];
            let xa = vec![1.0, 1.0];
            let mut m = Matrix::create(structure.clone());
            m.set_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))?;
            m.release_coefficients()
        };
        let copied: Matrix<'static> = {
            let da = vec![2.0, 3.0, 4.0];
            let xa = vec![1.0, 1.0];
            let mut m = Matrix::create(structure.clone());
            m.copy_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))?;
            m.release_coefficients()
        };

        let x = vec![1.0; 3];
        let mut y = vec![0.0; 3];
        copied.vector_multiply_nosync(&x, &mut y)?;
        assert_eq!(y, vec![3.0, 5.0, 5.0], "{}", kind);

        mapped.vector_multiply_nosync(&x, &mut y)?;
        let expected = match kind {
            // everything was mapped
            MatrixKind::Native => vec![0.0, 0.0, 0.0],
            // row values are always owned
            MatrixKind::Csr | MatrixKind::CsrSym => vec![3.0, 5.0, 5.0],
            // only the diagonal was mapped
            MatrixKind::Msr | MatrixKind::MsrSym => vec![1.0, 2.0, 1.0],
        };
        assert_eq!(y, expected, "{}", kind);
    }
    Ok(())
}

#[test]
fn test_matrices_sharing_a_structure_do_not_alias() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(21, 30, 0, 30);
    for kind in MatrixKind::ALL {
        let structure = mesh.structure(kind)?;
        let d1 = TestData::random(1, &mesh, true, &BlockSize::SCALAR);
        let d2 = TestData::random(2, &mesh, true, &BlockSize::SCALAR);

        let mut m1 = Matrix::create(structure.clone());
        let mut m2 = Matrix::create(structure);
        m1.copy_coefficients(true, BlockSize::SCALAR, Some(&d1.da), Some(&d1.xa))?;
        m2.copy_coefficients(true, BlockSize::SCALAR, Some(&d2.da), Some(&d2.xa))?;

        let mut y1 = vec![0.0; mesh.n_cells_ext];
        let mut y2 = vec![0.0; mesh.n_cells_ext];
        m1.vector_multiply_nosync(&d1.x, &mut y1)?;
        m2.vector_multiply_nosync(&d1.x, &mut y2)?;

        let e1 = d1.reference(&mesh, true, &BlockSize::SCALAR, false);
        let e2 = TestData { x: d1.x.clone(), ..d2 }.reference(&mesh, true, &BlockSize::SCALAR, false);
        assert_rows_close(&y1, &e1, 1e-12);
        assert_rows_close(&y2, &e2, 1e-12);
    }
    Ok(())
}

#[test]
fn test_noninterleaved_coefficients() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(13, 25, 3, 25);
    let data = TestData::random(17, &mesh, false, &BlockSize::SCALAR);
    let n_faces = mesh.n_faces();
    let halves: Vec<f64> = (0..n_faces)
        .map(|f| data.xa[2 * f])
        .chain((0..n_faces).map(|f| data.xa[2 * f + 1]))
        .collect();
    let expected = data.reference(&mesh, false, &BlockSize::SCALAR, false);

    for kind in [MatrixKind::Native, MatrixKind::Csr, MatrixKind::Msr] {
        let mut m = Matrix::create(mesh.structure(kind)?);
        m.set_coefficients_noninterleaved(false, Some(&data.da), Some(&halves))?;
        let mut y = vec![0.0; mesh.n_cells_ext];
        m.vector_multiply_nosync(&data.x, &mut y)?;
        assert_rows_close(&y, &expected, 1e-12);
    }
    Ok(())
}

#[test]
fn test_incremental_assembly_sums_duplicate_faces() -> Result<(), SpmvError> {
    // Faces 1 and 3 join the same cells.
    let faces = [[1, 2], [2, 3], [2, 1], [3, 4]];
    let mesh = MeshConnectivity::new(4, 4, &faces);
    let da = [4.0, 4.0, 4.0, 4.0];
    let xa = [1.0, 2.0, 0.5, 3.0];
    let x = [1.0, 2.0, 3.0, 4.0];

    let mut results = Vec::new();
    for kind in MatrixKind::ALL {
        let structure = Arc::new(MatrixStructure::create(kind, true, &mesh, None, None)?);
        if let Some(csr) = structure.csr() {
            assert!(!csr.direct_assembly(), "{}", kind);
        }
        let mut m = Matrix::create(structure);
        m.set_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))?;
        let mut y = vec![0.0; 4];
        m.vector_multiply_nosync(&x, &mut y)?;
        results.push(y);
    }
    let expected = vec![4.0 + 1.5 * 2.0, 8.0 + 1.5 + 6.0, 12.0 + 4.0 + 12.0, 16.0 + 9.0];
    for y in results {
        assert_rows_close(&y, &expected, 1e-12);
    }
    Ok(())
}

#[test]
fn test_get_diagonal_for_every_kind() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(8, 15, 2, 10);
    let data = TestData::random(8, &mesh, true, &BlockSize::SCALAR);
    for kind in MatrixKind::ALL {
        let mut m = Matrix::create(mesh.structure(kind)?);
        m.set_coefficients(true, BlockSize::SCALAR, Some(&data.da), Some(&data.xa))?;
        let mut d = vec![0.0; mesh.n_cells];
        m.get_diagonal(&mut d)?;
        assert_eq!(d, data.da, "{}", kind);
    }
    Ok(())
}

#[test]
fn test_halo_values_are_used_by_syncing_products() -> Result<(), SpmvError> {
    // Three local cells; ghost 4 is a periodic copy of cell 1.
    let faces = [[1, 2], [2, 3], [3, 4]];
    let mesh = MeshConnectivity::new(3, 4, &faces);
    let halo: Arc<dyn Halo> = Arc::new(PeriodicHalo::from_cells(3, &[0])?);
    let da = [2.0, 2.0, 2.0];
    let xa = [-1.0, -1.0, -1.0];

    for kind in MatrixKind::ALL {
        let structure = Arc::new(MatrixStructure::create(
            kind,
            true,
            &mesh,
            Some(halo.clone()),
            None,
        )?);
        let mut m = Matrix::create(structure);
        m.set_coefficients(true, BlockSize::SCALAR, Some(&da), Some(&xa))?;

        let mut x = vec![1.0, 2.0, 3.0, 99.0];
        let mut y = vec![7.0; 4];
        m.vector_multiply(&mut x, &mut y)?;
        assert_eq!(x[3], 1.0, "{}", kind);
        assert_rows_close(&y, &[0.0, 0.0, 3.0, 0.0], 1e-12);
    }
    Ok(())
}

#[test]
fn test_halo_must_match_ghost_cells() -> Result<(), SpmvError> {
    let faces = [[1, 2], [2, 3], [3, 4]];
    let mesh = MeshConnectivity::new(3, 4, &faces);

    // two ghosts for one ghost column
    let too_many: Arc<dyn Halo> = Arc::new(PeriodicHalo::from_cells(3, &[0, 1])?);
    // right ghost count, built for another local cell count
    let wrong_local: Arc<dyn Halo> = Arc::new(PeriodicHalo::from_cells(2, &[0])?);

    for halo in [too_many, wrong_local] {
        for kind in MatrixKind::ALL {
            let res = MatrixStructure::create(kind, true, &mesh, Some(halo.clone()), None);
            assert!(matches!(res, Err(SpmvError::Halo(_))), "{}: {:?}", kind, res.map(|_| ()));
        }
    }

    let matching: Arc<dyn Halo> = Arc::new(PeriodicHalo::from_cells(3, &[0])?);
    assert!(MatrixStructure::create(MatrixKind::Csr, true, &mesh, Some(matching), None).is_ok());
    Ok(())
}

#[test]
fn test_prefetch_rejects_diagonal_exclusion() -> Result<(), SpmvError> {
    let mesh = TestMesh::random(4, 10, 0, 5);
    let data = TestData::random(4, &mesh, true, &BlockSize::SCALAR);
    let mut m = Matrix::create(mesh.structure(MatrixKind::Csr)?);
    m.set_coefficients(true, BlockSize::SCALAR, Some(&data.da), Some(&data.xa))?;
    let err = m.set_kernel(false, true, Kernel::CsrPrefetch).unwrap_err();
    assert!(matches!(err, SpmvError::UnsupportedOperation(_)));
    Ok(())
}
