//! Ghost-cell synchronization applied to `x` before a product.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::block::{b_zero_range, zero_range, BlockSize};
use crate::error::SpmvError;

/// Handling of vector values across a rotational periodic boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotationMode {
    /// Ghost values are used as exchanged (vectors are rotated).
    #[default]
    Copy,
    /// Ghost values behind a rotation are set to zero.
    Reset,
    /// Rotation is ignored; not implemented for an actual rotation.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaloType {
    /// Ghosts sharing a face with a local cell.
    Standard,
    /// Ghosts sharing a vertex with a local cell.
    Extended,
}

/// Ghost exchange primitive supplied by the parallel/periodic layer.
pub trait Halo: Debug + Send + Sync {
    /// Number of ghost cells following the local ones.
    fn n_ghosts(&self) -> usize;

    /// Number of local cells the halo was built for, when it knows it.
    fn n_local_cells(&self) -> Option<usize> {
        None
    }

    /// Number of periodic transforms.
    fn n_transforms(&self) -> usize {
        0
    }

    /// Whether any periodic transform has a rotational component.
    fn has_rotation(&self) -> bool {
        false
    }

    /// Fills the ghost entries of `x` (`stride` values per cell) from their owners.
    fn sync_var(&self, halo_type: HaloType, x: &mut [f64], stride: usize) -> Result<(), SpmvError>;

    /// Applies the rotation correction to scalar ghost values.
    fn sync_rotation_scalar(
        &self,
        _halo_type: HaloType,
        _mode: RotationMode,
        _x: &mut [f64],
    ) -> Result<(), SpmvError> {
        Ok(())
    }

    /// Applies the rotation correction to 3-component ghost vectors.
    fn sync_rotation_vector(
        &self,
        _halo_type: HaloType,
        _mode: RotationMode,
        _x: &mut [f64],
        _stride: usize,
    ) -> Result<(), SpmvError> {
        Ok(())
    }
}

/// Zeroes the ghost rows of `y`, then updates the ghost values of `x`.
pub fn pre_multiply_sync(
    rotation_mode: RotationMode,
    halo: Option<&dyn Halo>,
    b: &BlockSize,
    n_rows: usize,
    n_cols: usize,
    x: &mut [f64],
    y: &mut [f64],
) -> Result<(), SpmvError> {
    if b.is_scalar() {
        zero_range(y, n_rows, n_cols);
    } else {
        b_zero_range(y, n_rows, n_cols, b);
    }

    let Some(halo) = halo else {
        return Ok(());
    };

    halo.sync_var(HaloType::Standard, x, b.vector_stride)?;

    if halo.n_transforms() > 0 && halo.has_rotation() {
        if rotation_mode == RotationMode::Ignore {
            return Err(SpmvError::RotationIgnored);
        }
        if b.is_scalar() {
            halo.sync_rotation_scalar(HaloType::Standard, rotation_mode, x)?;
        } else if b.extent == 3 {
            halo.sync_rotation_vector(HaloType::Standard, rotation_mode, x, b.vector_stride)?;
        }
    }

    log::trace!(
        "Synchronized {} ghost values ({} transforms)",
        halo.n_ghosts(),
        halo.n_transforms()
    );
    Ok(())
}

/// Checks that `halo` fills exactly the ghost columns `[n_cells, n_cells_ext)`.
pub(crate) fn check_dimensions(
    halo: &dyn Halo,
    n_cells: usize,
    n_cells_ext: usize,
) -> Result<(), SpmvError> {
    let n_ghosts = n_cells_ext - n_cells;
    if halo.n_ghosts() != n_ghosts {
        return Err(SpmvError::Halo(format!(
            "halo has {} ghost cells, mesh has {}",
            halo.n_ghosts(),
            n_ghosts
        )));
    }
    match halo.n_local_cells() {
        Some(n_local) if n_local != n_cells => Err(SpmvError::Halo(format!(
            "halo was built for {} local cells, mesh has {}",
            n_local, n_cells
        ))),
        _ => Ok(()),
    }
}

/// Where a ghost cell takes its value from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GhostSource {
    /// Local (0-based) cell owning the value.
    pub cell: usize,
    /// Periodic transform crossed, if any.
    pub transform: Option<usize>,
}

/// In-process halo: ghosts are copies of local cells, possibly across a
/// periodic transform. Ghost `k` is stored at index `n_local + k`.
#[derive(Debug, Clone)]
pub struct PeriodicHalo {
    n_local: usize,
    sources: Vec<GhostSource>,
    /// Rotation matrix per transform, `None` for a pure translation.
    rotations: Vec<Option<[[f64; 3]; 3]>>,
}

impl PeriodicHalo {
    pub fn new(
        n_local: usize,
        sources: Vec<GhostSource>,
        rotations: Vec<Option<[[f64; 3]; 3]>>,
    ) -> Result<Self, SpmvError> {
        for (k, s) in sources.iter().enumerate() {
            if s.cell >= n_local {
                return Err(SpmvError::Halo(format!(
                    "ghost {} refers to non-local cell {}",
                    k, s.cell
                )));
            }
            if let Some(t) = s.transform {
                if t >= rotations.len() {
                    return Err(SpmvError::Halo(format!(
                        "ghost {} refers to unknown transform {}",
                        k, t
                    )));
                }
            }
        }
        Ok(Self {
            n_local,
            sources,
            rotations,
        })
    }

    /// Ghosts copied from local cells without periodicity.
    pub fn from_cells(n_local: usize, cells: &[usize]) -> Result<Self, SpmvError> {
        let sources = cells
            .iter()
            .map(|&cell| GhostSource {
                cell,
                transform: None,
            })
            .collect();
        Self::new(n_local, sources, Vec::new())
    }

    fn rotation_of(&self, source: &GhostSource) -> Option<&[[f64; 3]; 3]> {
        source
            .transform
            .and_then(|t| self.rotations[t].as_ref())
    }

    fn check_len(&self, x: &[f64], stride: usize) -> Result<(), SpmvError> {
        let needed = (self.n_local + self.sources.len()) * stride;
        if x.len() < needed {
            return Err(SpmvError::InvalidDimensions(format!(
                "halo exchange needs {} values, array holds {}",
                needed,
                x.len()
            )));
        }
        Ok(())
    }
}

impl Halo for PeriodicHalo {
    fn n_ghosts(&self) -> usize {
        self.sources.len()
    }

    fn n_local_cells(&self) -> Option<usize> {
        Some(self.n_local)
    }

    fn n_transforms(&self) -> usize {
        self.rotations.len()
    }

    fn has_rotation(&self) -> bool {
        self.rotations.iter().any(Option::is_some)
    }

    fn sync_var(&self, _halo_type: HaloType, x: &mut [f64], stride: usize) -> Result<(), SpmvError> {
        self.check_len(x, stride)?;
        for (k, s) in self.sources.iter().enumerate() {
            let dst = (self.n_local + k) * stride;
            x.copy_within(s.cell * stride..(s.cell + 1) * stride, dst);
        }
        Ok(())
    }

    fn sync_rotation_scalar(
        &self,
        _halo_type: HaloType,
        mode: RotationMode,
        x: &mut [f64],
    ) -> Result<(), SpmvError> {
        self.check_len(x, 1)?;
        match mode {
            RotationMode::Copy => Ok(()),
            RotationMode::Ignore => Err(SpmvError::RotationIgnored),
            RotationMode::Reset => {
                for (k, s) in self.sources.iter().enumerate() {
                    if self.rotation_of(s).is_some() {
                        x[self.n_local + k] = 0.0;
                    }
                }
                Ok(())
            }
        }
    }

    fn sync_rotation_vector(
        &self,
        _halo_type: HaloType,
        mode: RotationMode,
        x: &mut [f64],
        stride: usize,
    ) -> Result<(), SpmvError> {
        if stride < 3 {
            return Err(SpmvError::Halo(format!(
                "vector rotation needs a stride of at least 3, got {}",
                stride
            )));
        }
        self.check_len(x, stride)?;
        for (k, s) in self.sources.iter().enumerate() {
            let Some(r) = self.rotation_of(s) else {
                continue;
            };
            let v = &mut x[(self.n_local + k) * stride..(self.n_local + k) * stride + 3];
            match mode {
                RotationMode::Ignore => return Err(SpmvError::RotationIgnored),
                RotationMode::Reset => v.fill(0.0),
                RotationMode::Copy => {
                    let u = [v[0], v[1], v[2]];
                    for (i, out) in v.iter_mut().enumerate() {
                        *out = r[i][0] * u[0] + r[i][1] * u[1] + r[i][2] * u[2];
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUARTER_TURN: [[f64; 3]; 3] = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];

    fn rotating_halo() -> PeriodicHalo {
        PeriodicHalo::new(
            2,
            vec![
                GhostSource {
                    cell: 0,
                    transform: Some(0),
                },
                GhostSource {
                    cell: 1,
                    transform: None,
                },
            ],
            vec![Some(QUARTER_TURN)],
        )
        .unwrap()
    }

    #[test]
    fn test_sync_zeroes_ghost_rows_and_copies_ghosts() {
        let halo = PeriodicHalo::from_cells(3, &[2, 0]).unwrap();
        let mut x = vec![1.0, 2.0, 3.0, -1.0, -1.0];
        let mut y = vec![9.0; 5];
        pre_multiply_sync(
            RotationMode::Copy,
            Some(&halo),
            &BlockSize::SCALAR,
            3,
            5,
            &mut x,
            &mut y,
        )
        .unwrap();
        assert_eq!(x, vec![1.0, 2.0, 3.0, 3.0, 1.0]);
        assert_eq!(y, vec![9.0, 9.0, 9.0, 0.0, 0.0]);
    }

    #[test]
    fn test_ignore_mode_with_rotation_is_an_error() {
        let halo = rotating_halo();
        let mut x = vec![1.0, 2.0, 0.0, 0.0];
        let mut y = vec![0.0; 4];
        let res = pre_multiply_sync(
            RotationMode::Ignore,
            Some(&halo),
            &BlockSize::SCALAR,
            2,
            4,
            &mut x,
            &mut y,
        );
        assert!(matches!(res, Err(SpmvError::RotationIgnored)));
    }

    #[test]
    fn test_reset_mode_zeroes_rotated_scalars() {
        let halo = rotating_halo();
        let mut x = vec![1.0, 2.0, 0.0, 0.0];
        let mut y = vec![0.0; 4];
        pre_multiply_sync(
            RotationMode::Reset,
            Some(&halo),
            &BlockSize::SCALAR,
            2,
            4,
            &mut x,
            &mut y,
        )
        .unwrap();
        assert_eq!(x, vec![1.0, 2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_vector_ghosts_are_rotated() {
        let halo = rotating_halo();
        let b = BlockSize::square(3);
        let mut x = vec![1.0, 0.0, 5.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let mut y = vec![1.0; 12];
        pre_multiply_sync(RotationMode::Copy, Some(&halo), &b, 2, 4, &mut x, &mut y).unwrap();
        // cell 0 = (1,0,5) rotated by a quarter turn around z
        assert_eq!(&x[6..9], &[0.0, 1.0, 5.0]);
        // cell 1 crosses no transform
        assert_eq!(&x[9..12], &[0.0, 1.0, 0.0]);
        assert_eq!(&y[6..12], &[0.0; 6]);
    }

    #[test]
    fn test_dimension_check() {
        let halo = PeriodicHalo::from_cells(3, &[0, 2]).unwrap();
        assert!(check_dimensions(&halo, 3, 5).is_ok());
        assert!(matches!(check_dimensions(&halo, 3, 4), Err(SpmvError::Halo(_))));
        assert!(matches!(check_dimensions(&halo, 4, 6), Err(SpmvError::Halo(_))));
    }

    #[test]
    fn test_halo_rejects_bad_sources() {
        assert!(PeriodicHalo::from_cells(2, &[2]).is_err());
        let bad_transform = vec![GhostSource {
            cell: 0,
            transform: Some(1),
        }];
        assert!(PeriodicHalo::new(2, bad_transform, vec![None]).is_err());
    }
}
