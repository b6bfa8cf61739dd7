use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DataShapeError;

/// `(run, subrun, event)` triple addressing a sample in its source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub run: u32,
    pub subrun: u32,
    pub event: u32,
}

impl IdentityKey {
    pub fn new(run: u32, subrun: u32, event: u32) -> Self {
        Self { run, subrun, event }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.run, self.subrun, self.event)
    }
}

/// Grid a sample's voxel coordinates live in.
///
/// Voxel ids are linearized with the first axis varying fastest:
/// `id = c0 + c1 * shape[0] + c2 * shape[0] * shape[1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryDescriptor {
    pub origin: Vec<f64>,
    pub voxel_size: Vec<f64>,
    pub shape: Vec<u32>,
}

impl GeometryDescriptor {
    /// Unit-sized voxels starting at the origin.
    pub fn unit(shape: Vec<u32>) -> Self {
        let dim = shape.len();
        Self {
            origin: vec![0.0; dim],
            voxel_size: vec![1.0; dim],
            shape,
        }
    }

    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    pub fn validate(&self) -> Result<(), DataShapeError> {
        if self.origin.len() != self.shape.len() || self.voxel_size.len() != self.shape.len() {
            return Err(DataShapeError::GeometryAxes {
                origin: self.origin.len(),
                voxel_size: self.voxel_size.len(),
                shape: self.shape.len(),
            });
        }
        for (axis, (&n, &size)) in self.shape.iter().zip(&self.voxel_size).enumerate() {
            if n == 0 || !(size.is_finite() && size > 0.0) {
                return Err(DataShapeError::GeometryExtent { axis });
            }
        }
        Ok(())
    }

    pub fn contains(&self, coord: &[i32]) -> bool {
        coord.len() == self.shape.len()
            && coord
                .iter()
                .zip(&self.shape)
                .all(|(&c, &n)| c >= 0 && (c as u64) < u64::from(n))
    }

    pub fn voxel_id(&self, coord: &[i32]) -> Option<u64> {
        if !self.contains(coord) {
            return None;
        }
        let mut id = 0u64;
        let mut stride = 1u64;
        for (&c, &n) in coord.iter().zip(&self.shape) {
            id += c as u64 * stride;
            stride *= u64::from(n);
        }
        Some(id)
    }

    pub fn coord_of(&self, voxel_id: u64) -> Option<Vec<i32>> {
        let mut rest = voxel_id;
        let mut out = Vec::with_capacity(self.shape.len());
        for &n in &self.shape {
            let n = u64::from(n);
            out.push(i32::try_from(rest % n).ok()?);
            rest /= n;
        }
        (rest == 0).then_some(out)
    }

    /// Absolute position of the voxel center.
    pub fn position(&self, coord: &[i32]) -> Vec<f64> {
        coord
            .iter()
            .zip(self.origin.iter().zip(&self.voxel_size))
            .map(|(&c, (&o, &s))| o + (f64::from(c) + 0.5) * s)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_id_is_first_axis_fastest() {
        let g = GeometryDescriptor::unit(vec![4, 3, 2]);
        assert_eq!(g.voxel_id(&[0, 0, 0]), Some(0));
        assert_eq!(g.voxel_id(&[1, 0, 0]), Some(1));
        assert_eq!(g.voxel_id(&[0, 1, 0]), Some(4));
        assert_eq!(g.voxel_id(&[3, 2, 1]), Some(23));
        assert_eq!(g.voxel_id(&[4, 0, 0]), None);
        assert_eq!(g.voxel_id(&[-1, 0, 0]), None);
        assert_eq!(g.coord_of(23), Some(vec![3, 2, 1]));
        assert_eq!(g.coord_of(24), None);
    }

    #[test]
    fn position_is_voxel_center() {
        let g = GeometryDescriptor {
            origin: vec![-10.0, 5.0],
            voxel_size: vec![2.0, 0.5],
            shape: vec![10, 10],
        };
        assert_eq!(g.position(&[0, 3]), vec![-9.0, 6.75]);
    }

    #[test]
    fn validate_rejects_inconsistent_axes() {
        let mut g = GeometryDescriptor::unit(vec![4, 4]);
        assert!(g.validate().is_ok());
        g.voxel_size.push(1.0);
        assert!(matches!(
            g.validate(),
            Err(DataShapeError::GeometryAxes { .. })
        ));
        let g = GeometryDescriptor {
            origin: vec![0.0, 0.0],
            voxel_size: vec![1.0, 0.0],
            shape: vec![4, 4],
        };
        assert_eq!(g.validate(), Err(DataShapeError::GeometryExtent { axis: 1 }));
    }
}
