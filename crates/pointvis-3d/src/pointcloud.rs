use std::collections::TryReserveError;
use std::sync::Arc;

use glam::DVec3;

use crate::octree::{Octree, OctreeError};
use crate::reference::ReferenceCloud;

/// Error types for the point cloud module.
#[derive(Debug, thiserror::Error)]
pub enum PointCloudError {
    /// A per-point attribute does not have one value per point.
    #[error("Attribute {name} has {actual} values for {expected} points")]
    AttributeLength {
        /// Attribute name.
        name: String,
        /// Number of points of the cloud.
        expected: usize,
        /// Number of values of the attribute.
        actual: usize,
    },

    /// A point index does not exist in the cloud.
    #[error("Point index {index} out of range for a cloud of {len} points")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of points of the cloud.
        len: usize,
    },

    /// Two reference clouds do not share the same associated cloud.
    #[error("Reference clouds are associated to different point clouds")]
    DifferentClouds,

    /// Allocation failure.
    #[error("Not enough memory")]
    OutOfMemory(#[from] TryReserveError),
}

/// A named per-point scalar attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    /// Name of the field.
    pub name: String,
    /// One value per point.
    pub values: Vec<f64>,
}

/// A point cloud with points, colors, normals and scalar fields.
///
/// The cloud caches its octree once computed. Any mutable access to the point
/// buffer drops the cached octree.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    // The name of the cloud.
    name: String,
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
    // Additional per-point values.
    scalar_fields: Vec<ScalarField>,
    // The octree computed on the points, if any.
    octree: Option<Arc<Octree>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    ///
    /// PRECONDITION: colors and normals, when given, have one entry per point.
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
            ..Default::default()
        }
    }

    /// Set the name of the cloud.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the name of the cloud.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the cloud.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get the points for modification.
    ///
    /// The cached octree no longer matches the points and is dropped.
    pub fn points_mut(&mut self) -> &mut [[f64; 3]] {
        if self.octree.take().is_some() {
            log::debug!("Octree of cloud '{}' invalidated", self.name);
        }
        &mut self.points
    }

    /// Append a point to the cloud.
    ///
    /// Existing attributes are extended with a black color, a zero normal and
    /// a NaN scalar value. The cached octree is dropped.
    pub fn push_point(&mut self, point: [f64; 3]) {
        if self.octree.take().is_some() {
            log::debug!("Octree of cloud '{}' invalidated", self.name);
        }
        self.points.push(point);
        if let Some(colors) = self.colors.as_mut() {
            colors.push([0; 3]);
        }
        if let Some(normals) = self.normals.as_mut() {
            normals.push([0.0; 3]);
        }
        for sf in self.scalar_fields.iter_mut() {
            sf.values.push(f64::NAN);
        }
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Get the scalar fields of the cloud.
    pub fn scalar_fields(&self) -> &[ScalarField] {
        &self.scalar_fields
    }

    /// Get a scalar field by name.
    pub fn scalar_field(&self, name: &str) -> Option<&ScalarField> {
        self.scalar_fields.iter().find(|sf| sf.name == name)
    }

    /// Add a scalar field, replacing any field with the same name.
    pub fn add_scalar_field(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), PointCloudError> {
        let name = name.into();
        if values.len() != self.points.len() {
            return Err(PointCloudError::AttributeLength {
                name,
                expected: self.points.len(),
                actual: values.len(),
            });
        }

        match self.scalar_fields.iter_mut().find(|sf| sf.name == name) {
            Some(sf) => sf.values = values,
            None => self.scalar_fields.push(ScalarField { name, values }),
        }
        Ok(())
    }

    /// Get the octree attached to the cloud, if any.
    pub fn octree(&self) -> Option<&Arc<Octree>> {
        self.octree.as_ref()
    }

    /// Compute the octree of the cloud and attach it.
    ///
    /// Any previously attached octree is dropped, even if the computation fails.
    pub fn compute_octree(&mut self) -> Result<Arc<Octree>, OctreeError> {
        self.octree = None;
        let octree = Arc::new(Octree::build(&self.points)?);
        self.octree = Some(octree.clone());
        Ok(octree)
    }

    /// Get the attached octree, computing it first if the cloud has none.
    pub fn get_or_compute_octree(&mut self) -> Result<Arc<Octree>, OctreeError> {
        match &self.octree {
            Some(octree) => Ok(octree.clone()),
            None => self.compute_octree(),
        }
    }

    /// Detach the octree from the cloud.
    pub fn delete_octree(&mut self) {
        self.octree = None;
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> [f64; 3] {
        self.fold_points(DVec3::min)
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> [f64; 3] {
        self.fold_points(DVec3::max)
    }

    fn fold_points(&self, f: fn(DVec3, DVec3) -> DVec3) -> [f64; 3] {
        let Some(first) = self.points.first() else {
            return [0.0; 3];
        };
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .fold(DVec3::from_array(*first), f)
            .to_array()
    }

    /// Create a new cloud holding the points selected by a reference cloud.
    ///
    /// Colors, normals and scalar fields are carried over. The new cloud keeps the
    /// name of the source and has no octree.
    ///
    /// # Arguments
    ///
    /// * `selection` - Indexed view over this cloud.
    ///
    /// # Errors
    ///
    /// Fails if the selection refers to another cloud, if an attribute does not
    /// have one value per point, or on allocation failure.
    pub fn partial_clone(&self, selection: &ReferenceCloud) -> Result<PointCloud, PointCloudError> {
        if !std::ptr::eq(selection.associated_cloud(), self) {
            return Err(PointCloudError::DifferentClouds);
        }

        let indices = selection.indices();
        let len = self.points.len();

        let points = gather("points", &self.points, indices, len)?;
        let colors = self
            .colors
            .as_ref()
            .map(|colors| gather("colors", colors, indices, len))
            .transpose()?;
        let normals = self
            .normals
            .as_ref()
            .map(|normals| gather("normals", normals, indices, len))
            .transpose()?;

        let mut scalar_fields = Vec::new();
        scalar_fields.try_reserve_exact(self.scalar_fields.len())?;
        for sf in &self.scalar_fields {
            scalar_fields.push(ScalarField {
                name: sf.name.clone(),
                values: gather(&sf.name, &sf.values, indices, len)?,
            });
        }

        Ok(PointCloud {
            name: self.name.clone(),
            points,
            colors,
            normals,
            scalar_fields,
            octree: None,
        })
    }
}

fn gather<T: Copy>(
    name: &str,
    values: &[T],
    indices: &[usize],
    expected: usize,
) -> Result<Vec<T>, PointCloudError> {
    if values.len() != expected {
        return Err(PointCloudError::AttributeLength {
            name: name.to_string(),
            expected,
            actual: values.len(),
        });
    }

    let mut out = Vec::new();
    out.try_reserve_exact(indices.len())?;
    for &index in indices {
        let value = values
            .get(index)
            .ok_or(PointCloudError::IndexOutOfRange { index, len: expected })?;
        out.push(*value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointcloud() {
        let pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[255, 0, 0], [0, 255, 0]]),
            Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        );

        assert_eq!(pointcloud.len(), 2);
        assert_eq!(pointcloud.points().len(), 2);

        if let Some(colors) = pointcloud.colors() {
            assert_eq!(colors.len(), 2);
        }
        if let Some(normals) = pointcloud.normals() {
            assert_eq!(normals.len(), 2);
        }

        if let Some(p1) = pointcloud.points().last() {
            assert_eq!(p1, &[1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_bounds() {
        let pointcloud = PointCloud::new(vec![[0.0, 2.0, -1.0], [1.0, -3.0, 4.0]], None, None);
        assert_eq!(pointcloud.get_min_bound(), [0.0, -3.0, -1.0]);
        assert_eq!(pointcloud.get_max_bound(), [1.0, 2.0, 4.0]);
        assert_eq!(PointCloud::default().get_min_bound(), [0.0; 3]);
    }

    #[test]
    fn test_scalar_fields() -> Result<(), PointCloudError> {
        let mut pointcloud = PointCloud::new(vec![[0.0; 3]; 3], None, None);
        pointcloud.add_scalar_field("intensity", vec![1.0, 2.0, 3.0])?;
        pointcloud.add_scalar_field("intensity", vec![4.0, 5.0, 6.0])?;
        assert_eq!(pointcloud.scalar_fields().len(), 1);
        assert_eq!(
            pointcloud.scalar_field("intensity").map(|sf| sf.values.clone()),
            Some(vec![4.0, 5.0, 6.0])
        );

        let res = pointcloud.add_scalar_field("bad", vec![1.0]);
        assert!(matches!(
            res,
            Err(PointCloudError::AttributeLength {
                expected: 3,
                actual: 1,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_octree_cache() -> Result<(), Box<dyn std::error::Error>> {
        let mut pointcloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]], None, None);
        assert!(pointcloud.octree().is_none());

        let first = pointcloud.get_or_compute_octree()?;
        let second = pointcloud.get_or_compute_octree()?;
        assert!(Arc::ptr_eq(&first, &second));

        let recomputed = pointcloud.compute_octree()?;
        assert!(!Arc::ptr_eq(&first, &recomputed));

        pointcloud.points_mut()[0] = [2.0, 2.0, 2.0];
        assert!(pointcloud.octree().is_none());

        pointcloud.get_or_compute_octree()?;
        pointcloud.delete_octree();
        assert!(pointcloud.octree().is_none());
        Ok(())
    }

    #[test]
    fn test_push_point() -> Result<(), Box<dyn std::error::Error>> {
        let mut pointcloud = PointCloud::new(vec![[0.0; 3]], Some(vec![[9, 9, 9]]), None);
        pointcloud.add_scalar_field("intensity", vec![1.0])?;
        pointcloud.compute_octree()?;

        pointcloud.push_point([1.0, 2.0, 3.0]);
        assert!(pointcloud.octree().is_none());
        assert_eq!(pointcloud.len(), 2);
        assert_eq!(pointcloud.colors(), Some(&[[9, 9, 9], [0, 0, 0]][..]));
        assert!(pointcloud.normals().is_none());
        let values = &pointcloud.scalar_field("intensity").ok_or("missing field")?.values;
        assert_eq!(values.len(), 2);
        assert!(values[1].is_nan());
        Ok(())
    }

    #[test]
    fn test_failed_octree_drops_previous() -> Result<(), Box<dyn std::error::Error>> {
        let mut pointcloud = PointCloud::new(vec![[0.0, 0.0, 0.0]], None, None);
        pointcloud.compute_octree()?;
        pointcloud.points_mut()[0] = [f64::INFINITY, 0.0, 0.0];
        assert!(pointcloud.compute_octree().is_err());
        assert!(pointcloud.octree().is_none());
        Ok(())
    }

    #[test]
    fn test_partial_clone() -> Result<(), PointCloudError> {
        let mut pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            Some(vec![[1, 1, 1], [2, 2, 2], [3, 3, 3]]),
            None,
        )
        .with_name("scan");
        pointcloud.add_scalar_field("sf", vec![10.0, 20.0, 30.0])?;

        let mut selection = ReferenceCloud::new(&pointcloud);
        selection.add_point_index(2)?;
        selection.add_point_index(0)?;

        let clone = pointcloud.partial_clone(&selection)?;
        assert_eq!(clone.name(), "scan");
        assert_eq!(clone.points(), &[[2.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(clone.colors(), Some(&[[3, 3, 3], [1, 1, 1]][..]));
        assert!(clone.normals().is_none());
        assert_eq!(
            clone.scalar_field("sf").map(|sf| sf.values.clone()),
            Some(vec![30.0, 10.0])
        );
        assert!(clone.octree().is_none());
        Ok(())
    }

    #[test]
    fn test_partial_clone_other_cloud() {
        let a = PointCloud::new(vec![[0.0; 3]], None, None);
        let b = PointCloud::new(vec![[0.0; 3]], None, None);
        let selection = ReferenceCloud::new(&b);
        assert!(matches!(
            a.partial_clone(&selection),
            Err(PointCloudError::DifferentClouds)
        ));
    }

    #[test]
    fn test_partial_clone_bad_attribute() {
        let pointcloud = PointCloud::new(vec![[0.0; 3]; 2], Some(vec![[0, 0, 0]]), None);
        let selection = ReferenceCloud::new(&pointcloud);
        assert!(matches!(
            pointcloud.partial_clone(&selection),
            Err(PointCloudError::AttributeLength { .. })
        ));
    }
}
