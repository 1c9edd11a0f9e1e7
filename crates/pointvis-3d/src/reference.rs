use crate::pointcloud::{PointCloud, PointCloudError};

/// An indexed view over a point cloud.
///
/// Local index `i` maps to a global index of the associated cloud. The view
/// borrows the cloud, so it can never outlive the points it refers to.
#[derive(Debug, Clone)]
pub struct ReferenceCloud<'a> {
    cloud: &'a PointCloud,
    indices: Vec<usize>,
}

impl<'a> ReferenceCloud<'a> {
    /// Create an empty view over a cloud.
    pub fn new(cloud: &'a PointCloud) -> Self {
        Self {
            cloud,
            indices: Vec::new(),
        }
    }

    /// Create a view from a list of global indices.
    ///
    /// # Errors
    ///
    /// Fails if any index is out of range of the cloud.
    pub fn from_indices(cloud: &'a PointCloud, indices: Vec<usize>) -> Result<Self, PointCloudError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= cloud.len()) {
            return Err(PointCloudError::IndexOutOfRange {
                index,
                len: cloud.len(),
            });
        }
        Ok(Self { cloud, indices })
    }

    /// The cloud the indices refer to.
    pub fn associated_cloud(&self) -> &'a PointCloud {
        self.cloud
    }

    /// Number of referenced points.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the view references no point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Global indices of the referenced points.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Reserve room for `additional` more indices.
    pub fn reserve(&mut self, additional: usize) -> Result<(), PointCloudError> {
        self.indices.try_reserve(additional)?;
        Ok(())
    }

    /// Append a global index to the view.
    pub fn add_point_index(&mut self, index: usize) -> Result<(), PointCloudError> {
        if index >= self.cloud.len() {
            return Err(PointCloudError::IndexOutOfRange {
                index,
                len: self.cloud.len(),
            });
        }
        self.indices.try_reserve(1)?;
        self.indices.push(index);
        Ok(())
    }

    /// Append global indices to the view.
    pub fn add_point_indices(
        &mut self,
        indices: impl ExactSizeIterator<Item = usize>,
    ) -> Result<(), PointCloudError> {
        self.indices.try_reserve(indices.len())?;
        for index in indices {
            self.add_point_index(index)?;
        }
        Ok(())
    }

    /// Append all the indices of another view over the same cloud.
    pub fn add(&mut self, other: &ReferenceCloud) -> Result<(), PointCloudError> {
        if !std::ptr::eq(self.cloud, other.cloud) {
            return Err(PointCloudError::DifferentClouds);
        }
        self.indices.try_reserve(other.indices.len())?;
        self.indices.extend_from_slice(&other.indices);
        Ok(())
    }

    /// Global index of the `i`-th referenced point.
    pub fn point_global_index(&self, i: usize) -> Option<usize> {
        self.indices.get(i).copied()
    }

    /// Coordinates of the `i`-th referenced point.
    pub fn point(&self, i: usize) -> Option<&'a [f64; 3]> {
        let cloud = self.cloud;
        self.indices.get(i).and_then(|&index| cloud.points().get(index))
    }

    /// Iterate over the coordinates of the referenced points.
    pub fn points(&self) -> impl Iterator<Item = &'a [f64; 3]> + '_ {
        let points = self.cloud.points();
        self.indices.iter().map(move |&index| &points[index])
    }
}
