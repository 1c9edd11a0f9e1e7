use glam::DVec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::octree::{CellCode, Octree, OctreeError};
use crate::pointcloud::{PointCloud, PointCloudError};
use crate::reference::ReferenceCloud;

/// How the representative point of an octree cell is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsamplingCellMethod {
    /// Any point of the cell, picked at random.
    RandomPoint,
    /// The point of the cell closest to the cell center.
    #[default]
    NearestPointToCellCenter,
}

/// Error types for the sampling module.
#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    /// The octree query failed.
    #[error(transparent)]
    Octree(#[from] OctreeError),

    /// The octree was not built on the given cloud.
    #[error("Octree indexes {octree} points but the cloud has {cloud}")]
    OctreeMismatch {
        /// Number of points indexed by the octree.
        octree: usize,
        /// Number of points of the cloud.
        cloud: usize,
    },

    /// Building the selection failed.
    #[error(transparent)]
    Selection(#[from] PointCloudError),
}

/// One representative point per occupied octree cell.
///
/// The local index `i` of `samples` is the representative of the cell
/// `cell_codes[i]`, so the pairing between samples and cells never has to be
/// recomputed.
#[derive(Debug, Clone)]
pub struct CellSamples<'a> {
    /// Representatives, as global indices into the source cloud.
    pub samples: ReferenceCloud<'a>,
    /// Cell code of each representative, in ascending order.
    pub cell_codes: Vec<CellCode>,
    /// Octree level the cells belong to.
    pub level: u8,
}

impl CellSamples<'_> {
    /// Number of representatives, equal to the number of occupied cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cell_codes.len()
    }

    /// Whether there is no representative.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cell_codes.is_empty()
    }

    /// Cell represented by the `i`-th sample.
    pub fn cell_code(&self, i: usize) -> Option<CellCode> {
        self.cell_codes.get(i).copied()
    }
}

/// Subsample a cloud by keeping one point per octree cell at a given level.
///
/// # Arguments
///
/// * `cloud` - The cloud to subsample.
/// * `octree` - The octree built on `cloud`.
/// * `level` - The octree level at which cells are taken.
/// * `method` - How each cell representative is chosen.
///
/// # Returns
///
/// The representatives paired with the codes of the cells they stand for.
pub fn subsample_cloud_with_octree_at_level<'a>(
    cloud: &'a PointCloud,
    octree: &Octree,
    level: u8,
    method: SubsamplingCellMethod,
) -> Result<CellSamples<'a>, SamplingError> {
    if octree.num_points() != cloud.len() {
        return Err(SamplingError::OctreeMismatch {
            octree: octree.num_points(),
            cloud: cloud.len(),
        });
    }

    let cell_count = octree.cell_count(level)?;
    let mut samples = ReferenceCloud::new(cloud);
    samples.reserve(cell_count)?;
    let mut cell_codes = Vec::new();
    cell_codes
        .try_reserve_exact(cell_count)
        .map_err(PointCloudError::from)?;

    let points = cloud.points();
    let mut rng = rand::rng();

    for cell in octree.cells(level)? {
        let representative = match method {
            SubsamplingCellMethod::RandomPoint => {
                let pick = rng.random_range(0..cell.len());
                cell.point_indices().nth(pick)
            }
            SubsamplingCellMethod::NearestPointToCellCenter => {
                let center = DVec3::from_array(octree.cell_center(cell.code, level));
                let mut best = None;
                let mut best_dist = f64::INFINITY;
                for index in cell.point_indices() {
                    let dist = DVec3::from_array(points[index]).distance_squared(center);
                    if dist < best_dist {
                        best_dist = dist;
                        best = Some(index);
                    }
                }
                best
            }
        };

        // cells yielded by the octree are never empty
        if let Some(index) = representative {
            samples.add_point_index(index)?;
            cell_codes.push(cell.code);
        }
    }

    log::debug!(
        "Subsampled {} points to {} cells at level {}",
        cloud.len(),
        samples.len(),
        level
    );

    Ok(CellSamples {
        samples,
        cell_codes,
        level,
    })
}

/// Subsample a cloud with the octree level whose cell count is the closest to
/// `new_number_of_points`.
pub fn subsample_cloud_with_octree<'a>(
    cloud: &'a PointCloud,
    octree: &Octree,
    new_number_of_points: usize,
    method: SubsamplingCellMethod,
) -> Result<CellSamples<'a>, SamplingError> {
    let level = octree.find_best_level_for_cell_count(new_number_of_points);
    log::debug!(
        "Best octree level for {} points: {}",
        new_number_of_points,
        level
    );
    subsample_cloud_with_octree_at_level(cloud, octree, level, method)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_cloud() -> PointCloud {
        // 4x4x4 points in the unit cube, plus one point close to each level 1 cell center
        let mut points = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    points.push([x as f64 / 3.0, y as f64 / 3.0, z as f64 / 3.0]);
                }
            }
        }
        for x in [0.25, 0.75] {
            for y in [0.25, 0.75] {
                for z in [0.25, 0.75] {
                    points.push([x + 0.01, y - 0.01, z]);
                }
            }
        }
        PointCloud::new(points, None, None)
    }

    #[test]
    fn test_nearest_point_to_cell_center() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid_cloud();
        let octree = Octree::build(cloud.points())?;
        let cell_samples = subsample_cloud_with_octree_at_level(
            &cloud,
            &octree,
            1,
            SubsamplingCellMethod::NearestPointToCellCenter,
        )?;

        assert_eq!(cell_samples.len(), 8);
        assert_eq!(cell_samples.samples.len(), 8);
        assert_eq!(cell_samples.cell_codes, octree.cell_codes(1)?);

        for (i, &index) in cell_samples.samples.indices().iter().enumerate() {
            // the extra points are the last 8 of the cloud
            assert!(index >= 64, "sample {i} is {index}");
            let code = cell_samples.cell_code(i).ok_or("missing cell")?;
            assert_eq!(octree.point_cell_code(&cloud.points()[index], 1)?, Some(code));
        }
        Ok(())
    }

    #[test]
    fn test_random_point() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid_cloud();
        let octree = Octree::build(cloud.points())?;
        let cell_samples =
            subsample_cloud_with_octree_at_level(&cloud, &octree, 2, SubsamplingCellMethod::RandomPoint)?;

        assert_eq!(cell_samples.len(), octree.cell_count(2)?);
        for (i, &code) in cell_samples.cell_codes.iter().enumerate() {
            let index = cell_samples.samples.point_global_index(i).ok_or("missing sample")?;
            assert!(octree.points_in_cell(code, 2)?.any(|j| j == index));
        }
        Ok(())
    }

    #[test]
    fn test_target_point_count() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid_cloud();
        let octree = Octree::build(cloud.points())?;
        let cell_samples = subsample_cloud_with_octree(
            &cloud,
            &octree,
            8,
            SubsamplingCellMethod::NearestPointToCellCenter,
        )?;
        assert_eq!(cell_samples.level, 1);
        assert_eq!(cell_samples.len(), 8);
        Ok(())
    }

    #[test]
    fn test_octree_mismatch() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = grid_cloud();
        let octree = Octree::build(&cloud.points()[..10])?;
        let res = subsample_cloud_with_octree_at_level(
            &cloud,
            &octree,
            1,
            SubsamplingCellMethod::default(),
        );
        assert!(matches!(
            res,
            Err(SamplingError::OctreeMismatch { octree: 10, cloud: 72 })
        ));
        Ok(())
    }
}
