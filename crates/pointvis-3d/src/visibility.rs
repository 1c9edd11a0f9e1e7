//! Octree driven visibility reduction.
//!
//! Hidden point removal is quadratic in the worst case, so it runs on one
//! representative per octree cell instead of on the whole cloud:
//!
//! 1. validate the octree level,
//! 2. reuse or compute the octree of the cloud,
//! 3. keep the point nearest to the center of each occupied cell,
//! 4. run hidden point removal on the representatives,
//! 5. expand every visible representative back to all the points of its cell,
//! 6. build a new cloud from the visible points.
//!
//! Every stage fails fast and nothing is retried.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hpr::{remove_hidden_points, HprError, HPR_DEFAULT_PARAMETER};
use crate::octree::{Octree, OctreeError, MAX_OCTREE_LEVEL};
use crate::pointcloud::{PointCloud, PointCloudError};
use crate::reference::ReferenceCloud;
use crate::sampling::{
    subsample_cloud_with_octree_at_level, CellSamples, SamplingError, SubsamplingCellMethod,
};

/// Default octree level of the visibility pipeline.
pub const DEFAULT_OCTREE_LEVEL: i32 = 7;

/// Suffix appended to the source cloud name to name the visible points cloud.
pub const VISIBLE_POINTS_SUFFIX: &str = ".visible_points";

/// Error types for the visibility pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    /// The octree level is outside `[0, MAX_OCTREE_LEVEL]`.
    #[error("octreeLevel must be between 0 and {max}, got {level}")]
    InvalidOctreeLevel {
        /// Requested level.
        level: i32,
        /// Maximum supported level.
        max: u8,
    },

    /// The viewpoint has a NaN or infinite coordinate.
    #[error("viewPoint must have finite coordinates, got {0:?}")]
    InvalidViewPoint([f64; 3]),

    /// The octree of the cloud could not be computed.
    #[error("Couldn't compute octree: {0}")]
    Octree(#[source] OctreeError),

    /// The cell center subsampling failed.
    #[error("Error while simplifying point cloud with octree")]
    Subsampling(#[source] SamplingError),

    /// The points of a visible cell could not be fetched.
    #[error("Couldn't fetch the list of octree cell indexes")]
    CellIndexes(#[source] OctreeError),

    /// A visible representative does not correspond to any sampled cell.
    #[error("Visible representative {0} has no matching octree cell")]
    UnknownCell(usize),

    /// The visible points selection or the output cloud could not be built.
    #[error("Couldn't build the visible points cloud")]
    Selection(#[source] PointCloudError),

    /// Allocation failure while expanding the visible cells or building the output cloud.
    #[error("Not enough memory")]
    OutOfMemory(#[source] PointCloudError),
}

impl From<PointCloudError> for VisibilityError {
    fn from(e: PointCloudError) -> Self {
        match e {
            PointCloudError::OutOfMemory(_) => VisibilityError::OutOfMemory(e),
            e => VisibilityError::Selection(e),
        }
    }
}

impl VisibilityError {
    /// Whether the caller passed invalid arguments.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            VisibilityError::InvalidOctreeLevel { .. } | VisibilityError::InvalidViewPoint(_)
        )
    }

    /// Whether the failure comes from memory pressure.
    ///
    /// These failures may go away when retrying with a coarser octree level.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            VisibilityError::Octree(OctreeError::OutOfMemory(_))
                | VisibilityError::Subsampling(SamplingError::Octree(OctreeError::OutOfMemory(_)))
                | VisibilityError::Subsampling(SamplingError::Selection(
                    PointCloudError::OutOfMemory(_)
                ))
                | VisibilityError::CellIndexes(OctreeError::OutOfMemory(_))
                | VisibilityError::OutOfMemory(_)
        )
    }
}

/// Parameters of the visibility pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityParams {
    /// Position of the observer, in the cloud coordinate system.
    pub view_point: [f64; 3],
    /// Octree level at which cells are subsampled.
    pub octree_level: i32,
}

impl Default for VisibilityParams {
    fn default() -> Self {
        Self {
            view_point: [0.0; 3],
            octree_level: DEFAULT_OCTREE_LEVEL,
        }
    }
}

/// Counters collected while running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityStats {
    /// Number of points of the source cloud.
    pub cloud_size: usize,
    /// Octree level used for the subsampling.
    pub octree_level: u8,
    /// Number of occupied cells at that level.
    pub cell_count: usize,
    /// Number of cells whose representative is visible.
    pub visible_cell_count: usize,
    /// Number of points in the visible cells.
    pub visible_point_count: usize,
}

/// Indices of the visible points of a cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleIndices {
    /// Global indices of the visible points, grouped by cell.
    pub indices: Vec<usize>,
    /// Counters of the run.
    pub stats: VisibilityStats,
}

/// Result of the visibility pipeline.
#[derive(Debug, Clone)]
pub enum VisibilityOutcome {
    /// Some points are hidden; the cloud holds the visible ones.
    Visible(PointCloud),
    /// Every point is visible, no cloud is created.
    NoChange,
    /// Every point is hidden from the viewpoint.
    NoVisiblePoints,
}

impl VisibilityOutcome {
    /// Get the visible points cloud, if one was created.
    pub fn into_cloud(self) -> Option<PointCloud> {
        match self {
            VisibilityOutcome::Visible(cloud) => Some(cloud),
            _ => None,
        }
    }
}

/// Check that an octree level is within `[0, MAX_OCTREE_LEVEL]`.
pub fn validate_octree_level(octree_level: i32) -> Result<u8, VisibilityError> {
    match u8::try_from(octree_level) {
        Ok(level) if level <= MAX_OCTREE_LEVEL => Ok(level),
        _ => {
            log::debug!("octreeLevel must be between 0 and {}", MAX_OCTREE_LEVEL);
            Err(VisibilityError::InvalidOctreeLevel {
                level: octree_level,
                max: MAX_OCTREE_LEVEL,
            })
        }
    }
}

/// Check that every coordinate of a viewpoint is finite.
pub fn validate_view_point(view_point: &[f64; 3]) -> Result<(), VisibilityError> {
    if view_point.iter().all(|v| v.is_finite()) {
        return Ok(());
    }
    log::debug!("viewPoint must have finite coordinates");
    Err(VisibilityError::InvalidViewPoint(*view_point))
}

/// Compute the indices of the points of a cloud visible from a viewpoint.
///
/// The octree of the cloud is reused when present, otherwise computed and attached
/// to the cloud.
///
/// # Arguments
///
/// * `cloud` - The cloud to analyze. Its points are never modified.
/// * `params` - The viewpoint and octree level.
///
/// # Returns
///
/// The visible point indices and the counters of the run. An empty index set
/// means every point is hidden.
pub fn compute_visible_indices(
    cloud: &mut PointCloud,
    params: &VisibilityParams,
) -> Result<VisibleIndices, VisibilityError> {
    let level = validate_octree_level(params.octree_level)?;
    validate_view_point(&params.view_point)?;
    let octree = ensure_octree(cloud)?;
    let cloud: &PointCloud = cloud;

    let (visible, stats) = visible_points(cloud, &octree, level, &params.view_point)?;

    let mut indices = Vec::new();
    indices
        .try_reserve_exact(visible.len())
        .map_err(|e| VisibilityError::OutOfMemory(e.into()))?;
    indices.extend_from_slice(visible.indices());

    Ok(VisibleIndices { indices, stats })
}

/// Build a new cloud holding the points of a cloud visible from a viewpoint.
///
/// # Arguments
///
/// * `cloud` - The cloud to analyze. Its octree is computed and attached if missing.
/// * `view_point` - Position of the observer.
/// * `octree_level` - Octree level at which the cloud is subsampled, see [`DEFAULT_OCTREE_LEVEL`].
///
/// # Returns
///
/// A cloud named `<source name>.visible_points` holding the visible points, or
/// [`VisibilityOutcome::NoChange`] when no point is hidden, or
/// [`VisibilityOutcome::NoVisiblePoints`] when all of them are.
///
/// Example:
///
/// ```
/// use pointvis_3d::pointcloud::PointCloud;
/// use pointvis_3d::visibility::{compute_visible_points, VisibilityOutcome};
///
/// let mut cloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], None, None);
/// let outcome = compute_visible_points(&mut cloud, [0.0, 0.0, 10.0], 7).unwrap();
/// assert!(matches!(outcome, VisibilityOutcome::NoChange));
/// assert!(cloud.octree().is_some());
/// ```
pub fn compute_visible_points(
    cloud: &mut PointCloud,
    view_point: [f64; 3],
    octree_level: i32,
) -> Result<VisibilityOutcome, VisibilityError> {
    let level = validate_octree_level(octree_level)?;
    validate_view_point(&view_point)?;
    let octree = ensure_octree(cloud)?;
    let cloud: &PointCloud = cloud;

    let (visible, _) = visible_points(cloud, &octree, level, &view_point)?;
    materialize_visible_points(cloud, &visible)
}

/// Build the output cloud from the visible points selection.
///
/// # Arguments
///
/// * `cloud` - The source cloud.
/// * `visible` - The visible points of `cloud`.
pub fn materialize_visible_points(
    cloud: &PointCloud,
    visible: &ReferenceCloud,
) -> Result<VisibilityOutcome, VisibilityError> {
    if visible.len() == cloud.len() {
        log::debug!("No points were removed!");
        return Ok(VisibilityOutcome::NoChange);
    }

    if visible.is_empty() {
        log::debug!("No point is visible from the viewpoint");
        return Ok(VisibilityOutcome::NoVisiblePoints);
    }

    let mut visible_cloud = cloud.partial_clone(visible)?;
    visible_cloud.set_name(format!("{}{}", cloud.name(), VISIBLE_POINTS_SUFFIX));

    Ok(VisibilityOutcome::Visible(visible_cloud))
}

/// Expand visible cell representatives to all the points of their cells.
///
/// # Arguments
///
/// * `cloud` - The source cloud.
/// * `octree` - The octree the representatives were sampled from.
/// * `cell_samples` - The representatives paired with their cells.
/// * `visible_cells` - Local indices into `cell_samples` of the visible representatives.
///
/// # Returns
///
/// A selection over `cloud` of every point lying in a visible cell. Cells are
/// disjoint so the selection has no duplicate.
pub fn expand_visible_cells<'a>(
    cloud: &'a PointCloud,
    octree: &Octree,
    cell_samples: &CellSamples,
    visible_cells: &[usize],
) -> Result<ReferenceCloud<'a>, VisibilityError> {
    let mut visible = ReferenceCloud::new(cloud);

    for &local_index in visible_cells {
        let code = cell_samples
            .cell_code(local_index)
            .ok_or(VisibilityError::UnknownCell(local_index))?;

        let cell_points = octree
            .points_in_cell(code, cell_samples.level)
            .map_err(VisibilityError::CellIndexes)?;

        visible.add_point_indices(cell_points)?;
    }

    Ok(visible)
}

fn ensure_octree(cloud: &mut PointCloud) -> Result<Arc<Octree>, VisibilityError> {
    if let Some(octree) = cloud.octree() {
        log::debug!("Reusing the octree of cloud '{}'", cloud.name());
        return Ok(octree.clone());
    }

    cloud.compute_octree().map_err(|e| {
        log::debug!("Couldn't compute octree!");
        VisibilityError::Octree(e)
    })
}

fn visible_points<'a>(
    cloud: &'a PointCloud,
    octree: &Octree,
    level: u8,
    view_point: &[f64; 3],
) -> Result<(ReferenceCloud<'a>, VisibilityStats), VisibilityError> {
    let cell_samples = subsample_cloud_with_octree_at_level(
        cloud,
        octree,
        level,
        SubsamplingCellMethod::NearestPointToCellCenter,
    )
    .map_err(|e| {
        log::debug!("Error while simplifying point cloud with octree!");
        VisibilityError::Subsampling(e)
    })?;

    let visible_cells = visible_representatives(&cell_samples, view_point)?;

    let visible = expand_visible_cells(cloud, octree, &cell_samples, &visible_cells)?;
    log::debug!("[HPR] Visible points: {}", visible.len());

    let stats = VisibilityStats {
        cloud_size: cloud.len(),
        octree_level: level,
        cell_count: cell_samples.len(),
        visible_cell_count: visible_cells.len(),
        visible_point_count: visible.len(),
    };

    Ok((visible, stats))
}

fn visible_representatives(
    cell_samples: &CellSamples,
    view_point: &[f64; 3],
) -> Result<Vec<usize>, VisibilityError> {
    let mut points = Vec::new();
    points
        .try_reserve_exact(cell_samples.samples.len())
        .map_err(|e| VisibilityError::OutOfMemory(e.into()))?;
    points.extend(cell_samples.samples.points().copied());

    match remove_hidden_points(&points, view_point, HPR_DEFAULT_PARAMETER) {
        Ok(visible_cells) => {
            log::debug!(
                "{} visible cells out of {}",
                visible_cells.len(),
                cell_samples.len()
            );
            Ok(visible_cells)
        }
        Err(HprError::Hull(e)) => {
            log::warn!("Hidden point removal found no visible cell: {}", e);
            Ok(Vec::new())
        }
    }
}
