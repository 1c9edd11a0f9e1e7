//! Hidden point removal (Katz, Tal and Basri, "Direct Visibility of Point Sets", 2007).
//!
//! The points are expressed relative to the viewpoint and flipped about a large
//! sphere centered on it. A point is visible when its flipped image lies on the
//! convex hull of the flipped set augmented with the viewpoint.

use glam::DVec3;

use crate::convex_hull::{convex_hull, HullError};

/// Default value of the hidden point removal parameter.
///
/// The flipping sphere radius is the largest point distance to the viewpoint
/// multiplied by `10^parameter`. Larger values mark more points as visible.
pub const HPR_DEFAULT_PARAMETER: f64 = 3.5;

/// Error types for the hidden point removal operator.
#[derive(Debug, thiserror::Error)]
pub enum HprError {
    /// The convex hull of the flipped points could not be computed.
    #[error("Failed to compute the convex hull of the flipped points: {0}")]
    Hull(#[from] HullError),
}

/// Compute the points visible from a viewpoint.
///
/// # Arguments
///
/// * `points` - The candidate points.
/// * `view_point` - The position of the observer.
/// * `parameter` - Log10 of the flipping radius multiplier, see [`HPR_DEFAULT_PARAMETER`].
///
/// # Returns
///
/// The sorted indices into `points` of the visible points. With fewer than four
/// points all of them are visible.
///
/// # Errors
///
/// Fails when the flipped points and the viewpoint are coplanar, in which case
/// visibility is undefined.
///
/// Example:
///
/// ```
/// use pointvis_3d::hpr::{remove_hidden_points, HPR_DEFAULT_PARAMETER};
///
/// let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
/// let visible = remove_hidden_points(&points, &[0.0, 0.0, 10.0], HPR_DEFAULT_PARAMETER).unwrap();
/// assert_eq!(visible, vec![0, 1, 2]);
/// ```
pub fn remove_hidden_points(
    points: &[[f64; 3]],
    view_point: &[f64; 3],
    parameter: f64,
) -> Result<Vec<usize>, HprError> {
    let num_points = points.len();
    if num_points < 4 {
        return Ok((0..num_points).collect());
    }

    let origin = DVec3::from_array(*view_point);
    let mut flipped = points
        .iter()
        .map(|p| DVec3::from_array(*p) - origin)
        .collect::<Vec<_>>();

    let max_radius = flipped.iter().map(|p| p.length()).fold(0.0, f64::max);
    let radius = max_radius * 10f64.powf(parameter);
    log::debug!(
        "Flipping {} points on a sphere of radius {}",
        num_points,
        radius
    );

    for p in flipped.iter_mut() {
        let norm = p.length();
        // points at the viewpoint stay there
        if norm > 0.0 {
            *p *= 2.0 * radius / norm - 1.0;
        }
    }

    let mut hull_points = flipped.iter().map(|p| p.to_array()).collect::<Vec<_>>();
    hull_points.push([0.0; 3]);

    let hull = convex_hull(&hull_points)?;

    // the viewpoint itself is the last hull point
    let visible = hull
        .vertices
        .into_iter()
        .filter(|&i| i < num_points)
        .collect::<Vec<_>>();

    log::debug!("{} points out of {} are visible", visible.len(), num_points);

    Ok(visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() -> Result<(), HprError> {
        assert!(remove_hidden_points(&[], &[0.0; 3], HPR_DEFAULT_PARAMETER)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_occluded_point() -> Result<(), HprError> {
        // a square facing the viewpoint and a point right behind its center
        let points = vec![
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [1.0, 1.0, 0.0],
            [-1.0, 1.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
        ];
        let visible = remove_hidden_points(&points, &[0.0, 0.0, 10.0], HPR_DEFAULT_PARAMETER)?;
        assert!(!visible.contains(&5));
        assert!(visible.contains(&4));
        for i in 0..4 {
            assert!(visible.contains(&i));
        }
        Ok(())
    }

    #[test]
    fn test_coplanar_with_viewpoint() {
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let res = remove_hidden_points(&points, &[5.0, 5.0, 0.0], HPR_DEFAULT_PARAMETER);
        assert!(matches!(res, Err(HprError::Hull(HullError::Degenerate))));
    }
}
