use std::collections::{HashMap, HashSet};

use glam::DVec3;

/// Error types for the convex hull module.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HullError {
    /// A 3D hull needs at least four points.
    #[error("Not enough vertices to form a hull (minimum 4 required), got {0}")]
    NotEnoughPoints(usize),

    /// All the points are coplanar or collinear.
    #[error("Vertices are coplanar or collinear")]
    Degenerate,
}

/// A 3D convex hull.
#[derive(Debug, Clone)]
pub struct ConvexHull {
    /// Indices of the input points lying on the hull, sorted.
    pub vertices: Vec<usize>,
    /// Triangular faces, counter-clockwise when seen from outside.
    pub faces: Vec<[usize; 3]>,
}

impl ConvexHull {
    /// Compute the convex hull of a set of points, see [`convex_hull`].
    pub fn build(points: &[[f64; 3]]) -> Result<Self, HullError> {
        convex_hull(points)
    }

    /// Number of triangular faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }
}

#[derive(Debug, Clone)]
struct Face {
    vertices: [usize; 3],
    normal: DVec3,
    offset: f64,
    outside: Vec<usize>,
    alive: bool,
}

impl Face {
    fn new(points: &[DVec3], vertices: [usize; 3]) -> Self {
        let [a, b, c] = vertices.map(|i| points[i]);
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            vertices,
            normal,
            offset: normal.dot(a),
            outside: Vec::new(),
            alive: true,
        }
    }

    #[inline]
    fn distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) - self.offset
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

/// Compute the convex hull of a set of points with the quickhull algorithm.
///
/// Points closer than a scale-relative tolerance to a face are considered inside
/// the hull, so they are not reported as vertices.
///
/// # Arguments
///
/// * `points` - The input points.
///
/// # Returns
///
/// The hull vertices and faces, indexing into `points`.
///
/// Example:
///
/// ```
/// use pointvis_3d::convex_hull::convex_hull;
///
/// let points = vec![
///     [0.0, 0.0, 0.0],
///     [1.0, 0.0, 0.0],
///     [0.0, 1.0, 0.0],
///     [0.0, 0.0, 1.0],
///     [0.1, 0.1, 0.1],
/// ];
/// let hull = convex_hull(&points).unwrap();
/// assert_eq!(hull.vertices, vec![0, 1, 2, 3]);
/// assert_eq!(hull.faces.len(), 4);
/// ```
pub fn convex_hull(points: &[[f64; 3]]) -> Result<ConvexHull, HullError> {
    if points.len() < 4 {
        return Err(HullError::NotEnoughPoints(points.len()));
    }

    let pts = points.iter().map(|p| DVec3::from_array(*p)).collect::<Vec<_>>();
    let eps = tolerance(&pts);

    let simplex = initial_simplex(&pts, eps)?;
    let mut faces = simplex_faces(&pts, simplex);

    // directed edge -> face owning it
    let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
    for (fi, face) in faces.iter().enumerate() {
        for edge in face.edges() {
            edges.insert(edge, fi);
        }
    }

    // assign every point to the first face it lies outside of
    for (i, &p) in pts.iter().enumerate() {
        if simplex.contains(&i) {
            continue;
        }
        if let Some(face) = faces.iter_mut().find(|f| f.distance(p) > eps) {
            face.outside.push(i);
        }
    }

    let mut stack = (0..faces.len()).collect::<Vec<_>>();
    while let Some(fi) = stack.pop() {
        if !faces[fi].alive || faces[fi].outside.is_empty() {
            continue;
        }

        // farthest outside point of the face
        let eye = {
            let face = &faces[fi];
            let mut best = face.outside[0];
            let mut best_dist = f64::NEG_INFINITY;
            for &i in &face.outside {
                let d = face.distance(pts[i]);
                if d > best_dist {
                    best_dist = d;
                    best = i;
                }
            }
            best
        };
        let eye_point = pts[eye];

        // faces seen from the eye point, grown from the current face over shared edges
        let mut visible = vec![fi];
        let mut visited = HashSet::from([fi]);
        let mut cursor = 0;
        while cursor < visible.len() {
            let current = visible[cursor];
            cursor += 1;
            for (a, b) in faces[current].edges() {
                let Some(&neighbor) = edges.get(&(b, a)) else {
                    continue;
                };
                if visited.insert(neighbor) && faces[neighbor].distance(eye_point) > eps {
                    visible.push(neighbor);
                }
            }
        }
        let visible_set = visible.iter().copied().collect::<HashSet<_>>();

        // horizon edges keep the orientation of the visible face owning them
        let mut horizon = Vec::new();
        for &vf in &visible {
            for (a, b) in faces[vf].edges() {
                match edges.get(&(b, a)) {
                    Some(neighbor) if !visible_set.contains(neighbor) => horizon.push((a, b)),
                    _ => {}
                }
            }
        }

        let mut orphans = Vec::new();
        for &vf in &visible {
            faces[vf].alive = false;
            for edge in faces[vf].edges() {
                edges.remove(&edge);
            }
            orphans.append(&mut faces[vf].outside);
        }

        let first_new = faces.len();
        for (a, b) in horizon {
            let fi_new = faces.len();
            let face = Face::new(&pts, [a, b, eye]);
            for edge in face.edges() {
                edges.insert(edge, fi_new);
            }
            faces.push(face);
            stack.push(fi_new);
        }

        for i in orphans {
            if i == eye {
                continue;
            }
            let p = pts[i];
            if let Some(face) = faces[first_new..].iter_mut().find(|f| f.distance(p) > eps) {
                face.outside.push(i);
            }
        }
    }

    let faces = faces
        .into_iter()
        .filter(|f| f.alive)
        .map(|f| f.vertices)
        .collect::<Vec<_>>();

    let mut vertices = faces.iter().flatten().copied().collect::<Vec<_>>();
    vertices.sort_unstable();
    vertices.dedup();

    Ok(ConvexHull { vertices, faces })
}

// Same magnitude as the one used by qhull and quickhull3d for double precision.
fn tolerance(points: &[DVec3]) -> f64 {
    let max_abs = points
        .iter()
        .fold(DVec3::ZERO, |acc, p| acc.max(p.abs()));
    3.0 * f64::EPSILON * (max_abs.x + max_abs.y + max_abs.z)
}

fn initial_simplex(points: &[DVec3], eps: f64) -> Result<[usize; 4], HullError> {
    // extreme points along each axis
    let mut extremes = [0usize; 6];
    for (i, p) in points.iter().enumerate() {
        for axis in 0..3 {
            if p[axis] < points[extremes[2 * axis]][axis] {
                extremes[2 * axis] = i;
            }
            if p[axis] > points[extremes[2 * axis + 1]][axis] {
                extremes[2 * axis + 1] = i;
            }
        }
    }

    let (mut i0, mut i1, mut best) = (0, 0, 0.0);
    for &a in &extremes {
        for &b in &extremes {
            let d = points[a].distance_squared(points[b]);
            if d > best {
                (i0, i1, best) = (a, b, d);
            }
        }
    }
    if best.sqrt() <= eps {
        return Err(HullError::Degenerate);
    }

    // farthest point from the line (i0, i1)
    let dir = (points[i1] - points[i0]).normalize();
    let (mut i2, mut best) = (0, 0.0);
    for (i, p) in points.iter().enumerate() {
        let d = dir.cross(*p - points[i0]).length();
        if d > best {
            (i2, best) = (i, d);
        }
    }
    if best <= eps {
        return Err(HullError::Degenerate);
    }

    // farthest point from the plane (i0, i1, i2)
    let normal = (points[i1] - points[i0])
        .cross(points[i2] - points[i0])
        .normalize();
    let (mut i3, mut best) = (0, 0.0);
    for (i, p) in points.iter().enumerate() {
        let d = normal.dot(*p - points[i0]).abs();
        if d > best {
            (i3, best) = (i, d);
        }
    }
    if best <= eps {
        return Err(HullError::Degenerate);
    }

    Ok([i0, i1, i2, i3])
}

fn simplex_faces(points: &[DVec3], [a, b, c, d]: [usize; 4]) -> Vec<Face> {
    let mut faces = vec![
        Face::new(points, [a, b, c]),
        Face::new(points, [a, c, d]),
        Face::new(points, [a, d, b]),
        Face::new(points, [b, d, c]),
    ];

    // flip all the faces if the fourth vertex sees the first face from outside
    if faces[0].distance(points[d]) > 0.0 {
        faces = vec![
            Face::new(points, [a, c, b]),
            Face::new(points, [a, d, c]),
            Face::new(points, [a, b, d]),
            Face::new(points, [b, c, d]),
        ];
    }
    faces
}
