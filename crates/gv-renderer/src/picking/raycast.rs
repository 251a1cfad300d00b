//! Ray casting against proxy geometry.

use glam::Vec3;

/// Minimum margin by which a barycentric weight must beat the other two
/// for its vertex to be used as a snap point.
///
/// This is a tie tolerance: near-equal weights such as `(0.34, 0.33, 0.33)`
/// at a triangle's centroid count as a tie and snap to nothing. It also
/// rejects near-ties between two vertices, so `(0.5, 0.49, 0.01)` does not
/// snap even though the first weight is strictly largest.
pub const SNAP_DOMINANCE_EPSILON: f32 = 0.02;

const EPSILON: f32 = 1e-6;

/// Nearest triangle hit along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit (distance when the direction is normalized).
    pub t: f32,
    /// Vertex indices of the hit triangle.
    pub triangle: [u32; 3],
}

/// Ray-AABB (Axis-Aligned Bounding Box) intersection test
/// Returns the distance to intersection if hit, None otherwise
pub fn ray_aabb_intersection(
    ray_origin: Vec3,
    ray_dir: Vec3,
    bbox_min: Vec3,
    bbox_max: Vec3,
) -> Option<f32> {
    let inv_dir = ray_dir.recip();

    let t1 = (bbox_min - ray_origin) * inv_dir;
    let t2 = (bbox_max - ray_origin) * inv_dir;

    let tmin = t1.min(t2).max_element();
    let tmax = t1.max(t2).min_element();

    if tmax < 0.0 || tmin > tmax {
        return None;
    }

    Some(if tmin < 0.0 { tmax } else { tmin })
}

/// Ray-triangle intersection using Möller–Trumbore algorithm
/// Returns the ray parameter of the intersection if hit, None otherwise
pub fn ray_triangle_intersection(
    ray_origin: Vec3,
    ray_dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<f32> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = ray_dir.cross(edge2);
    let a = edge1.dot(h);

    if a.abs() < EPSILON {
        return None; // Ray is parallel to triangle
    }

    let f = 1.0 / a;
    let s = ray_origin - v0;
    let u = f * s.dot(h);

    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray_dir.dot(q);

    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);

    if t > EPSILON { Some(t) } else { None }
}

/// Finds the nearest triangle hit along a ray, in the geometry's own space.
pub fn first_hit(
    ray_origin: Vec3,
    ray_dir: Vec3,
    positions: &[[f32; 3]],
    indices: &[u32],
) -> Option<TriangleHit> {
    let mut closest: Option<TriangleHit> = None;

    for tri in indices.chunks_exact(3) {
        let (Some(a), Some(b), Some(c)) = (
            positions.get(tri[0] as usize),
            positions.get(tri[1] as usize),
            positions.get(tri[2] as usize),
        ) else {
            continue;
        };

        let Some(t) =
            ray_triangle_intersection(ray_origin, ray_dir, Vec3::from(*a), Vec3::from(*b), Vec3::from(*c))
        else {
            continue;
        };

        if closest.is_none_or(|hit| t < hit.t) {
            closest = Some(TriangleHit {
                t,
                triangle: [tri[0], tri[1], tri[2]],
            });
        }
    }

    closest
}

/// Barycentric weights of `p` against triangle `(a, b, c)`.
///
/// Returns None for a degenerate triangle.
pub fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<[f32; 3]> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;

    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= EPSILON * d00.max(d11).max(EPSILON) {
        return None;
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some([1.0 - v - w, v, w])
}

/// Index of the weight that beats both others by more than
/// [`SNAP_DOMINANCE_EPSILON`], or None if no weight dominates.
pub fn dominant_vertex(weights: [f32; 3]) -> Option<usize> {
    (0..3).find(|&i| {
        (0..3)
            .filter(|&j| j != i)
            .all(|j| weights[i] - weights[j] > SNAP_DOMINANCE_EPSILON)
    })
}
