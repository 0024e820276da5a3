use glam::Vec3;

use super::algorithms::mesh_between_rings;
use super::mesh_builder::Ring;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    /// surface normal, facing away from the ray origin
    pub normal: Vec3,
    pub distance: f32,
}

/// Triangle soup stitched from a window of rings, queried by ray casts.
/// Built for one weld and dropped afterwards.
#[derive(Clone, Debug, Default)]
pub struct CollisionSurface {
    triangles: Vec<[Vec3; 3]>,
}

impl CollisionSurface {
    /// Stitches every pair of consecutive rings.
    pub fn from_rings(rings: &[Ring]) -> Self {
        let mut triangles = Vec::new();
        for pair in rings.windows(2) {
            let (base, top) = (&pair[0], &pair[1]);
            let offset = base.positions.len();
            let point = |i: usize| {
                if i < offset {
                    base.positions[i]
                } else {
                    top.positions[i - offset]
                }
            };
            for t in mesh_between_rings(0, &base.radials, offset, &top.radials).chunks_exact(3) {
                triangles.push([point(t[0]), point(t[1]), point(t[2])]);
            }
        }
        Self { triangles }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest two-sided hit along `direction` within `max_distance`.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let mut best: Option<RayHit> = None;
        for triangle in &self.triangles {
            let Some(distance) = intersect(origin, direction, triangle) else {
                continue;
            };
            if distance > max_distance || best.is_some_and(|b| b.distance <= distance) {
                continue;
            }
            let [a, b, c] = *triangle;
            let mut normal = (b - a).cross(c - a).normalize_or_zero();
            if normal.dot(direction) < 0. {
                normal = -normal;
            }
            best = Some(RayHit {
                point: origin + direction * distance,
                normal,
                distance,
            });
        }
        best
    }
}

/// Möller–Trumbore, both faces
fn intersect(origin: Vec3, direction: Vec3, [a, b, c]: &[Vec3; 3]) -> Option<f32> {
    const EPS: f32 = 1e-7;
    let edge1 = *b - *a;
    let edge2 = *c - *a;
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1. / det;
    let s = origin - *a;
    let u = s.dot(p) * inv_det;
    if !(0. ..=1.).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0. || u + v > 1. {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > EPS).then_some(t)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meshing::algorithms::regular_radials;
    use approx::assert_abs_diff_eq;

    fn circle(z: f32, radius: f32, sides: usize) -> Ring {
        let radials = regular_radials(sides);
        let positions = radials
            .iter()
            .map(|r| {
                let a = r * std::f32::consts::TAU;
                Vec3::new(a.cos() * radius, a.sin() * radius, z)
            })
            .collect();
        Ring {
            positions,
            radials,
            ..Default::default()
        }
    }

    fn tube() -> CollisionSurface {
        CollisionSurface::from_rings(&[circle(-1., 1., 16), circle(0., 1., 16), circle(1., 1., 12)])
    }

    #[test]
    fn stitched_triangle_count() {
        assert_eq!(tube().triangle_count(), 32 + 28);
        assert!(CollisionSurface::from_rings(&[circle(0., 1., 8)]).is_empty());
    }

    #[test]
    fn hit_from_inside() {
        let hit = tube().raycast(Vec3::new(0., 0.1, -0.5), Vec3::X, 5.).unwrap();
        assert!(hit.point.x > 0.95 && hit.point.x <= 1.);
        assert_abs_diff_eq!(hit.distance, hit.point.x, epsilon = 1e-5);
        // facing away from the origin, so outward here
        assert!(hit.normal.x > 0.9);
    }

    #[test]
    fn hit_from_outside_faces_away() {
        let hit = tube().raycast(Vec3::new(3., 0.1, 0.5), -Vec3::X, 5.).unwrap();
        assert!(hit.point.x > 0.95);
        assert!(hit.normal.x < -0.9);
    }

    #[test]
    fn misses() {
        let surface = tube();
        assert!(surface.raycast(Vec3::new(0., 0.1, -0.5), Vec3::X, 0.5).is_none());
        assert!(surface.raycast(Vec3::new(0., 0., 5.), Vec3::X, 5.).is_none());
        assert!(surface.raycast(Vec3::ZERO, Vec3::ZERO, 5.).is_none());
    }
}
