use glam::Vec3;

use super::{place_ring, RingSite};
use crate::error::GeometryResult;
use crate::meshing::algorithms::regular_radials;
use crate::meshing::mesh_builder::Ring;
use crate::meshing::skin::BranchSkin;

/// Regular polygon sized by the local girth.
#[derive(Copy, Clone, Debug)]
pub struct DefaultBuilder {
    global_scale: f32,
}

impl DefaultBuilder {
    pub fn new(global_scale: f32) -> Self {
        Self { global_scale }
    }

    pub fn segment_count(&self, skin: &BranchSkin, girth: f32) -> usize {
        skin.default_sides(girth)
    }

    pub fn ring_at(&self, site: &RingSite) -> GeometryResult<Ring> {
        let sides = site.segment.sides;
        let radials = regular_radials(sides);
        let girth = site.segment.girth * self.global_scale;
        let local: Vec<Vec3> = radials[..sides]
            .iter()
            .map(|r| {
                let angle = r * std::f32::consts::TAU;
                Vec3::new(angle.cos(), angle.sin(), 0.) * girth
            })
            .collect();
        place_ring(site, site.frame(), &local, &radials[..sides], self.global_scale)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meshing::mesh_builder::VertexIds;
    use crate::meshing::skin::{BuilderType, SegmentType, SkinSegment};
    use approx::assert_abs_diff_eq;

    fn segment(sides: usize, direction: Vec3) -> SkinSegment {
        SkinSegment {
            branch: 0,
            center: Vec3::new(1., 0., 0.),
            direction,
            normal: Vec3::Z,
            sides,
            segment_type: SegmentType::Middle,
            girth: 0.25,
            position: 0.,
            position_at_skin: 0.,
            builder: BuilderType::Default,
            vertex_start: None,
            radials: Vec::new(),
        }
    }

    #[test]
    fn circle_around_center() {
        let segment = segment(7, Vec3::X);
        let site = RingSite {
            segment: &segment,
            ids: VertexIds::default(),
            length_position: 0.,
        };
        let ring = DefaultBuilder::new(2.).ring_at(&site).unwrap();
        assert_eq!(ring.sides(), 7);
        assert_eq!(ring.radials.len(), 8);
        for (p, n) in ring.positions.iter().zip(ring.normals.iter()) {
            assert_abs_diff_eq!(p.distance(Vec3::new(2., 0., 0.)), 0.5, epsilon = 1e-5);
            // the ring is orthogonal to the segment direction
            assert_abs_diff_eq!(p.x, 2., epsilon = 1e-5);
            assert_abs_diff_eq!(n.length(), 1., epsilon = 1e-5);
        }
    }

    #[test]
    fn too_few_sides() {
        let segment = segment(2, Vec3::Z);
        let site = RingSite {
            segment: &segment,
            ids: VertexIds::default(),
            length_position: 0.,
        };
        assert!(DefaultBuilder::new(1.).ring_at(&site).is_err());
    }
}
