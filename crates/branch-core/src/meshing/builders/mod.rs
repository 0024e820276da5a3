//! Ring generation strategies. Every skin range is tagged with one [`BuilderType`]
//! and [`Builders`] routes each call to the matching variant.

pub mod default;
pub mod shape;
pub mod trunk;
pub mod welding;

use glam::{Quat, Vec3};
use rand::Rng;

pub use default::DefaultBuilder;
pub use shape::{circle_profile, ShapeBuilder, ShapeCollection, ShapeConfig, ShapeDescriptor, ShapePosition, ShapeRangeMode};
pub use trunk::{TrunkBuilder, TrunkConfig};
pub use welding::{WeldingBuilder, WeldingConfig, WeldingParams};

use super::mesh_builder::{GeometryData, Ring, VertexIds};
use super::pipeline::MeshConfig;
use super::skin::{BranchSkin, BuilderType, SegmentType, SkinSegment};
use crate::error::{GeometryError, GeometryResult};
use crate::growing::{BranchId, BranchTree};
use crate::utils::look_rotation;

/// A sampled segment and the per-vertex attributes of the ring built on it.
#[derive(Copy, Clone, Debug)]
pub struct RingSite<'a> {
    pub segment: &'a SkinSegment,
    pub ids: VertexIds,
    /// arc length from the hierarchy base
    pub length_position: f32,
}

impl RingSite<'_> {
    pub fn frame(&self) -> Quat {
        look_rotation(self.segment.direction, self.segment.normal)
    }
}

/// Places ring-local points (already scaled) around the segment center.
///
/// `radials` holds one value per point; the seam vertex is appended at radial 1.
pub(crate) fn place_ring(
    site: &RingSite,
    frame: Quat,
    local: &[Vec3],
    radials: &[f32],
    global_scale: f32,
) -> GeometryResult<Ring> {
    let sides = local.len();
    if sides < 3 {
        return Err(GeometryError::NotEnoughSides { sides });
    }
    let segment = site.segment;
    let center = segment.center * global_scale;
    let mut positions: Vec<Vec3> = local.iter().map(|p| frame * *p + center).collect();
    positions.push(positions[0]);
    let normals = positions
        .iter()
        .map(|p| match segment.segment_type {
            SegmentType::BeginCap => -segment.direction,
            SegmentType::EndCap => segment.direction,
            _ => (*p - center).normalize_or(segment.direction),
        })
        .collect();
    let mut radials = radials.to_vec();
    radials.push(1.);
    Ok(Ring {
        positions,
        normals,
        radials,
        center,
        direction: segment.direction,
        girth: segment.girth,
        length_position: site.length_position,
        ids: site.ids,
    })
}

/// Dispatches the builder contract to the four variants.
#[derive(Clone, Debug)]
pub struct Builders {
    pub default: DefaultBuilder,
    pub shape: ShapeBuilder,
    pub trunk: TrunkBuilder,
    pub welding: WeldingBuilder,
}

impl Builders {
    pub fn new(config: &MeshConfig, tree: &BranchTree, rng: &mut impl Rng) -> Self {
        Self {
            default: DefaultBuilder::new(config.global_scale),
            shape: ShapeBuilder::new(&config.shape, tree, config.global_scale),
            trunk: TrunkBuilder::new(&config.trunk, config.angle_tolerance, config.global_scale),
            welding: WeldingBuilder::new(&config.welding, config.global_scale, rng),
        }
    }

    /// Lets the builder of range `range` add relevant positions to the skin.
    pub fn preprocess(&mut self, range: usize, skin: &mut BranchSkin, rng: &mut impl Rng) -> bool {
        let Some(kind) = skin.range(range).map(|r| r.builder) else {
            return false;
        };
        match kind {
            BuilderType::Default => false,
            BuilderType::Shape => self.shape.preprocess(range, skin),
            BuilderType::Trunk => self.trunk.preprocess(range, skin),
            BuilderType::Welding => self.welding.preprocess(range, skin, rng),
        }
    }

    /// Polygon side count at a skin position; 0 means no ring is emitted there.
    pub fn segment_count(&self, kind: BuilderType, skin: &BranchSkin, position: f32, girth: f32) -> GeometryResult<usize> {
        match kind {
            BuilderType::Default => Ok(self.default.segment_count(skin, girth)),
            BuilderType::Shape => self.shape.segment_count(skin, position, girth),
            BuilderType::Trunk => Ok(self.trunk.segment_count(skin, girth)),
            BuilderType::Welding => Ok(self.welding.segment_count(skin, position, girth)),
        }
    }

    pub fn ring_at(&self, tree: &BranchTree, skin: &BranchSkin, index: usize) -> GeometryResult<Ring> {
        let segment = &skin.segments()[index];
        let branch = tree.get(segment.branch).ok_or(GeometryError::UnknownBranch(segment.branch))?;
        let site = RingSite {
            segment,
            ids: VertexIds {
                branch: segment.branch,
                skin: skin.id(),
                structure: branch.level(),
            },
            length_position: skin.length_offset() + skin.length() * segment.position_at_skin,
        };
        match segment.builder {
            BuilderType::Shape => match self.shape.ring_at(skin, &site)? {
                Some(ring) => Ok(ring),
                None => self.default.ring_at(&site),
            },
            BuilderType::Trunk => self.trunk.ring_at(skin, &site),
            // welding rings are only built in postprocess
            BuilderType::Default | BuilderType::Welding => self.default.ring_at(&site),
        }
    }

    /// Offset from the centerline to the skin surface for an element at `position` on `branch`.
    pub fn position_offset(
        &self,
        tree: &BranchTree,
        skin: &BranchSkin,
        branch: BranchId,
        position: f32,
        roll: f32,
        forward: Vec3,
    ) -> GeometryResult<Vec3> {
        let Some(at_skin) = skin.skin_position(branch, position) else {
            return Ok(Vec3::ZERO);
        };
        match skin.builder_at(at_skin, true).0 {
            BuilderType::Shape => self.shape.position_offset(tree, skin, branch, position, roll, forward),
            _ => Ok(Vec3::ZERO),
        }
    }

    /// Auxiliary mesh produced by the builder of range `range` once the main mesh is built.
    pub fn postprocess(
        &mut self,
        range: usize,
        tree: &BranchTree,
        skin: &BranchSkin,
        parent: Option<&BranchSkin>,
    ) -> GeometryResult<Option<GeometryData>> {
        match skin.range(range).map(|r| r.builder) {
            Some(BuilderType::Welding) => self.welding.postprocess(tree, skin, parent),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meshing::algorithms::regular_radials;

    fn segment(segment_type: SegmentType) -> SkinSegment {
        SkinSegment {
            branch: 0,
            center: Vec3::new(0., 0., 2.),
            direction: Vec3::Z,
            normal: Vec3::Y,
            sides: 4,
            segment_type,
            girth: 0.5,
            position: 0.5,
            position_at_skin: 0.5,
            builder: BuilderType::Default,
            vertex_start: None,
            radials: Vec::new(),
        }
    }

    fn square() -> Vec<Vec3> {
        vec![Vec3::X, Vec3::Y, -Vec3::X, -Vec3::Y]
    }

    #[test]
    fn placed_ring_has_seam_and_scale() {
        let segment = segment(SegmentType::Middle);
        let site = RingSite {
            segment: &segment,
            ids: VertexIds::default(),
            length_position: 3.,
        };
        let radials = &regular_radials(4)[..4];
        let ring = place_ring(&site, site.frame(), &square(), radials, 2.).unwrap();
        assert_eq!(ring.sides(), 4);
        assert_eq!(ring.positions[0], ring.positions[4]);
        assert_eq!(ring.radials.last(), Some(&1.));
        assert_eq!(ring.center, Vec3::new(0., 0., 4.));
        assert!(ring.positions.iter().all(|p| (p.z - 4.).abs() < 1e-5));
        assert!(ring.normals.iter().all(|n| n.z.abs() < 1e-6));
    }

    #[test]
    fn cap_normals_follow_direction() {
        let begin = segment(SegmentType::BeginCap);
        let end = segment(SegmentType::EndCap);
        let radials = &regular_radials(4)[..4];
        for (segment, expected) in [(&begin, -Vec3::Z), (&end, Vec3::Z)] {
            let site = RingSite {
                segment,
                ids: VertexIds::default(),
                length_position: 0.,
            };
            let ring = place_ring(&site, site.frame(), &square(), radials, 1.).unwrap();
            assert!(ring.normals.iter().all(|n| *n == expected));
        }
    }

    #[test]
    fn rejects_degenerate_polygons() {
        let segment = segment(SegmentType::Middle);
        let site = RingSite {
            segment: &segment,
            ids: VertexIds::default(),
            length_position: 0.,
        };
        let result = place_ring(&site, site.frame(), &square()[..2], &[0., 0.5], 1.);
        assert_eq!(result.unwrap_err(), GeometryError::NotEnoughSides { sides: 2 });
    }
}
