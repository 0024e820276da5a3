//! Rings sampled from authored cross-section profiles.
//!
//! A [`ShapeDescriptor`] holds closed XY profiles keyed by position. Positions in
//! `[0, 1]` cover the body of a skin range; positions below 0 or above 1 describe
//! bottom and top caps, whose length on the skin follows the local girth.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::RingSite;
use crate::curve::{ControlNode, Curve, CurveSettings, HandleStyle, NormalMode};
use crate::error::{GeometryError, GeometryResult};
use crate::growing::{BranchId, BranchTree};
use crate::meshing::mesh_builder::Ring;
use crate::meshing::skin::{BranchSkin, BuilderType, SkinRange};
use crate::utils::{approx_eq, inverse_lerp, lerp};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapePosition {
    Initial,
    Terminal,
    #[default]
    Middle,
    /// covers a whole skin
    Unique,
}

impl ShapePosition {
    /// kind of skin range spanning `from..to`
    pub fn for_range(from: f32, to: f32) -> Self {
        match (approx_eq(from, 0.), approx_eq(to, 1.)) {
            (true, true) => ShapePosition::Unique,
            (_, true) => ShapePosition::Terminal,
            (true, _) => ShapePosition::Initial,
            _ => ShapePosition::Middle,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeRangeMode {
    #[default]
    WholeSkin,
    PerBranch,
    Nodes(usize),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeDescriptor {
    pub positions: Vec<f32>,
    /// control nodes of one closed profile per position, in the XY plane
    pub profiles: Vec<Vec<ControlNode>>,
    pub position: ShapePosition,
}

/// Four-node circle in the XY plane.
pub fn circle_profile(radius: f32) -> Vec<ControlNode> {
    let factor = 4. / 3. * (std::f32::consts::PI / 8.).tan();
    (0..4)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::FRAC_PI_2;
            let (x, y) = (angle.cos() * radius, angle.sin() * radius);
            let handle1 = Vec3::new(y, -x, 0.) * factor;
            ControlNode::with_handles(Vec3::new(x, y, 0.), handle1, -handle1, HandleStyle::Auto)
        })
        .collect()
}

impl ShapeDescriptor {
    /// a plain round tube covering whole skins
    pub fn cylinder() -> Self {
        Self {
            positions: vec![0., 1.],
            profiles: vec![circle_profile(1.), circle_profile(1.)],
            position: ShapePosition::Unique,
        }
    }

    pub fn min_bottom(&self) -> f32 {
        self.positions.iter().copied().fold(0., f32::min)
    }

    pub fn max_top(&self) -> f32 {
        self.positions.iter().copied().fold(1., f32::max)
    }

    pub fn has_bottom_cap(&self) -> bool {
        self.min_bottom() < 0.
    }

    pub fn has_top_cap(&self) -> bool {
        self.max_top() > 1.
    }
}

#[derive(Clone, Debug)]
struct CompiledShape {
    descriptor: ShapeDescriptor,
    curves: Vec<Curve>,
}

impl CompiledShape {
    fn new(descriptor: &ShapeDescriptor, angle_tolerance: f32) -> GeometryResult<Self> {
        if descriptor.positions.len() != descriptor.profiles.len() {
            return Err(GeometryError::NodeCountMismatch {
                left: descriptor.positions.len(),
                right: descriptor.profiles.len(),
            });
        }
        let mut pairs: Vec<(f32, &Vec<ControlNode>)> =
            descriptor.positions.iter().copied().zip(descriptor.profiles.iter()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let settings = CurveSettings {
            resolution_angle: angle_tolerance,
            ..Default::default()
        };
        let mut curves = Vec::with_capacity(pairs.len());
        for (_, nodes) in &pairs {
            curves.push(Curve::with_settings(
                nodes.to_vec(),
                true,
                settings,
                NormalMode::Fixed(Vec3::Z),
            )?);
        }
        if curves.is_empty() {
            return Err(GeometryError::NotEnoughNodes { count: 0 });
        }
        for w in curves.windows(2) {
            if w[0].node_count() != w[1].node_count() {
                return Err(GeometryError::NodeCountMismatch {
                    left: w[0].node_count(),
                    right: w[1].node_count(),
                });
            }
        }
        Ok(Self {
            descriptor: ShapeDescriptor {
                positions: pairs.iter().map(|p| p.0).collect(),
                profiles: pairs.iter().map(|p| p.1.clone()).collect(),
                position: descriptor.position,
            },
            curves,
        })
    }

    fn profile_at(&self, position: f32) -> GeometryResult<Curve> {
        let positions = &self.descriptor.positions;
        if self.curves.len() == 1 {
            return Ok(self.curves[0].clone());
        }
        let i = (0..positions.len() - 1)
            .find(|&i| positions[i + 1] >= position)
            .unwrap_or(positions.len() - 2);
        let t = inverse_lerp(positions[i], positions[i + 1], position);
        Curve::lerp(&self.curves[i], &self.curves[i + 1], t)
    }
}

/// Validated profile sets, indexed in the order they were given.
#[derive(Clone, Debug, Default)]
pub struct ShapeCollection {
    shapes: Vec<CompiledShape>,
}

impl ShapeCollection {
    /// Invalid descriptors are skipped with a warning.
    pub fn new(descriptors: &[ShapeDescriptor], angle_tolerance: f32) -> Self {
        let mut shapes = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            match CompiledShape::new(descriptor, angle_tolerance) {
                Ok(shape) => shapes.push(shape),
                Err(e) => log::warn!("skipping shape {i}: {e}"),
            }
        }
        Self { shapes }
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn descriptor(&self, shape: usize) -> Option<&ShapeDescriptor> {
        self.shapes.get(shape).map(|s| &s.descriptor)
    }

    /// first shape of the requested kind, or the first shape at all
    pub fn select(&self, position: ShapePosition) -> Option<usize> {
        self.shapes
            .iter()
            .position(|s| s.descriptor.position == position)
            .or(if self.shapes.is_empty() { None } else { Some(0) })
    }

    /// Profile interpolated between the two profiles around `position`.
    pub fn profile_at(&self, shape: usize, position: f32) -> GeometryResult<Curve> {
        self.shapes
            .get(shape)
            .ok_or(GeometryError::UnknownShape(shape))?
            .profile_at(position)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    pub enabled: bool,
    pub range_mode: ShapeRangeMode,
    pub scale: f32,
    /// 1 follows the branch girth, 0 keeps the girth at the tree base
    pub hierarchy_adherence: f32,
    /// degrees of profile turn between two ring vertices
    pub angle_tolerance: f32,
    pub shapes: Vec<ShapeDescriptor>,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            range_mode: ShapeRangeMode::WholeSkin,
            scale: 1.,
            hierarchy_adherence: 1.,
            angle_tolerance: 20.,
            shapes: vec![ShapeDescriptor::cylinder()],
        }
    }
}

/// shape position to skin position
fn shape_to_skin(range: &SkinRange, descriptor: &ShapeDescriptor, position: f32) -> f32 {
    let local = if position < 0. {
        lerp(0., range.bottom_cap, inverse_lerp(descriptor.min_bottom(), 0., position))
    } else if position > 1. {
        lerp(range.top_cap, 1., inverse_lerp(1., descriptor.max_top(), position))
    } else {
        lerp(range.bottom_cap, range.top_cap, position)
    };
    lerp(range.from, range.to, local)
}

/// skin position to shape position
fn skin_to_shape(range: &SkinRange, descriptor: &ShapeDescriptor, position: f32) -> f32 {
    let local = range.local(position);
    if local < range.bottom_cap {
        lerp(descriptor.min_bottom(), 0., inverse_lerp(0., range.bottom_cap, local))
    } else if local > range.top_cap {
        lerp(1., descriptor.max_top(), inverse_lerp(range.top_cap, 1., local))
    } else {
        inverse_lerp(range.bottom_cap, range.top_cap, local)
    }
}

fn shape_range(skin: &BranchSkin, position: f32) -> Option<&SkinRange> {
    skin.ranges().iter().find(|r| {
        r.builder == BuilderType::Shape
            && (r.contains(position) || approx_eq(position, r.from) || approx_eq(position, r.to))
    })
}

#[derive(Clone, Debug)]
pub struct ShapeBuilder {
    enabled: bool,
    range_mode: ShapeRangeMode,
    scale: f32,
    adherence: f32,
    global_scale: f32,
    /// largest trunk girth at the tree base
    base_girth: f32,
    collection: ShapeCollection,
}

impl ShapeBuilder {
    pub fn new(config: &ShapeConfig, tree: &BranchTree, global_scale: f32) -> Self {
        let collection = ShapeCollection::new(&config.shapes, config.angle_tolerance);
        if config.enabled && collection.is_empty() {
            log::warn!("shape meshing enabled without any valid shape");
        }
        let base_girth = tree
            .roots()
            .iter()
            .map(|&r| tree.branch(r).girth_at(0.))
            .fold(0., f32::max);
        Self {
            enabled: config.enabled && !collection.is_empty(),
            range_mode: config.range_mode,
            scale: config.scale,
            adherence: config.hierarchy_adherence.clamp(0., 1.),
            global_scale,
            base_girth,
            collection,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn collection(&self) -> &ShapeCollection {
        &self.collection
    }

    fn scaled_girth(&self, girth: f32) -> f32 {
        lerp(self.base_girth, girth, self.adherence) * self.scale
    }

    /// Covers the skin with shape ranges following the range mode, caps included.
    pub fn register_ranges(&self, tree: &BranchTree, skin: &mut BranchSkin) {
        if !self.enabled {
            return;
        }
        let spans: Vec<(f32, f32)> = match self.range_mode {
            ShapeRangeMode::WholeSkin => vec![(0., 1.)],
            ShapeRangeMode::PerBranch => skin.branch_ranges().iter().map(|r| (r.from, r.to)).collect(),
            ShapeRangeMode::Nodes(n) => {
                let n = n.max(1);
                (0..n)
                    .map(|i| (i as f32 / n as f32, (i + 1) as f32 / n as f32))
                    .collect()
            }
        };
        for (from, to) in spans {
            let Some(index) = self.collection.select(ShapePosition::for_range(from, to)) else {
                continue;
            };
            let Some(descriptor) = self.collection.descriptor(index) else {
                continue;
            };
            let mut range = SkinRange::new(from, to, BuilderType::Shape);
            range.shape = Some(index);
            let span_length = skin.length() * (to - from);
            if span_length > 0. {
                if descriptor.has_top_cap() {
                    let girth = self.scaled_girth(skin.girth_at(tree, to));
                    let cap = girth * (descriptor.max_top() - 1.);
                    range.top_cap = 1. - (cap / span_length).min(0.5);
                }
                if descriptor.has_bottom_cap() {
                    let girth = self.scaled_girth(skin.girth_at(tree, from));
                    let cap = girth * -descriptor.min_bottom();
                    range.bottom_cap = (cap / span_length).min(0.5);
                }
            }
            skin.add_range(range);
        }
    }

    /// Every profile position becomes a relevant position of the skin.
    pub fn preprocess(&self, range: usize, skin: &mut BranchSkin) -> bool {
        let Some(range) = skin.range(range).copied() else {
            return false;
        };
        let Some(descriptor) = range.shape.and_then(|s| self.collection.descriptor(s)) else {
            return false;
        };
        let positions: Vec<f32> = descriptor
            .positions
            .iter()
            .map(|p| shape_to_skin(&range, descriptor, *p))
            .collect();
        for p in positions {
            skin.add_relevant_position(p, 0.01, 1);
        }
        true
    }

    fn profile(&self, skin: &BranchSkin, position: f32) -> GeometryResult<Option<Curve>> {
        let Some(range) = shape_range(skin, position) else {
            return Ok(None);
        };
        let Some(shape) = range.shape else {
            return Ok(None);
        };
        let descriptor = self.collection.descriptor(shape).ok_or(GeometryError::UnknownShape(shape))?;
        let at = skin_to_shape(range, descriptor, position);
        self.collection.profile_at(shape, at).map(Some)
    }

    /// Profile point count at the position, or the default count outside shape ranges.
    pub fn segment_count(&self, skin: &BranchSkin, position: f32, girth: f32) -> GeometryResult<usize> {
        Ok(match self.profile(skin, position)? {
            Some(profile) => profile.points().len().saturating_sub(1),
            None => skin.default_sides(girth),
        })
    }

    /// `None` when the segment is not covered by a shape range.
    pub fn ring_at(&self, skin: &BranchSkin, site: &RingSite) -> GeometryResult<Option<Ring>> {
        let Some(profile) = self.profile(skin, site.segment.position_at_skin)? else {
            return Ok(None);
        };
        let points = profile.points();
        let sides = points.len().saturating_sub(1);
        let radius = lerp(
            self.base_girth * self.global_scale,
            site.segment.girth * self.global_scale,
            self.adherence,
        ) * self.scale;
        let local: Vec<Vec3> = points[..sides]
            .iter()
            .map(|p| Vec3::new(p.position.x, p.position.y, 0.) * radius)
            .collect();
        let radials: Vec<f32> = points[..sides].iter().map(|p| p.relative_position).collect();
        super::place_ring(site, site.frame(), &local, &radials, self.global_scale).map(Some)
    }

    /// Offset from the centerline to the profile surface along `forward`, for an element
    /// rolled by `roll` at `position` on `branch`.
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
        let Some(profile) = self.profile(skin, at_skin)? else {
            return Ok(Vec3::ZERO);
        };
        let around = ((roll + std::f32::consts::FRAC_PI_2) / std::f32::consts::TAU).rem_euclid(1.);
        let p = profile.sample_at(around, false).position;
        let shape_radius = Vec3::new(p.x, p.y, 0.).length();
        let girth = tree.get(branch).ok_or(GeometryError::UnknownBranch(branch))?.girth_at(position);
        let scale = lerp(self.base_girth * shape_radius, girth * shape_radius, self.adherence) * self.scale;
        Ok(forward.normalize_or_zero() * scale * 0.85)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::growing::Branch;
    use crate::meshing::mesh_builder::VertexIds;
    use crate::meshing::skin::{SegmentType, SkinSegment};
    use approx::assert_abs_diff_eq;

    fn trunk() -> BranchTree {
        let mut tree = BranchTree::new();
        tree.add_root(Branch::new().with_length(4.).with_girth(0.2, 0.2));
        tree.update().unwrap();
        tree
    }

    fn capped() -> ShapeDescriptor {
        ShapeDescriptor {
            positions: vec![1.5, 0., -0.5, 1.],
            profiles: vec![
                circle_profile(0.5),
                circle_profile(1.),
                circle_profile(0.5),
                circle_profile(1.),
            ],
            position: ShapePosition::Unique,
        }
    }

    fn builder(tree: &BranchTree, shapes: Vec<ShapeDescriptor>) -> ShapeBuilder {
        let config = ShapeConfig {
            enabled: true,
            shapes,
            ..Default::default()
        };
        ShapeBuilder::new(&config, tree, 1.)
    }

    #[test]
    fn invalid_descriptors_are_skipped() {
        let mismatched = ShapeDescriptor {
            positions: vec![0., 1.],
            profiles: vec![circle_profile(1.)],
            position: ShapePosition::Initial,
        };
        let mut uneven = ShapeDescriptor::cylinder();
        uneven.profiles[1].pop();
        let collection = ShapeCollection::new(&[mismatched, uneven, capped()], 20.);
        assert_eq!(collection.len(), 1);
        // sorted by position
        assert_eq!(collection.descriptor(0).unwrap().positions, vec![-0.5, 0., 1., 1.5]);
        // no initial shape, falls back to the first one
        assert_eq!(collection.select(ShapePosition::Initial), Some(0));
        assert!(collection.profile_at(3, 0.).is_err());
    }

    #[test]
    fn range_kinds() {
        assert_eq!(ShapePosition::for_range(0., 1.), ShapePosition::Unique);
        assert_eq!(ShapePosition::for_range(0.5, 1.), ShapePosition::Terminal);
        assert_eq!(ShapePosition::for_range(0., 0.5), ShapePosition::Initial);
        assert_eq!(ShapePosition::for_range(0.25, 0.5), ShapePosition::Middle);
    }

    #[test]
    fn cap_extents_ignore_position_order() {
        let descriptor = capped();
        assert_eq!(descriptor.min_bottom(), -0.5);
        assert_eq!(descriptor.max_top(), 1.5);
        assert!(descriptor.has_bottom_cap() && descriptor.has_top_cap());
        let plain = ShapeDescriptor::cylinder();
        assert!(!plain.has_bottom_cap() && !plain.has_top_cap());
    }

    #[test]
    fn cap_positions_map_both_ways() {
        let descriptor = capped();
        let range = SkinRange {
            bottom_cap: 0.1,
            top_cap: 0.9,
            ..SkinRange::new(0.2, 0.6, BuilderType::Shape)
        };
        assert_abs_diff_eq!(shape_to_skin(&range, &descriptor, -0.5), 0.2, epsilon = 1e-5);
        assert_abs_diff_eq!(shape_to_skin(&range, &descriptor, 0.), 0.24, epsilon = 1e-5);
        assert_abs_diff_eq!(shape_to_skin(&range, &descriptor, 1.), 0.56, epsilon = 1e-5);
        assert_abs_diff_eq!(shape_to_skin(&range, &descriptor, 1.5), 0.6, epsilon = 1e-5);
        for p in [-0.25, 0.3, 0.8, 1.2] {
            let back = skin_to_shape(&range, &descriptor, shape_to_skin(&range, &descriptor, p));
            assert_abs_diff_eq!(back, p, epsilon = 1e-4);
        }
    }

    #[test]
    fn caps_follow_girth() {
        let tree = trunk();
        let mut skin = BranchSkin::new(&tree, 0, 0, 0., 0.);
        let builder = builder(&tree, vec![capped()]);
        builder.register_ranges(&tree, &mut skin);
        assert_eq!(skin.ranges().len(), 1);
        let range = skin.ranges()[0];
        // cap length 0.2 * 0.5 over a 4 long range
        assert_abs_diff_eq!(range.top_cap, 0.975, epsilon = 1e-4);
        assert_abs_diff_eq!(range.bottom_cap, 0.025, epsilon = 1e-4);
        assert!(builder.preprocess(0, &mut skin));
        // the skin ends are not relevant positions
        assert_eq!(skin.relevant_positions().len(), 2);
    }

    #[test]
    fn ring_follows_profile() {
        let tree = trunk();
        let mut skin = BranchSkin::new(&tree, 0, 0, 0., 0.).with_sides(3, 8, 0.1, 0.3);
        let builder = builder(&tree, vec![ShapeDescriptor::cylinder()]);
        builder.register_ranges(&tree, &mut skin);
        let sides = builder.segment_count(&skin, 0.5, 0.2).unwrap();
        assert!(sides >= 8, "{sides}");
        let segment = SkinSegment {
            branch: 0,
            center: skin.point_at(&tree, 0.5),
            direction: skin.direction_at(&tree, 0.5),
            normal: skin.normal_at(&tree, 0.5),
            sides,
            segment_type: SegmentType::Middle,
            girth: 0.2,
            position: 0.5,
            position_at_skin: 0.5,
            builder: BuilderType::Shape,
            vertex_start: None,
            radials: Vec::new(),
        };
        let site = RingSite {
            segment: &segment,
            ids: VertexIds::default(),
            length_position: 2.,
        };
        let ring = builder.ring_at(&skin, &site).unwrap().unwrap();
        assert_eq!(ring.sides(), sides);
        for p in &ring.positions {
            assert_abs_diff_eq!(p.distance(segment.center), 0.2, epsilon = 2e-3);
        }
    }

    #[test]
    fn surface_offset_along_forward() {
        let tree = trunk();
        let mut skin = BranchSkin::new(&tree, 0, 0, 0., 0.);
        let builder = builder(&tree, vec![ShapeDescriptor::cylinder()]);
        builder.register_ranges(&tree, &mut skin);
        let offset = builder.position_offset(&tree, &skin, 0, 0.5, 0., Vec3::X).unwrap();
        assert_abs_diff_eq!(offset.x, 0.2 * 0.85, epsilon = 2e-3);
        assert_abs_diff_eq!(offset.y, 0., epsilon = 1e-6);
        let disabled = ShapeBuilder::new(&ShapeConfig::default(), &tree, 1.);
        assert!(!disabled.is_enabled());
    }
}
