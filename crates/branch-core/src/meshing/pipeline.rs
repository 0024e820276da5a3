//! Tree meshing: skins are created along the hierarchy, sampled, turned into rings by
//! their builders and stitched. Welds run last, once every parent skin is placed.

use glam::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::algorithms::mesh_between_rings;
use super::builders::{Builders, ShapeConfig, TrunkConfig, WeldingConfig};
use super::mesh_builder::GeometryData;
use super::skin::{BranchSkin, BuilderType, SegmentType, SkinSegment};
use crate::curve::CurveSample;
use crate::error::{GeometryError, GeometryResult};
use crate::growing::{BranchId, BranchTree};
use crate::utils::{lerp, project_on_plane};

/// window and priority of the positions a skin must sample exactly
const RELEVANT_WINDOW: f32 = 0.1;
const RELEVANT_PRIORITY: u8 = 1;
/// highest priority kept when sampling a branch
const SAMPLING_PRIORITY: u8 = 3;
const TIP_GIRTH: f32 = 0.001;
const BREAK_TOLERANCE: f32 = 0.001;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub min_sides: usize,
    pub max_sides: usize,
    /// degrees of accumulated turn between two rings
    pub angle_tolerance: f32,
    pub global_scale: f32,
    pub use_mesh_cap_at_base: bool,
    /// deepest skin level whose base gets an extra ring one parent girth away, 0 disables it
    pub average_normals_level_limit: usize,
    pub welding: WeldingConfig,
    pub trunk: TrunkConfig,
    pub shape: ShapeConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_sides: 4,
            max_sides: 12,
            angle_tolerance: 20.,
            global_scale: 1.,
            use_mesh_cap_at_base: false,
            average_normals_level_limit: 2,
            welding: WeldingConfig::default(),
            trunk: TrunkConfig::default(),
            shape: ShapeConfig::default(),
        }
    }
}

/// Horizontal direction from the parent axis towards a child, at its attachment.
pub(crate) fn attachment_forward(tree: &BranchTree, child: BranchId) -> Vec3 {
    let branch = tree.branch(child);
    let Some(parent) = branch.parent().and_then(|p| tree.get(p)) else {
        return Vec3::ZERO;
    };
    let axis = parent.direction_at(branch.position());
    let outward = project_on_plane(branch.direction_at(0.), axis).normalize_or_zero();
    if outward != Vec3::ZERO {
        return outward;
    }
    Quat::from_axis_angle(axis, branch.roll_angle) * parent.normal_at(branch.position())
}

struct TreeMesher<'a, R: Rng> {
    config: &'a MeshConfig,
    rng: &'a mut R,
    builders: Builders,
    avg_girth: (f32, f32),
    max_length: f32,
    skins: Vec<BranchSkin>,
    /// index of the parent skin of every skin
    parents: Vec<Option<usize>>,
}

impl<'a, R: Rng> TreeMesher<'a, R> {
    fn new(tree: &BranchTree, config: &'a MeshConfig, rng: &'a mut R) -> Self {
        let mut avg_girth: Option<(f32, f32)> = None;
        for branch in tree.branches() {
            let avg = (branch.girth_at(0.) + branch.girth_at(0.5) + branch.girth_at(1.)) / 3.;
            avg_girth = Some(match avg_girth {
                None => (avg, avg),
                Some((min, max)) => (min.min(avg), max.max(avg)),
            });
        }
        let builders = Builders::new(config, tree, &mut *rng);
        Self {
            config,
            rng,
            builders,
            avg_girth: avg_girth.unwrap_or((0., 0.)),
            max_length: tree.max_length(),
            skins: Vec::new(),
            parents: Vec::new(),
        }
    }

    fn new_skin(&mut self, tree: &BranchTree, first: BranchId, level: usize, length_offset: f32) -> GeometryResult<BranchSkin> {
        let hierarchy_level = if self.max_length > 0. {
            length_offset / self.max_length
        } else {
            0.
        };
        let (min_girth, max_girth) = self.avg_girth;
        let mut skin = BranchSkin::new(tree, first, level, length_offset, hierarchy_level).with_sides(
            self.config.min_sides,
            self.config.max_sides,
            min_girth,
            max_girth,
        );
        if self.builders.shape.is_enabled() {
            self.builders.shape.register_ranges(tree, &mut skin);
        } else if level == 0 {
            if self.builders.trunk.is_enabled() {
                self.builders.trunk.register(&mut skin, &mut *self.rng)?;
            }
        } else {
            self.builders.welding.register(tree, &mut skin, &mut *self.rng);
        }
        for range in 0..skin.ranges().len() {
            self.builders.preprocess(range, &mut skin, &mut *self.rng);
        }
        Ok(skin)
    }

    fn push_segment(
        &self,
        skin: &mut BranchSkin,
        sample: &CurveSample,
        branch: BranchId,
        at_skin: f32,
        segment_type: SegmentType,
        builder: BuilderType,
        sides: usize,
        girth: f32,
    ) {
        skin.add_segment(SkinSegment {
            branch,
            center: sample.position,
            direction: sample.forward,
            normal: sample.normal,
            sides,
            segment_type,
            girth,
            position: sample.relative_position,
            position_at_skin: at_skin,
            builder,
            vertex_start: None,
            radials: Vec::new(),
        });
    }

    fn skin_base(&self, tree: &BranchTree, skin: &mut BranchSkin) -> GeometryResult<()> {
        let id = skin.id();
        let branch = tree.branch(id);
        let base = branch.sample_at(0., false);
        let (kind, _) = skin.builder_at(0., true);
        let sides = self.builders.segment_count(kind, skin, 0., base.girth)?;
        if self.config.use_mesh_cap_at_base {
            self.push_segment(skin, &base, id, 0., SegmentType::BeginCap, kind, sides, 0.);
        }
        self.push_segment(skin, &base, id, 0., SegmentType::Begin, kind, sides, base.girth);
        Ok(())
    }

    /// Samples one branch of the chain. Returns false when the skin ends on this branch.
    fn skin_middle(&self, tree: &BranchTree, skin: &mut BranchSkin, id: BranchId, first: bool) -> GeometryResult<bool> {
        let branch = tree.branch(id);
        let range = *skin.branch_range(id).ok_or(GeometryError::UnknownBranch(id))?;

        let mut positions: Vec<f32> = branch
            .children()
            .iter()
            .map(|&c| tree.branch(c))
            .filter(|c| !c.underground)
            .map(|c| c.position())
            .collect();
        let limit = self.config.average_normals_level_limit;
        if first && skin.level() > 0 && skin.level() <= limit && branch.length() > 0. {
            if let Some(parent) = branch.parent().and_then(|p| tree.get(p)) {
                positions.push(parent.girth_at(branch.position()) / branch.length());
            }
        }
        if branch.is_broken {
            positions.push(branch.break_position);
        }
        for p in positions {
            skin.add_relevant_position(lerp(range.from, range.to, p), RELEVANT_WINDOW, RELEVANT_PRIORITY);
        }

        let relevant = skin.branch_relevant_positions(id, SAMPLING_PRIORITY);
        let cut = if branch.is_broken {
            branch.break_position.clamp(0., 1.)
        } else {
            1.
        };
        let samples: Vec<CurveSample> = branch
            .curve()
            .adaptive_simplify(self.config.angle_tolerance, &relevant)
            .into_iter()
            .filter(|s| s.relative_position <= cut + BREAK_TOLERANCE)
            .collect();
        let tip = branch.is_broken || branch.follow_up().is_none();

        let mut upper_limit_reached = false;
        for (i, sample) in samples.iter().enumerate().skip(1) {
            let position = sample.relative_position;
            let mut sample = *sample;
            sample.position += branch.position_from_root();
            let at_skin = lerp(range.from, range.to, position);
            let (kind, at_end) = skin.builder_at(at_skin, !upper_limit_reached);
            upper_limit_reached = at_end;
            let girth = branch.girth_at(position);
            let sides = self.builders.segment_count(kind, skin, at_skin, girth)?;
            let last = i + 1 == samples.len();
            let segment_type = if last { SegmentType::End } else { SegmentType::Middle };
            self.push_segment(skin, &sample, id, at_skin, segment_type, kind, sides, girth);
            if last && tip {
                let cap = if kind == BuilderType::Welding {
                    BuilderType::Default
                } else {
                    kind
                };
                self.push_segment(skin, &sample, id, at_skin, SegmentType::EndCap, cap, sides, TIP_GIRTH);
            }
        }
        Ok(!branch.is_broken)
    }

    /// Builder offsets for the children and sprouts growing out of a finished skin.
    fn place_on_surface(&self, tree: &mut BranchTree, skin: &BranchSkin) -> GeometryResult<Vec<BranchId>> {
        let mut children = Vec::new();
        for id in skin.branches().collect::<Vec<_>>() {
            let branch = tree.branch(id);
            let cut = if branch.is_broken { branch.break_position } else { 1. };
            let mut offsets = Vec::new();
            for &c in branch.children() {
                let child = tree.branch(c);
                if child.is_follow_up() || child.position() > cut + BREAK_TOLERANCE {
                    continue;
                }
                let forward = attachment_forward(tree, c);
                let offset = self
                    .builders
                    .position_offset(tree, skin, id, child.position(), child.roll_angle, forward)?;
                offsets.push((c, offset));
            }
            let sprout_offsets = branch
                .sprouts
                .iter()
                .map(|s| self.builders.position_offset(tree, skin, id, s.position, s.roll_angle, s.forward()))
                .collect::<GeometryResult<Vec<_>>>()?;

            for (c, offset) in offsets {
                tree.set_surface_offset(c, offset);
                tree.update_position_from(c);
                children.push(c);
            }
            if let Some(branch) = tree.get_mut(id) {
                for (sprout, offset) in branch.sprouts.iter_mut().zip(sprout_offsets) {
                    sprout.set_position_offset(offset);
                }
            }
        }
        Ok(children)
    }

    fn skin_branch(&mut self, tree: &mut BranchTree, mut skin: BranchSkin, parent: Option<usize>) -> GeometryResult<()> {
        self.skin_base(tree, &mut skin)?;
        let chain: Vec<BranchId> = skin.branches().collect();
        for (i, &id) in chain.iter().enumerate() {
            if !self.skin_middle(tree, &mut skin, id, i == 0)? {
                break;
            }
        }
        log::debug!(
            "skin {} at level {}: {} segments, {} ranges",
            skin.id(),
            skin.level(),
            skin.segments().len(),
            skin.ranges().len()
        );

        let children = self.place_on_surface(tree, &skin)?;
        let index = self.skins.len();
        let (level, length_offset, length) = (skin.level(), skin.length_offset(), skin.length());
        let offsets: Vec<(BranchId, f32)> = children
            .iter()
            .map(|&c| {
                let child = tree.branch(c);
                let from = child
                    .parent()
                    .and_then(|p| skin.branch_range(p))
                    .map_or(0., |r| r.from);
                let parent_length = child.parent().map_or(0., |p| tree.branch(p).length());
                (c, length_offset + length * from + parent_length * child.position())
            })
            .collect();
        self.skins.push(skin);
        self.parents.push(parent);

        for (c, offset) in offsets {
            let child_skin = self.new_skin(tree, c, level + 1, offset)?;
            self.skin_branch(tree, child_skin, Some(index))?;
        }
        Ok(())
    }

    fn build(mut self, tree: &mut BranchTree) -> GeometryResult<GeometryData> {
        for root in tree.roots().to_vec() {
            let skin = self.new_skin(tree, root, 0, 0.)?;
            self.skin_branch(tree, skin, None)?;
        }
        let tree = &*tree;

        let mut mesh = GeometryData::new();
        for skin in self.skins.iter_mut() {
            let mut previous: Option<(usize, Vec<f32>)> = None;
            for i in 0..skin.segments().len() {
                if skin.segments()[i].sides == 0 {
                    previous = None;
                    continue;
                }
                let ring = self.builders.ring_at(tree, skin, i)?;
                let start = mesh.register_ring(&ring);
                if let Some((base, base_radials)) = &previous {
                    mesh.register_triangles(&mesh_between_rings(*base, base_radials, start, &ring.radials));
                }
                let segment = &mut skin.segments_mut()[i];
                segment.vertex_start = Some(start);
                segment.radials = ring.radials.clone();
                previous = Some((start, ring.radials));
            }
        }
        let (vertices, triangles) = (mesh.vertex_count(), mesh.triangle_count());

        let mut welds = 0;
        for (index, skin) in self.skins.iter().enumerate() {
            let parent = self.parents[index].map(|p| &self.skins[p]);
            for range in 0..skin.ranges().len() {
                if let Some(patch) = self.builders.postprocess(range, tree, skin, parent)? {
                    mesh.merge(&patch);
                    welds += 1;
                }
            }
        }
        log::info!(
            "meshed {} skins: {vertices} vertices and {triangles} triangles, {welds} welds adding {} vertices",
            self.skins.len(),
            mesh.vertex_count() - vertices
        );
        Ok(mesh)
    }
}

/// Meshes every skin of the tree and merges the weld patches.
///
/// Children and sprouts get their surface offsets on the way, so the tree is left
/// positioned as meshed.
pub fn mesh_tree(tree: &mut BranchTree, config: &MeshConfig, rng: &mut impl Rng) -> GeometryResult<GeometryData> {
    TreeMesher::new(tree, config, rng).build(tree)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::growing::{generation, Branch, Sprout};
    use crate::meshing::builders::WeldingParams;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn trunk() -> BranchTree {
        let mut tree = BranchTree::new();
        tree.add_root(Branch::new().with_length(10.).with_girth(0.1, 0.5));
        tree.update().unwrap();
        tree
    }

    fn trunk_with_child() -> (BranchTree, BranchId) {
        let mut tree = BranchTree::new();
        let trunk = tree.add_root(Branch::new().with_length(10.).with_girth(0.5, 0.5));
        let child = tree
            .attach(
                trunk,
                Branch::new()
                    .with_length(4.)
                    .with_girth(0.2, 0.2)
                    .towards(Vec3::X)
                    .at(0.5),
            )
            .unwrap();
        tree.update().unwrap();
        (tree, child)
    }

    fn check_indices(mesh: &GeometryData) {
        assert!(mesh.triangles.iter().all(|&i| (i as usize) < mesh.vertex_count()));
        assert_eq!(mesh.normals.len(), mesh.vertex_count());
        assert_eq!(mesh.uvs.len(), mesh.vertex_count());
        assert_eq!(mesh.ids.len(), mesh.vertex_count());
    }

    #[test]
    fn straight_trunk() {
        let mut tree = trunk();
        let mesh = mesh_tree(&mut tree, &MeshConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        check_indices(&mesh);
        // base, tip and tip cap, all at the widest side count of a single-branch tree
        assert_eq!(mesh.vertex_count(), 3 * 13);
        assert_eq!(mesh.triangle_count(), 2 * 24);
        let top = mesh.uvs.iter().map(|uv| uv.y).fold(0., f32::max);
        assert_abs_diff_eq!(top, 10., epsilon = 1e-3);
        for (p, c) in mesh.points.iter().zip(mesh.centers.iter()) {
            assert!(p.z > -1e-3 && p.z < 10. + 1e-3);
            assert!(p.distance(*c) <= 0.5 + 1e-4);
        }
    }

    #[test]
    fn cap_at_base_closes_the_tube() {
        let mut tree = trunk();
        let config = MeshConfig {
            use_mesh_cap_at_base: true,
            ..Default::default()
        };
        let mesh = mesh_tree(&mut tree, &config, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(mesh.vertex_count(), 4 * 13);
        assert_eq!(mesh.triangle_count(), 3 * 24);
        assert!(mesh.normals[..13].iter().all(|n| n.distance(-Vec3::Z) < 1e-5));
    }

    #[test]
    fn children_get_their_own_skin() {
        let (mut tree, child) = trunk_with_child();
        let mesh = mesh_tree(&mut tree, &MeshConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        check_indices(&mesh);
        assert!(mesh.ids.iter().any(|ids| ids.skin == child));
        // the attachment point is sampled exactly on the trunk
        let at_child = mesh
            .ids
            .iter()
            .zip(mesh.centers.iter())
            .any(|(ids, c)| ids.skin == 0 && (c.z - 5.).abs() < 1e-3);
        assert!(at_child);
        // every child vertex sits at the level of the child
        for (ids, ring) in mesh.ids.iter().zip(mesh.centers.iter()) {
            if ids.skin == child {
                assert_eq!(ids.structure, 1);
                assert!(ring.x >= -1e-3);
            }
        }
    }

    #[test]
    fn broken_branch_stops_at_the_break() {
        let mut tree = BranchTree::new();
        let mut branch = Branch::new().with_length(10.).with_girth(0.1, 0.5);
        branch.is_broken = true;
        branch.break_position = 0.4;
        tree.add_root(branch);
        tree.update().unwrap();
        let mesh = mesh_tree(&mut tree, &MeshConfig::default(), &mut StdRng::seed_from_u64(0)).unwrap();
        check_indices(&mesh);
        let top = mesh.points.iter().map(|p| p.z).fold(f32::MIN, f32::max);
        assert_abs_diff_eq!(top, 4., epsilon = 1e-2);
        // the break is capped
        assert!(mesh.girths.iter().any(|g| *g == TIP_GIRTH));
    }

    #[test]
    fn welds_add_a_patch() {
        let welding = WeldingConfig {
            branch: WeldingParams {
                enabled: true,
                min_hierarchy_range: 1.,
                max_hierarchy_range: 1.,
                min_distance: 1.,
                max_distance: 1.,
                min_additional_segments: 0,
                max_additional_segments: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut plain_tree, child) = trunk_with_child();
        let plain = mesh_tree(&mut plain_tree, &MeshConfig::default(), &mut StdRng::seed_from_u64(4)).unwrap();
        let (mut tree, _) = trunk_with_child();
        let config = MeshConfig {
            welding,
            ..Default::default()
        };
        let welded = mesh_tree(&mut tree, &config, &mut StdRng::seed_from_u64(4)).unwrap();
        check_indices(&welded);
        let count = |mesh: &GeometryData| mesh.ids.iter().filter(|ids| ids.skin == child).count();
        assert!(count(&welded) > count(&plain));
        // the weld ring lies on the trunk surface, half a unit away from its axis
        let on_trunk = welded
            .ids
            .iter()
            .zip(welded.points.iter())
            .filter(|(ids, p)| ids.skin == child && (Vec3::new(p.x, p.y, 0.).length() - 0.5).abs() < 0.02)
            .count();
        assert!(on_trunk >= 3);
    }

    #[test]
    fn shape_offsets_children_and_sprouts() {
        let (mut tree, child) = trunk_with_child();
        tree.get_mut(0).unwrap().sprouts.push(Sprout::new(0.3, 0.));
        tree.update().unwrap();
        let config = MeshConfig {
            shape: ShapeConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mesh = mesh_tree(&mut tree, &config, &mut StdRng::seed_from_u64(0)).unwrap();
        check_indices(&mesh);
        let offset = tree.branch(child).surface_offset();
        assert!(offset.x > 0.35 && offset.x <= 0.43, "{offset}");
        assert_abs_diff_eq!(offset.normalize().x, 1., epsilon = 1e-3);
        assert_abs_diff_eq!(tree.branch(child).point_at(0.).x, offset.x, epsilon = 1e-3);
        assert!(tree.branch(0).sprouts[0].position_offset().length() > 0.35);
    }

    #[test]
    fn trunk_flare_widens_the_base() {
        let mut tree = trunk();
        let config = MeshConfig {
            trunk: TrunkConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mesh = mesh_tree(&mut tree, &config, &mut StdRng::seed_from_u64(9)).unwrap();
        check_indices(&mesh);
        let widest = mesh
            .points
            .iter()
            .zip(mesh.centers.iter())
            .map(|(p, c)| p.distance(*c))
            .fold(0., f32::max);
        assert!(widest > 0.52, "{widest}");
    }

    #[test]
    fn too_few_sides_is_an_error() {
        let mut tree = trunk();
        let config = MeshConfig {
            min_sides: 2,
            max_sides: 2,
            ..Default::default()
        };
        let result = mesh_tree(&mut tree, &config, &mut StdRng::seed_from_u64(0));
        assert_eq!(result.unwrap_err(), GeometryError::NotEnoughSides { sides: 2 });
    }

    #[test]
    fn grown_tree_is_reproducible() {
        let grow = generation::GrowConfig::default();
        let config = MeshConfig {
            trunk: TrunkConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mesh = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut tree = generation::grow_tree(&grow, &mut rng).unwrap();
            mesh_tree(&mut tree, &config, &mut rng).unwrap()
        };
        let (a, b) = (mesh(11), mesh(11));
        check_indices(&a);
        assert!(a.triangle_count() > 0);
        assert_eq!(a.points, b.points);
        assert_eq!(a.triangles, b.triangles);
    }
}
