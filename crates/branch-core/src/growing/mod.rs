use glam::{Quat, Vec3};
use smallvec::SmallVec;
#[cfg(feature = "bevy")]
use bevy_gizmos::prelude::Gizmos;
#[cfg(feature = "bevy")]
use bevy_color::Color;
#[cfg(feature = "bevy")]
use bevy_math::Isometry3d;

use crate::curve::{ControlNode, Curve, CurveSample, HandleStyle, NormalMode, ResponseCurve};
use crate::error::{GeometryError, GeometryResult};
use crate::utils::{approx_eq, lerp, project_on_plane};

pub mod generation;
pub mod sprout;

pub use sprout::{Sprout, SproutMode};

/// index of a branch in its [`BranchTree`]
pub type BranchId = usize;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub point: Vec3,
}

impl Plane {
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p - self.point)
    }
}

#[derive(Clone, Debug)]
pub struct Branch {
    pub min_girth: f32,
    pub max_girth: f32,
    pub max_length: f32,
    pub length_factor: f32,
    pub girth_scale: f32,
    /// maps the inverted girth factor to a girth blend; inherited when `None`
    pub girth_curve: Option<ResponseCurve>,
    /// growth direction of a straight branch, in branch-local space
    pub direction: Vec3,
    /// fixed offset added to the attachment point
    pub offset: Vec3,
    pub roll_angle: f32,
    pub is_broken: bool,
    pub break_position: f32,
    /// structural root growing below the trunk base; selects the root welding settings
    pub underground: bool,
    pub sprouts: Vec<Sprout>,

    id: BranchId,
    parent: Option<BranchId>,
    children: SmallVec<[BranchId; 4]>,
    curve: Curve,
    custom_curve: bool,
    position: f32,
    surface_offset: Vec3,
    is_trunk: bool,
    length_processed: bool,
    girth_factor_base: f32,
    girth_factor_top: f32,
    resolved_girth_curve: ResponseCurve,
    offspring_levels: usize,
    level: usize,
    hierarchy_level: f32,
    position_from_branch: Vec3,
    position_from_root: Vec3,
    is_follow_up: bool,
    follow_up: Option<BranchId>,
}

impl Default for Branch {
    fn default() -> Self {
        Self::new()
    }
}

fn straight_nodes(direction: Vec3, length: f32) -> Vec<ControlNode> {
    let end = direction.normalize_or_zero() * length;
    let h = end / 3.;
    vec![
        ControlNode::with_handles(Vec3::ZERO, -h, h, HandleStyle::Auto),
        ControlNode::with_handles(end, -h, h, HandleStyle::Auto),
    ]
}

impl Branch {
    pub fn new() -> Self {
        let curve = Curve::line(Vec3::ZERO, Vec3::splat(2.));
        Self {
            min_girth: 0.05,
            max_girth: 0.25,
            max_length: 1.,
            length_factor: 1.,
            girth_scale: 1.,
            girth_curve: None,
            direction: Vec3::Z,
            offset: Vec3::ZERO,
            roll_angle: 0.,
            is_broken: false,
            break_position: 0.5,
            underground: false,
            sprouts: Vec::new(),
            id: 0,
            parent: None,
            children: SmallVec::new(),
            curve,
            custom_curve: false,
            position: 1.,
            surface_offset: Vec3::ZERO,
            is_trunk: false,
            length_processed: false,
            girth_factor_base: 0.,
            girth_factor_top: 1.,
            resolved_girth_curve: ResponseCurve::linear(),
            offspring_levels: 0,
            level: 0,
            hierarchy_level: 0.,
            position_from_branch: Vec3::ZERO,
            position_from_root: Vec3::ZERO,
            is_follow_up: false,
            follow_up: None,
        }
    }

    pub fn with_length(mut self, max_length: f32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_girth(mut self, min_girth: f32, max_girth: f32) -> Self {
        self.min_girth = min_girth;
        self.max_girth = max_girth;
        self
    }

    pub fn towards(mut self, direction: Vec3) -> Self {
        self.direction = direction.normalize_or_zero();
        self
    }

    /// attachment position on the parent, in [0, 1]
    pub fn at(mut self, position: f32) -> Self {
        self.position = position.clamp(0., 1.);
        self
    }

    pub fn with_roll(mut self, roll_angle: f32) -> Self {
        self.roll_angle = roll_angle;
        self
    }

    /// Uses `nodes` as the branch centerline. It is scaled to `max_length * length_factor`
    /// on the next length update.
    pub fn with_curve_nodes(mut self, nodes: Vec<ControlNode>) -> GeometryResult<Self> {
        self.curve = Curve::from_nodes(nodes, false)?;
        self.custom_curve = true;
        Ok(self)
    }

    pub fn id(&self) -> BranchId {
        self.id
    }
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }
    pub fn children(&self) -> &[BranchId] {
        &self.children[..]
    }
    pub fn curve(&self) -> &Curve {
        &self.curve
    }
    pub fn position(&self) -> f32 {
        self.position
    }
    pub fn length(&self) -> f32 {
        self.curve.length()
    }
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
    pub fn is_trunk(&self) -> bool {
        self.is_trunk
    }
    pub fn is_follow_up(&self) -> bool {
        self.is_follow_up
    }
    pub fn follow_up(&self) -> Option<BranchId> {
        self.follow_up
    }
    pub fn offspring_levels(&self) -> usize {
        self.offspring_levels
    }
    pub fn level(&self) -> usize {
        self.level
    }
    pub fn hierarchy_level(&self) -> f32 {
        self.hierarchy_level
    }
    pub fn girth_factors(&self) -> (f32, f32) {
        (self.girth_factor_base, self.girth_factor_top)
    }
    pub fn position_from_root(&self) -> Vec3 {
        self.position_from_root
    }
    pub fn position_from_branch(&self) -> Vec3 {
        self.position_from_branch
    }
    /// offset to the parent surface, set by the mesh builders
    pub fn surface_offset(&self) -> Vec3 {
        self.surface_offset
    }

    /// sample of the centerline in tree space
    pub fn sample_at(&self, position: f32, exact: bool) -> CurveSample {
        let mut sample = self.curve.sample_at(position, exact);
        sample.position += self.position_from_root;
        sample.girth = self.girth_at(position);
        sample
    }

    pub fn point_at(&self, position: f32) -> Vec3 {
        self.curve.sample_at(position, false).position + self.position_from_root
    }

    pub fn direction_at(&self, position: f32) -> Vec3 {
        self.curve.sample_at(position, false).forward
    }

    pub fn normal_at(&self, position: f32) -> Vec3 {
        self.curve.sample_at(position, false).normal
    }

    pub fn point_at_length(&self, length: f32) -> Vec3 {
        self.point_at(self.length_to_position(length))
    }

    pub fn girth_at_length(&self, length: f32) -> f32 {
        self.girth_at(self.length_to_position(length))
    }

    fn length_to_position(&self, length: f32) -> f32 {
        let l = self.length();
        if l > 0. {
            length / l
        } else {
            0.
        }
    }

    pub fn girth_factor_at(&self, position: f32) -> f32 {
        (self.girth_factor_top - self.girth_factor_base) * position + self.girth_factor_base
    }

    pub fn girth_at(&self, position: f32) -> f32 {
        let factor = self.girth_factor_at(position.clamp(0., 1.));
        let blend = self.resolved_girth_curve.evaluate(1. - factor);
        let girth = lerp(self.min_girth, self.max_girth, blend).clamp(self.min_girth, self.max_girth);
        girth * self.girth_scale
    }

    fn forward_at_base(&self) -> Vec3 {
        self.curve.sample_at(0., true).forward
    }
}

#[derive(Clone, Debug, Default)]
pub struct BranchTree {
    branches: Vec<Branch>,
    roots: Vec<BranchId>,
}

impl BranchTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }
    pub fn roots(&self) -> &[BranchId] {
        &self.roots
    }
    pub fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id]
    }
    pub fn get(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(id)
    }
    pub fn get_mut(&mut self, id: BranchId) -> Option<&mut Branch> {
        self.branches.get_mut(id)
    }
    pub fn branches(&self) -> impl ExactSizeIterator<Item = &Branch> {
        self.branches.iter()
    }
    pub fn parent(&self, id: BranchId) -> Option<BranchId> {
        self.branches[id].parent
    }
    pub fn children(&self, id: BranchId) -> &[BranchId] {
        self.branches[id].children()
    }

    /// Adds a trunk. Its `offset` is its origin in tree space.
    pub fn add_root(&mut self, mut branch: Branch) -> BranchId {
        let id = self.branches.len();
        branch.id = id;
        branch.parent = None;
        branch.children.clear();
        branch.is_trunk = true;
        branch.level = 0;
        branch.hierarchy_level = 0.;
        self.branches.push(branch);
        self.roots.push(id);
        id
    }

    /// Adds `branch` as a new child of `parent`. A new branch has no descendants,
    /// so this cannot create a cycle.
    pub fn attach(&mut self, parent: BranchId, mut branch: Branch) -> GeometryResult<BranchId> {
        if parent >= self.branches.len() {
            return Err(GeometryError::UnknownBranch(parent));
        }
        let id = self.branches.len();
        branch.id = id;
        branch.parent = Some(parent);
        branch.children.clear();
        branch.offspring_levels = 0;
        branch.level = self.branches[parent].level + 1;
        branch.hierarchy_level = self.branches[parent].hierarchy_level + branch.position;
        self.branches.push(branch);
        self.branches[parent].children.push(id);
        self.propagate_offspring(id);
        self.place(id);
        Ok(id)
    }

    /// Moves `id` under `new_parent`. Fails when `new_parent` is `id` or one of its descendants.
    pub fn reparent(&mut self, id: BranchId, new_parent: BranchId) -> GeometryResult<()> {
        if id >= self.branches.len() {
            return Err(GeometryError::UnknownBranch(id));
        }
        if new_parent >= self.branches.len() {
            return Err(GeometryError::UnknownBranch(new_parent));
        }
        if id == new_parent || self.descendants(id).contains(&new_parent) {
            return Err(GeometryError::InvalidParent { child: id, parent: new_parent });
        }
        match self.branches[id].parent {
            Some(old) => {
                self.branches[old].children.retain(|c| *c != id);
                self.recompute_offspring(old);
                self.elect_follow_up(old);
            }
            None => self.roots.retain(|r| *r != id),
        }
        self.branches[id].parent = Some(new_parent);
        self.branches[new_parent].children.push(id);
        self.propagate_offspring(id);
        self.place(id);
        Ok(())
    }

    /// Changes the attachment position. Moving away from the tip drops the follow-up role.
    pub fn set_position(&mut self, id: BranchId, position: f32) -> GeometryResult<()> {
        let branch = self.branches.get_mut(id).ok_or(GeometryError::UnknownBranch(id))?;
        branch.position = position.clamp(0., 1.);
        if let Some(parent) = branch.parent {
            self.elect_follow_up(parent);
            self.place(id);
        }
        Ok(())
    }

    pub(crate) fn set_surface_offset(&mut self, id: BranchId, offset: Vec3) {
        self.branches[id].surface_offset = offset;
    }

    fn place(&mut self, id: BranchId) {
        self.update_position_from(id);
    }

    fn recompute_offspring(&mut self, id: BranchId) {
        let mut current = Some(id);
        while let Some(c) = current {
            let levels = self.branches[c]
                .children
                .iter()
                .map(|&child| self.branches[child].offspring_levels + 1)
                .max()
                .unwrap_or(0);
            self.branches[c].offspring_levels = levels;
            current = self.branches[c].parent;
        }
    }

    /// Each ancestor keeps the deepest offspring level it has seen, and re-elects its follow-up.
    fn propagate_offspring(&mut self, id: BranchId) {
        let mut child = id;
        while let Some(parent) = self.branches[child].parent {
            let depth = self.branches[child].offspring_levels + 1;
            let p = &mut self.branches[parent];
            p.offspring_levels = p.offspring_levels.max(depth);
            self.elect_follow_up(parent);
            child = parent;
        }
    }

    /// The follow-up is the child at position 1 with the most offspring levels, first one on ties.
    fn elect_follow_up(&mut self, parent: BranchId) {
        let mut chosen: Option<(BranchId, usize)> = None;
        for &c in self.branches[parent].children.iter() {
            let child = &self.branches[c];
            if !approx_eq(child.position, 1.) {
                continue;
            }
            if chosen.map_or(true, |(_, best)| child.offspring_levels > best) {
                chosen = Some((c, child.offspring_levels));
            }
        }
        let chosen = chosen.map(|(c, _)| c);
        self.branches[parent].follow_up = chosen;
        let parent_is_trunk = self.branches[parent].is_trunk;
        let children = self.branches[parent].children.clone();
        for c in children {
            let is_follow_up = Some(c) == chosen;
            self.branches[c].is_follow_up = is_follow_up;
            self.branches[c].is_trunk = parent_is_trunk && is_follow_up;
        }
    }

    /// length, girth, position, normals and sprouts for the whole tree, in that order
    pub fn update(&mut self) -> GeometryResult<()> {
        for root in self.roots.clone() {
            self.update_length(root)?;
        }
        for root in self.roots.clone() {
            self.update_girth(root);
        }
        for root in self.roots.clone() {
            self.update_position_from(root);
        }
        for root in self.roots.clone() {
            self.recalculate_normals(root);
        }
        self.update_sprouts();
        Ok(())
    }

    /// Sets each branch length to `max_length * length_factor`, once per branch.
    pub fn update_length(&mut self, id: BranchId) -> GeometryResult<()> {
        let branch = &mut self.branches[id];
        if !branch.length_processed {
            let length = branch.max_length * branch.length_factor;
            if branch.custom_curve {
                let current = branch.curve.length();
                let scale = if current > 0. { length / current } else { 1. };
                let origin = branch.curve.nodes()[0].position;
                branch.curve.edit(|nodes| {
                    for n in nodes.iter_mut() {
                        n.position = origin + (n.position - origin) * scale;
                        n.handle1 *= scale;
                        n.handle2 *= scale;
                    }
                })?;
            } else {
                let nodes = straight_nodes(branch.direction, length);
                branch.curve.edit(|n| *n = nodes)?;
            }
            branch.length_processed = true;
        }
        for c in self.branches[id].children.clone() {
            self.update_length(c)?;
        }
        Ok(())
    }

    /// Marks the whole tree for a new length computation on the next update.
    pub fn reset_lengths(&mut self) {
        for b in self.branches.iter_mut() {
            b.length_processed = false;
        }
    }

    pub fn update_girth(&mut self, id: BranchId) {
        let (base, inherited_curve, inherited_scale) = match self.branches[id].parent {
            None => (0., None, None),
            Some(p) => {
                let parent = &self.branches[p];
                let base = parent.girth_factor_at(self.branches[id].position);
                let scale = self.branches[id].is_follow_up.then_some(parent.girth_scale);
                (base, Some(parent.resolved_girth_curve.clone()), scale)
            }
        };
        let branch = &mut self.branches[id];
        let offspring = branch.offspring_levels as f32;
        if branch.parent.is_none() {
            let level = branch.level as f32;
            branch.girth_factor_base = 0.;
            branch.girth_factor_top = (level + 1.) / (level + offspring + 1.);
        } else {
            branch.girth_factor_base = base;
            branch.girth_factor_top = (1. - base) / (offspring + 1.) + base;
        }
        if let Some(scale) = inherited_scale {
            branch.girth_scale = scale;
        }
        branch.resolved_girth_curve = branch
            .girth_curve
            .clone()
            .or(inherited_curve)
            .unwrap_or_else(ResponseCurve::linear);
        for c in self.branches[id].children.clone() {
            self.update_girth(c);
        }
    }

    /// absolute positions, levels and trunk flags, from `id` downwards
    pub fn update_position_from(&mut self, id: BranchId) {
        let (attachment, parent_root, parent_level, parent_hierarchy) = match self.branches[id].parent {
            None => (Vec3::ZERO, Vec3::ZERO, None, 0.),
            Some(p) => {
                let parent = &self.branches[p];
                (
                    parent.curve.sample_at(self.branches[id].position, false).position,
                    parent.position_from_root,
                    Some(parent.level),
                    parent.hierarchy_level,
                )
            }
        };
        let branch = &mut self.branches[id];
        let local_origin = branch.curve.nodes()[0].position;
        branch.position_from_branch = attachment - local_origin + branch.offset + branch.surface_offset;
        branch.position_from_root = parent_root + branch.position_from_branch;
        match parent_level {
            None => {
                branch.level = 0;
                branch.hierarchy_level = 0.;
                branch.is_trunk = true;
            }
            Some(level) => {
                branch.level = level + 1;
                branch.hierarchy_level = parent_hierarchy + branch.position;
            }
        }
        if !self.branches[id].children.is_empty() {
            self.elect_follow_up(id);
        }
        for c in self.branches[id].children.clone() {
            self.update_position_from(c);
        }
    }

    pub fn recalculate_normals(&mut self, id: BranchId) {
        let mode = match self.branches[id].parent {
            _ if self.branches[id].is_trunk && self.branches[id].is_root() => {
                let roll = Quat::from_rotation_z(self.branches[id].roll_angle);
                NormalMode::ReferenceVector { forward: Vec3::Z, normal: roll * Vec3::Y }
            }
            Some(p) if self.branches[id].is_follow_up => {
                let last = self.branches[p].curve.sample_at(1., true);
                NormalMode::ReferenceVector { forward: last.forward, normal: last.normal }
            }
            Some(p) => {
                let branch = &self.branches[id];
                let forward = branch.forward_at_base();
                let parent_dir = self.branches[p].direction_at(branch.position);
                let normal = project_on_plane(parent_dir, forward).normalize_or_zero();
                let normal = if normal == Vec3::ZERO { forward.any_orthonormal_vector() } else { normal };
                NormalMode::ReferenceVector { forward, normal }
            }
            None => NormalMode::default(),
        };
        self.branches[id].curve.set_normal_mode(mode);
        for c in self.branches[id].children.clone() {
            self.recalculate_normals(c);
        }
    }

    pub fn update_sprouts(&mut self) {
        let offspring_level = self.offspring_level() as f32;
        for id in 0..self.branches.len() {
            let mut sprouts = std::mem::take(&mut self.branches[id].sprouts);
            for s in sprouts.iter_mut() {
                s.calculate_vectors(&self.branches[id], offspring_level);
            }
            self.branches[id].sprouts = sprouts;
        }
    }

    /// Point on the trunk the branch ultimately grows from.
    pub fn trunk_point(&self, id: BranchId, position: f32) -> Vec3 {
        let branch = &self.branches[id];
        match branch.parent {
            Some(p) if !branch.is_trunk => self.trunk_point(p, branch.position),
            _ => branch.point_at(position),
        }
    }

    /// plane through the branch origin, oriented by the parent normal rolled around the parent direction
    pub fn parent_plane(&self, id: BranchId) -> Option<Plane> {
        let branch = &self.branches[id];
        let parent = &self.branches[branch.parent?];
        let axis = parent.direction_at(branch.position);
        let normal = Quat::from_axis_angle(axis, branch.roll_angle) * parent.normal_at(branch.position);
        Some(Plane {
            normal,
            point: branch.point_at(0.),
        })
    }

    pub fn descendants(&self, id: BranchId) -> Vec<BranchId> {
        let mut result = Vec::new();
        let mut stack: Vec<BranchId> = self.branches[id].children.to_vec();
        while let Some(c) = stack.pop() {
            result.push(c);
            stack.extend(self.branches[c].children.iter().copied());
        }
        result
    }

    /// the branch followed by its chain of follow-ups
    pub fn follow_up_chain(&self, id: BranchId) -> Vec<BranchId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(next) = self.branches[current].follow_up {
            chain.push(next);
            current = next;
        }
        chain
    }

    fn max_length_from(&self, id: BranchId) -> f32 {
        let branch = &self.branches[id];
        let own = branch.length();
        branch
            .children
            .iter()
            .map(|&c| self.branches[c].position * own + self.max_length_from(c))
            .fold(own, f32::max)
    }

    /// longest root-to-tip length
    pub fn max_length(&self) -> f32 {
        self.roots.iter().map(|&r| self.max_length_from(r)).fold(0., f32::max)
    }

    pub fn offspring_level(&self) -> usize {
        self.roots
            .iter()
            .map(|&r| self.branches[r].offspring_levels)
            .max()
            .map_or(0, |l| l + 1)
    }
}

impl crate::VisualDebug for BranchTree {
    type Flags = bool;
    #[cfg(feature = "bevy")]
    fn debug(&self, gizmos: &mut Gizmos, debug_flags: Self::Flags) {
        if debug_flags {
            for branch in self.branches() {
                let points = branch.curve().points();
                for w in points.windows(2) {
                    gizmos.line(
                        w[0].position + branch.position_from_root(),
                        w[1].position + branch.position_from_root(),
                        Color::srgb(0.1, 0.1, 0.1),
                    );
                }
                let base = branch.sample_at(0., false);
                let isometry = Isometry3d {
                    translation: base.position.into(),
                    rotation: Quat::from_rotation_arc(Vec3::Z, base.forward),
                };
                gizmos.circle(isometry, base.girth, Color::srgb(0., 0.8, 0.5));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn trunk_with_child() -> (BranchTree, BranchId, BranchId) {
        let mut tree = BranchTree::new();
        let trunk = tree.add_root(Branch::new().with_length(10.).with_girth(0.1, 0.5));
        let child = tree
            .attach(
                trunk,
                Branch::new()
                    .with_length(4.)
                    .with_girth(0.1, 0.5)
                    .towards(Vec3::X)
                    .at(0.5),
            )
            .unwrap();
        tree.update().unwrap();
        (tree, trunk, child)
    }

    #[test]
    fn lengths_and_positions() {
        let (tree, trunk, child) = trunk_with_child();
        assert_abs_diff_eq!(tree.branch(trunk).length(), 10., epsilon = 1e-3);
        assert_abs_diff_eq!(tree.branch(child).length(), 4., epsilon = 1e-3);
        let origin = tree.branch(child).point_at(0.);
        assert_abs_diff_eq!(origin.distance(Vec3::new(0., 0., 5.)), 0., epsilon = 1e-3);
        let tip = tree.branch(child).point_at(1.);
        assert_abs_diff_eq!(tip.distance(Vec3::new(4., 0., 5.)), 0., epsilon = 1e-3);
        assert_abs_diff_eq!(tree.max_length(), 10., epsilon = 1e-3);
    }

    #[test]
    fn child_inherits_girth_factor() {
        let (tree, trunk, child) = trunk_with_child();
        let trunk = tree.branch(trunk);
        let child = tree.branch(child);
        assert_abs_diff_eq!(trunk.girth_factor_at(0.5), child.girth_factors().0, epsilon = 1e-6);
        assert_abs_diff_eq!(trunk.girth_at(0.5), child.girth_at(0.), epsilon = 1e-6);
        assert_abs_diff_eq!(trunk.girth_at(0.), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(child.girth_at(1.), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn girth_is_monotonic() {
        let (tree, trunk, _) = trunk_with_child();
        let trunk = tree.branch(trunk);
        let mut previous = f32::INFINITY;
        for i in 0..=20 {
            let g = trunk.girth_at(i as f32 / 20.);
            assert!(g <= previous);
            previous = g;
        }
    }

    #[test]
    fn follow_up_is_deepest_tip_child() {
        let mut tree = BranchTree::new();
        let root = tree.add_root(Branch::new());
        let shallow = tree.attach(root, Branch::new().at(1.)).unwrap();
        let deep = tree.attach(root, Branch::new().at(1.)).unwrap();
        let middle = tree.attach(root, Branch::new().at(1.)).unwrap();
        let d1 = tree.attach(deep, Branch::new().at(0.5)).unwrap();
        tree.attach(d1, Branch::new().at(0.5)).unwrap();
        tree.attach(middle, Branch::new().at(0.5)).unwrap();

        let follow_ups: Vec<_> = tree.children(root).iter().filter(|&&c| tree.branch(c).is_follow_up()).collect();
        assert_eq!(follow_ups, vec![&deep]);
        assert_eq!(tree.branch(root).follow_up(), Some(deep));
        assert!(!tree.branch(shallow).is_follow_up());
        assert!(tree.branch(deep).is_trunk());
        assert_eq!(tree.branch(root).offspring_levels(), 3);
    }

    #[test]
    fn moving_follow_up_away_from_tip() {
        let mut tree = BranchTree::new();
        let root = tree.add_root(Branch::new());
        let a = tree.attach(root, Branch::new().at(1.)).unwrap();
        let b = tree.attach(root, Branch::new().at(1.)).unwrap();
        assert_eq!(tree.branch(root).follow_up(), Some(a));
        tree.set_position(a, 0.4).unwrap();
        assert!(!tree.branch(a).is_follow_up());
        assert_eq!(tree.branch(root).follow_up(), Some(b));
        tree.set_position(b, 0.2).unwrap();
        assert_eq!(tree.branch(root).follow_up(), None);
    }

    #[test]
    fn follow_up_shares_girth_scale() {
        let mut tree = BranchTree::new();
        let mut root = Branch::new();
        root.girth_scale = 2.;
        let root = tree.add_root(root);
        let next = tree.attach(root, Branch::new().at(1.)).unwrap();
        tree.update().unwrap();
        assert_eq!(tree.branch(next).girth_scale, 2.);
        assert_abs_diff_eq!(tree.branch(root).girth_at(1.), tree.branch(next).girth_at(0.), epsilon = 1e-6);
    }

    #[test]
    fn reparent_rejects_cycles() {
        let mut tree = BranchTree::new();
        let root = tree.add_root(Branch::new());
        let a = tree.attach(root, Branch::new().at(0.5)).unwrap();
        let b = tree.attach(a, Branch::new().at(0.5)).unwrap();
        assert_eq!(
            tree.reparent(a, b),
            Err(GeometryError::InvalidParent { child: a, parent: b })
        );
        assert_eq!(tree.attach(42, Branch::new()), Err(GeometryError::UnknownBranch(42)));
        tree.reparent(b, root).unwrap();
        assert_eq!(tree.children(root), &[a, b]);
        assert_eq!(tree.branch(a).offspring_levels(), 0);
    }

    #[test]
    fn trunk_point_resolves_to_trunk() {
        let (tree, trunk, child) = trunk_with_child();
        let p = tree.trunk_point(child, 0.9);
        assert_abs_diff_eq!(p.distance(tree.branch(trunk).point_at(0.5)), 0., epsilon = 1e-4);
    }

    #[test]
    fn child_normal_faces_parent_direction() {
        let (tree, _, child) = trunk_with_child();
        let n = tree.branch(child).normal_at(0.);
        assert_abs_diff_eq!(n.distance(Vec3::Z), 0., epsilon = 1e-3);
        let plane = tree.parent_plane(child).unwrap();
        assert_abs_diff_eq!(plane.signed_distance(plane.point), 0.);
    }

    #[test]
    fn descendants_and_chain() {
        let mut tree = BranchTree::new();
        let root = tree.add_root(Branch::new());
        let a = tree.attach(root, Branch::new().at(1.)).unwrap();
        let b = tree.attach(a, Branch::new().at(1.)).unwrap();
        let c = tree.attach(a, Branch::new().at(0.3)).unwrap();
        let mut d = tree.descendants(root);
        d.sort();
        assert_eq!(d, vec![a, b, c]);
        assert_eq!(tree.follow_up_chain(root), vec![root, a, b]);
        assert_eq!(tree.offspring_level(), 3);
    }
}
