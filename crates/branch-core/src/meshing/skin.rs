use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::algorithms::polygon_sides;
use crate::growing::{Branch, BranchId, BranchTree};
use crate::utils::{approx_eq, inverse_lerp, lerp};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuilderType {
    #[default]
    Default,
    Shape,
    Trunk,
    Welding,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SegmentType {
    BeginCap,
    Begin,
    Middle,
    End,
    EndCap,
}

/// Interval of a skin, either handled by one builder or occupied by one branch of the chain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SkinRange {
    pub from: f32,
    pub to: f32,
    /// end of the bottom cap, relative to the range
    pub bottom_cap: f32,
    /// start of the top cap, relative to the range
    pub top_cap: f32,
    pub subdivisions: usize,
    pub builder: BuilderType,
    pub branch: Option<BranchId>,
    pub shape: Option<usize>,
}

impl SkinRange {
    pub fn new(from: f32, to: f32, builder: BuilderType) -> Self {
        Self {
            from,
            to,
            bottom_cap: 0.,
            top_cap: 1.,
            subdivisions: 1,
            builder,
            branch: None,
            shape: None,
        }
    }

    pub fn contains(&self, position: f32) -> bool {
        position >= self.from && position <= self.to
    }

    /// position relative to the range
    pub fn local(&self, position: f32) -> f32 {
        inverse_lerp(self.from, self.to, position)
    }
}

/// One sampled cross-section, before ring emission.
#[derive(Clone, Debug)]
pub struct SkinSegment {
    pub branch: BranchId,
    pub center: Vec3,
    pub direction: Vec3,
    pub normal: Vec3,
    pub sides: usize,
    pub segment_type: SegmentType,
    pub girth: f32,
    /// position on the branch
    pub position: f32,
    pub position_at_skin: f32,
    pub builder: BuilderType,
    /// first vertex of the emitted ring in the tree mesh
    pub vertex_start: Option<usize>,
    pub radials: Vec<f32>,
}

/// A branch and its chain of follow-ups, parameterized as one tube from 0 to 1.
#[derive(Clone, Debug)]
pub struct BranchSkin {
    id: BranchId,
    level: usize,
    length: f32,
    length_offset: f32,
    hierarchy_level: f32,
    is_trunk: bool,
    sides_range: (usize, usize),
    avg_girth_range: (f32, f32),
    ranges: Vec<SkinRange>,
    branch_ranges: Vec<SkinRange>,
    relevant_positions: Vec<f32>,
    relevant_priorities: Vec<u8>,
    segments: Vec<SkinSegment>,
}

impl BranchSkin {
    pub fn new(tree: &BranchTree, first: BranchId, level: usize, length_offset: f32, hierarchy_level: f32) -> Self {
        let chain = tree.follow_up_chain(first);
        let length: f32 = chain.iter().map(|&b| tree.branch(b).length()).sum();
        let mut branch_ranges = Vec::with_capacity(chain.len());
        let mut consumed = 0.;
        for (i, &b) in chain.iter().enumerate() {
            let (from, to) = if length > 0. {
                let from = consumed / length;
                consumed += tree.branch(b).length();
                (from, consumed / length)
            } else {
                (i as f32 / chain.len() as f32, (i + 1) as f32 / chain.len() as f32)
            };
            branch_ranges.push(SkinRange {
                branch: Some(b),
                ..SkinRange::new(from, to, BuilderType::Default)
            });
        }
        if let Some(last) = branch_ranges.last_mut() {
            last.to = 1.;
        }
        Self {
            id: first,
            level,
            length,
            length_offset,
            hierarchy_level,
            is_trunk: tree.branch(first).is_trunk(),
            sides_range: (3, 3),
            avg_girth_range: (0., 0.),
            ranges: Vec::new(),
            branch_ranges,
            relevant_positions: Vec::new(),
            relevant_priorities: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn with_sides(mut self, min_sides: usize, max_sides: usize, min_avg_girth: f32, max_avg_girth: f32) -> Self {
        self.sides_range = (min_sides, max_sides);
        self.avg_girth_range = (min_avg_girth, max_avg_girth);
        self
    }

    /// id of the first branch of the chain
    pub fn id(&self) -> BranchId {
        self.id
    }
    pub fn level(&self) -> usize {
        self.level
    }
    pub fn length(&self) -> f32 {
        self.length
    }
    pub fn length_offset(&self) -> f32 {
        self.length_offset
    }
    pub fn hierarchy_level(&self) -> f32 {
        self.hierarchy_level
    }
    pub fn is_trunk(&self) -> bool {
        self.is_trunk
    }
    pub fn min_sides(&self) -> usize {
        self.sides_range.0
    }
    pub fn max_sides(&self) -> usize {
        self.sides_range.1
    }

    /// side count of a plain ring with this girth
    pub fn default_sides(&self, girth: f32) -> usize {
        let (min_sides, max_sides) = self.sides_range;
        let (min_girth, max_girth) = self.avg_girth_range;
        polygon_sides(min_sides, max_sides, girth, min_girth, max_girth)
    }

    pub fn branches(&self) -> impl Iterator<Item = BranchId> + '_ {
        self.branch_ranges.iter().filter_map(|r| r.branch)
    }

    pub fn branch_ranges(&self) -> &[SkinRange] {
        &self.branch_ranges
    }

    pub fn branch_range(&self, branch: BranchId) -> Option<&SkinRange> {
        self.branch_ranges.iter().find(|r| r.branch == Some(branch))
    }

    /// builder ranges, sorted by start
    pub fn ranges(&self) -> &[SkinRange] {
        &self.ranges
    }

    pub fn range(&self, index: usize) -> Option<&SkinRange> {
        self.ranges.get(index)
    }

    pub fn add_range(&mut self, range: SkinRange) {
        self.ranges.push(range);
        self.ranges.sort_by(|a, b| a.from.total_cmp(&b.from));
    }

    /// first builder range containing `position`, with the position relative to it
    pub fn range_position(&self, position: f32) -> Option<(usize, f32)> {
        self.ranges
            .iter()
            .position(|r| r.contains(position))
            .map(|i| (i, self.ranges[i].local(position)))
    }

    /// Builder handling `position` and whether the position sits on the end of its range.
    /// Positions outside every range use the default builder.
    pub fn builder_at(&self, position: f32, inclusive_end: bool) -> (BuilderType, bool) {
        for range in &self.ranges {
            let within = if inclusive_end {
                range.contains(position)
            } else {
                position >= range.from && position < range.to
            };
            if within || approx_eq(position, range.from) || approx_eq(position, range.to) {
                return (range.builder, approx_eq(position, range.to));
            }
        }
        (BuilderType::Default, false)
    }

    /// Branch of the chain at a skin position, and the position on that branch.
    pub fn branch_at(&self, position: f32) -> (BranchId, f32) {
        let position = position.clamp(0., 1.);
        let range = self
            .branch_ranges
            .iter()
            .find(|r| position <= r.to)
            .or(self.branch_ranges.last());
        match range {
            Some(r) => (r.branch.unwrap_or(self.id), r.local(position)),
            None => (self.id, position),
        }
    }

    /// skin position of a position on one branch of the chain
    pub fn skin_position(&self, branch: BranchId, position: f32) -> Option<f32> {
        self.branch_range(branch).map(|r| lerp(r.from, r.to, position))
    }

    fn at<'a>(&self, tree: &'a BranchTree, position: f32) -> (&'a Branch, f32) {
        let (id, local) = self.branch_at(position);
        (tree.branch(id), local)
    }

    pub fn point_at(&self, tree: &BranchTree, position: f32) -> Vec3 {
        let (branch, local) = self.at(tree, position);
        branch.point_at(local)
    }

    pub fn direction_at(&self, tree: &BranchTree, position: f32) -> Vec3 {
        let (branch, local) = self.at(tree, position);
        branch.direction_at(local)
    }

    pub fn normal_at(&self, tree: &BranchTree, position: f32) -> Vec3 {
        let (branch, local) = self.at(tree, position);
        branch.normal_at(local)
    }

    pub fn girth_at(&self, tree: &BranchTree, position: f32) -> f32 {
        let (branch, local) = self.at(tree, position);
        branch.girth_at(local)
    }

    fn length_to_position(&self, length: f32) -> f32 {
        if self.length > 0. {
            length / self.length
        } else {
            0.
        }
    }

    pub fn point_at_length(&self, tree: &BranchTree, length: f32) -> Vec3 {
        self.point_at(tree, self.length_to_position(length))
    }

    pub fn girth_at_length(&self, tree: &BranchTree, length: f32) -> f32 {
        self.girth_at(tree, self.length_to_position(length))
    }

    /// Records a position the sampling must hit exactly.
    ///
    /// Positions at the ends, or whose `range` window leaves [0, 1], are rejected.
    /// A position within half a range of an existing one is averaged with it on equal
    /// priority, replaces it on higher priority and is dropped on lower priority.
    pub fn add_relevant_position(&mut self, position: f32, range: f32, priority: u8) -> bool {
        if position <= 0. || position >= 1. {
            return false;
        }
        let (min, max) = (position - range / 2., position + range / 2.);
        if min < 0. || max > 1. {
            return false;
        }
        let candidate = self.relevant_positions.iter().position(|p| *p >= min && *p <= max);
        match candidate {
            None => {
                let index = self.relevant_positions.partition_point(|p| *p < position);
                self.relevant_positions.insert(index, position);
                self.relevant_priorities.insert(index, priority);
            }
            Some(i) if self.relevant_priorities[i] == priority => {
                self.relevant_positions[i] = (self.relevant_positions[i] + position) / 2.;
            }
            Some(i) if priority > self.relevant_priorities[i] => {
                self.relevant_positions[i] = position;
                self.relevant_priorities[i] = priority;
            }
            Some(_) => {}
        }
        true
    }

    pub fn relevant_positions(&self) -> &[f32] {
        &self.relevant_positions
    }

    /// Relevant positions falling on `branch` with a priority up to `max_priority`,
    /// relative to the branch and strictly inside it.
    pub fn branch_relevant_positions(&self, branch: BranchId, max_priority: u8) -> Vec<f32> {
        let Some(range) = self.branch_range(branch) else {
            return Vec::new();
        };
        let mut result: Vec<f32> = self
            .relevant_positions
            .iter()
            .zip(self.relevant_priorities.iter())
            .filter(|(p, priority)| range.contains(**p) && **priority <= max_priority)
            .map(|(p, _)| range.local(*p))
            .filter(|p| *p > 0. && *p < 1.)
            .collect();
        result.sort_by(f32::total_cmp);
        result
    }

    pub fn add_segment(&mut self, segment: SkinSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[SkinSegment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [SkinSegment] {
        &mut self.segments
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn chain() -> (BranchTree, BranchSkin) {
        let mut tree = BranchTree::new();
        let trunk = tree.add_root(Branch::new().with_length(6.));
        let next = tree.attach(trunk, Branch::new().with_length(2.).at(1.)).unwrap();
        tree.attach(next, Branch::new().with_length(2.).at(1.)).unwrap();
        tree.attach(trunk, Branch::new().with_length(3.).towards(Vec3::X).at(0.5)).unwrap();
        tree.update().unwrap();
        let skin = BranchSkin::new(&tree, trunk, 0, 0., 0.);
        (tree, skin)
    }

    #[test]
    fn chain_ranges() {
        let (_, skin) = chain();
        assert_abs_diff_eq!(skin.length(), 10., epsilon = 1e-3);
        let ranges = skin.branch_ranges();
        assert_eq!(ranges.len(), 3);
        assert_abs_diff_eq!(ranges[0].to, 0.6, epsilon = 1e-3);
        assert_abs_diff_eq!(ranges[1].to, 0.8, epsilon = 1e-3);
        assert_eq!(ranges[2].to, 1.);
        assert!(skin.is_trunk());
    }

    #[test]
    fn positions_translate_both_ways() {
        let (tree, skin) = chain();
        let (branch, local) = skin.branch_at(0.7);
        assert_eq!(branch, 1);
        assert_abs_diff_eq!(local, 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(skin.skin_position(1, 0.5).unwrap(), 0.7, epsilon = 1e-3);
        assert!(skin.skin_position(3, 0.5).is_none());
        assert_abs_diff_eq!(skin.point_at(&tree, 0.7).z, 7., epsilon = 1e-2);
        assert_abs_diff_eq!(skin.point_at_length(&tree, 3.).z, 3., epsilon = 1e-2);
    }

    #[test]
    fn relevant_positions_merge_by_priority() {
        let (_, mut skin) = chain();
        assert!(!skin.add_relevant_position(0., 0.01, 0));
        assert!(!skin.add_relevant_position(0.02, 0.1, 0));
        assert!(skin.add_relevant_position(0.5, 0.1, 0));
        assert!(skin.add_relevant_position(0.3, 0.1, 0));
        assert_eq!(skin.relevant_positions(), &[0.3, 0.5]);

        skin.add_relevant_position(0.52, 0.1, 0);
        assert_abs_diff_eq!(skin.relevant_positions()[1], 0.51, epsilon = 1e-6);
        skin.add_relevant_position(0.53, 0.1, 2);
        assert_eq!(skin.relevant_positions()[1], 0.53);
        skin.add_relevant_position(0.54, 0.1, 1);
        assert_eq!(skin.relevant_positions(), &[0.3, 0.53]);
    }

    #[test]
    fn relevant_positions_per_branch() {
        let (_, mut skin) = chain();
        skin.add_relevant_position(0.3, 0.01, 0);
        skin.add_relevant_position(0.7, 0.01, 2);
        skin.add_relevant_position(0.9, 0.01, 0);
        let on_trunk = skin.branch_relevant_positions(0, 3);
        assert_eq!(on_trunk.len(), 1);
        assert_abs_diff_eq!(on_trunk[0], 0.5, epsilon = 1e-3);
        assert!(skin.branch_relevant_positions(1, 1).is_empty());
        assert_eq!(skin.branch_relevant_positions(1, 2).len(), 1);
    }

    #[test]
    fn builder_lookup() {
        let (_, mut skin) = chain();
        skin.add_range(SkinRange::new(0.2, 0.4, BuilderType::Shape));
        skin.add_range(SkinRange::new(0., 0.1, BuilderType::Trunk));
        assert_eq!(skin.ranges()[0].builder, BuilderType::Trunk);
        assert_eq!(skin.builder_at(0.05, true), (BuilderType::Trunk, false));
        assert_eq!(skin.builder_at(0.4, true), (BuilderType::Shape, true));
        assert_eq!(skin.builder_at(0.6, true), (BuilderType::Default, false));
        let (index, local) = skin.range_position(0.3).unwrap();
        assert_eq!(index, 1);
        assert_abs_diff_eq!(local, 0.5, epsilon = 1e-5);
    }
}
