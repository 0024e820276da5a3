use glam::{Quat, Vec3};
use rand::{prelude::Distribution, Rng};
use serde::{Deserialize, Serialize};

use super::{Branch, BranchId, BranchTree, Sprout};
use crate::curve::{ControlNode, HandleStyle};
use crate::error::GeometryResult;
use crate::utils::random_range;

#[derive(Debug)]
struct ChildBranch {
    max_turn_angle: f32,
    min_position: f32,
    max_position: f32,
    length: f32,
    variability: f32,
}

/// attachment position, turn applied to the parent direction, roll and length
impl Distribution<(f32, Quat, f32, f32)> for ChildBranch {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (f32, Quat, f32, f32) {
        let position = if self.max_position > self.min_position {
            rng.gen_range(self.min_position..self.max_position)
        } else {
            self.min_position
        };
        let a: f32 = rng.gen_range(0.2 * self.max_turn_angle..=self.max_turn_angle);
        let c: f32 = rng.gen_range(0f32..std::f32::consts::TAU);
        let rot = Quat::from_rotation_z(c) * Quat::from_rotation_x(a) * Quat::from_rotation_z(-c);
        let l = self.length * rng.gen_range(1. - self.variability..=1. + self.variability);
        (position, rot, c, l)
    }
}

struct Continuation {
    max_zigzag_angle: f32,
}

impl Distribution<Quat> for Continuation {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Quat {
        let a: f32 = rng.gen_range(0f32..=self.max_zigzag_angle);
        let c: f32 = rng.gen_range(0f32..std::f32::consts::TAU);
        Quat::from_rotation_z(c) * Quat::from_rotation_x(a) * Quat::from_rotation_z(-c)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowConfig {
    pub trunk_count: usize,
    /// distance between trunk origins when there are several
    pub trunk_spacing: f32,
    pub trunk_length: f32,
    pub min_girth: f32,
    pub max_girth: f32,
    pub max_level: usize,
    pub min_children: usize,
    pub max_children: usize,
    pub min_child_position: f32,
    pub max_child_position: f32,
    pub length_decay: f32,
    pub length_variance: f32,
    pub max_turn_angle: f32,
    pub max_zigzag_angle: f32,
    /// lateral displacement of the middle node, relative to the branch length
    pub bend: f32,
    pub up_attraction_factor: f32,
    pub follow_up_probability: f32,
    pub break_probability: f32,
    pub sprouts_per_branch: usize,
}

impl Default for GrowConfig {
    fn default() -> Self {
        Self {
            trunk_count: 1,
            trunk_spacing: 1.,
            trunk_length: 6.,
            min_girth: 0.03,
            max_girth: 0.4,
            max_level: 3,
            min_children: 2,
            max_children: 4,
            min_child_position: 0.3,
            max_child_position: 0.9,
            length_decay: 0.55,
            length_variance: 0.2,
            max_turn_angle: 1.,
            max_zigzag_angle: 0.3,
            bend: 0.08,
            up_attraction_factor: 0.2,
            follow_up_probability: 0.7,
            break_probability: 0.,
            sprouts_per_branch: 0,
        }
    }
}

fn bent_nodes(config: &GrowConfig, rng: &mut impl Rng, direction: Vec3, length: f32) -> Vec<ControlNode> {
    let side = direction.any_orthonormal_vector();
    let lateral = Quat::from_axis_angle(direction, rng.gen_range(0f32..std::f32::consts::TAU)) * side;
    let middle = direction * length * 0.5 + lateral * length * random_range(rng, 0., config.bend);
    let end = direction * length;
    let h = direction * length / 6.;
    vec![
        ControlNode::with_handles(Vec3::ZERO, -h, h, HandleStyle::Auto),
        ControlNode::with_handles(middle, -h, h, HandleStyle::Auto),
        ControlNode::with_handles(end, -h, h, HandleStyle::Auto),
    ]
}

fn new_branch(config: &GrowConfig, rng: &mut impl Rng, direction: Vec3, length: f32) -> GeometryResult<Branch> {
    let mut branch = Branch::new()
        .with_length(length)
        .with_girth(config.min_girth, config.max_girth)
        .towards(direction)
        .with_curve_nodes(bent_nodes(config, rng, direction, length))?;
    for _ in 0..config.sprouts_per_branch {
        branch
            .sprouts
            .push(Sprout::new(rng.gen_range(0.1..1.), rng.gen_range(0f32..std::f32::consts::TAU)));
    }
    Ok(branch)
}

fn grow_children(
    config: &GrowConfig,
    rng: &mut impl Rng,
    tree: &mut BranchTree,
    id: BranchId,
    direction: Vec3,
    length: f32,
    level: usize,
) -> GeometryResult<()> {
    if level >= config.max_level {
        if rng.gen_range(0f32..1f32) < config.break_probability {
            if let Some(branch) = tree.get_mut(id) {
                branch.is_broken = true;
                branch.break_position = rng.gen_range(0.5..0.9);
            }
        }
        return Ok(());
    }
    let attract = |d: Vec3| d.lerp(Vec3::Z, config.up_attraction_factor).normalize_or(Vec3::Z);

    let dist = ChildBranch {
        max_turn_angle: config.max_turn_angle,
        min_position: config.min_child_position,
        max_position: config.max_child_position,
        length: length * config.length_decay,
        variability: config.length_variance,
    };
    let count = rng.gen_range(config.min_children..=config.max_children.max(config.min_children));
    for _ in 0..count {
        let (position, rotation, roll, child_length) = rng.sample(&dist);
        let child_direction = attract(rotation * direction);
        let child = new_branch(config, rng, child_direction, child_length)?
            .at(position)
            .with_roll(roll);
        let child = tree.attach(id, child)?;
        grow_children(config, rng, tree, child, child_direction, child_length, level + 1)?;
    }

    if rng.gen_range(0f32..1f32) < config.follow_up_probability {
        let turn = rng.sample(Continuation {
            max_zigzag_angle: config.max_zigzag_angle,
        });
        let next_direction = attract(turn * direction);
        let next_length = length * (1. + config.length_decay) * 0.5;
        let next = new_branch(config, rng, next_direction, next_length)?.at(1.);
        let next = tree.attach(id, next)?;
        grow_children(config, rng, tree, next, next_direction, next_length, level + 1)?;
    }
    Ok(())
}

/// Random hierarchy: bent trunks, lateral children along every branch and optional
/// follow-up continuations, fully updated.
pub fn grow_tree(config: &GrowConfig, rng: &mut impl Rng) -> GeometryResult<BranchTree> {
    let mut tree = BranchTree::new();
    let trunk_count = config.trunk_count.max(1);
    for i in 0..trunk_count {
        let origin = if trunk_count > 1 {
            let angle = std::f32::consts::TAU * i as f32 / trunk_count as f32;
            Vec3::new(angle.cos(), angle.sin(), 0.) * config.trunk_spacing
        } else {
            Vec3::ZERO
        };
        let direction = if trunk_count > 1 {
            (Vec3::Z + origin.normalize_or_zero() * 0.2).normalize()
        } else {
            Vec3::Z
        };
        let mut trunk = new_branch(config, rng, direction, config.trunk_length)?;
        trunk.offset = origin;
        let root = tree.add_root(trunk);
        grow_children(config, rng, &mut tree, root, direction, config.trunk_length, 0)?;
    }
    tree.update()?;
    log::debug!(
        "grown {} branches over {} levels",
        tree.branch_count(),
        tree.offspring_level()
    );
    Ok(tree)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn same_seed_same_tree() {
        let config = GrowConfig::default();
        let a = grow_tree(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = grow_tree(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a.branch_count(), b.branch_count());
        for (x, y) in a.branches().zip(b.branches()) {
            assert_eq!(x.point_at(1.), y.point_at(1.));
        }
    }

    #[test]
    fn respects_levels_and_lengths() {
        let config = GrowConfig {
            max_level: 2,
            ..Default::default()
        };
        let tree = grow_tree(&config, &mut StdRng::seed_from_u64(5)).unwrap();
        assert!(tree.branch_count() > 3);
        for b in tree.branches() {
            assert!(b.level() <= 2);
            assert!((b.length() - b.max_length).abs() < 1e-2 * b.max_length);
            assert!(b.girth_at(0.) >= b.girth_at(1.));
        }
    }

    #[test]
    fn several_trunks() {
        let config = GrowConfig {
            trunk_count: 3,
            max_level: 1,
            ..Default::default()
        };
        let tree = grow_tree(&config, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(tree.roots().len(), 3);
        for &r in tree.roots() {
            assert!(tree.branch(r).is_trunk());
        }
    }
}
