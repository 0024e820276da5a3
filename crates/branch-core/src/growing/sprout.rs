use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::Branch;
use crate::utils::{lerp_direction, look_rotation, project_on_plane};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SproutMode {
    /// oriented like a small branch growing out of the surface
    #[default]
    Branch,
    /// oriented like a leaf lying along the branch
    Sprout,
}

/// Leaf-level attachment on a branch. Orientation vectors are derived from the
/// branch frame by [`Sprout::calculate_vectors`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sprout {
    pub position: f32,
    pub from_branch_center: bool,
    pub roll_angle: f32,
    pub align_angle: f32,
    pub horizontal_align: f32,
    pub flip_align: f32,
    pub flip_direction: Vec3,
    /// positive pulls toward the ground, negative toward the sky
    pub gravity_align: f32,
    pub perpendicular_align: f32,
    pub mode: SproutMode,

    #[serde(skip)]
    direction: Vec3,
    #[serde(skip)]
    normal: Vec3,
    #[serde(skip)]
    forward: Vec3,
    #[serde(skip)]
    in_branch_position: Vec3,
    #[serde(skip)]
    in_girth_position: Vec3,
    #[serde(skip)]
    hierarchy_position: f32,
    #[serde(skip)]
    position_offset: Vec3,
}

impl Default for Sprout {
    fn default() -> Self {
        Self {
            position: 0.5,
            from_branch_center: false,
            roll_angle: 0.,
            align_angle: 0.,
            horizontal_align: 0.,
            flip_align: 0.,
            flip_direction: Vec3::Z,
            gravity_align: 0.,
            perpendicular_align: 0.,
            mode: SproutMode::Branch,
            direction: Vec3::Z,
            normal: Vec3::Y,
            forward: Vec3::X,
            in_branch_position: Vec3::ZERO,
            in_girth_position: Vec3::ZERO,
            hierarchy_position: 0.,
            position_offset: Vec3::ZERO,
        }
    }
}

impl Sprout {
    pub fn new(position: f32, roll_angle: f32) -> Self {
        Self {
            position,
            roll_angle,
            ..Default::default()
        }
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }
    pub fn normal(&self) -> Vec3 {
        self.normal
    }
    pub fn forward(&self) -> Vec3 {
        self.forward
    }
    pub fn in_branch_position(&self) -> Vec3 {
        self.in_branch_position
    }
    pub fn in_girth_position(&self) -> Vec3 {
        self.in_girth_position
    }
    pub fn hierarchy_position(&self) -> f32 {
        self.hierarchy_position
    }
    pub fn position_offset(&self) -> Vec3 {
        self.position_offset
    }

    pub(crate) fn set_position_offset(&mut self, offset: Vec3) {
        self.position_offset = offset;
    }

    pub fn calculate_vectors(&mut self, branch: &Branch, offspring_level: f32) {
        let branch_direction = branch.direction_at(self.position);
        let branch_normal = branch.normal_at(self.position);
        let frame = look_rotation(branch_normal, branch_direction);
        let roll = Quat::from_rotation_y(self.roll_angle);

        let local_direction = match self.mode {
            SproutMode::Branch => Quat::from_axis_angle(-Vec3::X, self.align_angle) * Vec3::Z,
            SproutMode::Sprout => Quat::from_rotation_z(self.align_angle) * Vec3::X,
        };
        let local_normal = Quat::from_rotation_z(self.align_angle) * Vec3::Y;
        let mut direction = (frame * roll * local_direction).normalize_or_zero();
        let mut normal = (frame * roll * local_normal).normalize_or_zero();
        self.forward = Quat::from_axis_angle(branch_direction, self.roll_angle) * branch_normal;

        if self.perpendicular_align > 0. {
            let target = project_on_plane(direction, branch_direction);
            if target.length_squared() > 0. {
                direction = lerp_direction(direction, target.normalize(), self.perpendicular_align);
            }
        }
        if self.horizontal_align > 0. {
            let target = project_on_plane(direction, Vec3::Z);
            if target.length_squared() > 0. {
                direction = lerp_direction(direction, target.normalize(), self.horizontal_align);
            }
            normal = lerp_direction(normal, Vec3::Z, self.horizontal_align);
        }
        if self.mode == SproutMode::Sprout && self.flip_align > 0. {
            let flip = self.flip_direction.normalize_or_zero();
            let target = project_on_plane(direction, flip);
            if target.length_squared() > 0. {
                direction = lerp_direction(direction, target.normalize(), self.flip_align);
            }
            normal = lerp_direction(normal, flip, self.flip_align);
        }
        if self.gravity_align != 0. {
            let target = if self.gravity_align > 0. { -Vec3::Z } else { Vec3::Z };
            let aligned = lerp_direction(direction, target, self.gravity_align.abs());
            normal = Quat::from_rotation_arc(direction, aligned) * normal;
            direction = aligned;
        }
        self.direction = direction;
        self.normal = normal;

        self.in_branch_position = branch.point_at(self.position);
        self.in_girth_position = if self.from_branch_center {
            self.in_branch_position
        } else {
            self.in_branch_position + self.forward * branch.girth_at(self.position) * 0.8 + self.position_offset
        };
        self.hierarchy_position = if offspring_level > 0. {
            (branch.hierarchy_level() + self.position) / offspring_level
        } else {
            self.position
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::growing::BranchTree;
    use approx::assert_abs_diff_eq;

    fn vertical_with(sprout: Sprout) -> Sprout {
        let mut tree = BranchTree::new();
        let mut branch = Branch::new().with_length(2.);
        branch.sprouts.push(sprout);
        let id = tree.add_root(branch);
        tree.update().unwrap();
        tree.branch(id).sprouts[0].clone()
    }

    #[test]
    fn unaligned_sprout_points_along_normal() {
        let s = vertical_with(Sprout::new(0.5, 0.));
        assert_abs_diff_eq!(s.direction().distance(s.forward()), 0., epsilon = 1e-4);
        assert_abs_diff_eq!(s.direction().z, 0., epsilon = 1e-4);
        assert_abs_diff_eq!(s.in_branch_position().distance(Vec3::new(0., 0., 1.)), 0., epsilon = 1e-4);
    }

    #[test]
    fn gravity_pulls_down() {
        let s = vertical_with(Sprout {
            gravity_align: 1.,
            ..Sprout::new(0.5, 1.)
        });
        assert_abs_diff_eq!(s.direction().distance(-Vec3::Z), 0., epsilon = 1e-4);
        assert_abs_diff_eq!(s.direction().dot(s.normal()), 0., epsilon = 1e-4);
    }

    #[test]
    fn horizontal_align_flattens() {
        let s = vertical_with(Sprout {
            align_angle: 0.7,
            horizontal_align: 1.,
            ..Sprout::new(0.3, 2.)
        });
        assert_abs_diff_eq!(s.direction().z, 0., epsilon = 1e-4);
        assert_abs_diff_eq!(s.normal().distance(Vec3::Z), 0., epsilon = 1e-4);
    }

    #[test]
    fn girth_position_sits_on_surface() {
        let s = vertical_with(Sprout::new(0.5, 0.));
        let d = s.in_girth_position().distance(s.in_branch_position());
        assert!(d > 0.);
        let centered = vertical_with(Sprout {
            from_branch_center: true,
            ..Sprout::new(0.5, 0.)
        });
        assert_eq!(centered.in_girth_position(), centered.in_branch_position());
    }
}
