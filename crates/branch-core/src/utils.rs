use glam::{Mat3, Quat, Vec3};
use rand::Rng;

pub const EPSILON: f32 = 1e-5;

pub trait FloatProducer: ExactSizeIterator<Item = f32> + Sized {
    fn arg_min(self) -> Option<usize> {
        let (mut i_min, mut v_min) = (0, f32::NAN);
        for (i, v) in self.enumerate() {
            if v < v_min || v_min.is_nan() {
                (i_min, v_min) = (i, v)
            }
        }
        if v_min.is_nan() {
            None
        } else {
            Some(i_min)
        }
    }

    fn arg_max(self) -> Option<usize> {
        let (mut i_max, mut v_max) = (0, f32::NAN);
        for (i, v) in self.enumerate() {
            if v > v_max || v_max.is_nan() {
                (i_max, v_max) = (i, v)
            }
        }
        if v_max.is_nan() {
            None
        } else {
            Some(i_max)
        }
    }
}

impl<I> FloatProducer for I where I: ExactSizeIterator<Item = f32> {}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0., 1.)
}

pub fn lerp_unclamped(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// where `v` lies between `a` and `b`, clamped to [0, 1].
/// Returns 0 when the interval is empty.
pub fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if (b - a).abs() < f32::EPSILON {
        0.
    } else {
        ((v - a) / (b - a)).clamp(0., 1.)
    }
}

/// uniform sample in `[min, max)`, or `min` when the range is empty.
pub fn random_range(rng: &mut impl Rng, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= EPSILON * a.abs().max(b.abs()).max(1.)
}

pub fn project_on_plane(v: Vec3, plane_normal: Vec3) -> Vec3 {
    let n = plane_normal.normalize_or_zero();
    v - n * v.dot(n)
}

/// angle from `from` to `to` in radians, signed by the rotation direction around `axis`.
pub fn signed_angle(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let unsigned = from.angle_between(to);
    if unsigned.is_nan() {
        return 0.;
    }
    if axis.dot(from.cross(to)) < 0. {
        -unsigned
    } else {
        unsigned
    }
}

/// rotation whose local +Z points along `forward` and whose local +Y is as close
/// as possible to `up`.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut right = up.cross(forward);
    if right.length_squared() < EPSILON * EPSILON {
        // up is parallel to forward
        right = forward.any_orthonormal_vector();
    }
    let right = right.normalize();
    let up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, forward))
}

/// interpolates between two directions, falling back to `b` when the result collapses.
pub fn lerp_direction(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let v = a.lerp(b, t.clamp(0., 1.));
    if v.length_squared() < EPSILON {
        b.normalize_or_zero()
    } else {
        v.normalize()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn look_rotation_maps_axes() {
        let forward = Vec3::new(1., 1., 0.).normalize();
        let q = look_rotation(forward, Vec3::Z);
        assert_abs_diff_eq!((q * Vec3::Z).distance(forward), 0., epsilon = 1e-5);
        assert_abs_diff_eq!((q * Vec3::Y).distance(Vec3::Z), 0., epsilon = 1e-5);
    }

    #[test]
    fn look_rotation_parallel_up() {
        let q = look_rotation(Vec3::Z, Vec3::Z);
        assert_abs_diff_eq!((q * Vec3::Z).distance(Vec3::Z), 0., epsilon = 1e-5);
        assert!(q.is_normalized());
    }

    #[test]
    fn signed_angle_direction() {
        let a = signed_angle(Vec3::X, Vec3::Y, Vec3::Z);
        let b = signed_angle(Vec3::X, Vec3::Y, -Vec3::Z);
        assert_abs_diff_eq!(a, std::f32::consts::FRAC_PI_2, epsilon = 1e-5);
        assert_abs_diff_eq!(b, -std::f32::consts::FRAC_PI_2, epsilon = 1e-5);
    }

    #[test]
    fn inverse_lerp_bounds() {
        assert_eq!(inverse_lerp(0., 2., 1.), 0.5);
        assert_eq!(inverse_lerp(1., 1., 3.), 0.);
        assert_eq!(inverse_lerp(0., 1., 4.), 1.);
    }

    #[test]
    fn arg_min_skips_nan() {
        assert_eq!([3., f32::NAN, 1., 2.].into_iter().arg_min(), Some(2));
        assert_eq!(Vec::<f32>::new().into_iter().arg_max(), None);
    }
}
