use std::collections::HashMap;

use glam::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{place_ring, RingSite};
use crate::curve::{Curve, CurveSettings, ResponseCurve, SimplifyBias};
use crate::error::GeometryResult;
use crate::growing::BranchId;
use crate::meshing::algorithms::regular_radials;
use crate::meshing::mesh_builder::Ring;
use crate::meshing::skin::{BranchSkin, BuilderType, SkinRange};
use crate::utils::{inverse_lerp, lerp, random_range};

/// Irregular flared base for trunk skins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkConfig {
    pub enabled: bool,
    /// length of the flare, relative to the skin
    pub min_spread: f32,
    pub max_spread: f32,
    pub min_displacement_points: usize,
    pub max_displacement_points: usize,
    /// radians of jitter on the base profile nodes
    pub min_angle_variance: f32,
    pub max_angle_variance: f32,
    /// turns of the base profile around the trunk axis
    pub min_twirl: f32,
    pub max_twirl: f32,
    pub min_scale_at_base: f32,
    pub max_scale_at_base: f32,
    /// blend from the displaced base profile (0) to a circle (1) along the flare
    pub scale_curve: ResponseCurve,
    pub length_resolution_factor: f32,
    pub radial_resolution_factor: f32,
}

impl Default for TrunkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_spread: 0.2,
            max_spread: 0.4,
            min_displacement_points: 3,
            max_displacement_points: 6,
            min_angle_variance: 0.1,
            max_angle_variance: 0.5,
            min_twirl: 0.,
            max_twirl: 0.,
            min_scale_at_base: 1.2,
            max_scale_at_base: 1.8,
            scale_curve: ResponseCurve::linear(),
            length_resolution_factor: 1.,
            radial_resolution_factor: 1.,
        }
    }
}

/// Base profile drawn once per trunk skin.
#[derive(Clone, Debug)]
struct TrunkProfile {
    /// end of the flare on the skin
    range: f32,
    points: Vec<Vec3>,
    radials: Vec<f32>,
    twirl: f32,
}

impl TrunkProfile {
    fn sides(&self) -> usize {
        self.points.len()
    }
}

#[derive(Clone, Debug)]
pub struct TrunkBuilder {
    config: TrunkConfig,
    angle_tolerance: f32,
    global_scale: f32,
    profiles: HashMap<BranchId, TrunkProfile>,
}

impl TrunkBuilder {
    pub fn new(config: &TrunkConfig, angle_tolerance: f32, global_scale: f32) -> Self {
        Self {
            config: config.clone(),
            angle_tolerance,
            global_scale,
            profiles: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn base_curve(&self, rng: &mut impl Rng, radial_step: f32) -> GeometryResult<Curve> {
        let c = &self.config;
        let nodes = rng.gen_range(c.min_displacement_points.min(c.max_displacement_points)..=c.max_displacement_points);
        let mut curve = Curve::bezier_circle(rng, nodes, 1., c.min_angle_variance, c.max_angle_variance)?;
        let scales: Vec<f32> = (0..curve.node_count())
            .map(|_| random_range(rng, c.min_scale_at_base, c.max_scale_at_base))
            .collect();
        curve.edit(|nodes| {
            for (node, scale) in nodes.iter_mut().zip(scales).skip(1).step_by(2) {
                node.position *= scale;
                node.handle1 *= scale;
                node.handle2 *= scale;
            }
        })?;
        curve.set_settings(CurveSettings {
            simplify_bias: SimplifyBias::Distance,
            distance_step: radial_step,
            ..Default::default()
        })?;
        Ok(curve)
    }

    /// Opens a flare range at the base of `skin` and draws its profile.
    pub fn register(&mut self, skin: &mut BranchSkin, rng: &mut impl Rng) -> GeometryResult<()> {
        let c = &self.config;
        let range = lerp(c.min_spread, c.max_spread, rng.gen::<f32>());
        let lrf = c.length_resolution_factor;
        let subdivisions = lerp(
            24. * lrf * range,
            12. * lrf * range,
            inverse_lerp(5., 45., self.angle_tolerance),
        ) as usize;
        let radial_step = 1. / skin.max_sides().max(1) as f32 * 1.2 / c.radial_resolution_factor.max(0.01);
        let curve = self.base_curve(rng, radial_step)?;
        let samples = curve.points();
        let sides = samples.len().saturating_sub(1);
        let (points, radials) = if sides >= 3 {
            (
                samples[..sides].iter().map(|s| s.position).collect(),
                samples[..sides].iter().map(|s| s.relative_position).collect(),
            )
        } else {
            let radials = regular_radials(skin.max_sides().max(3));
            let n = radials.len() - 1;
            let points = radials[..n]
                .iter()
                .map(|r| {
                    let a = r * std::f32::consts::TAU;
                    Vec3::new(a.cos(), a.sin(), 0.)
                })
                .collect();
            (points, radials[..n].to_vec())
        };
        let twirl = random_range(rng, c.min_twirl, c.max_twirl);
        log::debug!("trunk flare on skin {} up to {range:.3} with {sides} sides", skin.id());
        self.profiles.insert(
            skin.id(),
            TrunkProfile {
                range,
                points,
                radials,
                twirl,
            },
        );
        skin.add_range(SkinRange {
            subdivisions: subdivisions.max(1),
            ..SkinRange::new(0., range, BuilderType::Trunk)
        });
        Ok(())
    }

    /// Evenly spaced relevant positions along the flare.
    pub fn preprocess(&self, range: usize, skin: &mut BranchSkin) -> bool {
        let Some(r) = skin.range(range).copied() else {
            return false;
        };
        let subdivisions = r.subdivisions.max(1);
        let step = (r.to - r.from) / subdivisions as f32;
        for j in 1..=subdivisions {
            skin.add_relevant_position(r.from + step * j as f32, step, 1);
        }
        true
    }

    pub fn segment_count(&self, skin: &BranchSkin, girth: f32) -> usize {
        match self.profiles.get(&skin.id()) {
            Some(profile) => profile.sides(),
            None => skin.default_sides(girth),
        }
    }

    pub fn ring_at(&self, skin: &BranchSkin, site: &RingSite) -> GeometryResult<Ring> {
        let Some(profile) = self.profiles.get(&skin.id()) else {
            return super::DefaultBuilder::new(self.global_scale).ring_at(site);
        };
        let t = self
            .config
            .scale_curve
            .evaluate(inverse_lerp(0., profile.range, site.segment.position_at_skin));
        let girth = site.segment.girth * self.global_scale;
        let twirl = Quat::from_rotation_z(lerp(profile.twirl * std::f32::consts::TAU, 0., t));
        let local: Vec<Vec3> = profile
            .points
            .iter()
            .zip(profile.radials.iter())
            .map(|(base, r)| {
                let a = r * std::f32::consts::TAU;
                let circle = Vec3::new(a.cos(), a.sin(), 0.);
                twirl * (base.lerp(circle, t) * girth)
            })
            .collect();
        place_ring(site, site.frame(), &local, &profile.radials, self.global_scale)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::growing::{Branch, BranchTree};
    use crate::meshing::mesh_builder::VertexIds;
    use crate::meshing::skin::{SegmentType, SkinSegment};
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn setup(config: TrunkConfig) -> (BranchTree, BranchSkin, TrunkBuilder) {
        let mut tree = BranchTree::new();
        tree.add_root(Branch::new().with_length(5.).with_girth(0.5, 0.5));
        tree.update().unwrap();
        let mut skin = BranchSkin::new(&tree, 0, 0, 0., 0.).with_sides(4, 12, 0.1, 0.5);
        let mut builder = TrunkBuilder::new(&TrunkConfig { enabled: true, ..config }, 10., 1.);
        builder.register(&mut skin, &mut StdRng::seed_from_u64(3)).unwrap();
        (tree, skin, builder)
    }

    fn segment_at(tree: &BranchTree, skin: &BranchSkin, sides: usize, position: f32) -> SkinSegment {
        SkinSegment {
            branch: 0,
            center: skin.point_at(tree, position),
            direction: skin.direction_at(tree, position),
            normal: skin.normal_at(tree, position),
            sides,
            segment_type: SegmentType::Middle,
            girth: 0.5,
            position,
            position_at_skin: position,
            builder: BuilderType::Trunk,
            vertex_start: None,
            radials: Vec::new(),
        }
    }

    #[test]
    fn flare_range_and_subdivisions() {
        let (_, mut skin, builder) = setup(TrunkConfig::default());
        let range = skin.ranges()[0];
        assert_eq!(range.builder, BuilderType::Trunk);
        assert!(range.to >= 0.2 && range.to <= 0.4);
        assert!(builder.preprocess(0, &mut skin));
        // the last subdivision lands on the end of the flare
        let last = *skin.relevant_positions().last().unwrap();
        assert_abs_diff_eq!(last, range.to, epsilon = 1e-5);
        assert_eq!(skin.relevant_positions().len(), range.subdivisions);
    }

    #[test]
    fn base_is_wider_than_the_circle() {
        let (tree, skin, builder) = setup(TrunkConfig::default());
        let sides = builder.segment_count(&skin, 0.5);
        assert!(sides >= 3);
        let base = segment_at(&tree, &skin, sides, 0.);
        let site = RingSite {
            segment: &base,
            ids: VertexIds::default(),
            length_position: 0.,
        };
        let ring = builder.ring_at(&skin, &site).unwrap();
        assert_eq!(ring.sides(), sides);
        let widest = ring.positions.iter().map(|p| p.distance(base.center)).fold(0., f32::max);
        assert!(widest > 0.52, "{widest}");

        // past the flare the profile is a plain circle of the same side count
        let top = segment_at(&tree, &skin, sides, 0.9);
        let site = RingSite {
            segment: &top,
            ids: VertexIds::default(),
            length_position: 4.5,
        };
        let ring = builder.ring_at(&skin, &site).unwrap();
        for p in &ring.positions {
            assert_abs_diff_eq!(p.distance(top.center), 0.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn skins_without_a_flare_use_default_sides() {
        let (tree, _, builder) = setup(TrunkConfig::default());
        let other = BranchSkin::new(&tree, 0, 0, 0., 0.).with_sides(4, 12, 0.1, 0.5);
        // same id, so the profile is shared
        assert_eq!(builder.segment_count(&other, 0.5), builder.segment_count(&other, 0.1));
        let fresh = TrunkBuilder::new(&TrunkConfig::default(), 10., 1.);
        assert_eq!(fresh.segment_count(&other, 0.5), 12);
        assert!(!fresh.is_enabled());
    }
}
