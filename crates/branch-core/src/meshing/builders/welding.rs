//! Blends the base of a child skin into the surface of its parent.
//!
//! The welding range at the base of a child skin emits no ring in the main mesh
//! except at its end. The patch between the parent surface and that end ring is
//! built afterwards as an auxiliary mesh: the first ring is projected onto the
//! parent by ray casts, the next ones widen toward the weld and fade into a
//! plain circle.

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

use glam::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::curve::ResponseCurve;
use crate::error::{GeometryError, GeometryResult};
use crate::growing::{BranchId, BranchTree};
use crate::meshing::algorithms::{mesh_between_rings, regular_radials};
use crate::meshing::collision::CollisionSurface;
use crate::meshing::mesh_builder::{GeometryData, Ring, VertexIds};
use crate::meshing::skin::{BranchSkin, BuilderType, SkinRange};
use crate::utils::{
    approx_eq, inverse_lerp, lerp, lerp_direction, look_rotation, project_on_plane, random_range, signed_angle,
};

/// half width of the parent window used as collision surface, relative to the parent skin
const COLLISION_WINDOW: f32 = 0.1;
/// longest ray cast, in parent girths
const MAX_RAY_GIRTHS: f32 = 12.;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeldingParams {
    pub enabled: bool,
    /// flat ring closing the weld inside the parent
    pub use_mesh_cap: bool,
    /// skins deeper than this hierarchy level are not welded
    pub min_hierarchy_range: f32,
    pub max_hierarchy_range: f32,
    /// damping of the spread by hierarchy level, over `0..hierarchy_range`
    pub hierarchy_curve: ResponseCurve,
    /// spread along the weld, from its base to its end
    pub curve: ResponseCurve,
    /// length of the weld, in parent girths
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_additional_segments: usize,
    pub max_additional_segments: usize,
    /// stretch of the half of the ring facing the parent tip
    pub min_upper_spread: f32,
    pub max_upper_spread: f32,
    /// stretch of the half of the ring facing the parent base
    pub min_lower_spread: f32,
    pub max_lower_spread: f32,
}

impl Default for WeldingParams {
    fn default() -> Self {
        Self {
            enabled: false,
            use_mesh_cap: false,
            min_hierarchy_range: 0.3,
            max_hierarchy_range: 0.4,
            hierarchy_curve: ResponseCurve::falling(),
            curve: ResponseCurve::falling(),
            min_distance: 1.3,
            max_distance: 1.3,
            min_additional_segments: 2,
            max_additional_segments: 3,
            min_upper_spread: 1.,
            max_upper_spread: 1.,
            min_lower_spread: 1.3,
            max_lower_spread: 1.3,
        }
    }
}

/// Settings for branches and for underground roots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeldingConfig {
    pub branch: WeldingParams,
    pub root: WeldingParams,
}

impl Default for WeldingConfig {
    fn default() -> Self {
        Self {
            branch: WeldingParams::default(),
            root: WeldingParams {
                min_upper_spread: 1.3,
                max_upper_spread: 1.3,
                min_lower_spread: 1.,
                max_lower_spread: 1.,
                ..Default::default()
            },
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Weld {
    root: bool,
    /// end of the welding range on the child skin
    end: f32,
    upper_spread: f32,
    lower_spread: f32,
}

#[derive(Clone, Debug)]
pub struct WeldingBuilder {
    config: WeldingConfig,
    global_scale: f32,
    branch_hierarchy_range: f32,
    root_hierarchy_range: f32,
    welds: HashMap<BranchId, Weld>,
}

/// regular polygon around `center`, no normals
fn circle_ring(center: Vec3, frame: Quat, girth: f32, sides: usize) -> Ring {
    let radials = regular_radials(sides);
    let positions = radials
        .iter()
        .map(|r| {
            let a = r * TAU;
            center + frame * Vec3::new(a.cos() * girth, a.sin() * girth, 0.)
        })
        .collect();
    Ring {
        positions,
        radials,
        center,
        girth,
        ..Default::default()
    }
}

impl WeldingBuilder {
    pub fn new(config: &WeldingConfig, global_scale: f32, rng: &mut impl Rng) -> Self {
        let branch_hierarchy_range = random_range(
            rng,
            config.branch.min_hierarchy_range,
            config.branch.max_hierarchy_range,
        );
        let root_hierarchy_range = random_range(rng, config.root.min_hierarchy_range, config.root.max_hierarchy_range);
        Self {
            config: config.clone(),
            global_scale,
            branch_hierarchy_range,
            root_hierarchy_range,
            welds: HashMap::new(),
        }
    }

    fn params(&self, root: bool) -> (&WeldingParams, f32) {
        if root {
            (&self.config.root, self.root_hierarchy_range)
        } else {
            (&self.config.branch, self.branch_hierarchy_range)
        }
    }

    /// Opens a welding range at the base of a child skin. Returns whether the skin is welded.
    pub fn register(&mut self, tree: &BranchTree, skin: &mut BranchSkin, rng: &mut impl Rng) -> bool {
        let Some(branch) = tree.get(skin.id()) else {
            return false;
        };
        let root = branch.underground;
        let (params, hierarchy_range) = self.params(root);
        if !params.enabled || branch.is_trunk() || skin.hierarchy_level() > hierarchy_range {
            return false;
        }
        let Some(parent) = branch.parent().and_then(|p| tree.get(p)) else {
            return false;
        };
        let factor = random_range(rng, params.min_distance, params.max_distance);
        let distance = (parent.girth_at(branch.position()) * factor * 2.).min(branch.length());
        if distance <= 0. || skin.length() <= 0. {
            return false;
        }
        let mut end = distance / skin.length();
        if end >= 1. {
            end = 0.99;
        }
        let weld = Weld {
            root,
            end,
            upper_spread: random_range(rng, params.min_upper_spread, params.max_upper_spread),
            lower_spread: random_range(rng, params.min_lower_spread, params.max_lower_spread),
        };
        log::debug!("welding skin {} up to {end:.3}", skin.id());
        self.welds.insert(skin.id(), weld);
        skin.add_range(SkinRange::new(0., end, BuilderType::Welding));
        true
    }

    /// Relevant positions for the additional segments and the end of the weld.
    pub fn preprocess(&mut self, range: usize, skin: &mut BranchSkin, rng: &mut impl Rng) -> bool {
        let Some(to) = skin.range(range).map(|r| r.to) else {
            return false;
        };
        let Some(weld) = self.welds.get_mut(&skin.id()) else {
            return false;
        };
        let params = if weld.root { &self.config.root } else { &self.config.branch };
        let (min, max) = (params.min_additional_segments, params.max_additional_segments);
        let additional = if max > min { rng.gen_range(min..max) } else { max };
        if additional > 0 {
            let step = to / additional as f32;
            for i in 1..additional {
                skin.add_relevant_position(step * i as f32, 0.01, 1);
            }
        }
        skin.add_relevant_position(to, 0.01, 2);
        weld.end = to;
        true
    }

    /// Only the end of the weld gets a ring in the main mesh.
    pub fn segment_count(&self, skin: &BranchSkin, position: f32, girth: f32) -> usize {
        match self.welds.get(&skin.id()) {
            Some(weld) if approx_eq(position, weld.end) => skin.default_sides(girth),
            _ => 0,
        }
    }

    fn collision_surface(&self, tree: &BranchTree, parent_skin: &BranchSkin, position: f32) -> CollisionSurface {
        let gs = self.global_scale;
        let ring_at = |p: f32, sides: usize| {
            let frame = look_rotation(parent_skin.direction_at(tree, p), parent_skin.normal_at(tree, p));
            let center = parent_skin.point_at(tree, p) * gs;
            circle_ring(center, frame, parent_skin.girth_at(tree, p) * gs, sides.max(3))
        };
        let (from, to) = ((position - COLLISION_WINDOW).max(0.), (position + COLLISION_WINDOW).min(1.));
        let mut rings = vec![ring_at(from, parent_skin.max_sides())];
        for segment in parent_skin.segments() {
            if segment.position_at_skin > from && segment.position_at_skin < to {
                let sides = if segment.sides == 0 { parent_skin.max_sides() } else { segment.sides };
                rings.push(ring_at(segment.position_at_skin, sides));
            }
        }
        rings.push(ring_at(to, parent_skin.max_sides()));
        CollisionSurface::from_rings(&rings)
    }

    /// Builds the weld patch of `skin` against the finished `parent` skin.
    pub fn postprocess(
        &self,
        tree: &BranchTree,
        skin: &BranchSkin,
        parent: Option<&BranchSkin>,
    ) -> GeometryResult<Option<GeometryData>> {
        let (Some(weld), Some(parent_skin)) = (self.welds.get(&skin.id()), parent) else {
            return Ok(None);
        };
        let child_id = skin.id();
        let child = tree.get(child_id).ok_or(GeometryError::UnknownBranch(child_id))?;
        let Some(parent_id) = child.parent() else {
            return Ok(None);
        };
        let parent = tree.get(parent_id).ok_or(GeometryError::UnknownBranch(parent_id))?;
        let Some(on_parent) = parent_skin.skin_position(parent_id, child.position()) else {
            return Ok(None);
        };
        let (params, hierarchy_range) = self.params(weld.root);
        let gs = self.global_scale;

        // angle between the child normal and the parent growth, seen from the attachment plane
        let weld_angle = match tree.parent_plane(child_id) {
            Some(plane) => signed_angle(
                project_on_plane(child.normal_at(0.), plane.normal),
                project_on_plane(parent.direction_at(child.position()), plane.normal),
                plane.normal,
            ),
            None => 0.,
        };

        let girth_at_parent = parent.girth_at(child.position());
        let parent_direction = parent_skin.direction_at(tree, on_parent);
        let sunk = parent_direction.dot(skin.point_at(tree, 0.) - skin.point_at_length(tree, girth_at_parent));
        let position = if parent_skin.length() > 0. {
            (on_parent - sunk / parent_skin.length()).clamp(0., 1.)
        } else {
            on_parent
        };
        let parent_direction = parent_skin.direction_at(tree, position);
        let parent_normal = parent_skin.normal_at(tree, position);
        let outward = project_on_plane(child.direction_at(0.), parent_direction).normalize_or_zero();
        let ray = if outward == Vec3::ZERO {
            Quat::from_axis_angle(parent_direction, child.roll_angle) * parent_normal
        } else {
            outward
        };
        let center = parent_skin.point_at(tree, position) * gs;
        let girth = skin.girth_at_length(tree, girth_at_parent) * gs;
        let sides = skin.max_sides().max(3);
        let hierarchy = params
            .hierarchy_curve
            .evaluate(inverse_lerp(0., hierarchy_range, skin.hierarchy_level()));
        let ids = VertexIds {
            branch: child_id,
            skin: skin.id(),
            structure: child.level(),
        };
        let spread_at = |i: usize, sides: usize, h: f32| {
            let spread = if TAU / sides as f32 * (i as f32) < PI {
                weld.lower_spread
            } else {
                weld.upper_spread
            };
            lerp(1., spread, h)
        };
        let ellipse = |i: usize, sides: usize, h: f32| {
            let a = TAU / sides as f32 * i as f32 - weld_angle;
            let w = spread_at(i, sides, h);
            Quat::from_rotation_z(weld_angle) * Vec3::new(a.cos(), a.sin() * w, 0.)
        };

        let mut rings = Vec::new();
        if params.use_mesh_cap {
            let radials = regular_radials(sides);
            rings.push(Ring {
                positions: vec![center; sides + 1],
                normals: vec![-ray; sides + 1],
                radials,
                center,
                direction: ray,
                girth: 0.,
                length_position: skin.length_offset(),
                ids,
            });
        }

        let surface = self.collision_surface(tree, parent_skin, position);
        let frame = look_rotation(ray, child.normal_at(0.));
        let max_distance = girth_at_parent * gs * MAX_RAY_GIRTHS;
        let h0 = params.curve.evaluate(0.) * hierarchy;
        let mut positions = Vec::with_capacity(sides + 1);
        let mut normals = Vec::with_capacity(sides + 1);
        for i in 0..sides {
            let vertex = center + frame * (ellipse(i, sides, h0) * girth);
            let hit = surface
                .raycast(vertex, ray, max_distance)
                .or_else(|| surface.raycast(center, vertex - center, max_distance));
            match hit {
                Some(hit) => {
                    positions.push(hit.point);
                    normals.push(hit.normal);
                }
                None => {
                    log::debug!("weld vertex {i} of skin {child_id} found no parent surface");
                    positions.push(vertex);
                    normals.push((vertex - center).normalize_or(ray));
                }
            }
        }
        positions.push(positions[0]);
        normals.push(normals[0]);
        rings.push(Ring {
            positions,
            normals,
            radials: regular_radials(sides),
            center,
            direction: ray,
            girth,
            length_position: skin.length_offset(),
            ids,
        });

        let start = girth_at_parent / skin.length();
        let threshold = start * 1.2;
        let welded: Vec<_> = skin
            .segments()
            .iter()
            .take_while(|s| s.builder == BuilderType::Welding)
            .collect();
        let mut extra = 0;
        for (index, segment) in welded.iter().enumerate() {
            if index == 0 || segment.position_at_skin < threshold {
                continue;
            }
            let last = index + 1 == welded.len();
            let sides = match (last, segment.sides) {
                (true, s) if s >= 3 => s,
                _ => skin.max_sides().max(3),
            };
            let along = params
                .curve
                .evaluate(inverse_lerp(start, weld.end, segment.position_at_skin));
            let h = along * hierarchy;
            let frame = look_rotation(lerp_direction(ray, segment.direction, 1. - along), segment.normal);
            let center = segment.center * gs;
            let girth = segment.girth * gs;
            let positions: Vec<Vec3> = (0..=sides)
                .map(|i| center + frame * (ellipse(i % sides, sides, h) * girth))
                .collect();
            let normals = positions.iter().map(|p| (*p - center).normalize_or(ray)).collect();
            rings.push(Ring {
                positions,
                normals,
                radials: regular_radials(sides),
                center,
                direction: segment.direction,
                girth,
                length_position: skin.length_offset() + skin.length() * segment.position_at_skin,
                ids,
            });
            extra += 1;
        }
        if extra == 0 {
            log::debug!("skin {child_id} stays within its parent girth, no weld");
            return Ok(None);
        }

        let mut mesh = GeometryData::new();
        let mut previous: Option<(usize, &Ring)> = None;
        for ring in &rings {
            let start = mesh.register_ring(ring);
            if let Some((base, base_ring)) = previous {
                mesh.register_triangles(&mesh_between_rings(base, &base_ring.radials, start, &ring.radials));
            }
            previous = Some((start, ring));
        }
        log::debug!(
            "weld of skin {child_id}: {} rings, {} triangles",
            rings.len(),
            mesh.triangle_count()
        );
        Ok(Some(mesh))
    }
}
