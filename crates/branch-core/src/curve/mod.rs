//! Cubic Bézier curves with arc-length parameterization and adaptive sampling.
//!
//! A [`Curve`] can only be obtained through [`Curve::from_nodes`] (or helpers built on it)
//! and only mutated through [`Curve::edit`], both of which rebuild every derived value,
//! so samples are never read from stale state.

pub mod response;
pub mod segment;

use glam::{Quat, Vec2, Vec3};
use noise::{NoiseFn, Perlin};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, GeometryResult};
use crate::utils::{lerp_unclamped, project_on_plane, random_range, FloatProducer};
pub use response::ResponseCurve;
use segment::CurveSegment;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleStyle {
    /// both handles are independent
    Free,
    /// handle 2 points opposite to handle 1 but keeps its own length
    Aligned,
    /// handle 2 mirrors handle 1
    #[default]
    Auto,
    /// no handles, sharp corner
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlNode {
    pub position: Vec3,
    /// incoming handle, relative to `position`
    pub handle1: Vec3,
    /// outgoing handle, relative to `position`
    pub handle2: Vec3,
    pub up: Vec3,
    pub roll: f32,
    pub scale: Vec2,
    pub handle_style: HandleStyle,
}

impl Default for ControlNode {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            handle1: Vec3::ZERO,
            handle2: Vec3::ZERO,
            up: Vec3::Z,
            roll: 0.,
            scale: Vec2::ONE,
            handle_style: HandleStyle::Auto,
        }
    }
}

impl ControlNode {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_handles(position: Vec3, handle1: Vec3, handle2: Vec3, handle_style: HandleStyle) -> Self {
        Self {
            position,
            handle1,
            handle2,
            handle_style,
            ..Default::default()
        }
    }

    fn apply_handle_style(&mut self) {
        match self.handle_style {
            HandleStyle::Free => {}
            HandleStyle::Auto => self.handle2 = -self.handle1,
            HandleStyle::Aligned => {
                self.handle2 = -self.handle1.normalize_or_zero() * self.handle2.length();
            }
            HandleStyle::None => {
                self.handle1 = Vec3::ZERO;
                self.handle2 = Vec3::ZERO;
            }
        }
    }

    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            handle1: self.handle1.lerp(other.handle1, t),
            handle2: self.handle2.lerp(other.handle2, t),
            up: self.up.lerp(other.up, t),
            roll: lerp_unclamped(self.roll, other.roll, t),
            scale: self.scale.lerp(other.scale, t),
            handle_style: self.handle_style,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CurveSample {
    pub position: Vec3,
    pub tangent: Vec3,
    pub normal: Vec3,
    pub up: Vec3,
    pub forward: Vec3,
    pub roll: f32,
    pub scale: Vec2,
    pub girth: f32,
    /// arc length from the start of the curve
    pub length_position: f32,
    /// arc length divided by the total length, in [0, 1]
    pub relative_position: f32,
}

impl CurveSample {
    /// interpolation between two samples; the relative position is taken as given
    fn blend(&self, other: &Self, t: f32) -> Self {
        let forward = self.forward.lerp(other.forward, t).normalize_or_zero();
        Self {
            position: self.position.lerp(other.position, t),
            tangent: self.tangent.lerp(other.tangent, t),
            normal: self.normal.lerp(other.normal, t).normalize_or_zero(),
            up: self.up.lerp(other.up, t),
            forward: if forward == Vec3::ZERO { other.forward } else { forward },
            roll: lerp_unclamped(self.roll, other.roll, t),
            scale: self.scale.lerp(other.scale, t),
            girth: lerp_unclamped(self.girth, other.girth, t),
            length_position: lerp_unclamped(self.length_position, other.length_position, t),
            relative_position: lerp_unclamped(self.relative_position, other.relative_position, t),
        }
    }
}

/// How per-sample normals are derived on rebuild.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NormalMode {
    /// `normal` is rotated by the rotation bringing `forward` onto each sample forward
    ReferenceVector { forward: Vec3, normal: Vec3 },
    /// normal points away from `point`, projected on the plane orthogonal to `forward`
    ReferencePoint { forward: Vec3, point: Vec3 },
    Fixed(Vec3),
}

impl Default for NormalMode {
    fn default() -> Self {
        NormalMode::ReferenceVector {
            forward: Vec3::Z,
            normal: Vec3::Y,
        }
    }
}

impl NormalMode {
    fn normal_for(&self, sample: &CurveSample) -> Vec3 {
        let fallback = || sample.forward.any_orthonormal_vector();
        match *self {
            NormalMode::Fixed(normal) => normal,
            NormalMode::ReferenceVector { forward, normal } => {
                let forward = forward.normalize_or_zero();
                if forward == Vec3::ZERO {
                    return normal;
                }
                let n = Quat::from_rotation_arc(forward, sample.forward) * normal;
                let n = n.normalize_or_zero();
                if n == Vec3::ZERO {
                    fallback()
                } else {
                    n
                }
            }
            NormalMode::ReferencePoint { forward, point } => {
                let n = project_on_plane(sample.position - point, forward).normalize_or_zero();
                if n == Vec3::ZERO {
                    fallback()
                } else {
                    n
                }
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimplifyBias {
    #[default]
    Angle,
    Distance,
}

/// Perlin displacement applied to sampled points, orthogonal to the curve.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveNoise {
    pub seed: u32,
    pub factor_at_first: f32,
    pub factor_at_last: f32,
    pub scale_at_first: f32,
    pub scale_at_last: f32,
    pub length_offset: f32,
    pub spare_first_point: bool,
}

impl Default for CurveNoise {
    fn default() -> Self {
        Self {
            seed: 0,
            factor_at_first: 0.,
            factor_at_last: 0.1,
            scale_at_first: 1.,
            scale_at_last: 1.,
            length_offset: 0.,
            spare_first_point: true,
        }
    }
}

impl CurveNoise {
    fn offset(&self, perlin: &Perlin, sample: &CurveSample) -> Vec3 {
        if self.spare_first_point && sample.relative_position <= 0. {
            return Vec3::ZERO;
        }
        let t = sample.relative_position;
        let factor = lerp_unclamped(self.factor_at_first, self.factor_at_last, t);
        let scale = lerp_unclamped(self.scale_at_first, self.scale_at_last, t);
        let x = ((sample.length_position + self.length_offset) * scale) as f64;
        let local = Vec3::new(perlin.get([x, 0.5]) as f32, perlin.get([x, 7.5]) as f32, 0.);
        Quat::from_rotation_arc(Vec3::Z, sample.forward) * local * factor
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveSettings {
    /// degrees of accumulated turn before a new point is emitted
    pub resolution_angle: f32,
    pub simplify_bias: SimplifyBias,
    /// fraction of the total length between two points with `SimplifyBias::Distance`
    pub distance_step: f32,
    pub noise: Option<CurveNoise>,
}

impl Default for CurveSettings {
    fn default() -> Self {
        Self {
            resolution_angle: 5.,
            simplify_bias: SimplifyBias::Angle,
            distance_step: 0.05,
            noise: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Curve {
    nodes: Vec<ControlNode>,
    closed: bool,
    settings: CurveSettings,
    normal_mode: NormalMode,
    segments: Vec<CurveSegment>,
    length: f32,
    node_lengths: Vec<f32>,
    dense: Vec<CurveSample>,
    points: Vec<CurveSample>,
}

impl Curve {
    pub fn from_nodes(nodes: Vec<ControlNode>, closed: bool) -> GeometryResult<Self> {
        Self::with_settings(nodes, closed, CurveSettings::default(), NormalMode::default())
    }

    pub fn with_settings(
        nodes: Vec<ControlNode>,
        closed: bool,
        settings: CurveSettings,
        normal_mode: NormalMode,
    ) -> GeometryResult<Self> {
        let mut curve = Self {
            nodes,
            closed,
            settings,
            normal_mode,
            segments: Vec::new(),
            length: 0.,
            node_lengths: Vec::new(),
            dense: Vec::new(),
            points: Vec::new(),
        };
        curve.rebuild()?;
        Ok(curve)
    }

    /// straight curve between two points, with handles a third of the way along
    pub fn line(from: Vec3, to: Vec3) -> Self {
        let h = (to - from) / 3.;
        let mut curve = Self {
            nodes: vec![
                ControlNode::with_handles(from, -h, h, HandleStyle::Auto),
                ControlNode::with_handles(to, -h, h, HandleStyle::Auto),
            ],
            closed: false,
            settings: CurveSettings::default(),
            normal_mode: NormalMode::default(),
            segments: Vec::new(),
            length: 0.,
            node_lengths: Vec::new(),
            dense: Vec::new(),
            points: Vec::new(),
        };
        curve.build_derived();
        curve
    }

    /// Closed circle of `2 * nodes` nodes in the XY plane, each node angle jittered by
    /// up to half a variance drawn in `[min_variance, max_variance)`.
    pub fn bezier_circle(
        rng: &mut impl Rng,
        nodes: usize,
        radius: f32,
        min_variance: f32,
        max_variance: f32,
    ) -> GeometryResult<Self> {
        let count = 2 * nodes.max(1);
        let step = std::f32::consts::TAU / count as f32;
        let variance = random_range(rng, min_variance, max_variance);
        let handle_factor = 4. / 3. * (std::f32::consts::PI / (2 * count) as f32).tan();
        let nodes = (0..count)
            .map(|i| {
                let angle = i as f32 * step + random_range(rng, -variance / 2., variance / 2.);
                let (x, y) = (angle.cos() * radius, angle.sin() * radius);
                let handle1 = Vec3::new(y, -x, 0.) * handle_factor;
                ControlNode::with_handles(Vec3::new(x, y, 0.), handle1, -handle1, HandleStyle::Auto)
            })
            .collect();
        Self::with_settings(nodes, true, CurveSettings::default(), NormalMode::Fixed(Vec3::Z))
    }

    /// Applies `f` to the control nodes then rebuilds. On failure the previous nodes are kept.
    pub fn edit(&mut self, f: impl FnOnce(&mut Vec<ControlNode>)) -> GeometryResult<()> {
        let previous = self.nodes.clone();
        f(&mut self.nodes);
        if let Err(e) = self.rebuild() {
            self.nodes = previous;
            self.rebuild()?;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_settings(&mut self, settings: CurveSettings) -> GeometryResult<()> {
        self.settings = settings;
        self.rebuild()
    }

    /// recomputes normals only; positions and lengths are unchanged
    pub fn set_normal_mode(&mut self, normal_mode: NormalMode) {
        self.normal_mode = normal_mode;
        self.recalculate_normals();
    }

    pub fn nodes(&self) -> &[ControlNode] {
        &self.nodes
    }
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
    pub fn length(&self) -> f32 {
        self.length
    }
    pub fn settings(&self) -> &CurveSettings {
        &self.settings
    }
    pub fn normal_mode(&self) -> NormalMode {
        self.normal_mode
    }
    pub fn segments(&self) -> &[CurveSegment] {
        &self.segments
    }
    /// arc length at each node
    pub fn node_lengths(&self) -> &[f32] {
        &self.node_lengths
    }
    /// relative position of each node
    pub fn node_relative_positions(&self) -> Vec<f32> {
        self.node_lengths.iter().map(|l| self.relative_of(*l)).collect()
    }
    /// every dense sample, segment boundaries included once
    pub fn dense_samples(&self) -> &[CurveSample] {
        &self.dense
    }
    /// optimized samples, computed with the curve settings and no relevant positions
    pub fn points(&self) -> &[CurveSample] {
        &self.points
    }

    fn relative_of(&self, length: f32) -> f32 {
        if self.length > 0. {
            (length / self.length).clamp(0., 1.)
        } else {
            0.
        }
    }

    fn rebuild(&mut self) -> GeometryResult<()> {
        let count = self.nodes.len();
        if count < 2 {
            return Err(GeometryError::NotEnoughNodes { count });
        }
        self.build_derived();
        Ok(())
    }

    /// needs at least 2 nodes
    fn build_derived(&mut self) {
        let count = self.nodes.len();
        for node in self.nodes.iter_mut() {
            node.apply_handle_style();
        }

        let segment_count = if self.closed { count } else { count - 1 };
        self.segments.clear();
        self.node_lengths.clear();
        let mut length = 0.;
        for i in 0..segment_count {
            let segment = CurveSegment::new(&self.nodes[i], &self.nodes[(i + 1) % count], length);
            self.node_lengths.push(length);
            length += segment.length;
            self.segments.push(segment);
        }
        if !self.closed {
            self.node_lengths.push(length);
        }
        self.length = length;

        self.dense.clear();
        for (i, segment) in self.segments.iter().enumerate() {
            let skip = if i == 0 { 0 } else { 1 };
            self.dense.extend(segment.samples.iter().skip(skip).copied());
        }
        let n = self.dense.len();
        for (i, sample) in self.dense.iter_mut().enumerate() {
            sample.relative_position = if length > 0. {
                (sample.length_position / length).clamp(0., 1.)
            } else {
                i as f32 / (n - 1) as f32
            };
        }
        if let Some(last) = self.dense.last_mut() {
            last.relative_position = 1.;
        }

        self.recalculate_normals();
    }

    fn recalculate_normals(&mut self) {
        let mode = self.normal_mode;
        for sample in self.dense.iter_mut() {
            sample.normal = mode.normal_for(sample);
        }
        for segment in self.segments.iter_mut() {
            for sample in segment.samples.iter_mut() {
                sample.normal = mode.normal_for(sample);
            }
        }
        self.points = match self.settings.simplify_bias {
            SimplifyBias::Angle => self.adaptive_simplify(self.settings.resolution_angle, &[]),
            SimplifyBias::Distance => self.step_simplify(self.settings.distance_step),
        };
    }

    fn noise_field(&self) -> Option<(CurveNoise, Perlin)> {
        self.settings.noise.map(|n| (n, Perlin::new(n.seed)))
    }

    /// Emits a point each time the accumulated turn angle (degrees) reaches `angle_tolerance`,
    /// plus exactly one point at each relevant position. First and last samples are always kept.
    pub fn adaptive_simplify(&self, angle_tolerance: f32, relevant_positions: &[f32]) -> Vec<CurveSample> {
        let mut relevant: Vec<f32> = relevant_positions
            .iter()
            .copied()
            .filter(|p| *p > 0. && *p < 1.)
            .collect();
        relevant.sort_by(f32::total_cmp);
        relevant.dedup();
        let mut pending = relevant.into_iter().peekable();

        let noise = self.noise_field();
        let finish = |mut sample: CurveSample| {
            if let Some((n, perlin)) = noise.as_ref() {
                sample.position += n.offset(perlin, &sample);
            }
            sample
        };
        let dense = &self.dense;
        let n = dense.len();
        let mut result = Vec::new();
        result.push(finish(dense[0]));

        let mut accumulated_angle = 0.;
        for i in 1..n {
            if i >= 2 {
                let prev_dir = dense[i - 1].position - dense[i - 2].position;
                let dir = dense[i].position - dense[i - 1].position;
                if prev_dir.length_squared() > 0. && dir.length_squared() > 0. {
                    accumulated_angle += prev_dir.angle_between(dir).to_degrees();
                }
            }
            while let Some(&relevant) = pending.peek() {
                if dense[i].relative_position < relevant {
                    break;
                }
                let (a, b) = (&dense[i - 1], &dense[i]);
                let span = b.relative_position - a.relative_position;
                let t = if span > 0. { (relevant - a.relative_position) / span } else { 1. };
                let mut sample = a.blend(b, t);
                sample.relative_position = relevant;
                result.push(finish(sample));
                accumulated_angle = 0.;
                pending.next();
            }
            if i == n - 1 {
                break;
            }
            let last_relative = result[result.len() - 1].relative_position;
            if accumulated_angle >= angle_tolerance && dense[i].relative_position > last_relative {
                result.push(finish(dense[i]));
                accumulated_angle = 0.;
            }
        }
        // anything left is past the last dense sample
        for relevant in pending {
            // sample_at already applies the noise
            result.push(self.sample_at(relevant, false));
        }
        let mut last = dense[n - 1];
        last.relative_position = 1.;
        result.push(finish(last));
        result
    }

    /// Emits a point each time the arc length since the last emitted point exceeds
    /// `distance_step * length`. First and last samples are always kept.
    pub fn step_simplify(&self, distance_step: f32) -> Vec<CurveSample> {
        let dense = &self.dense;
        let n = dense.len();
        let threshold = distance_step * self.length;
        let noise = self.noise_field();
        let finish = |mut sample: CurveSample| {
            if let Some((n, perlin)) = noise.as_ref() {
                sample.position += n.offset(perlin, &sample);
            }
            sample
        };
        let mut result = vec![finish(dense[0])];
        let mut last_emitted = dense[0].length_position;
        for sample in &dense[1..n - 1] {
            if sample.length_position - last_emitted >= threshold {
                result.push(finish(*sample));
                last_emitted = sample.length_position;
            }
        }
        result.push(finish(dense[n - 1]));
        result
    }

    fn wrap(&self, t: f32) -> f32 {
        if self.closed && !(0. ..=1.).contains(&t) {
            t.rem_euclid(1.)
        } else {
            t
        }
    }

    /// Sample at relative position `t`.
    ///
    /// With `exact` the Bézier is evaluated at the parameter matching `t`'s arc length;
    /// otherwise the cached dense samples are interpolated. Outside [0, 1] open curves
    /// are extrapolated along their end tangent.
    pub fn sample_at(&self, t: f32, exact: bool) -> CurveSample {
        let mut sample = self.sample_without_noise(t, exact);
        if let Some((n, perlin)) = self.noise_field() {
            sample.position += n.offset(&perlin, &sample);
        }
        sample
    }

    fn sample_without_noise(&self, t: f32, exact: bool) -> CurveSample {
        let t = self.wrap(t);
        let (first, last) = (self.dense[0], self.dense[self.dense.len() - 1]);
        if t <= 0. {
            let mut s = first;
            s.position += s.forward * t * self.length;
            s.length_position = t * self.length;
            s.relative_position = t;
            return s;
        }
        if t >= 1. {
            let mut s = last;
            s.position += s.forward * (t - 1.) * self.length;
            s.length_position = t * self.length;
            s.relative_position = t;
            return s;
        }
        let target = t * self.length;
        let sample = if exact {
            self.exact_sample_at_length(target)
        } else {
            self.cached_sample_at_length(target)
        };
        let mut sample = sample;
        sample.length_position = target;
        sample.relative_position = t;
        sample
    }

    pub fn sample_at_length(&self, length: f32, exact: bool) -> CurveSample {
        if self.length > 0. {
            self.sample_at(length / self.length, exact)
        } else {
            self.sample_at(0., exact)
        }
    }

    fn segment_at_length(&self, length: f32) -> &CurveSegment {
        self.segments
            .iter()
            .find(|s| length <= s.length_offset + s.length)
            .unwrap_or(&self.segments[self.segments.len() - 1])
    }

    fn exact_sample_at_length(&self, length: f32) -> CurveSample {
        let segment = self.segment_at_length(length);
        let param = segment.parameter_at_length(length);
        let mut sample = segment.evaluate(param);
        sample.normal = self.normal_mode.normal_for(&sample);
        sample
    }

    fn cached_sample_at_length(&self, length: f32) -> CurveSample {
        let index = self
            .dense
            .partition_point(|s| s.length_position < length)
            .clamp(1, self.dense.len() - 1);
        let (a, b) = (&self.dense[index - 1], &self.dense[index]);
        let span = b.length_position - a.length_position;
        let t = if span > 0. { (length - a.length_position) / span } else { 0. };
        a.blend(b, t)
    }

    /// relative position of the dense sample closest to `point`
    pub fn find_nearest_point_to(&self, point: Vec3) -> f32 {
        self.dense
            .iter()
            .map(|s| s.position.distance_squared(point))
            .arg_min()
            .map(|i| self.dense[i].relative_position)
            .unwrap_or(0.)
    }

    /// drops points closer than `distance` to the previously kept one; the last point is kept
    pub fn merge_points_by_distance(points: &[CurveSample], distance: f32) -> Vec<CurveSample> {
        let mut result: Vec<CurveSample> = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            let is_last = i + 1 == points.len();
            match result.last() {
                None => result.push(*p),
                Some(kept) if kept.position.distance(p.position) >= distance => result.push(*p),
                Some(_) if is_last => {
                    if result.len() > 1 {
                        result.pop();
                    }
                    result.push(*p);
                }
                Some(_) => {}
            }
        }
        result
    }

    /// Node-wise interpolation between two curves with the same node count.
    /// Handle styles, closure and settings come from `a`.
    pub fn lerp(a: &Curve, b: &Curve, t: f32) -> GeometryResult<Curve> {
        if a.node_count() != b.node_count() {
            return Err(GeometryError::NodeCountMismatch {
                left: a.node_count(),
                right: b.node_count(),
            });
        }
        let nodes = a.nodes.iter().zip(b.nodes.iter()).map(|(x, y)| x.lerp(y, t)).collect();
        Curve::with_settings(nodes, a.closed, a.settings, a.normal_mode)
    }
}
