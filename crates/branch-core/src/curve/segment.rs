use glam::Vec3;

use super::{ControlNode, CurveSample};

/// number of dense steps evaluated on each segment
pub const SEGMENT_STEPS: usize = 30;

const DERIVATIVE_NUDGE: f32 = 0.001;

/// One cubic Bézier span between two consecutive control nodes.
#[derive(Clone, Debug)]
pub struct CurveSegment {
    controls: [Vec3; 4],
    start: ControlNode,
    end: ControlNode,
    /// arc length at the start of the segment, along the whole curve
    pub length_offset: f32,
    pub length: f32,
    /// dense samples at t = i / SEGMENT_STEPS, lengths relative to the curve start
    pub samples: Vec<CurveSample>,
}

impl CurveSegment {
    pub fn new(start: &ControlNode, end: &ControlNode, length_offset: f32) -> Self {
        let controls = [
            start.position,
            start.position + start.handle2,
            end.position + end.handle1,
            end.position,
        ];
        let mut segment = Self {
            controls,
            start: start.clone(),
            end: end.clone(),
            length_offset,
            length: 0.,
            samples: Vec::with_capacity(SEGMENT_STEPS + 1),
        };

        let mut length = 0.;
        let mut previous: Option<Vec3> = None;
        for i in 0..=SEGMENT_STEPS {
            let t = i as f32 / SEGMENT_STEPS as f32;
            let mut sample = segment.evaluate(t);
            if let Some(p) = previous {
                length += p.distance(sample.position);
            }
            previous = Some(sample.position);
            sample.length_position = length_offset + length;
            segment.samples.push(sample);
        }
        segment.length = length;
        segment
    }

    pub fn position_at(&self, t: f32) -> Vec3 {
        let [p0, p1, p2, p3] = self.controls;
        let u = 1. - t;
        u * u * u * p0 + 3. * u * u * t * p1 + 3. * u * t * t * p2 + t * t * t * p3
    }

    pub fn derivative_at(&self, t: f32) -> Vec3 {
        let [p0, p1, p2, p3] = self.controls;
        let u = 1. - t;
        3. * u * u * (p1 - p0) + 6. * u * t * (p2 - p1) + 3. * t * t * (p3 - p2)
    }

    /// derivative, or a nearby one when the handles collapse onto the node,
    /// or the chord as a last resort
    pub fn tangent_at(&self, t: f32) -> Vec3 {
        let d = self.derivative_at(t);
        if d.length_squared() > f32::EPSILON {
            return d;
        }
        let nudged = if t < 0.5 { t + DERIVATIVE_NUDGE } else { t - DERIVATIVE_NUDGE };
        let d = self.derivative_at(nudged);
        if d.length_squared() > f32::EPSILON {
            return d;
        }
        let chord = self.controls[3] - self.controls[0];
        if chord.length_squared() > f32::EPSILON {
            chord
        } else {
            Vec3::Z
        }
    }

    /// exact evaluation at the Bézier parameter `t`; length fields are left to the caller
    pub fn evaluate(&self, t: f32) -> CurveSample {
        let tangent = self.tangent_at(t);
        CurveSample {
            position: self.position_at(t),
            tangent,
            normal: Vec3::ZERO,
            up: self.start.up.lerp(self.end.up, t),
            forward: tangent.normalize(),
            roll: self.start.roll + (self.end.roll - self.start.roll) * t,
            scale: self.start.scale.lerp(self.end.scale, t),
            girth: 1.,
            length_position: 0.,
            relative_position: 0.,
        }
    }

    /// Bézier parameter at a curve-global arc length, by inverting the dense samples.
    pub fn parameter_at_length(&self, length: f32) -> f32 {
        let local = length - self.length_offset;
        if local <= 0. {
            return 0.;
        }
        if local >= self.length {
            return 1.;
        }
        let step = 1. / SEGMENT_STEPS as f32;
        for i in 1..self.samples.len() {
            let (a, b) = (&self.samples[i - 1], &self.samples[i]);
            if b.length_position - self.length_offset >= local {
                let span = b.length_position - a.length_position;
                let r = if span > 0. {
                    (length - a.length_position) / span
                } else {
                    0.
                };
                return (i as f32 - 1. + r) * step;
            }
        }
        1.
    }
}
