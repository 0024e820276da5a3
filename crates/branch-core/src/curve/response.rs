use serde::{Deserialize, Serialize};

/// Piecewise-linear mapping used wherever a user-authored curve shapes a blend factor.
/// Keys are `(time, value)` pairs; evaluation clamps outside the first and last key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    keys: Vec<(f32, f32)>,
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl ResponseCurve {
    pub fn new(mut keys: Vec<(f32, f32)>) -> Self {
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { keys }
    }

    /// identity on [0, 1]
    pub fn linear() -> Self {
        Self::new(vec![(0., 0.), (1., 1.)])
    }

    /// 1 at 0, falling to 0 at 1
    pub fn falling() -> Self {
        Self::new(vec![(0., 1.), (1., 0.)])
    }

    pub fn constant(value: f32) -> Self {
        Self::new(vec![(0., value)])
    }

    pub fn keys(&self) -> &[(f32, f32)] {
        &self.keys
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(&(t0, v0)) = self.keys.first() else {
            return t;
        };
        if t <= t0 {
            return v0;
        }
        for w in self.keys.windows(2) {
            let ((ta, va), (tb, vb)) = (w[0], w[1]);
            if t <= tb {
                let r = if tb > ta { (t - ta) / (tb - ta) } else { 1. };
                return va + (vb - va) * r;
            }
        }
        self.keys[self.keys.len() - 1].1
    }
}
