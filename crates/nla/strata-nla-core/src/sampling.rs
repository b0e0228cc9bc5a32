//! Curve sampling.
//!
//! The engine consumes single-curve evaluation through [`CurveEvaluator`];
//! hosts with their own curve model (modifiers, drivers, custom easing)
//! implement it themselves. [`KeyframeEvaluator`] is the reference
//! implementation over [`Curve`] keypoints:
//! - before the first / after the last key the end value is held
//! - `Constant` holds the left key, `Linear` lerps
//! - `Bezier` eases time with control points from the left key's `out` and the
//!   right key's `in` (defaults `(0.42, 0.0)` / `(0.58, 1.0)`), then lerps

use crate::data::{Curve, Interpolation, Keypoint};
use crate::interp::functions::{bezier_ease_t, lerp_f32};

const DEFAULT_IN: [f32; 2] = [0.58, 1.0];

pub trait CurveEvaluator {
    /// Value of `curve` at `time` (frames). Curve-level time remapping is the
    /// implementor's concern.
    fn evaluate(&self, curve: &Curve, time: f32) -> f32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct KeyframeEvaluator;

impl CurveEvaluator for KeyframeEvaluator {
    fn evaluate(&self, curve: &Curve, time: f32) -> f32 {
        sample_curve(&curve.points, time)
    }
}

impl<F> CurveEvaluator for F
where
    F: Fn(&Curve, f32) -> f32,
{
    fn evaluate(&self, curve: &Curve, time: f32) -> f32 {
        self(curve, time)
    }
}

/// Sample keypoints sorted by frame. No keys yields 0.0.
pub fn sample_curve(points: &[Keypoint], time: f32) -> f32 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    if time <= first.frame {
        return first.value;
    }
    if time >= last.frame {
        return last.value;
    }

    // First key strictly after `time`; guaranteed in 1..len by the checks above.
    let i1 = points.partition_point(|p| p.frame <= time);
    let left = &points[i1 - 1];
    let right = &points[i1];
    let span = (right.frame - left.frame).max(f32::EPSILON);
    let t = ((time - left.frame) / span).clamp(0.0, 1.0);

    match left.interpolation {
        Interpolation::Constant => left.value,
        Interpolation::Linear => lerp_f32(left.value, right.value, t),
        Interpolation::Bezier { out, .. } => {
            let r#in = match right.interpolation {
                Interpolation::Bezier { r#in, .. } => r#in,
                _ => DEFAULT_IN,
            };
            let eased = bezier_ease_t(t, out[0], out[1], r#in[0], r#in[1]);
            lerp_f32(left.value, right.value, eased)
        }
    }
}
