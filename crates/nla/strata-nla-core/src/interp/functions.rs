//! Scalar helpers:
//! - lerp_f32
//! - cubic-bezier timing (x1, y1, x2, y2) solved for y at a given x
//! - epsilon comparison used by every degenerate-case check

/// `|a - b| < eps`.
#[inline]
pub fn is_eqf(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() < eps
}

/// Linear interpolation of scalars.
#[inline]
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Cubic Bezier basis function
#[inline]
fn cubic_bezier(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let u = 1.0 - t;
    u * u * u * p0 + 3.0 * u * u * t * p1 + 3.0 * u * t * t * p2 + t * t * t * p3
}

/// Given control points (x1, y1, x2, y2) and an input t in [0,1],
/// compute the eased y by inverting the x bezier via binary search.
pub fn bezier_ease_t(t: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if x1 == 0.0 && y1 == 0.0 && x2 == 1.0 && y2 == 1.0 {
        return t;
    }
    let mut lo = 0.0f32;
    let mut hi = 1.0f32;
    let mut mid = t;
    for _ in 0..24 {
        let x = cubic_bezier(0.0, x1, x2, 1.0, mid);
        if (x - t).abs() < 1e-6 {
            break;
        }
        if x < t {
            lo = mid;
        } else {
            hi = mid;
        }
        mid = 0.5 * (lo + hi);
    }
    cubic_bezier(0.0, y1, y2, 1.0, mid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_control_points_are_identity() {
        for t in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(bezier_ease_t(t, 0.0, 0.0, 1.0, 1.0), t);
        }
    }

    #[test]
    fn ease_hits_endpoints() {
        assert!(bezier_ease_t(0.0, 0.42, 0.0, 0.58, 1.0).abs() < 1e-4);
        assert!((bezier_ease_t(1.0, 0.42, 0.0, 0.58, 1.0) - 1.0).abs() < 1e-4);
        assert!((bezier_ease_t(0.5, 0.42, 0.0, 0.58, 1.0) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn eqf_uses_strict_tolerance() {
        assert!(is_eqf(1.0, 1.0, f32::EPSILON));
        assert!(!is_eqf(1.0, 1.001, f32::EPSILON));
    }
}
