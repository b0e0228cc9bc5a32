//! Quaternion helpers in (w, x, y, z) order.

/// Quaternion as `[w, x, y, z]`.
pub type Quat = [f32; 4];

pub const IDENTITY: Quat = [1.0, 0.0, 0.0, 0.0];

#[inline]
pub fn dot(a: Quat, b: Quat) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

/// Unit-length copy. A zero quaternion normalizes to (0, 1, 0, 0).
#[inline]
pub fn normalize(q: Quat) -> Quat {
    let len = dot(q, q).sqrt();
    if len != 0.0 {
        let inv = len.recip();
        [q[0] * inv, q[1] * inv, q[2] * inv, q[3] * inv]
    } else {
        [0.0, 1.0, 0.0, 0.0]
    }
}

/// Hamilton product `a * b`.
#[inline]
pub fn mul(a: Quat, b: Quat) -> Quat {
    [
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] + a[2] * b[0] + a[3] * b[1] - a[1] * b[3],
        a[0] * b[3] + a[3] * b[0] + a[1] * b[2] - a[2] * b[1],
    ]
}

/// Inverse of a unit quaternion (its conjugate).
#[inline]
pub fn invert_normalized(q: Quat) -> Quat {
    [q[0], -q[1], -q[2], -q[3]]
}

/// Spherical power of a unit quaternion: scales its rotation angle by `fac`.
pub fn pow_normalized(q: Quat, fac: f32) -> Quat {
    let angle = fac * q[0].clamp(-1.0, 1.0).acos();
    let (si, co) = angle.sin_cos();
    let axis_len = (q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if axis_len != 0.0 {
        let s = si / axis_len;
        [co, q[1] * s, q[2] * s, q[3] * s]
    } else {
        [co, 0.0, 0.0, 0.0]
    }
}

#[inline]
pub fn from_slice(values: &[f32]) -> Quat {
    [values[0], values[1], values[2], values[3]]
}
