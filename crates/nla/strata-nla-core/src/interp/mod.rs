//! Interpolation and rotation helpers.
//!
//! `functions` holds the scalar easing used by the reference curve evaluator
//! and the float comparisons shared by the blend algebra; `quat` holds the
//! (w, x, y, z) quaternion operations behind Combine on rotation channels.

pub mod functions;
pub mod quat;

pub use functions::{bezier_ease_t, is_eqf, lerp_f32};
pub use quat::Quat;
