//! Blend/Combine algebra.
//!
//! Forward blending merges an upper strip value onto the accumulated lower
//! value. The two inverse operators solve the same equation for the lower value
//! (given the blended result and the strip) or for the strip value (given the
//! blended result and the lower stack). Degenerate divisions never error: `0/0`
//! resolves to the neutral value and genuine divisions by zero report `None`,
//! which callers turn into a cleared remap bit.
//!
//! Dispatch is a table over (blend mode, mix mode), see [`BlendOp::for_modes`].
//! Combine only reaches the scalar operators through that table; quaternion
//! channels under Combine take the all-or-nothing rotation path.

use crate::channel::{Channel, ChannelRegistry, MixMode};
use crate::data::BlendMode;
use crate::interp::functions::is_eqf;
use crate::interp::quat::{self, Quat};
use crate::snapshot::{ChannelSnapshot, Snapshot};

/// Operator for one (blend mode, mix mode) pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
    Multiply,
    Replace,
    /// Combine on additive and axis-angle channels.
    CombineAdd,
    /// Combine on proportional channels.
    CombineMultiply,
    /// Combine on quaternion channels; works on all four elements at once.
    CombineQuaternion,
}

impl BlendOp {
    pub fn for_modes(blend_mode: BlendMode, mix_mode: MixMode) -> Self {
        match (blend_mode, mix_mode) {
            (BlendMode::Add, _) => BlendOp::Add,
            (BlendMode::Subtract, _) => BlendOp::Subtract,
            (BlendMode::Multiply, _) => BlendOp::Multiply,
            (BlendMode::Replace, _) => BlendOp::Replace,
            (BlendMode::Combine, MixMode::Add | MixMode::AxisAngle) => BlendOp::CombineAdd,
            (BlendMode::Combine, MixMode::Multiply) => BlendOp::CombineMultiply,
            (BlendMode::Combine, MixMode::Quaternion) => BlendOp::CombineQuaternion,
        }
    }

    #[inline]
    pub fn is_quaternion(self) -> bool {
        self == BlendOp::CombineQuaternion
    }

    /// Blended value of one element. Zero influence returns `lower` untouched.
    pub fn forward(self, base: f32, lower: f32, strip: f32, influence: f32, eps: f32) -> f32 {
        if is_eqf(influence, 0.0, eps) {
            return lower;
        }
        match self {
            BlendOp::Add => lower + strip * influence,
            BlendOp::Subtract => lower - strip * influence,
            BlendOp::Multiply => influence * (lower * strip) + (1.0 - influence) * lower,
            BlendOp::Replace => lower * (1.0 - influence) + strip * influence,
            BlendOp::CombineAdd => lower + (strip - base) * influence,
            BlendOp::CombineMultiply => {
                let base = if is_eqf(base, 0.0, eps) { 1.0 } else { base };
                lower * (strip / base).powf(influence)
            }
            BlendOp::CombineQuaternion => lower,
        }
    }

    /// Lower value that blends with `strip` into `blended`.
    pub fn inverse_lower(
        self,
        base: f32,
        strip: f32,
        blended: f32,
        influence: f32,
        eps: f32,
    ) -> Option<f32> {
        if is_eqf(influence, 0.0, eps) {
            return Some(blended);
        }
        match self {
            BlendOp::Add => Some(blended - strip * influence),
            BlendOp::Subtract => Some(blended + strip * influence),
            BlendOp::Multiply => {
                let denominator = influence * strip + (1.0 - influence);
                if is_eqf(denominator, 0.0, eps) {
                    return is_eqf(blended, 0.0, eps).then_some(1.0);
                }
                Some(blended / denominator)
            }
            BlendOp::Replace => {
                if is_eqf(influence, 1.0, eps) {
                    return None;
                }
                Some((blended - strip * influence) / (1.0 - influence))
            }
            BlendOp::CombineAdd => Some(blended - (strip - base) * influence),
            BlendOp::CombineMultiply => {
                if is_eqf(strip, 0.0, eps) {
                    return is_eqf(blended, 0.0, eps).then_some(1.0);
                }
                let base = if is_eqf(base, 0.0, eps) { 1.0 } else { base };
                Some(blended / (strip / base).powf(influence))
            }
            BlendOp::CombineQuaternion => None,
        }
    }

    /// Strip value that blends onto `lower` into `blended`. Zero influence has no solution.
    pub fn inverse_upper(
        self,
        base: f32,
        lower: f32,
        blended: f32,
        influence: f32,
        eps: f32,
    ) -> Option<f32> {
        if is_eqf(influence, 0.0, eps) {
            return None;
        }
        match self {
            BlendOp::Add => Some((blended - lower) / influence),
            BlendOp::Subtract => Some((lower - blended) / influence),
            BlendOp::Multiply => {
                if is_eqf(lower, 0.0, eps) {
                    return is_eqf(blended, 0.0, eps).then_some(1.0);
                }
                Some((blended - lower) / (influence * lower) + 1.0)
            }
            BlendOp::Replace => Some((blended - lower * (1.0 - influence)) / influence),
            BlendOp::CombineAdd => Some(base + (blended - lower) / influence),
            BlendOp::CombineMultiply => {
                let base = if is_eqf(base, 0.0, eps) { 1.0 } else { base };
                if is_eqf(lower, 0.0, eps) {
                    return is_eqf(blended, 0.0, eps).then_some(base);
                }
                Some(base * (blended / lower).powf(1.0 / influence))
            }
            BlendOp::CombineQuaternion => None,
        }
    }
}

/// `normalize(lower) * normalize(strip)^influence`.
pub fn combine_quaternion(lower: Quat, strip: Quat, influence: f32) -> Quat {
    let lower = quat::normalize(lower);
    let strip = quat::pow_normalized(quat::normalize(strip), influence);
    quat::mul(lower, strip)
}

/// `normalize(blended) * inverse(normalize(strip)^influence)`.
pub fn combine_quaternion_inverse_lower(
    strip: Quat,
    blended: Quat,
    influence: f32,
    eps: f32,
) -> Quat {
    if is_eqf(influence, 0.0, eps) {
        return quat::normalize(blended);
    }
    let strip = quat::pow_normalized(quat::normalize(strip), influence);
    quat::mul(quat::normalize(blended), quat::invert_normalized(strip))
}

/// `(inverse(normalize(lower)) * normalize(blended))^(1/influence)`.
pub fn combine_quaternion_inverse_upper(
    lower: Quat,
    blended: Quat,
    influence: f32,
    eps: f32,
) -> Option<Quat> {
    if is_eqf(influence, 0.0, eps) {
        return None;
    }
    let lower = quat::invert_normalized(quat::normalize(lower));
    let q = quat::mul(lower, quat::normalize(blended));
    Some(quat::pow_normalized(q, 1.0 / influence))
}

/// Blend `upper` onto `target`, which holds the lower values on entry.
///
/// Elements outside the upper blend domain, an absent upper channel and zero
/// influence all leave the lower value in place.
pub fn blend_channel(
    channel: &Channel,
    target: &mut [f32],
    upper: Option<&ChannelSnapshot>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    let Some(upper) = upper else {
        return;
    };
    if is_eqf(influence, 0.0, eps) {
        return;
    }

    let op = BlendOp::for_modes(blend_mode, channel.mix_mode);
    if op.is_quaternion() {
        if !upper.blend_domain.test(0) {
            return;
        }
        let blended = combine_quaternion(
            quat::from_slice(target),
            quat::from_slice(&upper.values),
            influence,
        );
        target[..4].copy_from_slice(&blended);
        return;
    }

    let base = channel.defaults();
    for (j, value) in target.iter_mut().enumerate() {
        if !upper.blend_domain.test(j) {
            continue;
        }
        *value = op.forward(base[j], *value, upper.values[j], influence, eps);
    }
}

/// Solve for the lower values in place. `target` holds the blended values and
/// their remap domain on entry; on exit it holds the lower values and which of
/// them were solvable.
pub fn invert_lower_channel(
    channel: &Channel,
    target: &mut ChannelSnapshot,
    upper: Option<&ChannelSnapshot>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    let op = BlendOp::for_modes(blend_mode, channel.mix_mode);

    if op.is_quaternion() && !target.remap_domain.all() {
        target.remap_domain.set_all(false);
        return;
    }

    // Absent upper or zero influence: the blended value was copied from below.
    let Some(upper) = upper else {
        return;
    };
    if is_eqf(influence, 0.0, eps) {
        return;
    }

    if op.is_quaternion() {
        if upper.blend_domain.test(0) {
            let lower = combine_quaternion_inverse_lower(
                quat::from_slice(&upper.values),
                quat::from_slice(&target.values),
                influence,
                eps,
            );
            target.values[..4].copy_from_slice(&lower);
        }
        target.remap_domain.set_all(true);
        return;
    }

    let base = channel.defaults();
    for j in 0..target.len() {
        if !target.remap_domain.test(j) {
            continue;
        }
        if !upper.blend_domain.test(j) {
            continue;
        }
        match op.inverse_lower(base[j], upper.values[j], target.values[j], influence, eps) {
            Some(v) => target.values[j] = v,
            None => target.remap_domain.disable(j),
        }
    }
}

/// Solve for the strip values in place against `lower`. `target` holds the
/// blended values and their remap domain on entry.
pub fn invert_upper_channel(
    channel: &Channel,
    lower: &[f32],
    target: &mut ChannelSnapshot,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    if is_eqf(influence, 0.0, eps) {
        target.remap_domain.set_all(false);
        return;
    }

    let op = BlendOp::for_modes(blend_mode, channel.mix_mode);
    if op.is_quaternion() {
        if !target.remap_domain.all() {
            target.remap_domain.set_all(false);
            return;
        }
        match combine_quaternion_inverse_upper(
            quat::from_slice(lower),
            quat::from_slice(&target.values),
            influence,
            eps,
        ) {
            Some(strip) => {
                target.values[..4].copy_from_slice(&strip);
                target.remap_domain.set_all(true);
            }
            None => target.remap_domain.set_all(false),
        }
        return;
    }

    let base = channel.defaults();
    for j in 0..target.len() {
        if !target.remap_domain.test(j) {
            continue;
        }
        match op.inverse_upper(base[j], lower[j], target.values[j], influence, eps) {
            Some(v) => target.values[j] = v,
            None => target.remap_domain.disable(j),
        }
    }
}

/// Blend every channel of `upper` onto `acc` in place. Channels absent from
/// both are skipped; a channel only `upper` has starts from `acc`'s fallback.
pub fn blend_snapshot_in_place(
    registry: &ChannelRegistry,
    acc: &mut Snapshot<'_>,
    upper: &Snapshot<'_>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    for id in registry.ids() {
        let upper_cs = upper.get(id);
        if upper_cs.is_none() && acc.get(id).is_none() {
            continue;
        }
        let target = acc.ensure(registry, id);
        blend_channel(
            registry.channel(id),
            &mut target.values,
            upper_cs,
            blend_mode,
            influence,
            eps,
        );
    }
}

/// Blend `upper` over `lower` into a new parentless snapshot holding only the
/// channels either side has locally.
pub fn blend_snapshots(
    registry: &ChannelRegistry,
    lower: &Snapshot<'_>,
    upper: &Snapshot<'_>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) -> Snapshot<'static> {
    let mut out = Snapshot::new(registry.len());
    for id in registry.ids() {
        let upper_cs = upper.get(id);
        if upper_cs.is_none() && lower.get(id).is_none() {
            continue;
        }
        let mut values = lower.find(registry, id).values.clone();
        blend_channel(
            registry.channel(id),
            &mut values,
            upper_cs,
            blend_mode,
            influence,
            eps,
        );
        out.insert(ChannelSnapshot::from_values(id, values));
    }
    out
}

/// Strip `upper`'s contribution from every channel local to `blended`.
pub fn invert_lower_snapshot_in_place(
    registry: &ChannelRegistry,
    blended: &mut Snapshot<'_>,
    upper: &Snapshot<'_>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    for id in registry.ids() {
        if let Some(target) = blended.get_mut(id) {
            invert_lower_channel(
                registry.channel(id),
                target,
                upper.get(id),
                blend_mode,
                influence,
                eps,
            );
        }
    }
}

/// Solve every channel local to `blended` for the strip value over `lower`.
pub fn invert_upper_snapshot_in_place(
    registry: &ChannelRegistry,
    lower: &Snapshot<'_>,
    blended: &mut Snapshot<'_>,
    blend_mode: BlendMode,
    influence: f32,
    eps: f32,
) {
    for id in registry.ids() {
        if let Some(target) = blended.get_mut(id) {
            let lower_values = &lower.find(registry, id).values;
            invert_upper_channel(
                registry.channel(id),
                lower_values,
                target,
                blend_mode,
                influence,
                eps,
            );
        }
    }
}
