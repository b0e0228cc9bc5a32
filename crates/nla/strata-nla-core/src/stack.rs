//! Stack evaluation: pick the contributing strip of every evaluated track,
//! accumulate them bottom to top with the non-pushed action on top, register the
//! flush domain of every reachable clip, then flush to properties.
//!
//! Stacks without strips to evaluate play their action straight onto the
//! properties, with no accumulation and no default reset.

use std::borrow::Cow;

use hashbrown::HashSet;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::binding::PropertyAccessor;
use crate::channel::{ChannelRegistry, MixMode};
use crate::data::{BlendMode, Control, ExtendMode, LayerStack, Strip, StripKind};
use crate::ids::{ClipId, StripId};
use crate::interp::functions::is_eqf;
use crate::snapshot::EvalData;
use crate::strip_eval::{ClipLibrary, EvalContext, EvalMode, EvalStrip, StripEvaluator};

/// Which route an evaluation took.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalPath {
    /// Nothing to evaluate.
    #[default]
    Idle,
    /// Strips were accumulated and the domain flushed.
    Nla,
    /// The action was written directly.
    ActionOnly,
}

/// Summary of one stack evaluation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub path: EvalPath,
    /// Strips that contributed, including the action strip.
    pub strips_evaluated: usize,
    /// Channels known to the session.
    pub channels: usize,
    pub values_written: usize,
    /// Writes the accessor refused.
    pub write_failures: usize,
}

/// Whether track `index` takes part in evaluation. Disabled tracks are skipped unless
/// they hold the tweaked strip, and in tweak mode so are the tracks above the tweaked
/// one unless upper evaluation is on. Soloing overrides muting.
pub fn is_track_evaluated(stack: &LayerStack, index: usize) -> bool {
    let Some(track) = stack.tracks.get(index) else {
        return false;
    };
    let is_tweak_track = stack.tweak.is_some_and(|t| t.track == index);
    let above_tweak =
        stack.tweak.is_some_and(|t| index > t.track && !t.evaluate_upper_tracks);
    if (track.disabled || above_tweak) && !is_tweak_track {
        return false;
    }
    if stack.is_soloing() {
        track.solo
    } else {
        !track.muted
    }
}

/// Evaluation copy of the tweaked strip: no neighbours, bounds synced to the clip if
/// requested, and held at global time when not tweaking in place. For keyframing the
/// extend mode decides whether keys may land outside the strip.
pub fn tweak_strip(stack: &LayerStack, clips: &ClipLibrary, keyframing: bool) -> Option<Strip> {
    let tweak = stack.tweak?;
    let mut strip = stack.tweaked_strip()?.clone();
    if strip.sync_length {
        if let Some(clip) = strip.clip_id().and_then(|id| clips.get(&id)) {
            strip.sync_to_clip(clip);
        }
    }

    let in_place = tweak.in_place && strip.controls.time.is_none();
    if !in_place {
        strip.extend_mode = ExtendMode::Hold;
        strip.no_time_map = true;
    }
    if keyframing {
        strip.extend_mode = if in_place && !strip.sync_length {
            ExtendMode::Nothing
        } else {
            ExtendMode::Hold
        };
    }
    Some(strip)
}

/// The non-pushed action as a synthetic strip spanning its clip range.
pub fn action_strip(stack: &LayerStack, clips: &ClipLibrary, keyframing: bool) -> Option<Strip> {
    let clip_id = stack.action?;
    let Some(clip) = clips.get(&clip_id) else {
        warn!("stack '{}' references unloaded action {:?}", stack.name, clip_id);
        return None;
    };
    let (clip_start, clip_end) = clip.frame_range();
    let end = if is_eqf(clip_start, clip_end, f32::EPSILON) {
        clip_start + 1.0
    } else {
        clip_end
    };

    let mut strip = Strip::clip(StripId::ACTION, clip_id, clip_start, end)
        .with_name("action")
        .with_clip_range(clip_start, clip_end)
        .with_blend_mode(stack.action_blend_mode)
        .with_extend_mode(stack.action_extend_mode)
        .with_influence(Control::Constant(stack.action_influence));
    strip.no_time_map = strip.extend_mode != ExtendMode::Nothing;

    let evaluate_upper = stack.tweak.map_or(true, |t| t.evaluate_upper_tracks);
    strip.muted = stack.is_soloing() || !evaluate_upper;
    if keyframing {
        strip.extend_mode = ExtendMode::Hold;
    }
    Some(strip)
}

/// An action with no strips around it, no solo and no tweak plays without the NLA.
pub(crate) fn evaluates_action_without_nla(stack: &LayerStack, has_strips: bool) -> bool {
    stack.action.is_some() && !has_strips && !stack.is_soloing() && stack.tweak.is_none()
}

/// Contributing strips at `time`, bottom to top. `None` when the action should be
/// evaluated without the NLA instead.
pub fn active_strips<'s>(
    ctx: &EvalContext<'_>,
    stack: &'s LayerStack,
    time: f32,
) -> Option<Vec<EvalStrip<'s>>> {
    let tweak_track = stack.tweak.map(|t| t.track);
    let mut strips = Vec::with_capacity(stack.tracks.len() + 1);
    let mut has_strips = false;

    for (index, track) in stack.tracks.iter().enumerate() {
        if !is_track_evaluated(stack, index) {
            continue;
        }
        has_strips |= !track.strips.is_empty();
        let es = if tweak_track == Some(index) {
            tweak_strip(stack, ctx.clips, false)
                .and_then(|s| ctx.single_strip(Cow::Owned(s), Some(index), time))
        } else {
            ctx.find_active_strip(&track.strips, Some(index), time)
        };
        strips.extend(es);
    }

    if evaluates_action_without_nla(stack, has_strips) {
        return None;
    }
    if let Some(action) = action_strip(stack, ctx.clips, false) {
        strips.extend(ctx.single_strip(Cow::Owned(action), None, time));
    }
    Some(strips)
}

/// Blend `strips` in order onto `data.snapshot`.
pub fn accumulate(
    ctx: &EvalContext<'_>,
    strips: &[EvalStrip<'_>],
    accessor: &dyn PropertyAccessor,
    data: &mut EvalData,
) {
    let mut evaluator = StripEvaluator::new(*ctx);
    let EvalData { registry, snapshot } = data;
    for es in strips {
        evaluator.evaluate(registry, accessor, es, EvalMode::Blend, snapshot);
    }
}

/// Register every element any reachable clip can write, whether or not its strip is
/// active now, so that inactive channels flush back to their defaults.
pub fn compute_domain(
    ctx: &EvalContext<'_>,
    stack: &LayerStack,
    accessor: &dyn PropertyAccessor,
    registry: &mut ChannelRegistry,
) {
    let mut touched = HashSet::new();

    let action = match stack.tweak {
        None => stack.action,
        Some(t) if t.evaluate_upper_tracks => stack.action,
        Some(_) => None,
    };
    if let Some(id) = action {
        domain_clip(ctx, accessor, registry, id, &mut touched);
    }

    let soloing = stack.is_soloing();
    for track in &stack.tracks {
        let skip = if soloing { !track.solo } else { track.muted };
        if !skip {
            domain_strips(ctx, accessor, registry, &track.strips, &mut touched);
        }
    }
}

fn domain_strips(
    ctx: &EvalContext<'_>,
    accessor: &dyn PropertyAccessor,
    registry: &mut ChannelRegistry,
    strips: &[Strip],
    touched: &mut HashSet<ClipId>,
) {
    for strip in strips {
        if let Some(id) = strip.clip_id() {
            domain_clip(ctx, accessor, registry, id, touched);
        }
        if let StripKind::Meta(children) = &strip.kind {
            domain_strips(ctx, accessor, registry, children, touched);
        }
    }
}

fn domain_clip(
    ctx: &EvalContext<'_>,
    accessor: &dyn PropertyAccessor,
    registry: &mut ChannelRegistry,
    id: ClipId,
    touched: &mut HashSet<ClipId>,
) {
    if !touched.insert(id) {
        return;
    }
    let Some(clip) = ctx.clips.get(&id) else {
        return;
    };
    for curve in clip.curves.iter().filter(|c| c.is_evaluatable()) {
        let Some(cid) = registry.resolve_path(accessor, &curve.path) else {
            continue;
        };
        let channel = registry.channel_mut(cid);
        if channel.mix_mode == MixMode::Quaternion {
            channel.domain.set_all(true);
            continue;
        }
        if let Some(index) = channel.validate_index(curve.array_index) {
            channel.domain.enable(index);
        }
    }
}

/// Write every domain element from the accumulated snapshot (or its defaults).
/// Returns `(written, refused)`.
pub fn flush(data: &EvalData, accessor: &mut dyn PropertyAccessor) -> (usize, usize) {
    let mut written = 0;
    let mut refused = 0;
    for channel in data.registry.iter() {
        let values = &data.snapshot.find(&data.registry, channel.id).values;
        for index in channel.domain.ones() {
            if accessor.write(channel.handle, index, values[index]) {
                written += 1;
            } else {
                debug!(
                    "write refused for '{}'[{}]",
                    channel.path.as_deref().unwrap_or("<handle>"),
                    index
                );
                refused += 1;
            }
        }
    }
    (written, refused)
}

/// Sample `clip` at global `time` straight onto the properties.
pub fn evaluate_action_directly(
    ctx: &EvalContext<'_>,
    clip: ClipId,
    time: f32,
    accessor: &mut dyn PropertyAccessor,
) -> EvalReport {
    let Some(clip) = ctx.clips.get(&clip) else {
        warn!("action {:?} is not loaded", clip);
        return EvalReport::default();
    };

    let mut report = EvalReport {
        path: EvalPath::ActionOnly,
        ..EvalReport::default()
    };
    for curve in clip.curves.iter().filter(|c| c.is_evaluatable()) {
        let Some(handle) = accessor.resolve(&curve.path) else {
            debug!("invalid property path '{}'", curve.path);
            continue;
        };
        let Some(info) = accessor.info(handle).filter(|info| info.animatable) else {
            continue;
        };
        let index = if !info.is_array {
            0
        } else if curve.array_index < info.len {
            curve.array_index
        } else {
            debug!(
                "invalid array index {} for '{}' (length {})",
                curve.array_index, curve.path, info.len
            );
            continue;
        };

        let value = ctx.evaluator.evaluate(curve, time);
        if accessor.write(handle, index, value) {
            report.values_written += 1;
        } else {
            report.write_failures += 1;
        }
    }
    report
}

/// Evaluate `stack` at `time` and write the result through `accessor`.
pub fn evaluate_stack(
    ctx: &EvalContext<'_>,
    stack: &LayerStack,
    time: f32,
    accessor: &mut dyn PropertyAccessor,
) -> EvalReport {
    if stack.evaluation_off || stack.tracks.is_empty() {
        return match stack.action {
            Some(action) => evaluate_action_directly(ctx, action, time, accessor),
            None => EvalReport::default(),
        };
    }

    let Some(strips) = active_strips(ctx, stack, time) else {
        debug!(
            "stack '{}' has no strips to evaluate, playing its action directly",
            stack.name
        );
        return match stack.action {
            Some(action) => evaluate_action_directly(ctx, action, time, accessor),
            None => EvalReport::default(),
        };
    };

    let mut data = EvalData::new(ctx.config);
    accumulate(ctx, &strips, &*accessor, &mut data);
    compute_domain(ctx, stack, &*accessor, &mut data.registry);
    let (values_written, write_failures) = flush(&data, accessor);

    EvalReport {
        path: EvalPath::Nla,
        strips_evaluated: strips.len(),
        channels: data.registry.len(),
        values_written,
        write_failures,
    }
}

/// Whether a strip fully hides everything below it.
#[inline]
pub(crate) fn is_full_replace(blend_mode: BlendMode, influence: f32, eps: f32) -> bool {
    blend_mode == BlendMode::Replace && is_eqf(influence, 1.0, eps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Clip, Curve, Track, TweakMode};
    use crate::ids::ClipId;

    fn strip(id: u32, clip: u32, start: f32, end: f32) -> Strip {
        Strip::clip(StripId(id), ClipId(clip), start, end)
    }

    fn three_tracks() -> LayerStack {
        let mut stack = LayerStack::new("s");
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let track = Track::new(name)
                .with_strip(strip(i as u32, 0, 0.0, 10.0))
                .unwrap();
            stack.push_track(track);
        }
        stack
    }

    #[test]
    fn solo_overrides_mute() {
        let mut stack = three_tracks();
        stack.tracks[0].muted = true;
        assert!(!is_track_evaluated(&stack, 0));
        stack.tracks[0].solo = true;
        assert!(is_track_evaluated(&stack, 0));
        assert!(!is_track_evaluated(&stack, 1));
        assert!(!is_track_evaluated(&stack, 5));
    }

    #[test]
    fn tweak_disables_upper_tracks() {
        let mut stack = three_tracks();
        stack.tracks[1].disabled = true;
        stack.enter_tweak(1, 0, false).unwrap();
        assert!(is_track_evaluated(&stack, 0));
        assert!(is_track_evaluated(&stack, 1));
        assert!(!is_track_evaluated(&stack, 2));

        stack.tweak = Some(TweakMode {
            evaluate_upper_tracks: true,
            ..stack.tweak.unwrap()
        });
        assert!(is_track_evaluated(&stack, 2));
    }

    #[test]
    fn action_strip_spans_clip_and_mutes_when_soloing() {
        let mut clips = ClipLibrary::new();
        clips.insert(
            ClipId(3),
            Clip::new("act", vec![Curve::constant("x", 0, 1.0)]),
        );
        let mut stack = three_tracks();
        stack.action = Some(ClipId(3));

        let s = action_strip(&stack, &clips, false).unwrap();
        assert_eq!((s.start, s.end), (0.0, 1.0));
        assert_eq!((s.clip_start, s.clip_end), (0.0, 0.0));
        assert!(s.no_time_map);
        assert!(!s.muted);

        stack.tracks[2].solo = true;
        assert!(action_strip(&stack, &clips, false).unwrap().muted);

        stack.action_extend_mode = ExtendMode::Nothing;
        let kf = action_strip(&stack, &clips, true).unwrap();
        assert_eq!(kf.extend_mode, ExtendMode::Hold);
        assert!(!kf.no_time_map);
    }

    #[test]
    fn tweak_strip_keyframing_extend() {
        let clips = ClipLibrary::new();
        let mut stack = three_tracks();
        stack.enter_tweak(0, 0, false).unwrap();

        let s = tweak_strip(&stack, &clips, true).unwrap();
        assert_eq!(s.extend_mode, ExtendMode::Nothing);
        assert!(!s.no_time_map);

        stack.tweak = Some(TweakMode {
            in_place: false,
            ..stack.tweak.unwrap()
        });
        let s = tweak_strip(&stack, &clips, false).unwrap();
        assert!(s.no_time_map);
        assert_eq!(s.extend_mode, ExtendMode::Hold);
    }

    #[test]
    fn full_replace_check() {
        assert!(is_full_replace(BlendMode::Replace, 1.0, f32::EPSILON));
        assert!(!is_full_replace(BlendMode::Replace, 0.5, f32::EPSILON));
        assert!(!is_full_replace(BlendMode::Add, 1.0, f32::EPSILON));
    }
}
