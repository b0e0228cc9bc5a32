//! Strip evaluation.
//!
//! Active-strip lookup turns a track's strips and a global time into an
//! [`EvalStrip`]: the chosen strip, where the time fell relative to it, and the
//! strip's influence and local time at that (possibly clamped) frame.
//! [`StripEvaluator`] then writes that strip's contribution into a snapshot in
//! one of three [`EvalMode`]s. Meta strips and transitions recurse; a visited
//! set threaded through the evaluator truncates re-entry silently.

use std::borrow::Cow;

use hashbrown::{HashMap, HashSet};
use log::{debug, trace, warn};

use crate::binding::PropertyAccessor;
use crate::blend::{blend_snapshot_in_place, blend_snapshots, invert_lower_snapshot_in_place};
use crate::channel::{ChannelRegistry, MixMode};
use crate::config::Config;
use crate::data::{BlendMode, Clip, Control, ExtendMode, Strip, StripKind};
use crate::ids::{ChannelId, ClipId, StripId};
use crate::interp::functions::is_eqf;
use crate::mask::ValidMask;
use crate::sampling::CurveEvaluator;
use crate::snapshot::Snapshot;

/// Clips by id, as stored by the engine.
pub type ClipLibrary = HashMap<ClipId, Clip>;

/// Where the evaluation time fell relative to the chosen strip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Region {
    /// Held backwards; time clamped to the strip start.
    Before,
    Within,
    /// Held forwards; time clamped to the strip end.
    After,
    /// First endpoint of a transition.
    TransitionStart,
    /// Second endpoint of a transition.
    TransitionEnd,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalMode {
    /// Blend the strip onto the accumulated snapshot.
    Blend,
    /// Write the strip's raw values, ignoring blend mode and influence.
    NoBlend,
    /// Remove the strip's contribution from a blended snapshot.
    InvertLower,
}

/// A strip picked for evaluation at one frame.
#[derive(Clone, Debug)]
pub struct EvalStrip<'a> {
    pub strip: Cow<'a, Strip>,
    /// Strips sharing the track (or meta parent) with `strip`; empty for synthesized strips.
    pub siblings: &'a [Strip],
    /// Position of `strip` within `siblings`.
    pub index: usize,
    /// Owning track, `None` inside meta strips and for the action strip.
    pub track_index: Option<usize>,
    pub region: Region,
    pub strip_time: f32,
    pub influence: f32,
}

impl<'a> EvalStrip<'a> {
    #[inline]
    pub fn blend_mode(&self) -> BlendMode {
        self.strip.blend_mode
    }

    /// Both transition endpoints in blend order (swapped for reversed transitions), with
    /// controls evaluated at the transition's start and end frames.
    pub fn transition_endpoints(&self, ctx: &EvalContext<'_>) -> Option<[EvalStrip<'a>; 2]> {
        if !matches!(self.strip.kind, StripKind::Transition) || self.index == 0 {
            return None;
        }
        let prev = self.siblings.get(self.index - 1)?;
        let next = self.siblings.get(self.index + 1)?;

        let endpoint = |strip: &'a Strip, index: usize, time: f32| {
            let (influence, strip_time) = ctx.evaluate_controls(strip, time);
            EvalStrip {
                strip: Cow::Borrowed(strip),
                siblings: self.siblings,
                index,
                track_index: self.track_index,
                region: Region::TransitionStart,
                strip_time,
                influence,
            }
        };
        let mut from = endpoint(prev, self.index - 1, self.strip.start);
        let mut to = endpoint(next, self.index + 1, self.strip.end);
        if self.strip.reversed {
            std::mem::swap(&mut from, &mut to);
        }
        to.region = Region::TransitionEnd;
        Some([from, to])
    }
}

/// Read-only inputs shared by every strip evaluated in one pass.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub clips: &'a ClipLibrary,
    pub evaluator: &'a dyn CurveEvaluator,
    pub config: &'a Config,
}

impl<'a> EvalContext<'a> {
    pub fn new(clips: &'a ClipLibrary, evaluator: &'a dyn CurveEvaluator, config: &'a Config) -> Self {
        Self {
            clips,
            evaluator,
            config,
        }
    }

    #[inline]
    fn eps(&self) -> f32 {
        self.config.float_epsilon
    }

    /// Loaded clip behind a clip strip.
    pub fn clip(&self, strip: &Strip) -> Option<&'a Clip> {
        strip.clip_id().and_then(|id| self.clips.get(&id))
    }

    pub fn control_value(&self, control: &Control, time: f32) -> f32 {
        match control {
            Control::Constant(v) => *v,
            Control::Curve(curve) => self.evaluator.evaluate(curve, time),
        }
    }

    /// User influence if set (clamped to `[0, 1]`), else the blend-in/out ramp.
    pub fn strip_influence(&self, strip: &Strip, time: f32) -> f32 {
        match &strip.controls.influence {
            Some(control) => self.control_value(control, time).clamp(0.0, 1.0),
            None => blend_in_out_influence(strip, time, self.eps()),
        }
    }

    /// Local evaluation time of `strip` at global `time`.
    pub fn strip_time(&self, strip: &Strip, time: f32) -> f32 {
        if strip.no_time_map {
            return time;
        }
        match &strip.controls.time {
            None => strip_frame(strip, time, self.eps()),
            Some(control) => {
                let t = self.control_value(control, time);
                if strip.controls.cyclic_time {
                    (t - strip.clip_start) % strip.clip_length_nonzero()
                } else {
                    t
                }
            }
        }
    }

    /// `(influence, strip_time)` at `time`.
    #[inline]
    pub fn evaluate_controls(&self, strip: &Strip, time: f32) -> (f32, f32) {
        (self.strip_influence(strip, time), self.strip_time(strip, time))
    }

    /// The strip of `strips` (sorted, non-overlapping) that contributes at `time`.
    pub fn find_active_strip<'s>(
        &self,
        strips: &'s [Strip],
        track_index: Option<usize>,
        time: f32,
    ) -> Option<EvalStrip<'s>> {
        let (index, region) = pick_strip(strips, time)?;
        self.activate(Cow::Borrowed(&strips[index]), strips, index, track_index, region, time)
    }

    /// Lookup over a lone strip with no neighbours, such as a synthesized action strip.
    pub fn single_strip<'s>(
        &self,
        strip: Cow<'s, Strip>,
        track_index: Option<usize>,
        time: f32,
    ) -> Option<EvalStrip<'s>> {
        let (_, region) = pick_strip(std::slice::from_ref(strip.as_ref()), time)?;
        self.activate(strip, &[], 0, track_index, region, time)
    }

    fn activate<'s>(
        &self,
        strip: Cow<'s, Strip>,
        siblings: &'s [Strip],
        index: usize,
        track_index: Option<usize>,
        region: Region,
        time: f32,
    ) -> Option<EvalStrip<'s>> {
        if strip.muted {
            return None;
        }
        let time = match region {
            Region::Before => strip.start,
            Region::After => strip.end,
            _ => time,
        };
        let (influence, strip_time) = self.evaluate_controls(&strip, time);
        if influence <= 0.0 {
            return None;
        }
        match strip.kind {
            StripKind::Clip(_) if self.clip(&strip).is_none() => return None,
            StripKind::Transition if index == 0 || index + 1 >= siblings.len() => return None,
            _ => {}
        }
        Some(EvalStrip {
            strip,
            siblings,
            index,
            track_index,
            region,
            strip_time,
            influence,
        })
    }
}

/// Tie-break over sorted strips: containment (or an unmapped strip) wins; before the
/// first strip only a backward hold counts; between strips the earlier strip held
/// forward wins, else the later strip held backward; after the last strip it must hold.
fn pick_strip(strips: &[Strip], time: f32) -> Option<(usize, Region)> {
    let last = strips.len().checked_sub(1)?;
    for (i, strip) in strips.iter().enumerate() {
        if strip.contains(time) || strip.no_time_map {
            return Some((i, Region::Within));
        }
        if time < strip.start {
            if i == 0 {
                return (strip.extend_mode == ExtendMode::Hold).then_some((i, Region::Before));
            }
            if strips[i - 1].extend_mode != ExtendMode::Nothing {
                return Some((i - 1, Region::After));
            }
            return (strip.extend_mode == ExtendMode::Hold).then_some((i, Region::Before));
        }
        if i == last {
            return (strip.extend_mode != ExtendMode::Nothing).then_some((i, Region::After));
        }
    }
    None
}

/// Linear ramps over the blend-in and blend-out windows.
pub fn blend_in_out_influence(strip: &Strip, time: f32, eps: f32) -> f32 {
    let blend_in = strip.blend_in.abs();
    let blend_out = strip.blend_out.abs();
    if !is_eqf(blend_in, 0.0, eps) && time <= strip.start + blend_in {
        (time - strip.start).abs() / blend_in
    } else if !is_eqf(blend_out, 0.0, eps) && time >= strip.end - blend_out {
        (strip.end - time).abs() / blend_out
    } else {
        1.0
    }
}

/// Map global time into a strip: clip time for clip strips, normalized progress for
/// transitions and metas.
pub fn strip_frame(strip: &Strip, time: f32, eps: f32) -> f32 {
    match strip.kind {
        StripKind::Clip(_) => clip_frame(strip, time, eps),
        StripKind::Transition | StripKind::Meta(_) => {
            let length = strip.length();
            if length <= eps {
                return 0.0;
            }
            if strip.reversed {
                (strip.end - time) / length
            } else {
                (time - strip.start) / length
            }
        }
    }
}

fn clip_frame(strip: &Strip, time: f32, eps: f32) -> f32 {
    let repeat = if is_eqf(strip.repeat, 0.0, eps) {
        1.0
    } else {
        strip.repeat
    };
    let scale = if is_eqf(strip.scale, 0.0, eps) {
        1.0
    } else {
        strip.scale.abs()
    };
    let cycle = strip.clip_length_nonzero() * scale;
    // A whole number of repeats ends on the last clip frame, not the first of a new cycle.
    let at_end = is_eqf(time, strip.end, eps) && is_eqf(repeat, repeat.floor(), eps);

    if strip.reversed {
        if at_end {
            return strip.clip_start;
        }
        strip.clip_end - ((time - strip.start) % cycle) / scale
    } else {
        if at_end {
            return strip.clip_end;
        }
        strip.clip_start + ((time - strip.start) % cycle) / scale
    }
}

/// Recursive strip evaluator. Holds the re-entry guard for one call chain.
pub struct StripEvaluator<'a> {
    ctx: EvalContext<'a>,
    visited: HashSet<StripId>,
}

impl<'a> StripEvaluator<'a> {
    pub fn new(ctx: EvalContext<'a>) -> Self {
        Self {
            ctx,
            visited: HashSet::new(),
        }
    }

    #[inline]
    pub fn context(&self) -> &EvalContext<'a> {
        &self.ctx
    }

    /// Evaluate `es` into `snapshot`. Re-entering a strip already on the call chain, or
    /// nesting past `max_strip_depth`, produces nothing.
    pub fn evaluate(
        &mut self,
        registry: &mut ChannelRegistry,
        accessor: &dyn PropertyAccessor,
        es: &EvalStrip<'_>,
        mode: EvalMode,
        snapshot: &mut Snapshot<'_>,
    ) {
        let id = es.strip.id;
        if self.visited.len() >= self.ctx.config.max_strip_depth || !self.visited.insert(id) {
            trace!("skipping re-entered strip '{}' ({:?})", es.strip.name, id);
            return;
        }
        trace!(
            "evaluating strip '{}' ({:?}) {:?} at {} (influence {})",
            es.strip.name,
            mode,
            es.region,
            es.strip_time,
            es.influence
        );

        match &es.strip.kind {
            StripKind::Clip(_) => self.evaluate_clip(registry, accessor, es, mode, snapshot),
            StripKind::Transition => {
                self.evaluate_transition(registry, accessor, es, mode, snapshot)
            }
            StripKind::Meta(children) => {
                self.evaluate_meta(registry, accessor, es, children, mode, snapshot)
            }
        }

        self.visited.remove(&id);
    }

    fn evaluate_clip(
        &self,
        registry: &mut ChannelRegistry,
        accessor: &dyn PropertyAccessor,
        es: &EvalStrip<'_>,
        mode: EvalMode,
        snapshot: &mut Snapshot<'_>,
    ) {
        let Some(clip) = self.ctx.clip(&es.strip) else {
            warn!(
                "strip '{}' ({:?}) has no loaded clip",
                es.strip.name, es.strip.id
            );
            return;
        };
        let eps = self.ctx.config.float_epsilon;

        if mode == EvalMode::NoBlend {
            self.write_clip_values(registry, accessor, clip, es.strip_time, snapshot);
            return;
        }

        let mut strip_snapshot = Snapshot::for_registry(self.ctx.config, registry);
        self.write_clip_values(registry, accessor, clip, es.strip_time, &mut strip_snapshot);
        if mode == EvalMode::Blend {
            blend_snapshot_in_place(
                registry,
                snapshot,
                &strip_snapshot,
                es.blend_mode(),
                es.influence,
                eps,
            );
        } else {
            invert_lower_snapshot_in_place(
                registry,
                snapshot,
                &strip_snapshot,
                es.blend_mode(),
                es.influence,
                eps,
            );
        }
    }

    /// Sample every evaluatable curve of `clip` at `time` into `snapshot`, marking the
    /// written elements in the blend domain.
    fn write_clip_values(
        &self,
        registry: &mut ChannelRegistry,
        accessor: &dyn PropertyAccessor,
        clip: &Clip,
        time: f32,
        snapshot: &mut Snapshot<'_>,
    ) {
        for curve in clip.curves.iter().filter(|c| c.is_evaluatable()) {
            let Some(id) = registry.resolve_path(accessor, &curve.path) else {
                continue;
            };
            let channel = registry.channel(id);
            let Some(index) = channel.validate_index(curve.array_index) else {
                continue;
            };
            let quaternion = channel.mix_mode == MixMode::Quaternion;

            let value = self.ctx.evaluator.evaluate(curve, time);
            let cs = snapshot.ensure(registry, id);
            cs.values[index] = value;
            if quaternion {
                cs.blend_domain.set_all(true);
            } else {
                cs.blend_domain.enable(index);
            }
        }
    }

    fn evaluate_transition(
        &mut self,
        registry: &mut ChannelRegistry,
        accessor: &dyn PropertyAccessor,
        es: &EvalStrip<'_>,
        mode: EvalMode,
        snapshot: &mut Snapshot<'_>,
    ) {
        let Some([from, to]) = es.transition_endpoints(&self.ctx) else {
            debug!("transition '{}' is missing a neighbour", es.strip.name);
            return;
        };
        let capacity = self.ctx.config.snapshot_capacity;

        match mode {
            EvalMode::Blend => {
                let blended = {
                    let mut first = Snapshot::with_parent(&*snapshot, capacity);
                    self.evaluate(registry, accessor, &from, EvalMode::Blend, &mut first);
                    let mut second = Snapshot::with_parent(&*snapshot, capacity);
                    self.evaluate(registry, accessor, &to, EvalMode::Blend, &mut second);

                    // Every channel takes part in the crossfade, untouched ones at their lower value.
                    second.ensure_all_channels(registry);
                    second.enable_all_blend_domain();
                    blend_snapshots(
                        registry,
                        &first,
                        &second,
                        BlendMode::Replace,
                        es.strip_time,
                        self.ctx.config.float_epsilon,
                    )
                };
                snapshot.absorb_values(registry, &blended);
            }
            EvalMode::InvertLower => {
                // Crossfades are not invertible: whatever either endpoint touches leaves
                // the remap domain.
                let mut touched: Vec<(ChannelId, ValidMask)> = Vec::new();
                for endpoint in [&from, &to] {
                    let mut raw = Snapshot::with_parent(&*snapshot, capacity);
                    self.evaluate(registry, accessor, endpoint, EvalMode::NoBlend, &mut raw);
                    touched.extend(raw.iter().map(|cs| (cs.channel, cs.blend_domain.clone())));
                }
                for (id, bits) in touched {
                    let cs = snapshot.ensure(registry, id);
                    for j in bits.ones() {
                        cs.remap_domain.disable(j);
                    }
                }
            }
            EvalMode::NoBlend => {
                debug!(
                    "transition '{}' cannot be evaluated without blending",
                    es.strip.name
                );
            }
        }
    }

    fn evaluate_meta(
        &mut self,
        registry: &mut ChannelRegistry,
        accessor: &dyn PropertyAccessor,
        es: &EvalStrip<'_>,
        children: &[Strip],
        mode: EvalMode,
        snapshot: &mut Snapshot<'_>,
    ) {
        let inner_time = es.strip_time * es.strip.length() + es.strip.start;
        if let Some(inner) = self.ctx.find_active_strip(children, None, inner_time) {
            self.evaluate(registry, accessor, &inner, mode, snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Curve;
    use crate::sampling::KeyframeEvaluator;
    use approx::assert_abs_diff_eq;

    const EPS: f32 = f32::EPSILON;

    fn clip_strip(id: u32, start: f32, end: f32) -> Strip {
        Strip::clip(StripId(id), ClipId(0), start, end)
    }

    fn library() -> ClipLibrary {
        let mut clips = ClipLibrary::new();
        clips.insert(ClipId(0), Clip::new("c", vec![Curve::constant("x", 0, 1.0)]));
        clips
    }

    #[test]
    fn clip_time_scales_and_repeats() {
        let s = clip_strip(0, 10.0, 30.0)
            .with_clip_range(0.0, 10.0)
            .with_scale(2.0);
        assert_abs_diff_eq!(strip_frame(&s, 10.0, EPS), 0.0);
        assert_abs_diff_eq!(strip_frame(&s, 20.0, EPS), 5.0);
        assert_abs_diff_eq!(strip_frame(&s, 30.0, EPS), 10.0);

        let r = clip_strip(0, 0.0, 20.0)
            .with_clip_range(0.0, 10.0)
            .with_repeat(2.0);
        assert_abs_diff_eq!(strip_frame(&r, 5.0, EPS), 5.0);
        assert_abs_diff_eq!(strip_frame(&r, 15.0, EPS), 5.0);
        // Whole repeats end on the last clip frame.
        assert_abs_diff_eq!(strip_frame(&r, 20.0, EPS), 10.0);
    }

    #[test]
    fn reversed_clip_runs_backwards() {
        let s = clip_strip(0, 0.0, 10.0).reversed();
        assert_abs_diff_eq!(strip_frame(&s, 0.0, EPS), 10.0);
        assert_abs_diff_eq!(strip_frame(&s, 2.5, EPS), 7.5);
        assert_abs_diff_eq!(strip_frame(&s, 10.0, EPS), 0.0);
    }

    #[test]
    fn zero_scale_and_repeat_act_as_one() {
        let s = clip_strip(0, 0.0, 10.0).with_scale(0.0).with_repeat(0.0);
        assert_abs_diff_eq!(strip_frame(&s, 4.0, EPS), 4.0);
    }

    #[test]
    fn transition_progress() {
        let t = Strip::transition(StripId(0), 10.0, 20.0);
        assert_abs_diff_eq!(strip_frame(&t, 12.5, EPS), 0.25);
        assert_abs_diff_eq!(strip_frame(&t.reversed(), 12.5, EPS), 0.75);
    }

    #[test]
    fn zero_length_progress_is_zero() {
        let t = Strip::transition(StripId(0), 10.0, 10.0);
        assert_eq!(strip_frame(&t, 10.0, EPS), 0.0);
        assert_eq!(strip_frame(&t.reversed(), 12.0, EPS), 0.0);
        let m = Strip::meta(StripId(1), vec![clip_strip(2, 5.0, 5.0)]);
        assert!(strip_frame(&m, 5.0, EPS).is_finite());
    }

    #[test]
    fn blend_in_out_ramps() {
        let s = clip_strip(0, 0.0, 20.0).with_blend_in_out(4.0, -5.0);
        assert_abs_diff_eq!(blend_in_out_influence(&s, 0.0, EPS), 0.0);
        assert_abs_diff_eq!(blend_in_out_influence(&s, 2.0, EPS), 0.5);
        assert_abs_diff_eq!(blend_in_out_influence(&s, 10.0, EPS), 1.0);
        assert_abs_diff_eq!(blend_in_out_influence(&s, 17.5, EPS), 0.5);
    }

    #[test]
    fn user_controls_override_analytic_values() {
        let clips = library();
        let config = Config::default();
        let ctx = EvalContext::new(&clips, &KeyframeEvaluator, &config);

        let s = clip_strip(0, 0.0, 10.0)
            .with_blend_in_out(5.0, 0.0)
            .with_influence(Control::Constant(1.5))
            .with_time(Control::Constant(23.0), true);
        let (influence, time) = ctx.evaluate_controls(&s, 1.0);
        assert_eq!(influence, 1.0);
        assert_abs_diff_eq!(time, 3.0);

        let mut unmapped = clip_strip(0, 0.0, 10.0);
        unmapped.no_time_map = true;
        assert_eq!(ctx.strip_time(&unmapped, 42.0), 42.0);
    }

    #[test]
    fn tie_breaks() {
        let strips = vec![
            clip_strip(0, 10.0, 20.0).with_extend_mode(ExtendMode::Hold),
            clip_strip(1, 30.0, 40.0).with_extend_mode(ExtendMode::HoldForward),
        ];
        assert_eq!(pick_strip(&strips, 5.0), Some((0, Region::Before)));
        assert_eq!(pick_strip(&strips, 20.0), Some((0, Region::Within)));
        assert_eq!(pick_strip(&strips, 25.0), Some((0, Region::After)));
        assert_eq!(pick_strip(&strips, 50.0), Some((1, Region::After)));

        let strips = vec![
            clip_strip(0, 10.0, 20.0).with_extend_mode(ExtendMode::Nothing),
            clip_strip(1, 30.0, 40.0).with_extend_mode(ExtendMode::Hold),
        ];
        assert_eq!(pick_strip(&strips, 5.0), None);
        assert_eq!(pick_strip(&strips, 25.0), Some((1, Region::Before)));

        let strips = vec![
            clip_strip(0, 10.0, 20.0).with_extend_mode(ExtendMode::Nothing),
            clip_strip(1, 30.0, 40.0).with_extend_mode(ExtendMode::HoldForward),
        ];
        assert_eq!(pick_strip(&strips, 25.0), None);
        assert_eq!(pick_strip(&[], 25.0), None);
    }

    #[test]
    fn lookup_clamps_held_time_and_drops_muted() {
        let clips = library();
        let config = Config::default();
        let ctx = EvalContext::new(&clips, &KeyframeEvaluator, &config);

        let strips = vec![clip_strip(0, 10.0, 20.0).with_clip_range(0.0, 10.0)];
        let es = ctx.find_active_strip(&strips, Some(0), 3.0).unwrap();
        assert_eq!(es.region, Region::Before);
        assert_abs_diff_eq!(es.strip_time, 0.0);
        let es = ctx.find_active_strip(&strips, Some(0), 99.0).unwrap();
        assert_abs_diff_eq!(es.strip_time, 10.0);

        let muted = vec![clip_strip(0, 10.0, 20.0).muted()];
        assert!(ctx.find_active_strip(&muted, Some(0), 15.0).is_none());

        let missing = vec![Strip::clip(StripId(0), ClipId(7), 0.0, 10.0)];
        assert!(ctx.find_active_strip(&missing, Some(0), 5.0).is_none());
    }

    #[test]
    fn transitions_need_both_neighbours() {
        let clips = library();
        let config = Config::default();
        let ctx = EvalContext::new(&clips, &KeyframeEvaluator, &config);

        let lone = vec![
            clip_strip(0, 0.0, 10.0),
            Strip::transition(StripId(1), 10.0, 20.0),
        ];
        assert!(ctx.find_active_strip(&lone, Some(0), 15.0).is_none());

        let full = vec![
            clip_strip(0, 0.0, 10.0),
            Strip::transition(StripId(1), 10.0, 20.0).reversed(),
            clip_strip(2, 20.0, 30.0),
        ];
        let es = ctx.find_active_strip(&full, Some(0), 15.0).unwrap();
        let [from, to] = es.transition_endpoints(&ctx).unwrap();
        assert_eq!(from.strip.id, StripId(2));
        assert_eq!(to.strip.id, StripId(0));
        assert_eq!(to.region, Region::TransitionEnd);
    }
}
