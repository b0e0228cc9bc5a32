//! Keyframing remap.
//!
//! When a property is keyed while other layers are stacked around the edited
//! clip, the value the user sees is the fully blended one. A
//! [`KeyframingContext`] captures everything below the edited strip (as an
//! accumulated snapshot) and everything above it (as evaluation strips), so
//! [`remap_keyframe_values`] can peel the upper layers off and solve for the
//! value the edited strip itself must hold.
//!
//! Contexts are built once per stack per user operation through a
//! [`KeyframingCache`] and must be dropped (`clear`) before the next frame.

use std::borrow::Cow;

use hashbrown::HashMap;

use crate::binding::{PropertyAccessor, PropertyHandle};
use crate::blend::invert_upper_snapshot_in_place;
use crate::channel::MixMode;
use crate::data::{BlendMode, LayerStack};
use crate::error::{NlaError, Result};
use crate::ids::StackId;
use crate::mask::ValidMask;
use crate::snapshot::{EvalData, Snapshot};
use crate::stack::{
    accumulate, action_strip, evaluates_action_without_nla, is_full_replace, is_track_evaluated,
    tweak_strip,
};
use crate::strip_eval::{EvalContext, EvalMode, EvalStrip, StripEvaluator};

/// What keys written through a context land on.
#[derive(Clone, Debug)]
pub enum EditTarget<'a> {
    /// The edited clip plays without NLA influence; values pass through.
    Unmapped,
    /// The edited strip contributes nothing at this frame; every remap fails.
    NotEvaluated,
    /// The edited strip as evaluated at the context's frame.
    Strip(EvalStrip<'a>),
}

pub struct KeyframingContext<'a> {
    ctx: EvalContext<'a>,
    stack: StackId,
    lower: EvalData,
    upper: Vec<EvalStrip<'a>>,
    target: EditTarget<'a>,
}

impl<'a> KeyframingContext<'a> {
    /// Context for keying into `stack` at `time`. `None` when keys need no correction:
    /// evaluation is off, there are no tracks, nothing is being edited, or an ordinary
    /// full-influence Replace action is edited outside tweak mode.
    pub fn build(
        ctx: EvalContext<'a>,
        stack: &'a LayerStack,
        time: f32,
        accessor: &dyn PropertyAccessor,
    ) -> Option<Self> {
        let edited_clip = match stack.tweak {
            Some(_) => stack.tweaked_strip().and_then(|s| s.clip_id()),
            None => stack.action,
        };
        if edited_clip.is_none() || stack.tracks.is_empty() || stack.evaluation_off {
            return None;
        }
        if stack.tweak.is_none()
            && stack.action_blend_mode == BlendMode::Replace
            && stack.action_influence == 1.0
        {
            return None;
        }

        let mut context = Self {
            ctx,
            stack: stack.id,
            lower: EvalData::new(ctx.config),
            upper: Vec::new(),
            target: EditTarget::Unmapped,
        };

        let tweak_track = stack.tweak.map(|t| t.track);
        if stack.is_soloing()
            && !tweak_track
                .and_then(|t| stack.tracks.get(t))
                .is_some_and(|t| t.solo)
        {
            context.target = EditTarget::NotEvaluated;
            return Some(context);
        }

        // The tweaked track splits the stack; when it is not evaluated everything is lower.
        let split = tweak_track.filter(|&t| is_track_evaluated(stack, t));
        let mut lower_strips = Vec::new();
        let mut has_strips = false;
        for (index, track) in stack.tracks.iter().enumerate() {
            if !is_track_evaluated(stack, index) || split == Some(index) {
                continue;
            }
            has_strips |= !track.strips.is_empty();
            let es = ctx.find_active_strip(&track.strips, Some(index), time);
            match split {
                Some(t) if index > t => context.upper.extend(es),
                _ => lower_strips.extend(es),
            }
        }

        if evaluates_action_without_nla(stack, has_strips) {
            return Some(context);
        }

        let target = if stack.tweak.is_some() {
            if let Some(action) = action_strip(stack, ctx.clips, false) {
                context
                    .upper
                    .extend(ctx.single_strip(Cow::Owned(action), None, time));
            }
            tweak_strip(stack, ctx.clips, true)
                .and_then(|s| ctx.single_strip(Cow::Owned(s), tweak_track, time))
        } else {
            action_strip(stack, ctx.clips, true)
                .and_then(|s| ctx.single_strip(Cow::Owned(s), None, time))
        };
        let Some(target) = target else {
            context.target = EditTarget::NotEvaluated;
            return Some(context);
        };

        let hides_lower = is_full_replace(target.blend_mode(), target.influence, ctx.config.float_epsilon);
        context.target = EditTarget::Strip(target);
        if !hides_lower {
            accumulate(&ctx, &lower_strips, accessor, &mut context.lower);
        }
        Some(context)
    }

    #[inline]
    pub fn stack(&self) -> StackId {
        self.stack
    }

    #[inline]
    pub fn target(&self) -> &EditTarget<'a> {
        &self.target
    }

    /// Strips above the edited one, bottom to top.
    #[inline]
    pub fn upper_strips(&self) -> &[EvalStrip<'a>] {
        &self.upper
    }

    /// Accumulated result of everything below the edited strip.
    #[inline]
    pub fn lower(&self) -> &EvalData {
        &self.lower
    }
}

/// Result of one remap request.
#[derive(Clone, Debug, PartialEq)]
pub struct RemapOutcome {
    /// Elements that were solved (or needed no correction).
    pub successes: ValidMask,
    /// A quaternion request was widened to all four elements; key all of them.
    pub force_all: bool,
}

impl RemapOutcome {
    fn pass(requested: ValidMask) -> Self {
        Self {
            successes: requested,
            force_all: false,
        }
    }

    fn fail(len: usize) -> Self {
        Self {
            successes: ValidMask::new(len),
            force_all: false,
        }
    }
}

/// Rewrite `values` (the blended values the user wants to see for the property behind
/// `handle`) into the values the edited strip must hold. `index` restricts the request
/// to one element. Elements that cannot be solved keep their input value and a cleared
/// success bit.
pub fn remap_keyframe_values(
    context: Option<&mut KeyframingContext<'_>>,
    accessor: &dyn PropertyAccessor,
    handle: PropertyHandle,
    values: &mut [f32],
    index: Option<usize>,
    allow_force_all: bool,
) -> Result<RemapOutcome> {
    let count = values.len();
    let mut requested: ValidMask = (0..count)
        .map(|i| index.map_or(true, |idx| idx == i))
        .collect();

    let Some(context) = context else {
        return Ok(RemapOutcome::pass(requested));
    };
    let (blend_mode, influence) = match &context.target {
        EditTarget::Unmapped => return Ok(RemapOutcome::pass(requested)),
        EditTarget::NotEvaluated => return Ok(RemapOutcome::fail(count)),
        EditTarget::Strip(es) => (es.blend_mode(), es.influence),
    };
    if blend_mode == BlendMode::Replace && influence == 1.0 && context.upper.is_empty() {
        return Ok(RemapOutcome::pass(requested));
    }
    if influence <= 0.0 {
        return Ok(RemapOutcome::fail(count));
    }

    let KeyframingContext {
        ctx, lower, upper, ..
    } = context;
    let EvalData {
        registry,
        snapshot: lower_snapshot,
    } = lower;

    let channel_id = registry
        .resolve_handle(accessor, handle)
        .ok_or_else(|| NlaError::UnresolvedProperty(format!("{handle:?}")))?;
    let channel = registry.channel(channel_id);
    if channel.len() != count {
        return Err(NlaError::ValueCountMismatch {
            expected: channel.len(),
            got: count,
        });
    }

    // Partial quaternion requests can never solve; widen them when the caller allows it.
    let force_all = allow_force_all
        && channel.mix_mode == MixMode::Quaternion
        && matches!(blend_mode, BlendMode::Combine | BlendMode::Replace);
    if force_all {
        requested.set_all(true);
    }

    let mut blended = Snapshot::for_registry(ctx.config, registry);
    {
        let cs = blended.ensure(registry, channel_id);
        cs.values.copy_from_slice(values);
        cs.remap_domain.copy_from(&requested);
    }

    let mut evaluator = StripEvaluator::new(*ctx);
    for es in upper.iter().rev() {
        evaluator.evaluate(registry, accessor, es, EvalMode::InvertLower, &mut blended);
    }
    invert_upper_snapshot_in_place(
        registry,
        lower_snapshot,
        &mut blended,
        blend_mode,
        influence,
        ctx.config.float_epsilon,
    );

    let Some(solved) = blended.get(channel_id) else {
        return Ok(RemapOutcome::fail(count));
    };
    for i in solved.remap_domain.ones() {
        values[i] = solved.values[i];
    }
    Ok(RemapOutcome {
        successes: solved.remap_domain.clone(),
        force_all,
    })
}

/// Keyframing contexts by stack for the duration of one user operation.
#[derive(Default)]
pub struct KeyframingCache<'a> {
    contexts: HashMap<StackId, Option<KeyframingContext<'a>>>,
}

impl<'a> KeyframingCache<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached context for `stack`, built with `build` on first request.
    pub fn get_or_insert_with<F>(
        &mut self,
        stack: StackId,
        build: F,
    ) -> Option<&mut KeyframingContext<'a>>
    where
        F: FnOnce() -> Option<KeyframingContext<'a>>,
    {
        self.contexts.entry(stack).or_insert_with(build).as_mut()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop every context. Call once the user operation (or frame) ends.
    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}
