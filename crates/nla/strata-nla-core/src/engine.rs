//! Engine: owns clips, layer stacks and configuration, and exposes the public
//! evaluation and keyframing entry points.
//!
//! Methods:
//! - new, load_clip, add_stack / create_stack, add_track, add_strip, set_action
//! - evaluate (stack walk → flush through a [`PropertyAccessor`])
//! - keyframing_context / cached_keyframing_context (input to [`remap_keyframe_values`])
//!
//! [`remap_keyframe_values`]: crate::keyframing::remap_keyframe_values

use log::debug;

use crate::binding::PropertyAccessor;
use crate::config::Config;
use crate::data::{Clip, LayerStack, Strip, StripKind, Track};
use crate::error::{NlaError, Result};
use crate::ids::{ClipId, IdAllocator, StackId, StripId};
use crate::keyframing::{KeyframingCache, KeyframingContext};
use crate::sampling::{CurveEvaluator, KeyframeEvaluator};
use crate::stack::{evaluate_stack, EvalReport};
use crate::strip_eval::{ClipLibrary, EvalContext};

pub struct Engine {
    cfg: Config,
    ids: IdAllocator,
    clips: ClipLibrary,
    stacks: Vec<LayerStack>,
    evaluator: Box<dyn CurveEvaluator + Send + Sync>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("clips", &self.clips.len())
            .field("stacks", &self.stacks.len())
            .finish()
    }
}

impl Engine {
    /// Create a new engine with the given config and the keyframe curve evaluator.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            ids: IdAllocator::new(),
            clips: ClipLibrary::new(),
            stacks: Vec::new(),
            evaluator: Box::new(KeyframeEvaluator),
        }
    }

    /// Replace the curve evaluator used for clips and strip controls.
    pub fn with_curve_evaluator<E>(mut self, evaluator: E) -> Self
    where
        E: CurveEvaluator + Send + Sync + 'static,
    {
        self.evaluator = Box::new(evaluator);
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Shared evaluation inputs borrowed from this engine.
    pub fn eval_context(&self) -> EvalContext<'_> {
        EvalContext::new(&self.clips, &*self.evaluator, &self.cfg)
    }

    /// Load a clip, returning its id.
    pub fn load_clip(&mut self, mut clip: Clip) -> ClipId {
        let id = self.ids.alloc_clip();
        clip.id = Some(id);
        self.clips.insert(id, clip);
        id
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.get(&id)
    }

    /// Edit a clip in place, e.g. after inserting keys.
    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.get_mut(&id)
    }

    /// Fresh strip id, never [`StripId::ACTION`].
    pub fn alloc_strip_id(&mut self) -> StripId {
        self.ids.alloc_strip()
    }

    /// Create an empty stack.
    pub fn create_stack(&mut self, name: &str) -> StackId {
        let id = self.ids.alloc_stack();
        let mut stack = LayerStack::new(name);
        stack.id = id;
        self.stacks.push(stack);
        id
    }

    /// Adopt a fully built stack. Every referenced clip must already be loaded.
    pub fn add_stack(&mut self, mut stack: LayerStack) -> Result<StackId> {
        if let Some(action) = stack.action {
            self.require_clip(action)?;
        }
        for track in &stack.tracks {
            self.validate_track(track)?;
        }
        if let Some(tweak) = stack.tweak {
            let len = stack.tracks.len();
            let track = stack
                .tracks
                .get(tweak.track)
                .ok_or(NlaError::TrackOutOfRange { index: tweak.track, len })?;
            if tweak.strip >= track.strips.len() {
                return Err(NlaError::StripOutOfRange {
                    index: tweak.strip,
                    len: track.strips.len(),
                });
            }
        }
        let id = self.ids.alloc_stack();
        stack.id = id;
        debug!(
            "adding stack '{}' ({:?}) with {} tracks",
            stack.name,
            id,
            stack.tracks.len()
        );
        self.stacks.push(stack);
        Ok(id)
    }

    pub fn remove_stack(&mut self, id: StackId) -> Result<LayerStack> {
        let pos = self
            .stacks
            .iter()
            .position(|s| s.id == id)
            .ok_or(NlaError::UnknownStack(id))?;
        Ok(self.stacks.remove(pos))
    }

    pub fn stack(&self, id: StackId) -> Result<&LayerStack> {
        self.stacks
            .iter()
            .find(|s| s.id == id)
            .ok_or(NlaError::UnknownStack(id))
    }

    pub fn stack_mut(&mut self, id: StackId) -> Result<&mut LayerStack> {
        self.stacks
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(NlaError::UnknownStack(id))
    }

    pub fn stacks(&self) -> impl Iterator<Item = &LayerStack> {
        self.stacks.iter()
    }

    /// Push a track on top of the stack, returning its index.
    pub fn add_track(&mut self, stack: StackId, track: Track) -> Result<usize> {
        self.validate_track(&track)?;
        Ok(self.stack_mut(stack)?.push_track(track))
    }

    /// Insert a strip into a track, keeping start order. Returns the strip index.
    pub fn add_strip(&mut self, stack: StackId, track: usize, strip: Strip) -> Result<usize> {
        self.validate_strips(std::slice::from_ref(&strip))?;
        self.stack_mut(stack)?.insert_strip(track, strip)
    }

    /// Set or clear the stack's non-pushed action.
    pub fn set_action(&mut self, stack: StackId, action: Option<ClipId>) -> Result<()> {
        if let Some(clip) = action {
            self.require_clip(clip)?;
        }
        self.stack_mut(stack)?.action = action;
        Ok(())
    }

    /// Evaluate `stack` at global frame `time`, writing results through `accessor`.
    pub fn evaluate(
        &self,
        stack: StackId,
        time: f32,
        accessor: &mut dyn PropertyAccessor,
    ) -> Result<EvalReport> {
        let stack = self.stack(stack)?;
        Ok(evaluate_stack(&self.eval_context(), stack, time, accessor))
    }

    /// Build a keyframing context for one remap request. `Ok(None)` means keys need no
    /// correction.
    pub fn keyframing_context(
        &self,
        stack: StackId,
        time: f32,
        accessor: &dyn PropertyAccessor,
    ) -> Result<Option<KeyframingContext<'_>>> {
        let stack = self.stack(stack)?;
        Ok(KeyframingContext::build(
            self.eval_context(),
            stack,
            time,
            accessor,
        ))
    }

    /// Keyframing context for `stack`, reused from `cache` within one user operation.
    pub fn cached_keyframing_context<'e, 'c>(
        &'e self,
        cache: &'c mut KeyframingCache<'e>,
        stack: StackId,
        time: f32,
        accessor: &dyn PropertyAccessor,
    ) -> Result<Option<&'c mut KeyframingContext<'e>>> {
        let layer_stack = self.stack(stack)?;
        let ctx = self.eval_context();
        Ok(cache.get_or_insert_with(stack, || {
            KeyframingContext::build(ctx, layer_stack, time, accessor)
        }))
    }

    fn require_clip(&self, id: ClipId) -> Result<()> {
        if self.clips.contains_key(&id) {
            Ok(())
        } else {
            Err(NlaError::UnknownClip(id))
        }
    }

    fn validate_track(&self, track: &Track) -> Result<()> {
        track.validate()?;
        self.validate_strips(&track.strips)
    }

    fn validate_strips(&self, strips: &[Strip]) -> Result<()> {
        for strip in strips {
            match &strip.kind {
                StripKind::Clip(Some(id)) => self.require_clip(*id)?,
                StripKind::Meta(children) => self.validate_strips(children)?,
                StripKind::Clip(None) | StripKind::Transition => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Curve, TweakMode};

    #[test]
    fn rejects_unknown_clips_and_stacks() {
        let mut engine = Engine::default();
        let stack = engine.create_stack("s");
        let err = engine.set_action(stack, Some(ClipId(9))).unwrap_err();
        assert_eq!(err, NlaError::UnknownClip(ClipId(9)));

        let sid = engine.alloc_strip_id();
        let track = Track::new("t")
            .with_strip(Strip::clip(sid, ClipId(4), 0.0, 1.0))
            .unwrap();
        assert!(engine.add_track(stack, track).is_err());
        assert!(engine.stack(StackId(77)).is_err());
    }

    #[test]
    fn add_strip_checks_track_bounds() {
        let mut engine = Engine::default();
        let clip = engine.load_clip(Clip::new("c", vec![Curve::constant("x", 0, 1.0)]));
        let stack = engine.create_stack("s");
        let sid = engine.alloc_strip_id();
        let err = engine
            .add_strip(stack, 0, Strip::clip(sid, clip, 0.0, 10.0))
            .unwrap_err();
        assert_eq!(err, NlaError::TrackOutOfRange { index: 0, len: 0 });

        engine.add_track(stack, Track::new("t")).unwrap();
        assert_eq!(
            engine
                .add_strip(stack, 0, Strip::clip(sid, clip, 0.0, 10.0))
                .unwrap(),
            0
        );
    }

    #[test]
    fn adopted_tracks_must_be_sorted_and_disjoint() {
        let mut engine = Engine::default();
        let clip = engine.load_clip(Clip::new("c", vec![Curve::constant("x", 0, 1.0)]));
        let stack = engine.create_stack("s");
        let (a, b) = (engine.alloc_strip_id(), engine.alloc_strip_id());

        let mut unsorted = Track::new("t");
        unsorted.strips = vec![
            Strip::clip(a, clip, 20.0, 30.0),
            Strip::clip(b, clip, 0.0, 10.0),
        ];
        assert!(matches!(
            engine.add_track(stack, unsorted.clone()),
            Err(NlaError::StripOverlap { .. })
        ));

        let mut built = LayerStack::new("built");
        built.tracks.push(unsorted);
        assert!(matches!(
            engine.add_stack(built),
            Err(NlaError::StripOverlap { .. })
        ));
        assert_eq!(engine.stacks().count(), 1);
        assert!(engine.stack(stack).unwrap().tracks.is_empty());
    }

    #[test]
    fn adopted_tweak_must_point_at_a_strip() {
        let mut engine = Engine::default();
        let mut built = LayerStack::new("s");
        built.push_track(Track::new("t"));
        built.tweak = Some(TweakMode {
            track: 0,
            strip: 0,
            evaluate_upper_tracks: false,
            in_place: true,
        });
        assert_eq!(
            engine.add_stack(built).unwrap_err(),
            NlaError::StripOutOfRange { index: 0, len: 0 }
        );
    }

    #[test]
    fn tweak_follows_its_strip_across_inserts() {
        let mut engine = Engine::default();
        let walk = engine.load_clip(Clip::new("walk", vec![Curve::constant("x", 0, 1.0)]));
        let run = engine.load_clip(Clip::new("run", vec![Curve::constant("x", 0, 2.0)]));
        let stack = engine.create_stack("s");
        engine.add_track(stack, Track::new("t")).unwrap();
        let tweaked = engine.alloc_strip_id();
        engine
            .add_strip(stack, 0, Strip::clip(tweaked, walk, 10.0, 20.0))
            .unwrap();
        engine.stack_mut(stack).unwrap().enter_tweak(0, 0, false).unwrap();

        let earlier = engine.alloc_strip_id();
        assert_eq!(
            engine
                .add_strip(stack, 0, Strip::clip(earlier, run, 0.0, 5.0))
                .unwrap(),
            0
        );
        let strip = engine.stack(stack).unwrap().tweaked_strip().unwrap();
        assert_eq!(strip.id, tweaked);
        assert_eq!(strip.clip_id(), Some(walk));
    }

    #[test]
    fn removed_stacks_are_gone() {
        let mut engine = Engine::default();
        let a = engine.create_stack("a");
        let b = engine.create_stack("b");
        assert_eq!(engine.remove_stack(a).unwrap().name, "a");
        assert!(engine.stack(a).is_err());
        assert_eq!(engine.stack(b).unwrap().name, "b");
        assert_eq!(engine.stacks().count(), 1);
    }
}
