//! Persistent layer-stack data model: clips of keyed curves, strips placing
//! clips on a timeline, tracks of non-overlapping strips, and the stack itself.

use serde::{Deserialize, Serialize};

use crate::error::{NlaError, Result};
use crate::ids::{ClipId, StackId, StripId};

/// Segment interpolation leaving a keypoint.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interpolation {
    Constant,
    #[default]
    Linear,
    /// Cubic-bezier timing with normalized control points `[x, y]`.
    Bezier {
        #[serde(default = "default_bezier_out")]
        out: [f32; 2],
        #[serde(default = "default_bezier_in", rename = "in")]
        r#in: [f32; 2],
    },
}

fn default_bezier_out() -> [f32; 2] {
    [0.42, 0.0]
}

fn default_bezier_in() -> [f32; 2] {
    [0.58, 1.0]
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Keypoint {
    pub frame: f32,
    pub value: f32,
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl Keypoint {
    pub fn new(frame: f32, value: f32) -> Self {
        Self {
            frame,
            value,
            interpolation: Interpolation::Linear,
        }
    }
}

/// One keyed scalar targeting `path[array_index]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Curve {
    pub path: String,
    #[serde(default)]
    pub array_index: usize,
    pub points: Vec<Keypoint>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Curve {
    pub fn new(path: impl Into<String>, array_index: usize, points: Vec<Keypoint>) -> Self {
        Self {
            path: path.into(),
            array_index,
            points,
            muted: false,
            disabled: false,
        }
    }

    /// Single-key curve holding `value` everywhere.
    pub fn constant(path: impl Into<String>, array_index: usize, value: f32) -> Self {
        Self::new(path, array_index, vec![Keypoint::new(0.0, value)])
    }

    /// Muted, disabled and empty curves are skipped by evaluation.
    #[inline]
    pub fn is_evaluatable(&self) -> bool {
        !self.muted && !self.disabled && !self.points.is_empty()
    }

    /// Keyed frame extent, if any keys exist.
    pub fn frame_range(&self) -> Option<(f32, f32)> {
        let first = self.points.first()?;
        let mut lo = first.frame;
        let mut hi = first.frame;
        for p in &self.points[1..] {
            lo = lo.min(p.frame);
            hi = hi.max(p.frame);
        }
        Some((lo, hi))
    }
}

/// A named set of curves; the unit a clip strip references.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    #[serde(skip)]
    pub id: Option<ClipId>,
    pub name: String,
    pub curves: Vec<Curve>,
    /// Explicit playback range; otherwise derived from the keys.
    #[serde(default)]
    pub frame_range: Option<(f32, f32)>,
}

impl Clip {
    pub fn new(name: impl Into<String>, curves: Vec<Curve>) -> Self {
        Self {
            id: None,
            name: name.into(),
            curves,
            frame_range: None,
        }
    }

    /// Explicit range, else min/max keyed frame over evaluatable curves, else `(0, 0)`.
    pub fn frame_range(&self) -> (f32, f32) {
        if let Some(range) = self.frame_range {
            return range;
        }
        let mut range: Option<(f32, f32)> = None;
        for curve in self.curves.iter().filter(|c| c.is_evaluatable()) {
            if let Some((lo, hi)) = curve.frame_range() {
                range = Some(match range {
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                    None => (lo, hi),
                });
            }
        }
        range.unwrap_or((0.0, 0.0))
    }

    /// Frame range with a zero-length span widened to one frame.
    pub fn frame_range_nonzero(&self) -> (f32, f32) {
        let (start, end) = self.frame_range();
        if end <= start {
            (start, start + 1.0)
        } else {
            (start, end)
        }
    }
}

/// How a strip's contribution combines with the layers below it.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Replace,
    Add,
    Subtract,
    Multiply,
    Combine,
}

/// What a strip does outside its own frame range.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtendMode {
    Nothing,
    /// Hold the first and last frames.
    #[default]
    Hold,
    /// Hold only the last frame.
    HoldForward,
}

/// A strip setting driven either by a constant or by a curve over global time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Constant(f32),
    Curve(Curve),
}

/// User overrides of the analytic influence and time mapping.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StripControls {
    #[serde(default)]
    pub influence: Option<Control>,
    #[serde(default)]
    pub time: Option<Control>,
    /// Wrap user time into the clip range.
    #[serde(default)]
    pub cyclic_time: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StripKind {
    /// Plays a clip. `None` models a strip whose clip was removed.
    Clip(Option<ClipId>),
    /// Crossfades from the previous to the next strip on the same track.
    Transition,
    /// Window onto nested strips.
    Meta(Vec<Strip>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Strip {
    pub id: StripId,
    #[serde(default)]
    pub name: String,
    pub kind: StripKind,
    pub start: f32,
    pub end: f32,
    pub clip_start: f32,
    pub clip_end: f32,
    pub scale: f32,
    pub repeat: f32,
    pub blend_in: f32,
    pub blend_out: f32,
    pub blend_mode: BlendMode,
    pub extend_mode: ExtendMode,
    pub muted: bool,
    pub reversed: bool,
    /// Evaluate at global time regardless of the strip's placement.
    pub no_time_map: bool,
    /// Track the clip's frame range when tweaked.
    pub sync_length: bool,
    pub controls: StripControls,
}

impl Strip {
    pub fn new(id: StripId, kind: StripKind, start: f32, end: f32) -> Self {
        Self {
            id,
            name: String::new(),
            kind,
            start,
            end,
            clip_start: start,
            clip_end: end,
            scale: 1.0,
            repeat: 1.0,
            blend_in: 0.0,
            blend_out: 0.0,
            blend_mode: BlendMode::Replace,
            extend_mode: ExtendMode::Hold,
            muted: false,
            reversed: false,
            no_time_map: false,
            sync_length: false,
            controls: StripControls::default(),
        }
    }

    /// Clip strip whose clip range equals its placement.
    pub fn clip(id: StripId, clip: ClipId, start: f32, end: f32) -> Self {
        Self::new(id, StripKind::Clip(Some(clip)), start, end)
    }

    pub fn transition(id: StripId, start: f32, end: f32) -> Self {
        Self::new(id, StripKind::Transition, start, end)
    }

    /// Meta strip spanning its children.
    pub fn meta(id: StripId, children: Vec<Strip>) -> Self {
        let start = children.first().map(|s| s.start).unwrap_or(0.0);
        let end = children.last().map(|s| s.end).unwrap_or(start + 1.0);
        Self::new(id, StripKind::Meta(children), start, end)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clip_range(mut self, clip_start: f32, clip_end: f32) -> Self {
        self.clip_start = clip_start;
        self.clip_end = clip_end;
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_extend_mode(mut self, mode: ExtendMode) -> Self {
        self.extend_mode = mode;
        self
    }

    pub fn with_blend_in_out(mut self, blend_in: f32, blend_out: f32) -> Self {
        self.blend_in = blend_in;
        self.blend_out = blend_out;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_repeat(mut self, repeat: f32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_influence(mut self, control: Control) -> Self {
        self.controls.influence = Some(control);
        self
    }

    pub fn with_time(mut self, control: Control, cyclic: bool) -> Self {
        self.controls.time = Some(control);
        self.controls.cyclic_time = cyclic;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.end - self.start
    }

    /// Clip range length, never zero.
    #[inline]
    pub fn clip_length_nonzero(&self) -> f32 {
        if self.clip_end <= self.clip_start {
            1.0
        } else {
            self.clip_end - self.clip_start
        }
    }

    pub fn clip_id(&self) -> Option<ClipId> {
        match self.kind {
            StripKind::Clip(id) => id,
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, time: f32) -> bool {
        time >= self.start && time <= self.end
    }

    /// Re-derive the clip range from `clip` and stretch the strip to cover it, keeping keys
    /// at the same global frames.
    pub fn sync_to_clip(&mut self, clip: &Clip) {
        if !matches!(self.kind, StripKind::Clip(_)) {
            return;
        }
        let prev_clip_start = self.clip_start;
        let (start, end) = clip.frame_range_nonzero();
        self.clip_start = start;
        self.clip_end = end;
        self.start += (self.clip_start - prev_clip_start) * self.scale;
        let mapping = self.scale * self.repeat;
        if mapping != 0.0 {
            self.end = self.clip_length_nonzero() * mapping + self.start;
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub name: String,
    /// Sorted by start; never overlapping.
    pub strips: Vec<Strip>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Insert keeping start order. Touching strips are allowed; overlapping ones are not.
    pub fn insert_strip(&mut self, strip: Strip) -> Result<usize> {
        if !(strip.start < strip.end) {
            return Err(NlaError::InvalidStripRange {
                strip: strip.id,
                start: strip.start,
                end: strip.end,
            });
        }
        if let StripKind::Meta(children) = &strip.kind {
            validate_strip_order(&self.name, children)?;
        }
        if self
            .strips
            .iter()
            .any(|s| strip.start < s.end && strip.end > s.start)
        {
            return Err(NlaError::StripOverlap {
                strip: strip.id,
                track: self.name.clone(),
                start: strip.start,
                end: strip.end,
            });
        }
        let idx = self.strips.partition_point(|s| s.start < strip.start);
        self.strips.insert(idx, strip);
        Ok(idx)
    }

    /// Check the ordering invariant on strips assembled by hand: every range is
    /// non-empty, strips are sorted by start and none overlap. Meta children are checked
    /// the same way.
    pub fn validate(&self) -> Result<()> {
        validate_strip_order(&self.name, &self.strips)
    }

    pub fn with_strip(mut self, strip: Strip) -> Result<Self> {
        self.insert_strip(strip)?;
        Ok(self)
    }

    pub fn strip_index(&self, id: StripId) -> Option<usize> {
        self.strips.iter().position(|s| s.id == id)
    }
}

fn validate_strip_order(track: &str, strips: &[Strip]) -> Result<()> {
    for (i, strip) in strips.iter().enumerate() {
        if !(strip.start < strip.end) {
            return Err(NlaError::InvalidStripRange {
                strip: strip.id,
                start: strip.start,
                end: strip.end,
            });
        }
        if let Some(prev) = i.checked_sub(1).map(|p| &strips[p]) {
            if strip.start < prev.end {
                return Err(NlaError::StripOverlap {
                    strip: strip.id,
                    track: track.to_string(),
                    start: strip.start,
                    end: strip.end,
                });
            }
        }
        if let StripKind::Meta(children) = &strip.kind {
            validate_strip_order(track, children)?;
        }
    }
    Ok(())
}

/// Tweak mode: one strip's clip is being edited in place of the non-pushed action.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TweakMode {
    pub track: usize,
    pub strip: usize,
    /// Keep evaluating the tracks above the tweaked one (and the action).
    #[serde(default)]
    pub evaluate_upper_tracks: bool,
    /// Show the tweaked strip at its placement instead of at global time.
    #[serde(default = "default_true")]
    pub in_place: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LayerStack {
    #[serde(skip, default = "default_stack_id")]
    pub id: StackId,
    pub name: String,
    /// Bottom to top.
    pub tracks: Vec<Track>,
    /// The non-pushed action, evaluated as a synthetic topmost strip.
    pub action: Option<ClipId>,
    pub action_blend_mode: BlendMode,
    pub action_extend_mode: ExtendMode,
    pub action_influence: f32,
    pub evaluation_off: bool,
    pub tweak: Option<TweakMode>,
}

fn default_stack_id() -> StackId {
    StackId(0)
}

impl LayerStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StackId(0),
            name: name.into(),
            tracks: Vec::new(),
            action: None,
            action_blend_mode: BlendMode::Replace,
            action_extend_mode: ExtendMode::Hold,
            action_influence: 1.0,
            evaluation_off: false,
            tweak: None,
        }
    }

    pub fn push_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    #[inline]
    pub fn is_soloing(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    /// Strip being edited in tweak mode, if tweak mode is valid.
    pub fn tweaked_strip(&self) -> Option<&Strip> {
        let tweak = self.tweak?;
        self.tracks.get(tweak.track)?.strips.get(tweak.strip)
    }

    /// Enter tweak mode on `tracks[track].strips[strip]`.
    pub fn enter_tweak(
        &mut self,
        track: usize,
        strip: usize,
        evaluate_upper_tracks: bool,
    ) -> Result<()> {
        let len = self.tracks.len();
        let t = self
            .tracks
            .get(track)
            .ok_or(NlaError::TrackOutOfRange { index: track, len })?;
        if strip >= t.strips.len() {
            return Err(NlaError::StripOutOfRange {
                index: strip,
                len: t.strips.len(),
            });
        }
        self.tweak = Some(TweakMode {
            track,
            strip,
            evaluate_upper_tracks,
            in_place: true,
        });
        Ok(())
    }

    pub fn exit_tweak(&mut self) {
        self.tweak = None;
    }

    /// Insert into `tracks[track]`, keeping start order. An active tweak keeps pointing
    /// at the same strip when the insertion lands before it.
    pub fn insert_strip(&mut self, track: usize, strip: Strip) -> Result<usize> {
        let len = self.tracks.len();
        let index = self
            .tracks
            .get_mut(track)
            .ok_or(NlaError::TrackOutOfRange { index: track, len })?
            .insert_strip(strip)?;
        if let Some(tweak) = self.tweak.as_mut() {
            if tweak.track == track && index <= tweak.strip {
                tweak.strip += 1;
            }
        }
        Ok(index)
    }

    /// Editor-side normalization of extend modes: the earliest strip of the stack holds
    /// backwards, later Replace strips only hold forward. `Nothing` is never overwritten.
    pub fn validate_extend_modes(&mut self) {
        let mut first: Option<(usize, usize, f32)> = None;
        for (ti, track) in self.tracks.iter().enumerate() {
            for (si, strip) in track.strips.iter().enumerate() {
                if first.map_or(true, |(_, _, start)| strip.start < start) {
                    first = Some((ti, si, strip.start));
                }
            }
        }
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            for (si, strip) in track.strips.iter_mut().enumerate() {
                if strip.extend_mode == ExtendMode::Nothing {
                    continue;
                }
                if matches!(first, Some((ft, fs, _)) if ft == ti && fs == si) {
                    strip.extend_mode = ExtendMode::Hold;
                } else if strip.blend_mode == BlendMode::Replace {
                    strip.extend_mode = ExtendMode::HoldForward;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(id: u32, start: f32, end: f32) -> Strip {
        Strip::clip(StripId(id), ClipId(0), start, end)
    }

    #[test]
    fn insert_keeps_order_and_rejects_overlap() {
        let mut track = Track::new("t");
        track.insert_strip(strip(0, 10.0, 20.0)).unwrap();
        track.insert_strip(strip(1, 0.0, 10.0)).unwrap();
        track.insert_strip(strip(2, 20.0, 25.0)).unwrap();
        let starts: Vec<f32> = track.strips.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0.0, 10.0, 20.0]);

        let err = track.insert_strip(strip(3, 5.0, 12.0)).unwrap_err();
        assert!(matches!(err, NlaError::StripOverlap { .. }));
        let err = track.insert_strip(strip(4, 30.0, 30.0)).unwrap_err();
        assert!(matches!(err, NlaError::InvalidStripRange { .. }));
    }

    #[test]
    fn validate_rejects_hand_built_tracks() {
        let mut track = Track::new("t");
        track.strips = vec![strip(0, 20.0, 30.0), strip(1, 0.0, 10.0)];
        assert!(matches!(
            track.validate(),
            Err(NlaError::StripOverlap { strip: StripId(1), .. })
        ));

        track.strips = vec![strip(0, 0.0, 10.0), strip(1, 5.0, 15.0)];
        assert!(matches!(track.validate(), Err(NlaError::StripOverlap { .. })));

        track.strips = vec![Strip::transition(StripId(0), 4.0, 4.0)];
        assert!(matches!(
            track.validate(),
            Err(NlaError::InvalidStripRange { .. })
        ));

        let mut meta = Strip::meta(StripId(2), vec![strip(3, 0.0, 10.0)]);
        if let StripKind::Meta(children) = &mut meta.kind {
            children.push(strip(4, 8.0, 12.0));
        }
        meta.end = 12.0;
        track.strips = vec![meta];
        assert!(matches!(
            track.validate(),
            Err(NlaError::StripOverlap { strip: StripId(4), .. })
        ));

        track.strips = vec![strip(0, 0.0, 10.0), strip(1, 10.0, 15.0)];
        assert!(track.validate().is_ok());
    }

    #[test]
    fn inserting_before_the_tweaked_strip_keeps_the_tweak() {
        let mut stack = LayerStack::new("s");
        stack.push_track(Track::new("t").with_strip(strip(0, 10.0, 20.0)).unwrap());
        stack.enter_tweak(0, 0, false).unwrap();

        assert_eq!(stack.insert_strip(0, strip(1, 0.0, 5.0)).unwrap(), 0);
        assert_eq!(stack.tweak.map(|t| t.strip), Some(1));
        assert_eq!(stack.tweaked_strip().map(|s| s.id), Some(StripId(0)));

        assert_eq!(stack.insert_strip(0, strip(2, 30.0, 40.0)).unwrap(), 2);
        assert_eq!(stack.tweaked_strip().map(|s| s.id), Some(StripId(0)));
    }

    #[test]
    fn clip_range_from_keys() {
        let clip = Clip::new(
            "c",
            vec![
                Curve::new("a", 0, vec![Keypoint::new(2.0, 0.0), Keypoint::new(8.0, 1.0)]),
                Curve::new("b", 0, vec![Keypoint::new(-1.0, 0.0)]),
            ],
        );
        assert_eq!(clip.frame_range(), (-1.0, 8.0));
        let single = Clip::new("s", vec![Curve::constant("a", 0, 3.0)]);
        assert_eq!(single.frame_range_nonzero(), (0.0, 1.0));
    }

    #[test]
    fn sync_to_clip_stretches_strip() {
        let clip = Clip {
            frame_range: Some((0.0, 20.0)),
            ..Clip::new("c", Vec::new())
        };
        let mut s = strip(0, 0.0, 10.0).with_clip_range(0.0, 10.0).with_scale(2.0);
        s.sync_to_clip(&clip);
        assert_eq!((s.clip_start, s.clip_end), (0.0, 20.0));
        assert_eq!(s.end, 40.0);
    }

    #[test]
    fn validate_extend_modes_holds_first_only() {
        let mut stack = LayerStack::new("s");
        let lower = Track::new("lower").with_strip(strip(0, 0.0, 10.0)).unwrap();
        let upper = Track::new("upper")
            .with_strip(strip(1, 5.0, 10.0))
            .unwrap()
            .with_strip(strip(2, 20.0, 30.0).with_extend_mode(ExtendMode::Nothing))
            .unwrap();
        stack.push_track(lower);
        stack.push_track(upper);
        stack.validate_extend_modes();
        assert_eq!(stack.tracks[0].strips[0].extend_mode, ExtendMode::Hold);
        assert_eq!(stack.tracks[1].strips[0].extend_mode, ExtendMode::HoldForward);
        assert_eq!(stack.tracks[1].strips[1].extend_mode, ExtendMode::Nothing);
    }
}
