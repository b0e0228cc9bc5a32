use hashbrown::HashMap;
use serde::Deserialize;

use crate::binding::{PropertyInfo, PropertyStore};
use crate::data::{BlendMode, Clip, Control, ExtendMode, LayerStack, Strip, Track, TweakMode};
use crate::engine::Engine;
use crate::error::{NlaError, Result};
use crate::ids::{ClipId, StackId};

/// Public API: parse a JSON stack document (named clips, stacks referencing clips by name,
/// optional property declarations) into a [`StackDocument`].
///
/// Notes:
/// - Clip strips default their clip range to the clip's frame range and their end to
///   `start + clip length * scale * repeat`.
/// - Meta strips span their children; transitions need an explicit `end`.
/// - Strip ids are allocated by the engine at load time.
pub fn parse_stack_document_json(s: &str) -> Result<StackDocument> {
    serde_json::from_str(s).map_err(|e| NlaError::Document(format!("parse error: {e}")))
}

#[derive(Clone, Debug, Deserialize)]
pub struct StackDocument {
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub stacks: Vec<StackDoc>,
    #[serde(default)]
    pub properties: Vec<PropertyDoc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PropertyDoc {
    pub path: String,
    pub info: PropertyInfo,
    #[serde(default)]
    pub defaults: Vec<f32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StackDoc {
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<TrackDoc>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_blend_mode: BlendMode,
    #[serde(default)]
    pub action_extend_mode: ExtendMode,
    #[serde(default = "one")]
    pub action_influence: f32,
    #[serde(default)]
    pub evaluation_off: bool,
    #[serde(default)]
    pub tweak: Option<TweakMode>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackDoc {
    pub name: String,
    #[serde(default)]
    pub strips: Vec<StripDoc>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StripDocKind {
    Clip,
    Transition,
    Meta,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StripDoc {
    #[serde(default)]
    pub name: String,
    pub kind: StripDocKind,
    /// Clip name, for clip strips.
    #[serde(default)]
    pub clip: Option<String>,
    #[serde(default)]
    pub children: Vec<StripDoc>,
    #[serde(default)]
    pub start: f32,
    #[serde(default)]
    pub end: Option<f32>,
    #[serde(default)]
    pub clip_start: Option<f32>,
    #[serde(default)]
    pub clip_end: Option<f32>,
    #[serde(default = "one")]
    pub scale: f32,
    #[serde(default = "one")]
    pub repeat: f32,
    #[serde(default)]
    pub blend_in: f32,
    #[serde(default)]
    pub blend_out: f32,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default)]
    pub extend_mode: ExtendMode,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub no_time_map: bool,
    #[serde(default)]
    pub sync_length: bool,
    #[serde(default)]
    pub influence: Option<Control>,
    #[serde(default)]
    pub time: Option<Control>,
    #[serde(default)]
    pub cyclic_time: bool,
}

fn one() -> f32 {
    1.0
}

/// Ids assigned while loading a document into an engine.
#[derive(Clone, Debug, Default)]
pub struct LoadedDocument {
    pub clips: HashMap<String, ClipId>,
    /// In document order.
    pub stacks: Vec<(String, StackId)>,
}

impl LoadedDocument {
    pub fn stack(&self, name: &str) -> Option<StackId> {
        self.stacks.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn clip(&self, name: &str) -> Option<ClipId> {
        self.clips.get(name).copied()
    }
}

impl StackDocument {
    /// Load every clip, then every stack, into `engine`.
    pub fn load_into(&self, engine: &mut Engine) -> Result<LoadedDocument> {
        let mut loaded = LoadedDocument::default();
        for clip in &self.clips {
            if loaded.clips.contains_key(&clip.name) {
                return Err(NlaError::Document(format!("duplicate clip '{}'", clip.name)));
            }
            let id = engine.load_clip(clip.clone());
            loaded.clips.insert(clip.name.clone(), id);
        }
        for doc in &self.stacks {
            let stack = build_stack(engine, &loaded, doc)?;
            let id = engine.add_stack(stack)?;
            loaded.stacks.push((doc.name.clone(), id));
        }
        Ok(loaded)
    }

    /// A property store holding every declared property at its defaults.
    pub fn property_store(&self) -> PropertyStore {
        let mut store = PropertyStore::new();
        for prop in &self.properties {
            store.insert(&prop.path, prop.info, &prop.defaults);
        }
        store
    }
}

fn lookup_clip(loaded: &LoadedDocument, name: &str) -> Result<ClipId> {
    loaded
        .clip(name)
        .ok_or_else(|| NlaError::Document(format!("unknown clip '{name}'")))
}

fn build_stack(engine: &mut Engine, loaded: &LoadedDocument, doc: &StackDoc) -> Result<LayerStack> {
    let mut stack = LayerStack::new(doc.name.clone());
    stack.action = doc
        .action
        .as_deref()
        .map(|name| lookup_clip(loaded, name))
        .transpose()?;
    stack.action_blend_mode = doc.action_blend_mode;
    stack.action_extend_mode = doc.action_extend_mode;
    stack.action_influence = doc.action_influence;
    stack.evaluation_off = doc.evaluation_off;

    for td in &doc.tracks {
        let mut track = Track::new(td.name.clone());
        track.muted = td.muted;
        track.solo = td.solo;
        track.disabled = td.disabled;
        for sd in &td.strips {
            let strip = build_strip(engine, loaded, sd)?;
            track.insert_strip(strip)?;
        }
        stack.push_track(track);
    }

    if let Some(tweak) = doc.tweak {
        stack.enter_tweak(tweak.track, tweak.strip, tweak.evaluate_upper_tracks)?;
        if let Some(t) = stack.tweak.as_mut() {
            t.in_place = tweak.in_place;
        }
    }
    Ok(stack)
}

fn build_strip(engine: &mut Engine, loaded: &LoadedDocument, doc: &StripDoc) -> Result<Strip> {
    let id = engine.alloc_strip_id();
    let mut strip = match doc.kind {
        StripDocKind::Clip => {
            let name = doc.clip.as_deref().ok_or_else(|| {
                NlaError::Document(format!("clip strip '{}' names no clip", doc.name))
            })?;
            let clip_id = lookup_clip(loaded, name)?;
            let (range_start, range_end) = engine
                .clip(clip_id)
                .map(|c| c.frame_range())
                .unwrap_or((0.0, 0.0));
            let clip_start = doc.clip_start.unwrap_or(range_start);
            let clip_end = doc.clip_end.unwrap_or(range_end);
            let end = doc
                .end
                .unwrap_or(doc.start + (clip_end - clip_start) * doc.scale * doc.repeat);
            Strip::clip(id, clip_id, doc.start, end).with_clip_range(clip_start, clip_end)
        }
        StripDocKind::Transition => {
            let end = doc.end.ok_or_else(|| {
                NlaError::Document(format!("transition '{}' needs an end frame", doc.name))
            })?;
            Strip::transition(id, doc.start, end)
        }
        StripDocKind::Meta => {
            let mut children = Vec::with_capacity(doc.children.len());
            for child in &doc.children {
                children.push(build_strip(engine, loaded, child)?);
            }
            children.sort_by(|a, b| a.start.total_cmp(&b.start));
            Strip::meta(id, children)
        }
    };

    strip.name = doc.name.clone();
    strip.scale = doc.scale;
    strip.repeat = doc.repeat;
    strip.blend_in = doc.blend_in;
    strip.blend_out = doc.blend_out;
    strip.blend_mode = doc.blend_mode;
    strip.extend_mode = doc.extend_mode;
    strip.muted = doc.muted;
    strip.reversed = doc.reversed;
    strip.no_time_map = doc.no_time_map;
    strip.sync_length = doc.sync_length;
    strip.controls.influence = doc.influence.clone();
    strip.controls.time = doc.time.clone();
    strip.controls.cyclic_time = doc.cyclic_time;
    Ok(strip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_strip_defaults_follow_the_clip() {
        let json = r#"{
            "clips": [{
                "name": "walk",
                "curves": [{ "path": "x", "points": [
                    { "frame": 10.0, "value": 0.0 },
                    { "frame": 20.0, "value": 1.0 }
                ]}]
            }],
            "stacks": [{
                "name": "main",
                "tracks": [{ "name": "base", "strips": [
                    { "kind": "clip", "clip": "walk", "start": 0.0, "scale": 2.0 }
                ]}]
            }]
        }"#;
        let doc = parse_stack_document_json(json).unwrap();
        let mut engine = Engine::default();
        let loaded = doc.load_into(&mut engine).unwrap();
        let stack = engine.stack(loaded.stack("main").unwrap()).unwrap();
        let strip = &stack.tracks[0].strips[0];
        assert_eq!((strip.clip_start, strip.clip_end), (10.0, 20.0));
        assert_eq!((strip.start, strip.end), (0.0, 20.0));
        assert_eq!(strip.clip_id(), loaded.clip("walk"));
    }

    #[test]
    fn unknown_clip_names_are_document_errors() {
        let json = r#"{ "stacks": [{ "name": "s", "action": "nope" }] }"#;
        let doc = parse_stack_document_json(json).unwrap();
        let err = doc.load_into(&mut Engine::default()).unwrap_err();
        assert!(matches!(err, NlaError::Document(msg) if msg.contains("nope")));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            parse_stack_document_json("{ \"clips\": 3 }"),
            Err(NlaError::Document(_))
        ));
    }
}
