//! Strata NLA Core (engine-agnostic)
//!
//! Layered animation evaluation: tracks of strips placing keyed clips on a
//! timeline are blended bottom to top into per-property values, and the same
//! blend algebra runs in reverse so that keys inserted while the stack is
//! active land on the edited clip with the value the user actually sees.
//!
//! Hosts expose their properties through [`PropertyAccessor`]; everything else
//! (clips, stacks, snapshots) is owned by the [`Engine`].

pub mod binding;
pub mod blend;
pub mod channel;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod ids;
pub mod interp;
pub mod keyframing;
pub mod mask;
pub mod sampling;
pub mod snapshot;
pub mod stack;
pub mod stack_document;
pub mod strip_eval;

// Re-exports for consumers (adapters)
pub use binding::{PropertyAccessor, PropertyHandle, PropertyInfo, PropertyStore, PropertySubtype};
pub use blend::BlendOp;
pub use channel::{Channel, ChannelRegistry, MixMode};
pub use config::Config;
pub use data::{
    BlendMode, Clip, Control, Curve, ExtendMode, Interpolation, Keypoint, LayerStack, Strip,
    StripControls, StripKind, Track, TweakMode,
};
pub use engine::Engine;
pub use error::{NlaError, Result};
pub use ids::{ChannelId, ClipId, StackId, StripId};
pub use keyframing::{
    remap_keyframe_values, EditTarget, KeyframingCache, KeyframingContext, RemapOutcome,
};
pub use mask::ValidMask;
pub use sampling::{sample_curve, CurveEvaluator, KeyframeEvaluator};
pub use snapshot::{ChannelSnapshot, EvalData, Snapshot};
pub use stack::{EvalPath, EvalReport};
pub use stack_document::{parse_stack_document_json, LoadedDocument, StackDocument};
pub use strip_eval::{ClipLibrary, EvalContext, EvalStrip, Region};
