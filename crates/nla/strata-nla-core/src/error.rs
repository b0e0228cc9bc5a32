//! Error type for structural misuse of the engine API.
//!
//! Evaluation itself never fails: unresolved properties, bad array indices and
//! non-invertible blends are recovered locally. These variants cover the calls
//! where the caller handed us something inconsistent.

use thiserror::Error;

use crate::ids::{ClipId, StackId, StripId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NlaError {
    #[error("unknown stack {0:?}")]
    UnknownStack(StackId),
    #[error("unknown clip {0:?}")]
    UnknownClip(ClipId),
    #[error("track index {index} out of range (stack has {len} tracks)")]
    TrackOutOfRange { index: usize, len: usize },
    #[error("strip index {index} out of range (track has {len} strips)")]
    StripOutOfRange { index: usize, len: usize },
    #[error("strip {strip:?} has an empty or inverted frame range [{start}, {end}]")]
    InvalidStripRange { strip: StripId, start: f32, end: f32 },
    #[error("strip {strip:?} [{start}, {end}] overlaps an existing strip on track '{track}'")]
    StripOverlap {
        strip: StripId,
        track: String,
        start: f32,
        end: f32,
    },
    #[error("property '{0}' cannot be resolved or is not animatable")]
    UnresolvedProperty(String),
    #[error("expected {expected} values for the property, got {got}")]
    ValueCountMismatch { expected: usize, got: usize },
    #[error("stack document: {0}")]
    Document(String),
}

pub type Result<T> = std::result::Result<T, NlaError>;
