//! Playback: the engine seam and the controller that owns it.
//!
//! - [`MediaEngine`]: queue-based engine interface
//! - [`SilentEngine`]: clock-driven engine without audio output
//! - `RodioEngine`: real output, behind the `audio-output` feature
//! - [`PlaybackController`]: transport API and observable session

pub mod controller;
pub mod engine;
#[cfg(feature = "audio-output")]
pub mod rodio_engine;

pub use controller::{PlaybackController, PlaybackSession, PlaybackStatus};
pub use engine::{
    EngineEvent, EngineState, EventReceiver, MediaEngine, MediaItem, SilentEngine,
    TransitionReason,
};
#[cfg(feature = "audio-output")]
pub use rodio_engine::RodioEngine;
