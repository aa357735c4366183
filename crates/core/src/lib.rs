//! Core library bridging a frame loop with an event-based studio audio
//! middleware.
//!
//! The middleware and the window are reached through the [`StudioBackend`]
//! and [`Window`] traits. Everything else lives here: the sectioned config
//! reader, the typed [`AudioSettings`] it feeds, the [`AudioEngine`] wrapper
//! over the middleware calls, the bar/beat cache that audio callbacks write
//! into, and the [`Game`] loop that ties them together. Headless
//! implementations of both traits make the loop runnable without the vendor
//! libraries.

pub mod audio;
pub mod config;
pub mod error;
pub mod game;
pub mod position;
pub mod render;

pub use audio::{
    AudioEngine, CallbackEvent, CallbackMask, CallbackOutcome, EventCallback, EventTimeline,
    HeadlessBackend, InstanceId, PlayOptions, StudioBackend,
};
pub use config::{AudioSettings, ConfigStore, LoggingLevel, SpeakerMode};
pub use error::{BackendError, Result, StudioBridgeError};
pub use game::{Game, GameOptions};
pub use position::{MusicPosition, MusicPositionCache};
pub use render::{HeadlessWindow, Window};
