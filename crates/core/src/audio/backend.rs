use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{config::AudioSettings, error::BackendError};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Handle to an event instance created by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// Handle to a loaded bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankId(pub u64);

/// Handle to a registered DSP/output plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub u32);

/// How an instance should come to rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopMode {
    #[default]
    AllowFadeOut,
    Immediate,
}

/// Spatial attributes applied to an event instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attributes3d {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub forward: [f32; 3],
    pub up: [f32; 3],
}

impl Default for Attributes3d {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            forward: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
        }
    }
}

/// Set of callback kinds an event callback is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackMask(u32);

impl CallbackMask {
    pub const STARTED: Self = Self(1 << 0);
    pub const STOPPED: Self = Self(1 << 1);
    pub const TIMELINE_MARKER: Self = Self(1 << 2);
    pub const TIMELINE_BEAT: Self = Self(1 << 3);
    pub const ALL: Self = Self(u32::MAX);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for CallbackMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::ops::BitOr for CallbackMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Properties delivered with a timeline beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineBeat {
    pub bar: i32,
    pub beat: i32,
    pub position_ms: i32,
    pub tempo: f32,
    pub time_signature_upper: i32,
    pub time_signature_lower: i32,
}

/// Notification delivered to an event callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Started,
    Stopped,
    TimelineMarker { name: String, position_ms: i32 },
    TimelineBeat(TimelineBeat),
}

impl CallbackEvent {
    pub fn kind(&self) -> CallbackMask {
        match self {
            Self::Started => CallbackMask::STARTED,
            Self::Stopped => CallbackMask::STOPPED,
            Self::TimelineMarker { .. } => CallbackMask::TIMELINE_MARKER,
            Self::TimelineBeat(_) => CallbackMask::TIMELINE_BEAT,
        }
    }
}

/// What a callback reports back to the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Handled,
    Unhandled,
}

/// Event callback. The middleware invokes it from its own worker threads, so
/// it must be thread safe and return quickly.
pub type EventCallback = Arc<dyn Fn(&CallbackEvent) -> CallbackOutcome + Send + Sync>;

/// Options for [`AudioEngine::play_event`](super::AudioEngine::play_event).
#[derive(Clone)]
pub struct PlayOptions {
    pub attributes: Attributes3d,
    pub callback: Option<EventCallback>,
    pub callback_mask: CallbackMask,
    pub auto_start: bool,
    /// Release the handle right after starting; the middleware frees the
    /// instance once playback stops.
    pub auto_release: bool,
}

impl PlayOptions {
    pub fn with_callback(mut self, mask: CallbackMask, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self.callback_mask = mask;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes3d) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_start = false;
        self.auto_release = false;
        self
    }
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            attributes: Attributes3d::default(),
            callback: None,
            callback_mask: CallbackMask::ALL,
            auto_start: true,
            auto_release: true,
        }
    }
}

impl fmt::Debug for PlayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayOptions")
            .field("attributes", &self.attributes)
            .field("callback", &self.callback.is_some())
            .field("callback_mask", &self.callback_mask)
            .field("auto_start", &self.auto_start)
            .field("auto_release", &self.auto_release)
            .finish()
    }
}

/// The studio audio middleware as seen by [`AudioEngine`](super::AudioEngine).
///
/// Implementations wrap the vendor library; [`HeadlessBackend`](super::HeadlessBackend)
/// is an in-process stand-in.
pub trait StudioBackend {
    /// Creates and configures the studio system.
    fn initialize(&mut self, settings: &AudioSettings) -> BackendResult<()>;
    /// Releases the studio system and everything it owns.
    fn release(&mut self);
    fn is_valid(&self) -> bool;
    /// Per-frame processing; dispatches deferred work inside the middleware.
    fn update(&mut self) -> BackendResult<()>;

    fn set_plugin_path(&mut self, path: &str) -> BackendResult<()>;
    fn load_plugin(&mut self, name: &str) -> BackendResult<PluginHandle>;

    fn load_bank(&mut self, path: &str) -> BackendResult<BankId>;
    /// Looks up a loaded bank by its studio path, e.g. `bank:/Music`.
    fn bank_by_path(&self, studio_path: &str) -> BackendResult<BankId>;
    fn unload_bank(&mut self, bank: BankId) -> BackendResult<()>;

    fn create_instance(&mut self, event_path: &str) -> BackendResult<InstanceId>;
    fn instance_valid(&self, instance: InstanceId) -> bool;
    fn set_3d_attributes(
        &mut self,
        instance: InstanceId,
        attributes: &Attributes3d,
    ) -> BackendResult<()>;
    fn set_callback(
        &mut self,
        instance: InstanceId,
        callback: EventCallback,
        mask: CallbackMask,
    ) -> BackendResult<()>;
    fn start(&mut self, instance: InstanceId) -> BackendResult<()>;
    fn stop(&mut self, instance: InstanceId, mode: StopMode) -> BackendResult<()>;
    /// Marks the instance for destruction once it stops playing.
    fn release_instance(&mut self, instance: InstanceId) -> BackendResult<()>;
    fn set_paused(&mut self, instance: InstanceId, paused: bool) -> BackendResult<()>;
    fn is_paused(&self, instance: InstanceId) -> BackendResult<bool>;

    fn set_parameter(
        &mut self,
        instance: InstanceId,
        name: &str,
        value: f32,
        ignore_seek_speed: bool,
    ) -> BackendResult<()>;
    fn set_parameter_with_label(
        &mut self,
        instance: InstanceId,
        name: &str,
        label: &str,
        ignore_seek_speed: bool,
    ) -> BackendResult<()>;
    fn set_global_parameter(
        &mut self,
        name: &str,
        value: f32,
        ignore_seek_speed: bool,
    ) -> BackendResult<()>;
    fn set_global_parameter_with_label(
        &mut self,
        name: &str,
        label: &str,
        ignore_seek_speed: bool,
    ) -> BackendResult<()>;
}
