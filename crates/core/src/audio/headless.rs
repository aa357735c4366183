//! In-process stand-in for the studio middleware.
//!
//! Tracks banks, plugins, instances and parameters, and drives a simulated
//! timeline for each playing instance on its own worker thread so callbacks
//! arrive off the main thread exactly as they do with the real library. No
//! audio is produced.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    panic::Location,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{
    middleware_log, Attributes3d, BackendResult, BankId, CallbackEvent, CallbackMask,
    CallbackOutcome, EventCallback, InstanceId, PluginHandle, StopMode, StudioBackend,
    TimelineBeat,
};
use crate::{
    config::{AudioSettings, LoggingLevel},
    error::BackendError,
};

const WORKER_TICK: Duration = Duration::from_millis(5);

/// Musical shape of a registered event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventTimeline {
    pub tempo: f32,
    pub beats_per_bar: i32,
    /// Beats until the event ends by itself; `None` loops forever.
    pub length_beats: Option<u32>,
}

impl EventTimeline {
    pub fn new(tempo: f32, beats_per_bar: i32) -> Self {
        Self {
            tempo,
            beats_per_bar: beats_per_bar.max(1),
            length_beats: None,
        }
    }

    pub fn with_length(mut self, beats: u32) -> Self {
        self.length_beats = Some(beats);
        self
    }

    fn beat_interval(&self) -> Duration {
        Duration::from_secs_f32(60.0 / self.tempo.max(1.0))
    }
}

struct Playback {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl Playback {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn halt(self) {
        self.stop.store(true, Ordering::Release);
        if self.worker.join().is_err() {
            tracing::warn!("timeline worker panicked");
        }
    }
}

struct Instance {
    event: String,
    timeline: EventTimeline,
    attributes: Attributes3d,
    callback: Option<(EventCallback, CallbackMask)>,
    parameters: HashMap<String, f32>,
    paused: Arc<AtomicBool>,
    playback: Option<Playback>,
    released: bool,
}

impl Instance {
    fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| !p.is_finished())
    }

    fn halt(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.halt();
        }
    }
}

/// [`StudioBackend`] that runs entirely in memory.
pub struct HeadlessBackend {
    valid: bool,
    settings: Option<AudioSettings>,
    virtual_banks: HashSet<String>,
    virtual_plugins: HashSet<String>,
    events: HashMap<String, (String, EventTimeline)>,
    labels: HashMap<String, Vec<String>>,
    plugin_path: PathBuf,
    plugins: HashMap<String, PluginHandle>,
    banks: HashMap<BankId, String>,
    instances: HashMap<InstanceId, Instance>,
    globals: HashMap<String, f32>,
    next_id: u64,
    updates: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            valid: false,
            settings: None,
            virtual_banks: HashSet::new(),
            virtual_plugins: HashSet::new(),
            events: HashMap::new(),
            labels: HashMap::new(),
            plugin_path: PathBuf::new(),
            plugins: HashMap::new(),
            banks: HashMap::new(),
            instances: HashMap::new(),
            globals: HashMap::new(),
            next_id: 1,
            updates: 0,
        }
    }

    /// Makes `path` loadable without a file on disk.
    pub fn with_virtual_bank(mut self, path: impl Into<String>) -> Self {
        self.virtual_banks.insert(path.into());
        self
    }

    pub fn with_virtual_plugin(mut self, name: impl Into<String>) -> Self {
        self.virtual_plugins.insert(name.into());
        self
    }

    /// Registers `event_path` as living in the bank file `bank_file`.
    pub fn with_event(
        mut self,
        bank_file: impl Into<String>,
        event_path: impl Into<String>,
        timeline: EventTimeline,
    ) -> Self {
        self.events
            .insert(event_path.into(), (bank_file.into(), timeline));
        self
    }

    /// Declares a labelled parameter; labels map to their index.
    pub fn with_labeled_parameter(mut self, name: impl Into<String>, labels: &[&str]) -> Self {
        self.labels.insert(
            name.into(),
            labels.iter().map(|label| label.to_string()).collect(),
        );
        self
    }

    pub fn settings(&self) -> Option<&AudioSettings> {
        self.settings.as_ref()
    }

    pub fn global_parameter(&self, name: &str) -> Option<f32> {
        self.globals.get(name).copied()
    }

    pub fn parameter(&self, instance: InstanceId, name: &str) -> Option<f32> {
        self.instances
            .get(&instance)
            .and_then(|inst| inst.parameters.get(name).copied())
    }

    pub fn attributes(&self, instance: InstanceId) -> Option<Attributes3d> {
        self.instances.get(&instance).map(|inst| inst.attributes)
    }

    pub fn event_path(&self, instance: InstanceId) -> Option<&str> {
        self.instances.get(&instance).map(|inst| inst.event.as_str())
    }

    pub fn is_playing(&self, instance: InstanceId) -> bool {
        self.instances
            .get(&instance)
            .is_some_and(Instance::is_playing)
    }

    pub fn loaded_bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    #[track_caller]
    fn log(&self, level: LoggingLevel, func: &str, message: &str) {
        let threshold = self
            .settings
            .as_ref()
            .map_or(LoggingLevel::None, |settings| settings.logging_level);
        if threshold.allows(level) {
            let caller = Location::caller();
            middleware_log(level, caller.file(), caller.line(), func, message);
        }
    }

    fn ensure_valid(&self) -> BackendResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(BackendError::InvalidSystem)
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn instance(&self, instance: InstanceId) -> BackendResult<&Instance> {
        self.ensure_valid()?;
        self.instances
            .get(&instance)
            .ok_or(BackendError::InvalidHandle)
    }

    fn instance_mut(&mut self, instance: InstanceId) -> BackendResult<&mut Instance> {
        self.ensure_valid()?;
        self.instances
            .get_mut(&instance)
            .ok_or(BackendError::InvalidHandle)
    }

    fn label_index(&self, name: &str, label: &str) -> BackendResult<f32> {
        let labels = self
            .labels
            .get(name)
            .ok_or_else(|| BackendError::ParameterNotFound(name.to_string()))?;
        labels
            .iter()
            .position(|candidate| candidate == label)
            .map(|index| index as f32)
            .ok_or_else(|| BackendError::Other(format!("label `{label}` not defined for `{name}`")))
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("valid", &self.valid)
            .field("banks", &self.banks.len())
            .field("instances", &self.instances.len())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        self.release();
    }
}

impl StudioBackend for HeadlessBackend {
    fn initialize(&mut self, settings: &AudioSettings) -> BackendResult<()> {
        if self.valid {
            return Err(BackendError::Other("studio system already initialized".into()));
        }
        self.valid = true;
        self.settings = Some(settings.clone());
        self.log(LoggingLevel::Log, "initialize", "studio system initialized");
        if settings.studio_flags().live_update {
            self.log(
                LoggingLevel::Log,
                "initialize",
                &format!("live update listening on port {}", settings.live_update_port),
            );
        }
        Ok(())
    }

    fn release(&mut self) {
        for (_, mut instance) in self.instances.drain() {
            instance.halt();
        }
        self.banks.clear();
        self.plugins.clear();
        self.globals.clear();
        self.valid = false;
        self.settings = None;
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn update(&mut self) -> BackendResult<()> {
        self.ensure_valid()?;
        self.updates += 1;

        for instance in self.instances.values_mut() {
            if instance.playback.as_ref().is_some_and(Playback::is_finished) {
                instance.halt();
            }
        }
        self.instances
            .retain(|_, instance| !(instance.released && instance.playback.is_none()));
        Ok(())
    }

    fn set_plugin_path(&mut self, path: &str) -> BackendResult<()> {
        self.ensure_valid()?;
        self.plugin_path = PathBuf::from(path);
        Ok(())
    }

    fn load_plugin(&mut self, name: &str) -> BackendResult<PluginHandle> {
        self.ensure_valid()?;
        if let Some(handle) = self.plugins.get(name) {
            return Ok(*handle);
        }
        if !(self.virtual_plugins.contains(name) || self.plugin_path.join(name).is_file()) {
            self.log(LoggingLevel::Warning, "load_plugin", &format!("plugin `{name}` not found"));
            return Err(BackendError::PluginNotFound(name.to_string()));
        }
        let handle = PluginHandle(self.next_id() as u32);
        self.plugins.insert(name.to_string(), handle);
        Ok(handle)
    }

    fn load_bank(&mut self, path: &str) -> BackendResult<BankId> {
        self.ensure_valid()?;
        if let Some((id, _)) = self.banks.iter().find(|(_, loaded)| *loaded == path) {
            return Ok(*id);
        }
        if !(self.virtual_banks.contains(path) || Path::new(path).is_file()) {
            self.log(LoggingLevel::Error, "load_bank", &format!("file not found: {path}"));
            return Err(BackendError::BankNotFound(path.to_string()));
        }
        let id = BankId(self.next_id());
        self.banks.insert(id, path.to_string());
        Ok(id)
    }

    fn bank_by_path(&self, studio_path: &str) -> BackendResult<BankId> {
        self.ensure_valid()?;
        let name = studio_path.strip_prefix("bank:/").unwrap_or(studio_path);
        self.banks
            .iter()
            .find(|(_, path)| {
                Path::new(path.as_str())
                    .file_stem()
                    .is_some_and(|stem| stem == name)
            })
            .map(|(id, _)| *id)
            .ok_or_else(|| BackendError::BankNotFound(studio_path.to_string()))
    }

    fn unload_bank(&mut self, bank: BankId) -> BackendResult<()> {
        self.ensure_valid()?;
        self.banks
            .remove(&bank)
            .map(|_| ())
            .ok_or(BackendError::InvalidHandle)
    }

    fn create_instance(&mut self, event_path: &str) -> BackendResult<InstanceId> {
        self.ensure_valid()?;
        let (bank_file, timeline) = self
            .events
            .get(event_path)
            .cloned()
            .ok_or_else(|| BackendError::EventNotFound(event_path.to_string()))?;
        if !self.banks.values().any(|path| path.ends_with(&bank_file)) {
            return Err(BackendError::EventNotFound(event_path.to_string()));
        }

        let id = InstanceId(self.next_id());
        self.instances.insert(
            id,
            Instance {
                event: event_path.to_string(),
                timeline,
                attributes: Attributes3d::default(),
                callback: None,
                parameters: HashMap::new(),
                paused: Arc::new(AtomicBool::new(false)),
                playback: None,
                released: false,
            },
        );
        Ok(id)
    }

    fn instance_valid(&self, instance: InstanceId) -> bool {
        self.valid && self.instances.contains_key(&instance)
    }

    fn set_3d_attributes(
        &mut self,
        instance: InstanceId,
        attributes: &Attributes3d,
    ) -> BackendResult<()> {
        self.instance_mut(instance)?.attributes = *attributes;
        Ok(())
    }

    fn set_callback(
        &mut self,
        instance: InstanceId,
        callback: EventCallback,
        mask: CallbackMask,
    ) -> BackendResult<()> {
        self.instance_mut(instance)?.callback = Some((callback, mask));
        Ok(())
    }

    fn start(&mut self, instance: InstanceId) -> BackendResult<()> {
        let inst = self.instance_mut(instance)?;
        inst.halt();

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let worker = spawn_timeline(
            inst.timeline,
            inst.callback.clone(),
            Arc::clone(&inst.paused),
            Arc::clone(&stop),
            Arc::clone(&finished),
        )?;
        inst.playback = Some(Playback {
            stop,
            finished,
            worker,
        });
        Ok(())
    }

    fn stop(&mut self, instance: InstanceId, _mode: StopMode) -> BackendResult<()> {
        let inst = self.instance_mut(instance)?;
        inst.halt();
        if inst.released {
            self.instances.remove(&instance);
        }
        Ok(())
    }

    fn release_instance(&mut self, instance: InstanceId) -> BackendResult<()> {
        let inst = self.instance_mut(instance)?;
        inst.released = true;
        if !inst.is_playing() {
            inst.halt();
            self.instances.remove(&instance);
        }
        Ok(())
    }

    fn set_paused(&mut self, instance: InstanceId, paused: bool) -> BackendResult<()> {
        self.instance(instance)?
            .paused
            .store(paused, Ordering::Release);
        Ok(())
    }

    fn is_paused(&self, instance: InstanceId) -> BackendResult<bool> {
        Ok(self.instance(instance)?.paused.load(Ordering::Acquire))
    }

    fn set_parameter(
        &mut self,
        instance: InstanceId,
        name: &str,
        value: f32,
        _ignore_seek_speed: bool,
    ) -> BackendResult<()> {
        self.instance_mut(instance)?
            .parameters
            .insert(name.to_string(), value);
        Ok(())
    }

    fn set_parameter_with_label(
        &mut self,
        instance: InstanceId,
        name: &str,
        label: &str,
        _ignore_seek_speed: bool,
    ) -> BackendResult<()> {
        let value = self.label_index(name, label)?;
        self.instance_mut(instance)?
            .parameters
            .insert(name.to_string(), value);
        Ok(())
    }

    fn set_global_parameter(
        &mut self,
        name: &str,
        value: f32,
        _ignore_seek_speed: bool,
    ) -> BackendResult<()> {
        self.ensure_valid()?;
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    fn set_global_parameter_with_label(
        &mut self,
        name: &str,
        label: &str,
        _ignore_seek_speed: bool,
    ) -> BackendResult<()> {
        self.ensure_valid()?;
        let value = self.label_index(name, label)?;
        self.globals.insert(name.to_string(), value);
        Ok(())
    }
}

fn spawn_timeline(
    timeline: EventTimeline,
    callback: Option<(EventCallback, CallbackMask)>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
) -> BackendResult<JoinHandle<()>> {
    let notify = move |event: CallbackEvent| {
        if let Some((callback, mask)) = &callback {
            if mask.contains(event.kind()) && callback(&event) == CallbackOutcome::Unhandled {
                tracing::trace!(?event, "event callback left notification unhandled");
            }
        }
    };

    thread::Builder::new()
        .name("headless-timeline".into())
        .spawn(move || {
            let interval = timeline.beat_interval();
            let beats_per_bar = timeline.beats_per_bar.max(1);
            let mut count: u32 = 0;
            let mut next = Instant::now();

            notify(CallbackEvent::Started);
            while !stop.load(Ordering::Acquire) {
                if timeline.length_beats.is_some_and(|length| count >= length) {
                    break;
                }
                if paused.load(Ordering::Acquire) {
                    thread::sleep(WORKER_TICK);
                    next += WORKER_TICK;
                    continue;
                }

                let now = Instant::now();
                if now < next {
                    thread::sleep((next - now).min(WORKER_TICK));
                    continue;
                }

                let per_bar = beats_per_bar as u32;
                notify(CallbackEvent::TimelineBeat(TimelineBeat {
                    bar: (count / per_bar) as i32 + 1,
                    beat: (count % per_bar) as i32 + 1,
                    position_ms: (interval.as_secs_f32() * count as f32 * 1000.0) as i32,
                    tempo: timeline.tempo,
                    time_signature_upper: beats_per_bar,
                    time_signature_lower: 4,
                }));
                count += 1;
                next += interval;
            }

            finished.store(true, Ordering::Release);
            notify(CallbackEvent::Stopped);
        })
        .map_err(|err| BackendError::Other(format!("could not spawn timeline worker: {err}")))
}
