mod backend;
mod headless;

use std::{collections::HashMap, path::Path};

pub use backend::{
    Attributes3d, BackendResult, BankId, CallbackEvent, CallbackMask, CallbackOutcome,
    EventCallback, InstanceId, PlayOptions, PluginHandle, StopMode, StudioBackend, TimelineBeat,
};
pub use headless::{EventTimeline, HeadlessBackend};

use crate::{
    config::{AudioSettings, ConfigStore, LoggingLevel},
    Result, StudioBridgeError,
};

/// Default location of the engine config, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/audio_engine.ini";

/// Platform directory that banks are built into.
pub const PLATFORM: &str = if cfg!(any(target_os = "android", target_os = "ios")) {
    "Mobile"
} else {
    "Desktop"
};

/// High level audio engine façade over a [`StudioBackend`].
///
/// There is exactly one engine per backend. It is created explicitly and
/// handed to whatever needs audio rather than living in a global.
#[derive(Debug)]
pub struct AudioEngine<B: StudioBackend> {
    backend: B,
    settings: Option<AudioSettings>,
    bank_root: String,
    main_banks_loaded: bool,
    plugins: HashMap<String, PluginHandle>,
}

impl<B: StudioBackend> AudioEngine<B> {
    /// Wraps a backend. Nothing is initialized until [`AudioEngine::initialize`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            settings: None,
            bank_root: String::new(),
            main_banks_loaded: false,
            plugins: HashMap::new(),
        }
    }

    /// Loads the config at `path` and initializes from it.
    pub fn initialize_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let config = ConfigStore::load(path)?;
        self.initialize(&config)
    }

    /// Configures the middleware from `config`, registers additional plugins
    /// and loads the master banks. Calling it again once initialized is a
    /// no-op.
    pub fn initialize(&mut self, config: &ConfigStore) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let settings = AudioSettings::from_config(config)?;
        tracing::info!(
            output_format = settings.output_format.label(),
            sample_rate = settings.sample_rate,
            max_channels = settings.max_channel_count,
            "initializing audio engine"
        );

        if self.backend.is_valid() {
            self.backend.release();
        }
        self.backend.initialize(&settings)?;

        self.register_plugins(
            &settings.additional_plugins,
            &settings.additional_plugins_root_path,
        );

        self.set_bank_root(settings.bank_root(PLATFORM));
        let master = self.load_bank(&settings.master_bank);
        let strings = self.load_bank(&settings.master_strings_bank);
        self.main_banks_loaded = master.is_ok() && strings.is_ok();
        self.settings = Some(settings);

        master?;
        strings?;
        tracing::info!(plugins = self.plugins.len(), "audio engine initialized");
        Ok(())
    }

    /// Releases the middleware. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if self.backend.is_valid() {
            self.backend.release();
            tracing::info!("audio engine terminated");
        }
        self.main_banks_loaded = false;
        self.plugins.clear();
        self.settings = None;
    }

    /// Call once per frame from the game loop.
    pub fn update(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        self.backend.update()?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_valid() && self.main_banks_loaded
    }

    /// Settings the engine was last initialized with.
    pub fn settings(&self) -> Option<&AudioSettings> {
        self.settings.as_ref()
    }

    /// The middleware backend this engine drives.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access, bypassing the engine's initialization checks.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Names of the additional plugins that registered successfully.
    pub fn loaded_plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn set_bank_root(&mut self, directory: impl Into<String>) {
        self.bank_root = directory.into();
    }

    pub fn bank_root(&self) -> &str {
        &self.bank_root
    }

    /// Loads `file` relative to the bank root.
    pub fn load_bank(&mut self, file: &str) -> Result<BankId> {
        self.ensure_valid()?;
        let path = format!("{}{}", self.bank_root, file);
        self.backend.load_bank(&path).map_err(|err| {
            tracing::warn!(%path, %err, "failed to load bank");
            err.into()
        })
    }

    pub fn unload_bank(&mut self, bank: BankId) -> Result<()> {
        self.ensure_valid()?;
        Ok(self.backend.unload_bank(bank)?)
    }

    /// Unloads a bank by its studio path, e.g. `bank:/Music`.
    pub fn unload_bank_by_path(&mut self, studio_path: &str) -> Result<()> {
        self.ensure_valid()?;
        let bank = self.backend.bank_by_path(studio_path)?;
        Ok(self.backend.unload_bank(bank)?)
    }

    /// Creates an instance of `event_path` and, by default, starts it and
    /// hands ownership back to the middleware.
    pub fn play_event(&mut self, event_path: &str, options: PlayOptions) -> Result<InstanceId> {
        self.ensure_initialized()?;

        let instance = self.backend.create_instance(event_path)?;
        self.backend.set_3d_attributes(instance, &options.attributes)?;
        if let Some(callback) = options.callback {
            self.backend
                .set_callback(instance, callback, options.callback_mask)?;
        }

        if options.auto_start {
            self.backend.start(instance)?;
            if options.auto_release {
                self.backend.release_instance(instance)?;
            }
        }

        tracing::debug!(event = event_path, ?instance, "playing event");
        Ok(instance)
    }

    /// Starts a created instance.
    pub fn instance_start(&mut self, instance: InstanceId) -> Result<()> {
        self.ensure_instance(instance)?;
        Ok(self.backend.start(instance)?)
    }

    /// Stops an instance, letting its release play out when `allow_fade_out`
    /// is set.
    pub fn instance_stop(&mut self, instance: InstanceId, allow_fade_out: bool) -> Result<()> {
        self.ensure_instance(instance)?;
        let mode = if allow_fade_out {
            StopMode::AllowFadeOut
        } else {
            StopMode::Immediate
        };
        Ok(self.backend.stop(instance, mode)?)
    }

    /// Marks an instance for release once it stops. The handle is invalid
    /// afterwards.
    pub fn instance_release(&mut self, instance: InstanceId) -> Result<()> {
        self.ensure_instance(instance)?;
        Ok(self.backend.release_instance(instance)?)
    }

    /// Pauses or resumes an instance.
    pub fn instance_set_paused(&mut self, instance: InstanceId, paused: bool) -> Result<()> {
        self.ensure_instance(instance)?;
        Ok(self.backend.set_paused(instance, paused)?)
    }

    /// Whether the instance is currently paused.
    pub fn instance_is_paused(&self, instance: InstanceId) -> Result<bool> {
        self.ensure_instance(instance)?;
        Ok(self.backend.is_paused(instance)?)
    }

    /// Sets a global parameter by name.
    pub fn set_global_parameter(
        &mut self,
        name: &str,
        value: f32,
        ignore_seek_speed: bool,
    ) -> Result<()> {
        self.ensure_initialized()?;
        Ok(self
            .backend
            .set_global_parameter(name, value, ignore_seek_speed)?)
    }

    /// Sets a labeled global parameter to one of its labels.
    pub fn set_global_parameter_with_label(
        &mut self,
        name: &str,
        label: &str,
        ignore_seek_speed: bool,
    ) -> Result<()> {
        self.ensure_initialized()?;
        Ok(self
            .backend
            .set_global_parameter_with_label(name, label, ignore_seek_speed)?)
    }

    /// Sets a parameter on one instance.
    pub fn set_parameter(
        &mut self,
        instance: InstanceId,
        name: &str,
        value: f32,
        ignore_seek_speed: bool,
    ) -> Result<()> {
        self.ensure_instance(instance)?;
        Ok(self
            .backend
            .set_parameter(instance, name, value, ignore_seek_speed)?)
    }

    /// Label variant of [`AudioEngine::set_parameter`].
    pub fn set_parameter_with_label(
        &mut self,
        instance: InstanceId,
        name: &str,
        label: &str,
        ignore_seek_speed: bool,
    ) -> Result<()> {
        self.ensure_instance(instance)?;
        Ok(self
            .backend
            .set_parameter_with_label(instance, name, label, ignore_seek_speed)?)
    }

    fn register_plugins(&mut self, names: &[String], root: &str) {
        if names.is_empty() {
            return;
        }
        if let Err(err) = self.backend.set_plugin_path(root) {
            tracing::warn!(root, %err, "could not set plugin path");
            return;
        }

        for name in names {
            match self.backend.load_plugin(name) {
                Ok(handle) => {
                    tracing::debug!(plugin = %name, "registered plugin");
                    self.plugins.insert(name.clone(), handle);
                }
                Err(err) => tracing::warn!(plugin = %name, %err, "skipping plugin"),
            }
        }
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.backend.is_valid() {
            Ok(())
        } else {
            Err(StudioBridgeError::NotInitialized)
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StudioBridgeError::NotInitialized)
        }
    }

    fn ensure_instance(&self, instance: InstanceId) -> Result<()> {
        self.ensure_initialized()?;
        if self.backend.instance_valid(instance) {
            Ok(())
        } else {
            Err(crate::error::BackendError::InvalidHandle.into())
        }
    }
}

impl<B: StudioBackend> Drop for AudioEngine<B> {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Forwards a middleware debug message to `tracing`, keeping the
/// middleware's own source location and function name as fields.
pub fn middleware_log(level: LoggingLevel, file: &str, line: u32, func: &str, message: &str) {
    match level {
        LoggingLevel::Error => tracing::error!(
            target: "studio_middleware",
            source_file = file,
            source_line = line,
            func,
            "{message}"
        ),
        LoggingLevel::Warning => tracing::warn!(
            target: "studio_middleware",
            source_file = file,
            source_line = line,
            func,
            "{message}"
        ),
        LoggingLevel::Log => tracing::debug!(
            target: "studio_middleware",
            source_file = file,
            source_line = line,
            func,
            "{message}"
        ),
        LoggingLevel::None => {}
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::error::BackendError;

    const CONFIG: &str = "\
[System]
OutputFormat = 5.1
SampleRate = 48000
LoggingLevel = Warning
[Plugins]
AdditionalPlugins = (resonanceaudio,missing)
AdditionalPluginsRootPath = plugins
[Banks]
BankOutputDirectory = banks
MasterBank = Master.bank
MasterStringsBank = Master.strings.bank
";

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new()
            .with_virtual_bank("banks/Desktop/Master.bank")
            .with_virtual_bank("banks/Desktop/Master.strings.bank")
            .with_virtual_bank("banks/Desktop/Music.bank")
            .with_virtual_plugin("resonanceaudio")
            .with_event(
                "Music.bank",
                "event:/MusicTest",
                EventTimeline::new(600.0, 4),
            )
            .with_labeled_parameter("Mood", &["Calm", "Tense"])
    }

    fn initialized() -> AudioEngine<HeadlessBackend> {
        let mut engine = AudioEngine::new(backend());
        engine
            .initialize(&ConfigStore::parse(CONFIG))
            .expect("initialization should succeed");
        engine
    }

    #[test]
    fn initializes_from_config() {
        let engine = initialized();

        assert!(engine.is_initialized());
        assert_eq!(engine.bank_root(), "banks/Desktop/");
        assert_eq!(engine.loaded_plugins().collect::<Vec<_>>(), vec!["resonanceaudio"]);
        let settings = engine.backend().settings().unwrap();
        assert_eq!(settings.sample_rate, 48_000);
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut engine = initialized();
        engine.initialize(&ConfigStore::new()).unwrap();
        assert_eq!(engine.settings().unwrap().sample_rate, 48_000);
    }

    #[test]
    fn missing_master_bank_fails_initialization() {
        let mut engine = AudioEngine::new(HeadlessBackend::new());
        let err = engine.initialize(&ConfigStore::parse(CONFIG)).unwrap_err();

        assert!(matches!(err, StudioBridgeError::Backend(BackendError::BankNotFound(_))));
        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.play_event("event:/MusicTest", PlayOptions::default()),
            Err(StudioBridgeError::NotInitialized)
        ));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = AudioEngine::new(backend());
        let err = engine
            .initialize_from_path(dir.path().join("audio_engine.ini"))
            .unwrap_err();
        assert!(matches!(err, StudioBridgeError::Io(_)));
    }

    #[test]
    fn events_need_their_bank() {
        let mut engine = initialized();
        assert!(engine
            .play_event("event:/MusicTest", PlayOptions::default())
            .is_err());

        let bank = engine.load_bank("Music.bank").unwrap();
        engine
            .play_event("event:/MusicTest", PlayOptions::default().manual())
            .unwrap();

        engine.unload_bank(bank).unwrap();
        assert!(engine.unload_bank_by_path("bank:/Music").is_err());
    }

    #[test]
    fn manual_instance_lifecycle() {
        let mut engine = initialized();
        engine.load_bank("Music.bank").unwrap();
        let instance = engine
            .play_event("event:/MusicTest", PlayOptions::default().manual())
            .unwrap();

        engine.instance_start(instance).unwrap();
        engine.instance_set_paused(instance, true).unwrap();
        assert!(engine.instance_is_paused(instance).unwrap());
        engine.instance_set_paused(instance, false).unwrap();
        assert!(!engine.instance_is_paused(instance).unwrap());

        engine.set_parameter(instance, "Intensity", 0.5, false).unwrap();
        engine
            .set_parameter_with_label(instance, "Mood", "Tense", true)
            .unwrap();
        assert_eq!(engine.backend().parameter(instance, "Mood"), Some(1.0));

        engine.instance_stop(instance, false).unwrap();
        engine.instance_release(instance).unwrap();
        engine.update().unwrap();
        assert!(engine.instance_is_paused(instance).is_err());
    }

    #[test]
    fn global_parameters_forward() {
        let mut engine = initialized();
        engine.set_global_parameter("Weather", 0.75, false).unwrap();
        engine
            .set_global_parameter_with_label("Mood", "Calm", false)
            .unwrap();
        assert!(engine
            .set_global_parameter_with_label("Mood", "Elated", false)
            .is_err());

        assert_eq!(engine.backend().global_parameter("Weather"), Some(0.75));
        assert_eq!(engine.backend().global_parameter("Mood"), Some(0.0));
    }

    #[test]
    fn beat_callbacks_arrive_from_worker_thread() {
        let mut engine = initialized();
        engine.load_bank("Music.bank").unwrap();

        let main_thread = thread::current().id();
        let beats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&beats);
        let callback: EventCallback = Arc::new(move |event: &CallbackEvent| match event {
            CallbackEvent::TimelineBeat(beat) => {
                assert_ne!(thread::current().id(), main_thread);
                sink.lock().unwrap().push((beat.bar, beat.beat));
                CallbackOutcome::Handled
            }
            _ => CallbackOutcome::Unhandled,
        });

        let instance = engine
            .play_event(
                "event:/MusicTest",
                PlayOptions::default().with_callback(CallbackMask::TIMELINE_BEAT, callback),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while beats.lock().unwrap().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        engine.instance_stop(instance, true).unwrap();

        let beats = beats.lock().unwrap();
        assert!(beats.len() >= 5);
        assert_eq!(&beats[..5], &[(1, 1), (1, 2), (1, 3), (1, 4), (2, 1)]);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn middleware_messages_reach_tracing() {
        let captured = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            middleware_log(LoggingLevel::Warning, "studio_bank.cpp", 42, "loadBank", "bank missing");
            middleware_log(LoggingLevel::Error, "studio_system.cpp", 7, "update", "mixer stalled");
            middleware_log(LoggingLevel::None, "studio_system.cpp", 1, "update", "never shown");
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("bank missing"));
        assert!(lines[0].contains("studio_bank.cpp"));
        assert!(lines[0].contains("source_line=42"));
        assert!(lines[0].contains("loadBank"));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[1].contains("mixer stalled"));
        assert!(!text.contains("never shown"));
    }

    #[test]
    fn plays_with_spatial_attributes() {
        let mut engine = initialized();
        engine.load_bank("Music.bank").unwrap();

        let attributes = Attributes3d {
            position: [1.0, 2.0, 3.0],
            velocity: [0.0, 0.0, -1.5],
            ..Attributes3d::default()
        };
        let instance = engine
            .play_event(
                "event:/MusicTest",
                PlayOptions::default().with_attributes(attributes).manual(),
            )
            .unwrap();

        let backend = engine.backend();
        assert_eq!(backend.attributes(instance), Some(attributes));
        assert_eq!(backend.event_path(instance), Some("event:/MusicTest"));
        assert!(!backend.is_playing(instance));
    }

    #[test]
    fn update_forwards_only_when_initialized() {
        let mut engine = AudioEngine::new(backend());
        engine.update().unwrap();
        assert_eq!(engine.backend().update_count(), 0);

        engine.initialize(&ConfigStore::parse(CONFIG)).unwrap();
        engine.update().unwrap();
        engine.update().unwrap();
        assert_eq!(engine.backend().update_count(), 2);
    }

    #[test]
    fn terminate_invalidates_engine() {
        let mut engine = initialized();
        engine.terminate();
        engine.terminate();

        assert!(!engine.is_initialized());
        assert!(engine.update().is_ok());
        assert!(matches!(
            engine.load_bank("Music.bank"),
            Err(StudioBridgeError::NotInitialized)
        ));
    }
}
