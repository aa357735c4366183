use std::sync::Arc;

use crate::{
    audio::{
        AudioEngine, CallbackEvent, CallbackMask, CallbackOutcome, EventCallback, InstanceId,
        PlayOptions, StudioBackend,
    },
    config::ConfigStore,
    position::{MusicPosition, MusicPositionCache},
    render::{Color, Window},
    Result,
};

/// Window and music choices for a [`Game`].
#[derive(Debug, Clone)]
pub struct GameOptions {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub target_fps: u32,
    pub music_bank: String,
    pub music_event: String,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: "Studio audio is alive!".to_string(),
            target_fps: 60,
            music_bank: "Music.bank".to_string(),
            music_event: "event:/MusicTest".to_string(),
        }
    }
}

/// Frame loop: poll input, update audio, render the current bar and beat.
pub struct Game<B: StudioBackend, W: Window> {
    engine: AudioEngine<B>,
    window: W,
    options: GameOptions,
    position: MusicPositionCache,
    music: Option<InstanceId>,
    running: bool,
}

impl<B: StudioBackend, W: Window> Game<B, W> {
    pub fn new(engine: AudioEngine<B>, window: W, options: GameOptions) -> Self {
        Self {
            engine,
            window,
            options,
            position: MusicPositionCache::new(),
            music: None,
            running: false,
        }
    }

    /// Brings up audio from `config`, then opens the window.
    pub fn initialize(&mut self, config: &ConfigStore) -> Result<()> {
        self.engine.initialize(config)?;

        self.window.set_target_fps(self.options.target_fps);
        self.window
            .open(self.options.width, self.options.height, &self.options.title)?;
        self.running = true;

        tracing::info!("game initialized");
        Ok(())
    }

    /// Starts the music and loops until the window asks to close.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        while self.is_running() {
            self.process_input();
            if !self.is_running() {
                break;
            }
            self.update()?;
            self.render();
        }
        Ok(())
    }

    pub fn terminate(&mut self) {
        self.window.close();
        self.engine.terminate();
        self.running = false;
        tracing::info!("game terminated");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Latest bar and beat reported by the music.
    pub fn music_position(&self) -> MusicPosition {
        self.position.position()
    }

    pub fn music_instance(&self) -> Option<InstanceId> {
        self.music
    }

    pub fn engine(&self) -> &AudioEngine<B> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine<B> {
        &mut self.engine
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    fn start(&mut self) -> Result<()> {
        self.engine.load_bank(&self.options.music_bank)?;
        let options = PlayOptions::default().with_callback(
            CallbackMask::TIMELINE_BEAT,
            beat_callback(self.position.clone()),
        );
        self.music = Some(self.engine.play_event(&self.options.music_event, options)?);

        tracing::info!(event = %self.options.music_event, "game started");
        Ok(())
    }

    fn process_input(&mut self) {
        if self.window.should_close() {
            self.running = false;
        }
    }

    fn update(&mut self) -> Result<()> {
        self.engine.update()
    }

    fn render(&mut self) {
        let width = self.options.width as f32;
        let height = self.options.height as f32;

        self.window.begin_frame();
        self.window.clear(Color::DARK_GRAY);
        self.window.draw_text(
            &self.options.title,
            (width * 0.2) as i32,
            (height * 0.45) as i32,
            90,
            Color::LIGHT_GRAY,
        );

        let MusicPosition { bar, beat } = self.position.position();
        self.window.draw_text(
            &format!("Music Bar: {bar} Beat: {beat}"),
            (width * 0.02) as i32,
            (height * 0.95) as i32,
            24,
            Color::LIGHT_GRAY,
        );
        self.window.end_frame();
    }
}

/// Callback that records every timeline beat into `cache`. Other
/// notifications are left unhandled.
pub fn beat_callback(cache: MusicPositionCache) -> EventCallback {
    Arc::new(move |event: &CallbackEvent| match event {
        CallbackEvent::TimelineBeat(beat) => {
            cache.set_position(beat.bar, beat.beat);
            CallbackOutcome::Handled
        }
        _ => CallbackOutcome::Unhandled,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        audio::{EventTimeline, HeadlessBackend, TimelineBeat},
        render::HeadlessWindow,
    };

    const CONFIG: &str = "\
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
            .with_event("Music.bank", "event:/MusicTest", EventTimeline::new(1200.0, 4))
    }

    #[test]
    fn beat_callback_updates_cache() {
        let cache = MusicPositionCache::new();
        let callback = beat_callback(cache.clone());

        let outcome = callback(&CallbackEvent::TimelineBeat(TimelineBeat {
            bar: 7,
            beat: 3,
            position_ms: 0,
            tempo: 120.0,
            time_signature_upper: 4,
            time_signature_lower: 4,
        }));

        assert_eq!(outcome, CallbackOutcome::Handled);
        assert_eq!(cache.position(), MusicPosition::new(7, 3));
        assert_eq!(callback(&CallbackEvent::Started), CallbackOutcome::Unhandled);
    }

    #[test]
    fn runs_until_window_closes_and_shows_position() {
        let window = HeadlessWindow::new().with_frame_budget(40).paced();
        let mut game = Game::new(AudioEngine::new(backend()), window, GameOptions::default());
        game.initialize(&ConfigStore::parse(CONFIG)).unwrap();
        assert!(game.is_running());

        game.run().unwrap();
        assert!(!game.is_running());
        assert_eq!(game.window().frames(), 40);

        let deadline = Instant::now() + Duration::from_secs(5);
        while game.music_position() == MusicPosition::default() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let position = game.music_position();
        assert!(position.bar >= 1);
        assert!((1..=4).contains(&position.beat));

        let text = game.window().last_frame_text();
        assert_eq!(text[0], "Studio audio is alive!");
        assert!(text[1].starts_with("Music Bar: "));

        let instance = game.music_instance().unwrap();
        assert!(game.engine().backend().is_playing(instance));

        game.terminate();
        assert!(!game.engine().is_initialized());
        assert!(!game.window().is_open());
    }

    #[test]
    fn frame_budget_is_exact() {
        for budget in [1, 3] {
            let window = HeadlessWindow::new().with_frame_budget(budget);
            let mut game = Game::new(AudioEngine::new(backend()), window, GameOptions::default());
            game.initialize(&ConfigStore::parse(CONFIG)).unwrap();

            game.run().unwrap();
            assert_eq!(game.window().frames(), budget);
            game.terminate();
        }
    }

    #[test]
    fn initialize_fails_without_master_banks() {
        let mut game = Game::new(
            AudioEngine::new(HeadlessBackend::new()),
            HeadlessWindow::new(),
            GameOptions::default(),
        );
        assert!(game.initialize(&ConfigStore::parse(CONFIG)).is_err());
        assert!(!game.is_running());
        assert!(!game.window().is_open());
    }

    #[test]
    fn missing_event_stops_run() {
        let options = GameOptions {
            music_event: "event:/Nowhere".to_string(),
            ..GameOptions::default()
        };
        let mut game = Game::new(
            AudioEngine::new(backend()),
            HeadlessWindow::new().with_frame_budget(1),
            options,
        );
        game.initialize(&ConfigStore::parse(CONFIG)).unwrap();
        assert!(game.run().is_err());
    }
}
