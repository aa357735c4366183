use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use studio_bridge_core::{
    audio::{DEFAULT_CONFIG_PATH, PLATFORM},
    AudioEngine, AudioSettings, ConfigStore, EventTimeline, Game, GameOptions, HeadlessBackend,
    HeadlessWindow, LoggingLevel,
};
use tracing_subscriber::{filter::Directive, EnvFilter};

fn main() -> studio_bridge_core::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Settings { config } => print_settings(&config),
    }
}

fn run(args: &RunArgs) -> studio_bridge_core::Result<()> {
    let loaded = load_settings(&args.config);
    init_tracing(
        loaded
            .as_ref()
            .map_or(LoggingLevel::default(), |(_, settings)| settings.logging_level),
    );
    let (config, settings) = loaded.map_err(|err| {
        tracing::error!(config = %args.config.display(), error = %err, "failed to load audio config");
        err
    })?;
    tracing::info!(config = %args.config.display(), "starting headless frame loop");

    let backend = headless_backend(&settings, args);
    let mut window = HeadlessWindow::new().paced();
    if args.frames > 0 {
        window = window.with_frame_budget(args.frames);
    }
    let options = GameOptions {
        target_fps: args.fps,
        music_bank: args.bank.clone(),
        music_event: args.event.clone(),
        ..GameOptions::default()
    };

    let mut game = Game::new(AudioEngine::new(backend), window, options);
    game.initialize(&config)?;
    let outcome = game.run();

    let position = game.music_position();
    tracing::info!(
        bar = position.bar,
        beat = position.beat,
        frames = game.window().frames(),
        "frame loop finished"
    );
    game.terminate();
    outcome
}

fn print_settings(path: &Path) -> studio_bridge_core::Result<()> {
    init_tracing(LoggingLevel::default());
    let (_, settings) = load_settings(path).map_err(|err| {
        tracing::error!(config = %path.display(), error = %err, "failed to load audio config");
        err
    })?;
    let json = serde_json::to_string_pretty(&settings).map_err(|err| err.to_string())?;
    println!("{json}");
    Ok(())
}

fn load_settings(path: &Path) -> studio_bridge_core::Result<(ConfigStore, AudioSettings)> {
    let config = ConfigStore::load(path)?;
    let settings = AudioSettings::from_config(&config)?;
    Ok((config, settings))
}

/// Banks resolve against the configured output directory. Unless bank files
/// are required on disk, the master banks and the music bank are registered
/// as virtual so the loop runs without a built project.
fn headless_backend(settings: &AudioSettings, args: &RunArgs) -> HeadlessBackend {
    let mut backend = HeadlessBackend::new().with_event(
        args.bank.clone(),
        args.event.clone(),
        EventTimeline::new(args.bpm, args.beats_per_bar),
    );

    if !args.require_bank_files {
        let root = settings.bank_root(PLATFORM);
        for bank in [&settings.master_bank, &settings.master_strings_bank, &args.bank] {
            backend = backend.with_virtual_bank(format!("{root}{bank}"));
        }
    }
    backend
}

fn init_tracing(middleware: LoggingLevel) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let directive = format!("studio_middleware={}", middleware.level_filter());
    if let Ok(directive) = directive.parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Frame loop driven by a studio audio middleware", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the headless frame loop and display the music position.
    Run(RunArgs),
    /// Print the audio settings resolved from a config file as JSON.
    Settings {
        /// Path to the audio engine config.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the audio engine config.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Bank holding the music event, relative to the bank root.
    #[arg(long, default_value = "Music.bank")]
    bank: String,
    /// Studio path of the music event.
    #[arg(long, default_value = "event:/MusicTest")]
    event: String,
    /// Frames to render before closing; 0 runs until interrupted.
    #[arg(long, default_value_t = 300)]
    frames: u64,
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Tempo of the simulated music timeline.
    #[arg(long, default_value_t = 120.0)]
    bpm: f32,
    #[arg(long, default_value_t = 4)]
    beats_per_bar: i32,
    /// Only load banks that exist on disk.
    #[arg(long)]
    require_bank_files: bool,
}
