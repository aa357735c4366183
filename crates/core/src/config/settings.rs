use serde::{Deserialize, Serialize};

use super::ConfigStore;
use crate::Result;

/// Speaker layout the middleware mixes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakerMode {
    #[default]
    Stereo,
    Surround51,
    Surround71,
    Surround714,
}

impl SpeakerMode {
    /// Maps a config label (`Stereo`, `5.1`, `7.1`, `7.1.4`) to a mode.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Stereo" => Some(Self::Stereo),
            "5.1" => Some(Self::Surround51),
            "7.1" => Some(Self::Surround71),
            "7.1.4" => Some(Self::Surround714),
            _ => None,
        }
    }

    /// The config label for this mode, the inverse of [`SpeakerMode::from_label`].
    pub fn label(self) -> &'static str {
        match self {
            Self::Stereo => "Stereo",
            Self::Surround51 => "5.1",
            Self::Surround71 => "7.1",
            Self::Surround714 => "7.1.4",
        }
    }

    /// Output channels the mode mixes to.
    pub fn channel_count(self) -> u32 {
        match self {
            Self::Stereo => 2,
            Self::Surround51 => 6,
            Self::Surround71 => 8,
            Self::Surround714 => 12,
        }
    }
}

/// Verbosity of the middleware's own debug output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggingLevel {
    #[default]
    None,
    Log,
    Warning,
    Error,
}

impl LoggingLevel {
    /// Maps a config label (`None`, `Log`, `Warning`, `Error`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "None" => Some(Self::None),
            "Log" => Some(Self::Log),
            "Warning" => Some(Self::Warning),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a message at `level` passes this configured threshold. `Log`
    /// lets everything through, `Error` only errors.
    pub fn allows(self, level: LoggingLevel) -> bool {
        level != Self::None && level.rank() <= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Error => 1,
            Self::Warning => 2,
            Self::Log => 3,
        }
    }

    /// The most verbose `tracing` level that middleware messages are
    /// forwarded at.
    pub fn level_filter(self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            Self::None => LevelFilter::OFF,
            Self::Log => LevelFilter::DEBUG,
            Self::Warning => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

/// Optional studio features requested by the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioFlags {
    pub live_update: bool,
    pub memory_tracking: bool,
}

/// Initialization values for the audio middleware, resolved from the
/// `audio_engine.ini` sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub output_format: SpeakerMode,
    pub max_channel_count: i32,
    pub real_channel_count: i32,
    /// Zero leaves the middleware default in place.
    pub sample_rate: i32,
    pub dsp_buffer_length: i32,
    pub dsp_buffer_count: i32,
    pub enable_live_update: bool,
    pub enable_memory_tracking: bool,
    pub logging_level: LoggingLevel,
    pub studio_bank_key: Option<String>,
    pub studio_update_period_ms: i32,
    pub vol0_virtual_level: f32,
    pub live_update_port: i32,
    pub additional_plugins: Vec<String>,
    pub additional_plugins_root_path: String,
    pub bank_output_directory: String,
    pub master_bank: String,
    pub master_strings_bank: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_format: SpeakerMode::Stereo,
            max_channel_count: 128,
            real_channel_count: 64,
            sample_rate: 0,
            dsp_buffer_length: 0,
            dsp_buffer_count: 0,
            enable_live_update: false,
            enable_memory_tracking: false,
            logging_level: LoggingLevel::None,
            studio_bank_key: None,
            studio_update_period_ms: 0,
            vol0_virtual_level: 0.0,
            live_update_port: 0,
            additional_plugins: Vec::new(),
            additional_plugins_root_path: String::new(),
            bank_output_directory: String::new(),
            master_bank: String::new(),
            master_strings_bank: String::new(),
        }
    }
}

impl AudioSettings {
    /// Resolves settings from a parsed config, filling gaps with defaults.
    ///
    /// Unknown speaker-mode or logging labels fall back to their defaults;
    /// malformed numbers are reported.
    pub fn from_config(config: &ConfigStore) -> Result<Self> {
        let defaults = Self::default();

        let output_format = config.get_string("System", "OutputFormat", "");
        let output_format = SpeakerMode::from_label(&output_format).unwrap_or_else(|| {
            if !output_format.is_empty() {
                tracing::warn!(label = %output_format, "unknown output format, using stereo");
            }
            defaults.output_format
        });

        let logging_level = config.get_string("System", "LoggingLevel", "");
        let logging_level =
            LoggingLevel::from_label(&logging_level).unwrap_or(defaults.logging_level);

        let studio_bank_key = Some(config.get_string("Advanced", "StudioBankKey", ""))
            .filter(|key| !key.is_empty());

        Ok(Self {
            output_format,
            max_channel_count: config.get_int(
                "System",
                "MaxChannelCount",
                defaults.max_channel_count,
            )?,
            real_channel_count: config.get_int(
                "Advanced",
                "RealChannelCount",
                defaults.real_channel_count,
            )?,
            sample_rate: config.get_int("System", "SampleRate", defaults.sample_rate)?,
            dsp_buffer_length: config.get_int(
                "System",
                "DSPBufferLength",
                defaults.dsp_buffer_length,
            )?,
            dsp_buffer_count: config.get_int(
                "System",
                "DSPBufferCount",
                defaults.dsp_buffer_count,
            )?,
            enable_live_update: config.get_bool("System", "EnableLiveUpdate", false),
            enable_memory_tracking: config.get_bool("System", "EnableMemoryTracking", false),
            logging_level,
            studio_bank_key,
            studio_update_period_ms: config.get_int(
                "Advanced",
                "StudioUpdatePeriodMs",
                defaults.studio_update_period_ms,
            )?,
            vol0_virtual_level: config.get_float(
                "Advanced",
                "Vol0VirtualLevel",
                defaults.vol0_virtual_level,
            )?,
            live_update_port: config.get_int(
                "Advanced",
                "LiveUpdatePort",
                defaults.live_update_port,
            )?,
            additional_plugins: config.get_string_array("Plugins", "AdditionalPlugins"),
            additional_plugins_root_path: config.get_string(
                "Plugins",
                "AdditionalPluginsRootPath",
                "",
            ),
            bank_output_directory: config.get_string("Banks", "BankOutputDirectory", ""),
            master_bank: config.get_string("Banks", "MasterBank", ""),
            master_strings_bank: config.get_string("Banks", "MasterStringsBank", ""),
        })
    }

    /// Directory that bank file names are resolved against for `platform`.
    pub fn bank_root(&self, platform: &str) -> String {
        format!("{}/{}/", self.bank_output_directory, platform)
    }

    /// Live update and memory tracking are only available with the debug
    /// middleware libraries, so release builds never request them.
    pub fn studio_flags(&self) -> StudioFlags {
        if cfg!(debug_assertions) {
            StudioFlags {
                live_update: self.enable_live_update,
                memory_tracking: self.enable_memory_tracking,
            }
        } else {
            StudioFlags::default()
        }
    }
}
