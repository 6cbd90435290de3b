pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use capture::SourceSpec;
use display::OverlayConfig;
use error::ConfigError;

/// Default settings file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "lookout.toml";

/// Prefix for environment overrides, e.g. `LOOKOUT__PIPELINE__FRAME_SKIP=4`
pub const ENV_PREFIX: &str = "LOOKOUT";

/// Everything that can be set from `lookout.toml` or the environment.
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureConfig,
    pub pipeline: PipelineSettings,
    pub display: DisplayConfig,
    pub output: OutputConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera index, `/dev/video{device}`
    pub device: u32,
    /// Requested geometry; the driver default when unset
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: u32,
    /// Try the GStreamer pipelines before direct V4L2
    pub use_hardware: bool,
    pub buffer_count: u32,
    /// Read timeout while probing a strategy for its first frame
    pub probe_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// How long `stop` waits for the capture thread
    pub stop_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: None,
            height: None,
            fps: 30,
            use_hardware: true,
            buffer_count: 4,
            probe_timeout_ms: 2000,
            read_timeout_ms: 500,
            stop_grace_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    /// Frames skipped between inference runs
    pub frame_skip: u32,
    /// Display-only resize factor in (0, 1]
    pub display_scale: f64,
    /// Sleep between polls while a live source has no new frame
    pub poll_interval_ms: u64,
    /// Log progress every N frames in file mode, 0 disables
    pub progress_interval: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            frame_skip: 2,
            display_scale: 0.85,
            poll_interval_ms: 1,
            progress_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_title: String,
    pub quit_key: char,
    /// Run without a window
    pub headless: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: "Object Detection".into(),
            quit_key: 'q',
            headless: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where camera recordings go. File mode writes next to the input.
    pub directory: PathBuf,
    /// Container extension, which also picks the muxer
    pub extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            extension: "mp4".into(),
        }
    }
}

impl Settings {
    /// Layer the TOML file (explicit path, else `lookout.toml` if present)
    /// under `LOOKOUT__` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => {
                builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
            }
        };

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    /// Resolve a run configuration for `source`.
    pub fn pipeline_config(&self, source: SourceSpec, record: bool) -> PipelineConfig {
        PipelineConfig {
            source,
            confidence_threshold: self.pipeline.confidence_threshold,
            frame_skip: self.pipeline.frame_skip,
            display_scale: self.pipeline.display_scale,
            record,
            window_title: self.display.window_title.clone(),
            quit_key: self.display.quit_key,
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
            progress_interval: self.pipeline.progress_interval,
            stop_grace: Duration::from_millis(self.capture.stop_grace_ms),
            output_dir: self.output.directory.clone(),
            extension: self.output.extension.clone(),
            text_scale: self.overlay.text_scale,
        }
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source: SourceSpec,
    /// In [0, 1]
    pub confidence_threshold: f32,
    /// Frames skipped between inference runs; inference runs on every
    /// `frame_skip + 1`th frame
    pub frame_skip: u32,
    /// In (0, 1]; affects the display only, never the recording
    pub display_scale: f64,
    pub record: bool,
    pub window_title: String,
    pub quit_key: char,
    pub poll_interval: Duration,
    pub progress_interval: u64,
    pub stop_grace: Duration,
    pub output_dir: PathBuf,
    pub extension: String,
    /// Font magnification of the FPS readout
    pub text_scale: u32,
}

impl PipelineConfig {
    /// Defaults for `source` with recording off.
    pub fn new(source: SourceSpec) -> Self {
        Settings::default().pipeline_config(source, false)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ConfidenceThreshold(self.confidence_threshold));
        }
        if !(self.display_scale > 0.0 && self.display_scale <= 1.0) {
            return Err(ConfigError::DisplayScale(self.display_scale));
        }
        if self.stop_grace.is_zero() {
            return Err(ConfigError::GracePeriod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::new(SourceSpec::Camera(0));
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_skip, 2);
        assert!(!config.record);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = PipelineConfig::new(SourceSpec::Camera(0));
        config.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConfidenceThreshold(_))
        ));

        let mut config = PipelineConfig::new(SourceSpec::Camera(0));
        config.display_scale = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::DisplayScale(_))));

        config.display_scale = 1.2;
        assert!(matches!(config.validate(), Err(ConfigError::DisplayScale(_))));

        let mut config = PipelineConfig::new(SourceSpec::Camera(0));
        config.stop_grace = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::GracePeriod)));
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\nframe_skip = 5\n\n[capture]\nwidth = 1280\nheight = 720\n\n[display]\nheadless = true"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.pipeline.frame_skip, 5);
        assert_eq!(settings.capture.width, Some(1280));
        assert_eq!(settings.capture.height, Some(720));
        assert!(settings.display.headless);
        // Untouched sections keep their defaults
        assert_eq!(settings.output.extension, "mp4");
        assert_eq!(settings.display.quit_key, 'q');
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
