use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::feed::{ChannelDescriptor, OrderingMode};

pub const DEFAULT_CONFIG_FILE: &str = "feedreel.toml";

/// Everything a batch needs, reloaded from disk before every scheduled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub channels: Vec<String>,
    pub posts_limit: u32,
    /// Seconds each image stays on screen.
    pub image_duration: f64,
    pub run_interval_minutes: u64,
    pub fps: u32,
    /// Accepted for compatibility; background music is never mixed in.
    pub add_music: bool,
    pub feed_types: Vec<String>,
    pub post_count_policy: PostCountPolicy,
    pub paths: PathsSection,
    pub render: RenderSection,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                "memes".to_string(),
                "dankmemes".to_string(),
                "wholesomememes".to_string(),
            ],
            posts_limit: 10,
            image_duration: 3.0,
            run_interval_minutes: 60,
            fps: 30,
            add_music: false,
            feed_types: OrderingMode::ALL
                .iter()
                .map(|mode| mode.as_str().to_string())
                .collect(),
            post_count_policy: PostCountPolicy::default(),
            paths: PathsSection::default(),
            render: RenderSection::default(),
        }
    }
}

impl RunConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_minutes.saturating_mul(60))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.posts_limit == 0 {
            return Err("posts_limit must be greater than zero".to_string());
        }
        if !(self.image_duration.is_finite() && self.image_duration > 0.0) {
            return Err("image_duration must be a positive number of seconds".to_string());
        }
        if self.fps == 0 {
            return Err("fps must be greater than zero".to_string());
        }
        if self.run_interval_minutes == 0 {
            return Err("run_interval_minutes must be greater than zero".to_string());
        }
        if self.render.frame_width == 0 || self.render.frame_height == 0 {
            return Err("render frame size must be non-zero".to_string());
        }
        Ok(())
    }

    /// One descriptor per configured channel. The ordering mode is drawn from
    /// `feed_types` so consecutive runs see different slices of the feed.
    pub fn channel_descriptors<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<ChannelDescriptor> {
        self.channels
            .iter()
            .map(|name| {
                let ordering = self
                    .feed_types
                    .choose(rng)
                    .map(|name| OrderingMode::from_name(name))
                    .unwrap_or_default();
                ChannelDescriptor::new(name.clone(), ordering, self.posts_limit)
            })
            .collect()
    }
}

/// What the `post_count` column of a produced video reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostCountPolicy {
    /// The configured post limit, whatever the feed actually yielded.
    #[default]
    Requested,
    /// Images that made it into the video; zero for a placeholder video.
    Retained,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("."),
            logs_dir: PathBuf::from("logs"),
            database: PathBuf::from("feedreel.sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub frame_width: u32,
    pub frame_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    pub ffmpeg: PathBuf,
    pub ffmpeg_timeout_seconds: u64,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            frame_width: 1280,
            frame_height: 720,
            font_path: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffmpeg_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ConfigOrigin {
    File,
    CreatedDefault,
    FallbackDefault(String),
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RunConfig,
    pub origin: ConfigOrigin,
}

/// Reads the run configuration. A missing file is created with defaults; a
/// malformed one is left alone and defaults are used for this run only.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<LoadedConfig> {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = RunConfig::default();
            write_run_config(path, &config)?;
            info!(path = %path.display(), "wrote default configuration");
            return Ok(LoadedConfig {
                config,
                origin: ConfigOrigin::CreatedDefault,
            });
        }
        Err(source) => {
            return Err(ConfigError::Io {
                source,
                path: path.to_path_buf(),
            })
        }
    };

    match parse_run_config(path, &content) {
        Ok(config) => Ok(LoadedConfig {
            config,
            origin: ConfigOrigin::File,
        }),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "configuration unusable, using defaults for this run");
            Ok(LoadedConfig {
                config: RunConfig::default(),
                origin: ConfigOrigin::FallbackDefault(err.to_string()),
            })
        }
    }
}

pub fn parse_run_config(path: &Path, content: &str) -> Result<RunConfig> {
    let config: RunConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(config)
}

pub fn write_run_config<P: AsRef<Path>>(path: P, config: &RunConfig) -> Result<()> {
    let path = path.as_ref();
    let rendered = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    std::fs::write(path, rendered).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })
}
