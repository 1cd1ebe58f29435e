mod error;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RenderSection;
use crate::media::{CANONICAL_EXTENSION, PLACEHOLDER_FILE_NAME};
use crate::scratch::ScratchDir;

pub use error::{AssemblyError, AssemblyResult};

/// Name of the concat demuxer manifest written next to the images.
pub const MANIFEST_FILE_NAME: &str = "concat.txt";

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> io::Result<Output>;
}

pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> io::Result<Output> {
        let mut command = Command::new(program);
        command
            .args(args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out after {}s", program.display(), timeout.as_secs()),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub ffmpeg: PathBuf,
    pub frame_width: u32,
    pub frame_height: u32,
    pub timeout: Duration,
}

impl AssemblerSettings {
    pub fn from_render(render: &RenderSection) -> Self {
        Self {
            ffmpeg: render.ffmpeg.clone(),
            frame_width: render.frame_width,
            frame_height: render.frame_height,
            timeout: Duration::from_secs(render.ffmpeg_timeout_seconds),
        }
    }
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self::from_render(&RenderSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyOutcome {
    pub output_path: PathBuf,
    pub segments: usize,
    pub size_bytes: u64,
    pub duration_seconds: f64,
}

/// Concatenates the scratch directory's images into a silent H.264 slideshow.
pub struct VideoAssembler {
    settings: AssemblerSettings,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for VideoAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoAssembler")
            .field("settings", &self.settings)
            .finish()
    }
}

impl VideoAssembler {
    pub fn new(settings: AssemblerSettings) -> Self {
        Self {
            settings,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    /// Encodes every `*.jpg` in the scratch directory into `output`. The
    /// directory is removed on success; on failure it is kept and marked
    /// `failed`.
    pub async fn assemble(
        &self,
        mut scratch: ScratchDir,
        image_duration: f64,
        fps: u32,
        output: &Path,
    ) -> AssemblyResult<AssemblyOutcome> {
        match self.encode(&scratch, image_duration, fps, output).await {
            Ok(outcome) => {
                if let Err(err) = scratch.discard().await {
                    warn!(error = %err, "failed to remove scratch directory after assembly");
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(marker_err) = scratch.mark_failed(&err.to_string()).await {
                    warn!(error = %marker_err, "failed to flag scratch directory");
                }
                Err(err)
            }
        }
    }

    async fn encode(
        &self,
        scratch: &ScratchDir,
        image_duration: f64,
        fps: u32,
        output: &Path,
    ) -> AssemblyResult<AssemblyOutcome> {
        let images = list_canonical_images(scratch.path()).await?;
        if images.is_empty() {
            return Err(AssemblyError::NoImages {
                dir: scratch.path().to_path_buf(),
            });
        }

        let manifest_path = scratch.path().join(MANIFEST_FILE_NAME);
        let manifest = build_concat_manifest(&images, image_duration);
        fs::write(&manifest_path, manifest)
            .await
            .map_err(|source| AssemblyError::Io {
                source,
                path: manifest_path.clone(),
            })?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| AssemblyError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }

        let args = self.encoder_args(&manifest_path, fps, output);
        let command = format!("{} {}", self.settings.ffmpeg.display(), args.join(" "));
        debug!(%command, segments = images.len(), "running encoder");
        let result = self
            .executor
            .run(&self.settings.ffmpeg, &args, self.settings.timeout)
            .await
            .map_err(|err| AssemblyError::Encoding {
                command: command.clone(),
                status: None,
                stderr: err.to_string(),
            })?;
        if !result.status.success() {
            return Err(AssemblyError::Encoding {
                command,
                status: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let size_bytes = fs::metadata(output)
            .await
            .map_err(|source| AssemblyError::Io {
                source,
                path: output.to_path_buf(),
            })?
            .len();
        let outcome = AssemblyOutcome {
            output_path: output.to_path_buf(),
            segments: images.len(),
            size_bytes,
            duration_seconds: image_duration * images.len() as f64,
        };
        info!(
            output = %output.display(),
            segments = outcome.segments,
            size_bytes,
            "video assembled"
        );
        Ok(outcome)
    }

    fn encoder_args(&self, manifest: &Path, fps: u32, output: &Path) -> Vec<String> {
        let (width, height) = (self.settings.frame_width, self.settings.frame_height);
        let filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,format=yuv420p"
        );
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            manifest.display().to_string(),
            "-vf".into(),
            filter,
            "-r".into(),
            fps.to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-an".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.display().to_string(),
        ]
    }
}

fn sequence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^img(\d+)\.jpg$").expect("valid regex"))
}

/// `img2.jpg` sorts before `img10.jpg`; anything else (the placeholder) after
/// the numbered images.
fn sort_key(name: &str) -> (u8, u64, String) {
    match sequence_pattern()
        .captures(name)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        Some(sequence) => (0, sequence, String::new()),
        None if name == PLACEHOLDER_FILE_NAME => (1, 0, String::new()),
        None => (2, 0, name.to_string()),
    }
}

/// File names of the canonical images in playback order.
pub async fn list_canonical_images(dir: &Path) -> AssemblyResult<Vec<String>> {
    let io_error = |source| AssemblyError::Io {
        source,
        path: dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_error)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_canonical = Path::new(&name)
            .extension()
            .is_some_and(|ext| ext == CANONICAL_EXTENSION);
        if is_canonical && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort_by_cached_key(|name| sort_key(name));
    Ok(names)
}

/// ffconcat manifest giving each image `image_duration` seconds. The last
/// entry is repeated because the demuxer ignores the final duration.
pub fn build_concat_manifest(images: &[String], image_duration: f64) -> String {
    let mut manifest = String::from("ffconcat version 1.0\n");
    for name in images {
        manifest.push_str(&format!("file '{}'\nduration {}\n", escape(name), image_duration));
    }
    if let Some(last) = images.last() {
        manifest.push_str(&format!("file '{}'\n", escape(last)));
    }
    manifest
}

fn escape(name: &str) -> String {
    name.replace('\'', r"'\''")
}
