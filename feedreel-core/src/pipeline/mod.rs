mod error;
mod types;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::assembler::{AssemblerSettings, CommandExecutor, SystemCommandExecutor, VideoAssembler};
use crate::config::{PostCountPolicy, RunConfig};
use crate::feed::{ChannelDescriptor, FeedSource};
use crate::media::{placeholder_caption, MediaFetcher, PlaceholderError, PlaceholderGenerator};
use crate::scratch::{PriorRun, ScratchDir};
use crate::store::{ProducedVideoRecord, VideoSink};

pub use error::{PipelineError, PipelineResult};
pub use types::{
    batch_stamp, output_path_for, BatchContext, BatchReport, ChannelOutcome, ChannelStatus,
    BATCH_STAMP_FORMAT,
};

pub const FAILURE_LOG_NAME: &str = "pipeline_failures.log";

/// Something that can run one full batch over the configured channels.
/// Once `shutdown` holds `true` no further channel may be started.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self, config: &RunConfig, shutdown: &watch::Receiver<bool>) -> BatchReport;
}

/// Feed → fetch → (placeholder) → assemble → sink, one channel at a time.
pub struct Pipeline {
    feed: Arc<dyn FeedSource>,
    fetcher: MediaFetcher,
    executor: Arc<dyn CommandExecutor>,
    sink: Option<Arc<dyn VideoSink>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("fetcher", &self.fetcher)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

struct StagedImages {
    retained: usize,
    placeholder: bool,
}

impl Pipeline {
    pub fn new(feed: Arc<dyn FeedSource>, fetcher: MediaFetcher) -> Self {
        Self {
            feed,
            fetcher,
            executor: Arc::new(SystemCommandExecutor),
            sink: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn VideoSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the per-batch context. Render settings and the caption font
    /// follow the configuration given here.
    pub fn batch_context(&self, config: &RunConfig, stamp: impl Into<String>) -> BatchContext {
        let assembler = VideoAssembler::new(AssemblerSettings::from_render(&config.render))
            .with_executor(Arc::clone(&self.executor));
        BatchContext {
            config: config.clone(),
            stamp: stamp.into(),
            assembler,
            placeholder: Arc::new(PlaceholderGenerator::from_render_config(&config.render)),
        }
    }

    pub async fn run_batch(&self, config: &RunConfig) -> BatchReport {
        let (_keep, never) = watch::channel(false);
        self.run_batch_until(config, &never).await
    }

    /// Like [`Pipeline::run_batch`], but checks `shutdown` before each
    /// channel. A channel already in progress runs to completion.
    pub async fn run_batch_until(
        &self,
        config: &RunConfig,
        shutdown: &watch::Receiver<bool>,
    ) -> BatchReport {
        let started_at = Utc::now();
        let batch = self.batch_context(config, batch_stamp(Local::now()));
        let descriptors = {
            let mut rng = rand::thread_rng();
            config.channel_descriptors(&mut rng)
        };
        if config.add_music {
            info!("add_music is set but background music is not supported; videos stay silent");
        }
        info!(stamp = %batch.stamp, channels = descriptors.len(), "batch started");

        let mut channels = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if *shutdown.borrow() {
                info!(
                    stamp = %batch.stamp,
                    skipped = descriptors.len() - channels.len(),
                    "shutdown requested, remaining channels skipped"
                );
                break;
            }
            let status = match self.run_channel(&batch, descriptor).await {
                Ok(video) => ChannelStatus::Succeeded { video },
                Err(err) => {
                    error!(
                        channel = %descriptor.name,
                        stage = err.stage(),
                        error = %err,
                        "channel run failed"
                    );
                    append_failure_log(&config.paths.logs_dir, &descriptor.name, &err);
                    ChannelStatus::Failed {
                        stage: err.stage().to_string(),
                        reason: err.to_string(),
                    }
                }
            };
            channels.push(ChannelOutcome {
                channel: descriptor.name.clone(),
                ordering: descriptor.ordering,
                status,
            });
        }

        let report = BatchReport {
            stamp: batch.stamp.clone(),
            started_at,
            finished_at: Utc::now(),
            channels,
        };
        info!(
            stamp = %report.stamp,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        report
    }

    pub async fn run_channel(
        &self,
        batch: &BatchContext,
        descriptor: &ChannelDescriptor,
    ) -> PipelineResult<ProducedVideoRecord> {
        let config = &batch.config;
        info!(
            channel = %descriptor.name,
            ordering = %descriptor.ordering,
            limit = descriptor.limit,
            "channel run started"
        );
        let (mut scratch, prior) =
            ScratchDir::prepare(&config.paths.scratch_dir, &descriptor.name).await?;
        if let PriorRun::Leftover(marker) = &prior {
            debug!(channel = %descriptor.name, previous = ?marker, "stale scratch content removed");
        }

        let staged = match self.stage_images(batch, descriptor, scratch.path()).await {
            Ok(staged) => staged,
            Err(err) => {
                if let Err(marker_err) = scratch.mark_failed(&err.to_string()).await {
                    warn!(error = %marker_err, "failed to flag scratch directory");
                }
                return Err(err);
            }
        };

        let output = output_path_for(&config.paths.output_dir, &descriptor.name, &batch.stamp);
        let outcome = batch
            .assembler
            .assemble(scratch, config.image_duration, config.fps, &output)
            .await?;

        let post_count = match config.post_count_policy {
            PostCountPolicy::Requested => descriptor.limit,
            PostCountPolicy::Retained => staged.retained as u32,
        };
        let record = ProducedVideoRecord {
            channel: descriptor.name.clone(),
            filename: file_name_of(&outcome.output_path),
            path: outcome.output_path.clone(),
            created_at: Utc::now(),
            ordering: descriptor.ordering,
            image_duration: config.image_duration,
            fps: config.fps,
            duration_seconds: outcome.duration_seconds,
            size_bytes: outcome.size_bytes,
            post_count,
            placeholder: staged.placeholder,
        };

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.record(&record).await {
                warn!(channel = %record.channel, path = %record.path.display(), error = %err, "failed to record produced video");
            }
        }
        info!(
            channel = %record.channel,
            path = %record.path.display(),
            segments = outcome.segments,
            placeholder = record.placeholder,
            "channel run finished"
        );
        Ok(record)
    }

    async fn stage_images(
        &self,
        batch: &BatchContext,
        descriptor: &ChannelDescriptor,
        scratch_dir: &Path,
    ) -> PipelineResult<StagedImages> {
        let posts = self
            .feed
            .list_posts(&descriptor.name, descriptor.ordering, descriptor.limit)
            .await?;
        let retained = self.fetcher.fetch(&posts, scratch_dir).await?;
        if retained > 0 {
            return Ok(StagedImages {
                retained,
                placeholder: false,
            });
        }

        info!(channel = %descriptor.name, candidates = posts.len(), "no usable images, generating placeholder");
        let generator = Arc::clone(&batch.placeholder);
        let dir = scratch_dir.to_path_buf();
        let caption = placeholder_caption(&descriptor.name);
        tokio::task::spawn_blocking(move || generator.generate(&dir, &caption))
            .await
            .map_err(|err| PlaceholderError::Write {
                path: scratch_dir.to_path_buf(),
                reason: err.to_string(),
            })??;
        Ok(StagedImages {
            retained: 0,
            placeholder: true,
        })
    }
}

#[async_trait]
impl BatchRunner for Pipeline {
    async fn run_batch(&self, config: &RunConfig, shutdown: &watch::Receiver<bool>) -> BatchReport {
        self.run_batch_until(config, shutdown).await
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn append_failure_log(logs_dir: &Path, channel: &str, err: &PipelineError) {
    let log_path: PathBuf = logs_dir.join(FAILURE_LOG_NAME);
    if let Err(io_err) = std::fs::create_dir_all(logs_dir) {
        warn!(path = %logs_dir.display(), error = %io_err, "cannot create logs directory");
        return;
    }
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(mut file) => {
            if let Err(io_err) = writeln!(file, "{} [{}] {}", Utc::now().to_rfc3339(), channel, err) {
                warn!(path = %log_path.display(), error = %io_err, "cannot append failure log");
            }
        }
        Err(io_err) => {
            warn!(path = %log_path.display(), error = %io_err, "cannot open failure log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_layout() {
        let path = output_path_for(Path::new("/videos"), "memes", "20240102_030405");
        assert_eq!(
            path,
            PathBuf::from("/videos/output_memes_20240102_030405/memes_reel.mp4")
        );
        assert_eq!(file_name_of(&path), "memes_reel.mp4");
    }

    #[test]
    fn stamp_format() {
        use chrono::TimeZone;
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(batch_stamp(at), "20240102_030405");
    }

    #[test]
    fn failure_log_appends_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let err = PipelineError::Feed(crate::feed::FeedError::Status {
            channel: "nosuchsub".into(),
            status: 404,
        });
        append_failure_log(&logs, "nosuchsub", &err);
        append_failure_log(&logs, "nosuchsub", &err);

        let content = std::fs::read_to_string(logs.join(FAILURE_LOG_NAME)).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("[nosuchsub] feed:"));
    }
}
