use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::assembler::VideoAssembler;
use crate::config::RunConfig;
use crate::feed::OrderingMode;
use crate::media::PlaceholderGenerator;
use crate::store::ProducedVideoRecord;

/// Format of the per-batch timestamp embedded in output directory names.
pub const BATCH_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn batch_stamp(at: DateTime<Local>) -> String {
    at.format(BATCH_STAMP_FORMAT).to_string()
}

/// Output location for one channel run: `<root>/output_<channel>_<stamp>/<channel>_reel.mp4`.
pub fn output_path_for(output_root: &std::path::Path, channel: &str, stamp: &str) -> PathBuf {
    output_root
        .join(format!("output_{channel}_{stamp}"))
        .join(format!("{channel}_reel.mp4"))
}

/// Everything shared by the channel runs of one batch.
#[derive(Debug)]
pub struct BatchContext {
    pub(crate) config: RunConfig,
    pub(crate) stamp: String,
    pub(crate) assembler: VideoAssembler,
    pub(crate) placeholder: Arc<PlaceholderGenerator>,
}

impl BatchContext {
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ChannelStatus {
    Succeeded { video: ProducedVideoRecord },
    Failed { stage: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub ordering: OrderingMode,
    #[serde(flatten)]
    pub status: ChannelStatus,
}

impl ChannelOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ChannelStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub stamp: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub channels: Vec<ChannelOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.channels.iter().filter(|outcome| outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.channels.len() - self.succeeded()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}
