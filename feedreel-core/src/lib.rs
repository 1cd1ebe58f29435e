pub mod assembler;
pub mod config;
pub mod error;
pub mod feed;
pub mod media;
pub mod pipeline;
pub mod scheduler;
pub mod scratch;
pub mod store;

pub use assembler::{
    AssemblerSettings, AssemblyError, AssemblyOutcome, AssemblyResult, CommandExecutor,
    SystemCommandExecutor, VideoAssembler,
};
pub use config::{
    load_run_config, parse_run_config, write_run_config, ConfigOrigin, LoadedConfig,
    PathsSection, PostCountPolicy, RenderSection, RunConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{ConfigError, Result};
pub use feed::{
    CandidatePost, ChannelDescriptor, DeclaredType, FeedCredentials, FeedEndpoints, FeedError,
    FeedResult, FeedSource, OrderingMode, RedditFeedClient,
};
pub use media::{
    placeholder_caption, MediaError, MediaFetcher, MediaResult, PlaceholderError,
    PlaceholderGenerator,
};
pub use pipeline::{
    BatchContext, BatchReport, BatchRunner, ChannelOutcome, ChannelStatus, Pipeline,
    PipelineError, PipelineResult,
};
pub use scheduler::{Scheduler, SchedulerState, SchedulerSummary, DEFAULT_TICK};
pub use scratch::{PriorRun, RunMarker, RunState, ScratchDir, ScratchError};
pub use store::{
    ProducedVideoRecord, SqliteVideoStore, SqliteVideoStoreBuilder, StoreError, StoreResult,
    StoredVideo, VideoSink,
};
