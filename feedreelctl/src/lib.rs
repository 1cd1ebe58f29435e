use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use feedreel_core::{
    load_run_config, BatchReport, ChannelStatus, ConfigOrigin, FeedCredentials, FeedEndpoints,
    FeedError, MediaFetcher, Pipeline, RedditFeedClient, RunConfig, Scheduler, SchedulerSummary,
    SqliteVideoStore, StoredVideo, DEFAULT_CONFIG_FILE, DEFAULT_TICK,
};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] feedreel_core::ConfigError),
    #[error(
        "credenciais ausentes ({}): defina as variáveis ID, SECRET e AGENT no ambiente ou em um arquivo .env",
        .0.join(", ")
    )]
    MissingCredentials(Vec<&'static str>),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("media error: {0}")]
    Media(#[from] feedreel_core::MediaError),
    #[error("database error: {0}")]
    Store(#[from] feedreel_core::StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{failed} de {total} canais falharam")]
    ChannelsFailed { failed: usize, total: usize },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "feedreel: vídeos slideshow a partir de feeds do Reddit", long_about = None)]
pub struct Cli {
    /// Caminho do feedreel.toml (criado com valores padrão se ausente)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Executa o pipeline uma vez para todos os canais
    Once,
    /// Executa o pipeline agora e depois a cada intervalo, até Ctrl-C
    Scheduler(SchedulerArgs),
    /// Consulta vídeos registrados
    #[command(subcommand)]
    Videos(VideoCommands),
    /// Inspeciona a configuração
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct SchedulerArgs {
    /// Intervalo entre verificações, em segundos
    #[arg(long, default_value_t = DEFAULT_TICK.as_secs())]
    pub tick_seconds: u64,
}

#[derive(Subcommand, Debug)]
pub enum VideoCommands {
    /// Lista os vídeos mais recentes
    List(VideoListArgs),
}

#[derive(Args, Debug)]
pub struct VideoListArgs {
    /// Filtrar por canal (subreddit)
    #[arg(long)]
    pub channel: Option<String>,
    /// Limite de registros
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Mostra a configuração efetiva
    Show,
}

/// Logs go to stderr so `--format json` output stays parseable.
/// `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("aviso: logging já inicializado: {err}");
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli);

    match &cli.command {
        Commands::Once => {
            let credentials = resolve_credentials(|key| std::env::var(key).ok())?;
            let report = context.run_once(credentials)?;
            render(&report, cli.format)?;
            if report.has_failures() {
                return Err(AppError::ChannelsFailed {
                    failed: report.failed(),
                    total: report.channels.len(),
                });
            }
        }
        Commands::Scheduler(args) => {
            let credentials = resolve_credentials(|key| std::env::var(key).ok())?;
            let summary =
                context.run_scheduler(credentials, Duration::from_secs(args.tick_seconds.max(1)))?;
            render(&summary, cli.format)?;
        }
        Commands::Videos(VideoCommands::List(args)) => {
            let list = context.video_list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Config(ConfigCommands::Show) => {
            let view = context.config_show()?;
            render(&view, cli.format)?;
        }
    }

    Ok(())
}

/// Reads the three credential variables; all must be present and non-blank.
pub fn resolve_credentials<F>(lookup: F) -> Result<FeedCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    FeedCredentials::from_lookup(lookup).map_err(|err| match err {
        FeedError::MissingCredentials(missing) => AppError::MissingCredentials(missing),
        other => AppError::Feed(other),
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Self {
        Self {
            config_path: cli.config.clone(),
        }
    }

    fn runtime() -> Result<Runtime> {
        Ok(tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?)
    }

    fn load_config(&self) -> Result<RunConfig> {
        let loaded = load_run_config(&self.config_path)?;
        if let ConfigOrigin::FallbackDefault(reason) = &loaded.origin {
            error!(path = %self.config_path.display(), %reason, "configuration unusable, using defaults");
        }
        Ok(loaded.config)
    }

    async fn build_pipeline(config: &RunConfig, credentials: FeedCredentials) -> Result<Pipeline> {
        let fetcher = MediaFetcher::new(&credentials.user_agent)?;
        let client = RedditFeedClient::connect(credentials, FeedEndpoints::default()).await?;
        let store = open_store(&config.paths.database)?;
        Ok(Pipeline::new(Arc::new(client), fetcher).with_sink(Arc::new(store)))
    }

    fn run_once(&self, credentials: FeedCredentials) -> Result<BatchReport> {
        let config = self.load_config()?;
        let runtime = Self::runtime()?;
        runtime.block_on(async {
            let pipeline = Self::build_pipeline(&config, credentials).await?;
            Ok(pipeline.run_batch(&config).await)
        })
    }

    fn run_scheduler(&self, credentials: FeedCredentials, tick: Duration) -> Result<SchedulerSummary> {
        let config = self.load_config()?;
        let runtime = Self::runtime()?;
        runtime.block_on(async {
            let pipeline = Self::build_pipeline(&config, credentials).await?;
            let mut scheduler = Scheduler::new(pipeline, &self.config_path).with_tick(tick);
            let summary = scheduler
                .run_until(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("interrupt received, stopping scheduler"),
                        Err(err) => {
                            error!(error = %err, "cannot listen for Ctrl-C, scheduler runs until killed");
                            std::future::pending::<()>().await;
                        }
                    }
                })
                .await;
            Ok(summary)
        })
    }

    fn video_list(&self, args: &VideoListArgs) -> Result<VideoList> {
        let config = self.load_config()?;
        let database = config.paths.database;
        if !database.exists() {
            return Ok(VideoList {
                total: 0,
                rows: Vec::new(),
            });
        }
        let store = SqliteVideoStore::builder()
            .path(&database)
            .read_only(true)
            .build()?;
        Ok(VideoList {
            total: store.count()?,
            rows: store.list_recent(args.channel.as_deref(), args.limit)?,
        })
    }

    fn config_show(&self) -> Result<ConfigView> {
        let loaded = load_run_config(&self.config_path)?;
        Ok(ConfigView {
            path: self.config_path.clone(),
            origin: loaded.origin,
            config: loaded.config,
        })
    }
}

fn open_store(path: &Path) -> Result<SqliteVideoStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteVideoStore::new(path)?;
    store.initialize()?;
    Ok(store)
}

#[derive(Debug, Serialize)]
struct VideoList {
    total: u64,
    rows: Vec<StoredVideo>,
}

#[derive(Debug, Serialize)]
struct ConfigView {
    path: PathBuf,
    origin: ConfigOrigin,
    config: RunConfig,
}

impl DisplayFallback for BatchReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Lote {}: {} ok, {} com falha",
            self.stamp,
            self.succeeded(),
            self.failed()
        )];
        for outcome in &self.channels {
            match &outcome.status {
                ChannelStatus::Succeeded { video } => lines.push(format!(
                    "  r/{} ({}) -> {} [{} bytes, {:.1}s{}]",
                    outcome.channel,
                    outcome.ordering,
                    video.path.display(),
                    video.size_bytes,
                    video.duration_seconds,
                    if video.placeholder { ", placeholder" } else { "" }
                )),
                ChannelStatus::Failed { stage, reason } => lines.push(format!(
                    "  r/{} ({}) FALHOU em {}: {}",
                    outcome.channel, outcome.ordering, stage, reason
                )),
            }
        }
        lines.join("\n")
    }
}

impl DisplayFallback for SchedulerSummary {
    fn display(&self) -> String {
        format!(
            "Scheduler encerrado após {} execuções ({} canais ok, {} com falha)",
            self.runs, self.channels_succeeded, self.channels_failed
        )
    }
}

impl DisplayFallback for VideoList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhum vídeo registrado".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let video = &entry.record;
            lines.push(format!(
                "#{id} r/{channel} {created} ordering={ordering} dur={duration:.1}s posts={posts}{placeholder} {path}",
                id = entry.id,
                channel = video.channel,
                created = video.created_at.format("%Y-%m-%d %H:%M:%S"),
                ordering = video.ordering,
                duration = video.duration_seconds,
                posts = video.post_count,
                placeholder = if video.placeholder { " placeholder" } else { "" },
                path = video.path.display(),
            ));
        }
        lines.push(format!("Total registrado: {}", self.total));
        lines.join("\n")
    }
}

impl DisplayFallback for ConfigView {
    fn display(&self) -> String {
        let origin = match &self.origin {
            ConfigOrigin::File => "arquivo".to_string(),
            ConfigOrigin::CreatedDefault => "padrão (arquivo criado)".to_string(),
            ConfigOrigin::FallbackDefault(reason) => format!("padrão (arquivo inválido: {reason})"),
        };
        let config = &self.config;
        let mut lines = vec![
            format!("Configuração: {} [{}]", self.path.display(), origin),
            format!("  canais: {}", config.channels.join(", ")),
            format!("  posts por canal: {}", config.posts_limit),
            format!("  duração por imagem: {}s @ {} fps", config.image_duration, config.fps),
            format!("  intervalo: {} min", config.run_interval_minutes),
            format!("  ordenações: {}", config.feed_types.join(", ")),
            format!("  scratch: {}", config.paths.scratch_dir.display()),
            format!("  saída: {}", config.paths.output_dir.display()),
            format!("  banco: {}", config.paths.database.display()),
        ];
        if config.add_music {
            lines.push("  add_music: ativado (sem efeito, vídeos sem áudio)".to_string());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feedreel_core::{OrderingMode, ProducedVideoRecord, RunConfig};
    use tempfile::TempDir;

    fn context_with_database(temp: &TempDir) -> AppContext {
        let config_path = temp.path().join("feedreel.toml");
        let mut config = RunConfig::default();
        config.paths.database = temp.path().join("data").join("feedreel.sqlite");
        feedreel_core::write_run_config(&config_path, &config).unwrap();
        AppContext { config_path }
    }

    #[test]
    fn parses_commands_and_global_flags() {
        let cli = Cli::try_parse_from([
            "feedreelctl",
            "--config",
            "custom.toml",
            "--format",
            "json",
            "videos",
            "list",
            "--channel",
            "memes",
            "--limit",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Videos(VideoCommands::List(args)) => {
                assert_eq!(args.channel.as_deref(), Some("memes"));
                assert_eq!(args.limit, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["feedreelctl", "scheduler"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(
            cli.command,
            Commands::Scheduler(SchedulerArgs { tick_seconds: 10 })
        ));
        assert!(Cli::try_parse_from(["feedreelctl", "broadcast"]).is_err());
    }

    #[test]
    fn missing_credentials_name_every_variable() {
        let err = resolve_credentials(|key| (key == "AGENT").then(|| "agent".to_string()))
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, AppError::MissingCredentials(ref missing) if missing == &["ID", "SECRET"]));
        for variable in ["ID", "SECRET", "AGENT"] {
            assert!(message.contains(variable), "{message}");
        }

        let credentials = resolve_credentials(|key| Some(format!("{key}-value"))).unwrap();
        assert_eq!(credentials.client_id, "ID-value");
    }

    #[test]
    fn video_list_reads_recorded_videos() {
        let temp = TempDir::new().unwrap();
        let context = context_with_database(&temp);

        let empty = context
            .video_list(&VideoListArgs {
                channel: None,
                limit: 5,
            })
            .unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.display(), "Nenhum vídeo registrado");

        let config = context.load_config().unwrap();
        let store = open_store(&config.paths.database).unwrap();
        store
            .insert(&ProducedVideoRecord {
                channel: "memes".into(),
                filename: "memes_reel.mp4".into(),
                path: PathBuf::from("output_memes_20240101_000000/memes_reel.mp4"),
                created_at: Utc::now(),
                ordering: OrderingMode::Hot,
                image_duration: 3.0,
                fps: 30,
                duration_seconds: 30.0,
                size_bytes: 1024,
                post_count: 10,
                placeholder: false,
            })
            .unwrap();

        let list = context
            .video_list(&VideoListArgs {
                channel: Some("memes".into()),
                limit: 5,
            })
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.rows[0].record.channel, "memes");
        assert!(list.display().contains("r/memes"));
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["rows"][0]["channel"], "memes");
    }

    #[test]
    fn config_show_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let context = AppContext {
            config_path: temp.path().join("feedreel.toml"),
        };
        let view = context.config_show().unwrap();
        assert_eq!(view.origin, ConfigOrigin::CreatedDefault);
        assert!(context.config_path.exists());
        assert!(view.display().contains("memes, dankmemes, wholesomememes"));
    }
}
