use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use video_triage::{
    ActionLedger, ApprovalProcessor, CommandResponder, Config, DispositionRouter, FfmpegTranscoder,
    LocalVideoStore, LongVideoHandler, MediumVideoHandler, MessagingGateway, RecentVideos,
    ShortVideoHandler, TelegramGateway, TelegramListener, TriageService, TriageStats, TrimPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        input_chat_id = config.telegram.input_chat_id,
        destination_chat_id = config.telegram.destination_chat_id,
        short_max_mb = config.classification.short_max_mb,
        medium_max_mb = config.classification.medium_max_mb,
        "Starting video triage service"
    );

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Initialize components
    let mut bot = Bot::new(&config.telegram.bot_token);
    if let Some(api_url) = config.telegram.api_url()? {
        info!(api_url = %api_url, "Using custom Bot API server");
        bot = bot.set_api_url(api_url);
    }
    if config.downloads_exceed_api_limit() {
        warn!(
            short_max_mb = config.classification.short_max_mb,
            limit_mb = video_triage::config::PUBLIC_API_DOWNLOAD_LIMIT_MB,
            "Public Bot API cannot download videos this large; set telegram.api_url to a local Bot API server"
        );
    }
    let recent = Arc::new(RecentVideos::new(config.telegram.recent_videos_limit));
    let gateway: Arc<dyn MessagingGateway> =
        Arc::new(TelegramGateway::new(bot.clone(), recent.clone()));
    let ledger = Arc::new(ActionLedger::new());
    let stats = Arc::new(TriageStats::default());
    let thresholds = config.thresholds();

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.trim.ffmpeg_path.clone(),
        config.trim.timeout(),
    ));
    let trim = Arc::new(TrimPipeline::new(
        gateway.clone(),
        transcoder,
        config.trim.work_dir.clone(),
    ));

    let router = DispositionRouter::new(
        ShortVideoHandler::new(gateway.clone(), config.telegram.destination_chat_id),
        MediumVideoHandler::new(&config, gateway.clone(), ledger.clone()),
        LongVideoHandler::new(
            gateway.clone(),
            LocalVideoStore::new(gateway.clone(), config.storage.videos_dir.clone()),
        ),
    );
    let approval = ApprovalProcessor::new(&config, gateway.clone(), trim, ledger.clone());
    let service = Arc::new(TriageService::new(
        gateway.clone(),
        router,
        approval,
        stats.clone(),
    ));
    let commands = Arc::new(CommandResponder::new(
        gateway,
        ledger,
        stats,
        thresholds,
        config.telegram.input_chat_id,
    ));

    let listener = Arc::new(TelegramListener::new(
        service,
        commands,
        recent,
        thresholds,
        config.telegram.input_chat_id,
    ));

    info!("Video triage service started successfully");

    // Runs until SIGINT or SIGTERM
    listener.run(bot).await;

    info!("Video triage service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match log_format {
        "pretty" => registry.with(fmt::layer().pretty()).init(),
        _ => registry.with(fmt::layer().json()).init(),
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
