use clap::Parser;
use genai_relay::providers::ProviderPreset;
use genai_relay::{build_router, AppState, JobTracker, Relay, RelayConfig, RelayContext, SharedLogger, TrackerOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "genai-relay",
    about = "One OpenAI-style API in front of many generative-AI providers",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Provider base URL (overrides config and preset)
    #[arg(long)]
    base_url: Option<String>,

    /// Log file path
    #[arg(long, default_value = "genai-relay.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genai_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in genai_relay::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = RelayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref provider) = cli.provider {
        config.provider.name = provider.clone();
        if ProviderPreset::from_name(provider).is_some() {
            // The preset supplies its own host and key variable.
            config.provider.base_url = None;
            config.provider.api_key_env = None;
        }
    }
    if let Some(ref base_url) = cli.base_url {
        config.provider.base_url = Some(base_url.clone());
    }
    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;
    let base_url = config.effective_base_url()?;
    let preset = config.preset()?;

    info!("genai-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:  {} ({:?})", config.provider.name, preset.kind);
    info!("  Base URL:  {}", base_url);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} aliased", config.models.len());
    info!("  Job TTL:   {}s", config.jobs.ttl_secs);
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting genai-relay provider={} base_url={} port={}",
            config.provider.name, base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.http.timeout_secs))
        .build()?;
    let tracker = JobTracker::new(TrackerOptions::from_config(&config.jobs));

    let port = config.port;
    let relay = Relay::new(RelayContext {
        config: Arc::new(config),
        client,
        tracker: tracker.clone(),
        logger: logger.clone(),
    })?;

    let state = Arc::new(AppState { relay, logger: logger.clone() });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracker.shutdown();
    logger.compact()?;
    info!("Shut down");

    Ok(())
}
