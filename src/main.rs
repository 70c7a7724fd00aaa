use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scenecast::channel::RoomRegistry;
use scenecast::config::{AppConfig, ConfigStore};
use scenecast::state::AppState;
use scenecast::utils::bind_tcp_listener;
use scenecast::video::{FramePolicy, TestSceneFactory};
use scenecast::web;
use scenecast::webrtc::{SessionManager, WebRtcNegotiatorFactory};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Scenecast command line arguments
#[derive(Parser, Debug)]
#[command(name = "scenecast")]
#[command(version, about = "Stream server-rendered scenes to browsers over WebRTC", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML, default: $SCENECAST_CONFIG)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Fixed frame rate; 0 renders as fast as possible (overrides config)
    #[arg(long, value_name = "FPS")]
    fps: Option<u32>,

    /// Framebuffer width (overrides config)
    #[arg(long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Framebuffer height (overrides config)
    #[arg(long, value_name = "PIXELS")]
    height: Option<u32>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting Scenecast v{}", env!("CARGO_PKG_VERSION"));

    let config_store = match config_path(&args) {
        Some(path) => ConfigStore::load(&path).await?,
        None => ConfigStore::new(AppConfig::default())?,
    };
    config_store.update(|config| apply_cli_overrides(config, &args))?;

    let config = config_store.get();
    if let Some(path) = config_store.path() {
        tracing::debug!("Using configuration file {}", path.display());
    }
    tracing::info!(
        "Streaming {}x{} ({}), {} ICE servers",
        config.stream.width,
        config.stream.height,
        config.stream.frame_policy,
        config.webrtc.ice_servers.len()
    );

    let negotiators = Arc::new(WebRtcNegotiatorFactory::new(config.webrtc.clone()));
    let sessions = Arc::new(SessionManager::new(
        config_store.clone(),
        negotiators,
        Arc::new(TestSceneFactory),
    ));
    let state = AppState::new(config_store.clone(), sessions, Arc::new(RoomRegistry::new()));

    let app = web::create_router(state.clone());

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.port);
    let listener = bind_tcp_listener(addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let listener = tokio::net::TcpListener::from_std(listener)?;
    let server = axum::serve(listener, app);
    let server = async move { server.await };

    tokio::select! {
        _ = shutdown_signal() => {
            cleanup(&state).await;
        }
        result = server => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            cleanup(&state).await;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves once Ctrl-C is received
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Close every connection and session
async fn cleanup(state: &Arc<AppState>) {
    state.shutdown();
    state.sessions.close_all().await;
}

fn config_path(args: &CliArgs) -> Option<PathBuf> {
    args.config
        .clone()
        .or_else(|| std::env::var_os("SCENECAST_CONFIG").map(PathBuf::from))
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(ref address) = args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(fps) = args.fps {
        config.stream.frame_policy = match fps {
            0 => FramePolicy::Uncapped,
            fps => FramePolicy::Fixed { fps },
        };
    }
    if let Some(width) = args.width {
        config.stream.width = width;
    }
    if let Some(height) = args.height {
        config.stream.height = height;
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "scenecast=error,tower_http=error",
        LogLevel::Warn => "scenecast=warn,tower_http=warn",
        LogLevel::Info => "scenecast=info,tower_http=info",
        LogLevel::Verbose => "scenecast=debug,tower_http=info",
        LogLevel::Debug => "scenecast=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "scenecast=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
