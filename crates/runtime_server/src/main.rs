//! Match runtime server entry point.
//!
//! Loads the configuration, initializes logging, starts the match host with
//! the bundled lobby module and runs until a shutdown signal arrives.

mod cli;
mod config;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use match_host::{ChannelSink, RuntimeHost};
use plugin_lobby::{LobbyModule, LOBBY_MODULE};
use runtime_api::{InitModule, MatchId, MatchParams, ServerApi};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
///
/// # Arguments
///
/// * `log_level` - Default level filter
/// * `json_format` - Emit JSON lines instead of colored text
fn setup_logging(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Folds command line overrides into the loaded configuration.
fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(node) = &args.node {
        config.runtime.node = node.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
}

/// Parameters for the lobbies opened at startup.
fn startup_lobby_params(config: &AppConfig) -> MatchParams {
    let mut params = MatchParams::new();
    params.insert(
        "max_players".to_string(),
        serde_json::Value::from(config.lobby.max_players),
    );
    params
}

/// Main application state.
struct Application {
    config: AppConfig,
    host: Arc<RuntimeHost>,
    sink: Arc<ChannelSink>,
}

impl Application {
    /// Creates the application from command line arguments.
    ///
    /// Loads and validates the configuration, initializes logging and
    /// registers the bundled modules with a fresh host.
    async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, &args);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

        if let Err(e) = setup_logging(&config.logging.level, config.logging.json_format) {
            eprintln!("⚠️ Logging not initialized: {e}");
        }
        display_banner();
        info!("📄 Configuration loaded from: {}", args.config_path.display());

        let sink = Arc::new(ChannelSink::new());
        let host = RuntimeHost::new(config.to_host_config(), sink.clone())?;
        let modules: Vec<Arc<dyn InitModule>> = vec![Arc::new(LobbyModule::new())];
        host.load_modules(&modules).await?;

        Ok(Self { config, host, sink })
    }

    async fn open_startup_lobbies(&self) -> anyhow::Result<Vec<MatchId>> {
        let mut opened = Vec::new();
        for _ in 0..self.config.lobby.startup_lobbies {
            let match_id = self
                .host
                .match_create(LOBBY_MODULE, startup_lobby_params(&self.config))
                .await?;
            info!("🏠 Lobby open: {}", match_id);
            opened.push(match_id);
        }
        Ok(opened)
    }

    /// Runs until a shutdown signal arrives, then stops every match.
    async fn run(self) -> anyhow::Result<()> {
        info!("🌟 Starting match runtime");
        info!("📋 Configuration Summary:");
        info!("  🏷️ Node: {}", self.config.runtime.node);
        info!(
            "  ⏱️ Max tick rate: {} / label limit: {} bytes",
            self.config.runtime.max_tick_rate, self.config.runtime.label_max_bytes
        );
        info!(
            "  🎮 Realtime match module: {}",
            self.config
                .runtime
                .realtime_match_module
                .as_deref()
                .unwrap_or("<none>")
        );

        let lobbies = self.open_startup_lobbies().await?;

        let monitor_host = self.host.clone();
        let monitor_sink = self.sink.clone();
        let monitor_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                info!(
                    "📊 System Health - Matches: {} | Streams: {} | Sessions: {}",
                    monitor_host.matches().count(),
                    monitor_host.streams().stream_count(),
                    monitor_sink.session_count()
                );
            }
        });

        info!("✅ Match runtime is now running with {} lobbies", lobbies.len());
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        if let Err(e) = signals::shutdown_signal().await {
            warn!("⚠️ Signal handling failed, shutting down: {}", e);
        }

        info!(
            "🛑 Shutdown signal received, terminating matches (grace {}s)...",
            self.host.config().default_grace_seconds
        );
        self.host.shutdown_default().await;
        monitor_handle.abort();

        info!("✅ Match runtime shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            // Logging may not be up yet.
            eprintln!("❌ Failed to start: {e}");
            return Err(e);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}

fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║           🎮 MATCH RUNTIME 🎮            ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  Authoritative matches, one task each    ║");
    info!("║  RPC, realtime and matchmaker hooks      ║");
    info!("╚══════════════════════════════════════════╝");
}
