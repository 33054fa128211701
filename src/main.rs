use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cellar::config::Config;
use cellar::identity::TokenKeys;
use cellar::AppState;

#[derive(Parser, Debug)]
#[command(name = "cellar")]
#[command(author, version, about = "Inventory, cart and checkout backend for a wine and liquor retailer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "cellar.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Secret used to sign access tokens
    #[arg(long, global = true, env = "CELLAR_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the database, seed roles and the configured default admin
    Init,
    /// Create an admin account, or promote and reset an existing user
    CreateAdmin { username: String, password: String },
    /// Delete revoked token records that have expired anyway
    PruneTokens,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = Some(secret);
    }

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Init => init(config).await,
        Command::CreateAdmin { username, password } => {
            create_admin(config, &username, &password).await
        }
        Command::PruneTokens => prune_tokens(config).await,
    }
}

async fn open_db(config: &Config) -> Result<cellar::DbPool> {
    cellar::db::init(&config.server.data_dir, &config.database)
        .await
        .context("Failed to open database")
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting Cellar v{}", env!("CARGO_PKG_VERSION"));

    let db = open_db(&config).await?;

    let (keys, generated) = TokenKeys::from_config(&config.auth);
    if generated {
        tracing::warn!(
            "No JWT secret configured; using a random one. Tokens will not survive a restart."
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = Arc::new(AppState::new(config, db, keys));
    let app = cellar::api::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn init(config: Config) -> Result<()> {
    let db = open_db(&config).await?;
    if cellar::db::ensure_default_admin(&db, &config.auth).await? {
        tracing::info!(
            "Created default admin '{}'",
            config.auth.default_admin_username
        );
    } else if config.auth.default_admin_password.is_none() {
        tracing::warn!("auth.default_admin_password is not set; no admin account was seeded");
    }
    tracing::info!("Database ready at {}", config.server.data_dir.display());
    Ok(())
}

async fn create_admin(config: Config, username: &str, password: &str) -> Result<()> {
    let db = open_db(&config).await?;
    let user = cellar::db::create_admin(&db, username, password).await?;
    tracing::info!(user_id = user.id, "Admin '{}' is ready", user.username);
    Ok(())
}

async fn prune_tokens(config: Config) -> Result<()> {
    let db = open_db(&config).await?;
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(config.auth.token_ttl_hours);
    let removed = cellar::db::prune_blacklisted_tokens(&db, &cutoff.to_rfc3339()).await?;
    tracing::info!(removed, "Pruned revoked tokens");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
