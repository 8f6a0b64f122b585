use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use tripmatch::{
    auth::{Identity, TokenIssuer},
    config::{create_default_config_file, init_tracing, AppConfig},
    AppState, Database,
};

#[derive(Parser)]
#[command(name = "tripmatch-server")]
#[command(about = "Traveler and sender matching service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        #[arg(short, long, env = "DATABASE_URL")]
        database_url: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Mint a development bearer token
    Token {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        #[arg(short, long)]
        user: Option<uuid::Uuid>,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        admin: bool,
    },
    /// Write a default config file
    InitConfig {
        #[arg(short, long, default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Serve {
            config,
            database_url,
            port,
        } => serve(config, database_url, port).await,
        Command::Token {
            config,
            user,
            name,
            admin,
        } => {
            let config = AppConfig::load_with_env_overrides(&config)?;
            let secret = config
                .jwt_secret()
                .context("auth.jwt_secret must be set to mint tokens")?;
            let identity = Identity {
                user_id: user.unwrap_or_else(uuid::Uuid::new_v4),
                display_name: name,
                is_admin: admin,
            };
            let token = TokenIssuer::new(secret, config.auth.token_ttl_hours).issue(&identity)?;
            println!("user_id: {}", identity.user_id);
            println!("{}", token);
            Ok(())
        }
        Command::InitConfig { path } => {
            create_default_config_file(&path)?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}

async fn serve(config_path: PathBuf, database_url: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load_with_env_overrides(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(url) = database_url {
        config.database.url = url;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    init_tracing(&config.logging);

    let secret = config
        .jwt_secret()
        .context("auth.jwt_secret is required")?;
    let tokens = TokenIssuer::new(secret, config.auth.token_ttl_hours);

    let db = Database::connect(
        &config.database.url,
        config.database.max_connections,
        Duration::from_secs(config.database.busy_timeout_seconds),
    )
    .await
    .with_context(|| format!("opening database {}", config.database.url))?;

    let state = AppState::new(db, tokens, config.limits.clone());
    let app = tripmatch::router(state).layer(TimeoutLayer::new(Duration::from_secs(
        config.server.request_timeout_seconds,
    )));

    let address = config.get_server_address();
    let listener = TcpListener::bind(&address).await?;
    info!(%address, "tripmatch listening");

    axum::serve(listener, app).await?;

    Ok(())
}
