//! Entrypoint: set up tracing, load configuration, connect to Postgres and
//! run one of the subcommands.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `database_url`       – Postgres connection string
//!  - `server_bind`        – HTTP bind address for the API, metrics & health endpoints
//!  - `max_connections`    – Pool size
//!  - `ingest_batch_size`  – Rows per news-flash insert transaction

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use accident_map_api::config::Settings;
use accident_map_api::{db_utils, ingestor, server};

#[derive(Parser, Debug)]
#[command(name = "accident_map_api", version, about = "Road-accident map API")]
struct Cli {
    /// Path to the configuration file, without extension.
    #[arg(long, default_value = "Config")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run migrations and serve the HTTP API (default).
    Serve,
    /// Import a news-flash CSV export into `news_flash.news_flash`.
    ImportNewsFlash {
        /// CSV file with a header line.
        path: PathBuf,
    },
    /// Apply pending database migrations and exit.
    Migrate,
}

/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load the configuration file (and apply any `APP__…` env-var overrides).
/// 3. Spin up a Postgres pool and run any pending SQLx migrations.
/// 4. Serve the API, or import a CSV file, then exit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_file(&cli.config).context("loading configuration")?;
    info!(?settings, "Loaded configuration");

    let pool = db_utils::connect(&settings)
        .await
        .context("connecting to Postgres")?;

    info!("Running database migrations…");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;
    info!("Migrations complete");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let addr: SocketAddr = settings
                .server_bind
                .parse()
                .with_context(|| format!("invalid server_bind {:?}", settings.server_bind))?;
            server::serve(addr, pool).await?;
        }
        Command::ImportNewsFlash { path } => {
            let rows =
                ingestor::import_news_flash(&pool, &path, settings.ingest_batch_size).await?;
            info!(rows, path = %path.display(), "Imported news flash");
        }
        Command::Migrate => {}
    }

    Ok(())
}
