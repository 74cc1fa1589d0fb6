use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trove::config::Config;
use trove::server::{AppState, create_router};
use trove::store::{AuditReport, SqliteStore, Store};

#[derive(Parser)]
#[command(name = "trove")]
#[command(about = "A versioned 3D asset registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to trove.toml
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Data directory for the database and payloads
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.server.data_dir = data_dir.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and database
    Init {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Start the server
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Verify tag counters and version histories
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn run_init(config: &Config) -> anyhow::Result<()> {
    let server = &config.server;
    fs::create_dir_all(server.blob_dir())?;

    let store = SqliteStore::new(server.db_path())?;
    store.initialize()?;

    println!("Database: {}", server.db_path().display());
    println!("Payloads: {}", server.blob_dir().display());

    Ok(())
}

fn run_check(config: &Config) -> anyhow::Result<()> {
    let db_path = config.server.db_path();
    if !db_path.exists() {
        bail!(
            "No database at {}. Run 'trove init' first.",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&db_path)?;
    let report = store.audit()?;
    print_report(&report);

    if !report.is_clean() {
        bail!("Integrity check failed");
    }
    println!("OK: no integrity problems found");
    Ok(())
}

fn print_report(report: &AuditReport) {
    for drift in &report.tag_drift {
        println!(
            "tag '{}': usage count {} but {} assets reference it",
            drift.tag, drift.recorded, drift.actual
        );
    }
    for gap in &report.version_gaps {
        println!(
            "asset '{}': at version {} with {} version rows ({:?}..{:?})",
            gap.asset_id, gap.version, gap.rows, gap.lowest, gap.highest
        );
    }
    for id in &report.stale_pointers {
        println!("asset '{id}': current file does not match latest version");
    }
    if report.orphaned_versions > 0 {
        println!(
            "{} version rows have no owning asset",
            report.orphaned_versions
        );
    }
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let db_path = config.server.db_path();
    if !db_path.exists() {
        bail!("Server not initialized. Run 'trove init' first to create the database.");
    }

    let state = AppState::open(&config)?;
    if config.identity.tokens.is_empty() {
        warn!("No tokens configured, every request will be anonymous");
    }

    let app = create_router(Arc::new(state));
    let addr = config.server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trove=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { config } => run_init(&config.load()?)?,
        Commands::Serve { config, host, port } => {
            let mut config = config.load()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_serve(config).await?;
        }
        Commands::Check { config } => run_check(&config.load()?)?,
    }

    Ok(())
}
