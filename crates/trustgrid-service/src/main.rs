use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use trustgrid_core::{CategoryFieldPolicy, StorageConfig};
use trustgrid_service::{build_router, AdvisoryBackend, ServiceConfig, ServiceState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "trustgridd", version, about = "TrustGrid consent gateway REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092", env = "TRUSTGRID_LISTEN")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "TRUSTGRID_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for organizations, credentials, citizens and consent records.
    #[arg(long, env = "TRUSTGRID_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "TRUSTGRID_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Base url of the identity/policy advisory service. Without it only the
    /// offline keyword policy reader runs and verification always fails closed.
    #[arg(long, env = "TRUSTGRID_ADVISORY_URL")]
    advisory_url: Option<String>,
    /// Seconds before an advisory call is abandoned.
    #[arg(long, default_value_t = 20, env = "TRUSTGRID_ADVISORY_TIMEOUT_SECS")]
    advisory_timeout_secs: u64,
    /// JSON file replacing the built-in category/field allow-list.
    #[arg(long, env = "TRUSTGRID_ALLOW_LIST")]
    allow_list: Option<PathBuf>,
    /// bcrypt work factor for API key hashes.
    #[arg(long, default_value_t = 12, env = "TRUSTGRID_HASH_COST")]
    hash_cost: u32,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, cli.pg_max_connections),
            None => StorageConfig::Memory,
        },
    };

    Ok(storage)
}

fn resolve_allow_list(cli: &Cli) -> anyhow::Result<CategoryFieldPolicy> {
    let Some(path) = &cli.allow_list else {
        return Ok(CategoryFieldPolicy::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read allow-list {}", path.display()))?;
    let policy = CategoryFieldPolicy::from_json(&raw)
        .with_context(|| format!("invalid allow-list {}", path.display()))?;
    Ok(policy)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "trustgrid_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig {
        storage: resolve_storage(&cli)?,
        advisory: match cli.advisory_url.clone() {
            Some(base_url) => AdvisoryBackend::Http { base_url },
            None => AdvisoryBackend::Keyword,
        },
        advisory_timeout: Duration::from_secs(cli.advisory_timeout_secs),
        allow_list: resolve_allow_list(&cli)?,
        hash_cost: cli.hash_cost,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("trustgrid-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
