use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;
use studycircle_auth::Authenticator;
use studycircle_config::AppConfig;
use studycircle_database::initialize_database;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub redis_client: redis::Client,
    pub redis_conn: ConnectionManager,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());

        // The pub/sub layer is required: a process that cannot broadcast
        // must refuse to start rather than accept sessions and silently
        // fail to deliver.
        let redis_client = redis::Client::open(config.redis.url.as_str())
            .context("invalid redis url")?;
        let redis_conn = ConnectionManager::new(redis_client.clone())
            .await
            .context("failed to connect to redis pub/sub layer")?;

        info!(url = %config.redis.url, "redis connection established");

        Ok(Self {
            db_pool,
            authenticator,
            redis_client,
            redis_conn,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
