//! Worker entry point.

use std::sync::Arc;

use broker::{AmqpConnector, Broker, InMemoryBroker, connect_with_retry};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{Config, LogFormat, Runtime, StartupError, Stores};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn open_stores(config: &Config) -> Result<Stores, StartupError> {
    let Some(url) = &config.database_url else {
        tracing::info!("DATABASE_URL not set, using in-memory stores");
        return Ok(Stores::in_memory_with_analytics_capacity(
            config.analytics_log_capacity,
        ));
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(url)
        .await?;
    saga::run_migrations(&pool).await?;
    tracing::info!("connected to Postgres, migrations applied");
    Ok(Stores::postgres(pool))
}

async fn connect_broker(config: &Config) -> Result<Arc<dyn Broker>, StartupError> {
    let Some(url) = &config.broker_url else {
        tracing::warn!("BROKER_URL not set, using the in-process broker");
        let connection = connect_with_retry(&InMemoryBroker::new(), &config.connection).await?;
        return Ok(Arc::new(connection));
    };

    let connection = connect_with_retry(&AmqpConnector::new(url.as_str()), &config.connection).await?;
    tracing::info!("connected to AMQP broker");
    Ok(Arc::new(connection))
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    // 3. Stores and broker connection
    let stores = open_stores(&config).await?;
    let client = connect_broker(&config).await?;

    // 4. Topology, seed data and consumers
    let runtime = Runtime::new(config.clone(), client.clone(), stores);
    runtime.declare_topology().await?;
    runtime.seed_stock().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = runtime.spawn_consumers(&shutdown_rx);
    tracing::info!(services = ?config.services, "consumers started");

    // 5. Serve until a shutdown signal arrives
    let app = worker::create_app(runtime.app_state(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // 6. Let consumers finish their in-flight message, then release the connection
    let (services, handles): (Vec<_>, Vec<_>) = consumers.into_iter().unzip();
    for (service, joined) in services
        .into_iter()
        .zip(futures_util::future::join_all(handles).await)
    {
        if let Err(e) = joined {
            tracing::error!(%service, error = %e, "consumer task panicked");
        }
    }

    client.close().await?;
    tracing::info!("worker shut down gracefully");
    Ok(())
}
