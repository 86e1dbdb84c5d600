//! HTTP API server with observability for the order service.
//!
//! Exposes order placement, the payment gateway webhook and order lookups,
//! with structured logging (tracing) and Prometheus metrics. Adapters are
//! chosen from [`Config`]: PostgreSQL or memory for storage, HTTP or memory
//! for the catalog, Midtrans or memory for payments, Kafka or memory for the
//! broker.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use messaging::{
    BrokerError, InMemoryBroker, MessagePublisher, MessageSubscriber, RetryPublisher,
    StockUpdateListener,
};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository, StoreError};
use saga::{
    BrokerInventoryReserver, CatalogClient, CatalogError, CircuitBreaker, CircuitBreakerSettings,
    ExpirySweeper, HttpCatalogClient, InMemoryCatalog, InMemoryPaymentGateway, InventoryReserver,
    MidtransGateway, OrderSaga, PaymentError, PaymentGateway, RpcInventoryReserver,
};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat, ReservationStrategy};
pub use routes::orders::AppState;

const PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while wiring the application at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare order store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to set up broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("Failed to build catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Failed to build payment gateway: {0}")]
    Payment(#[from] PaymentError),

    #[error("KAFKA_BROKERS is set but the server was built without the `kafka` feature")]
    KafkaUnavailable,
}

/// Everything `main` needs to serve requests and run background work.
pub struct Runtime {
    pub state: Arc<AppState>,
    pub sweeper: ExpirySweeper,
    /// Tasks spawned while wiring, e.g. the standalone catalog consumer.
    pub background: Vec<JoinHandle<()>>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route(
            "/orders/payments/notifications",
            post(routes::orders::payment_notification),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires repositories, clients and the saga from configuration.
pub async fn build_runtime(config: &Config) -> Result<Runtime, StartupError> {
    let repository = connect_repository(config).await?;
    let (raw_publisher, subscriber) = connect_broker(config).await?;
    let publisher = RetryPublisher::new(Arc::clone(&raw_publisher));
    let mut background = Vec::new();

    let catalog: Arc<dyn CatalogClient> = match &config.catalog_url {
        Some(url) => {
            tracing::info!(%url, "using HTTP catalog");
            Arc::new(HttpCatalogClient::new(url.clone(), config.catalog_timeout)?)
        }
        None => {
            tracing::warn!("CATALOG_URL not set, using in-memory demo catalog");
            let catalog = demo_catalog();
            background.push(
                catalog
                    .serve_broker(Arc::clone(&subscriber), raw_publisher)
                    .await?,
            );
            Arc::new(catalog)
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.midtrans_server_key {
        Some(key) => Arc::new(MidtransGateway::new(
            config.midtrans_base_url.clone(),
            key.clone(),
            PAYMENT_TIMEOUT,
        )?),
        None => {
            tracing::warn!("MIDTRANS_SERVER_KEY not set, using in-memory payment gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    };

    let reserver: Arc<dyn InventoryReserver> = match config.reservation_strategy {
        ReservationStrategy::Rpc => Arc::new(RpcInventoryReserver::new(
            Arc::clone(&catalog),
            Arc::new(CircuitBreaker::new(CircuitBreakerSettings::new("inventory"))),
        )),
        ReservationStrategy::Broker => Arc::new(BrokerInventoryReserver::with_timeout(
            StockUpdateListener::new(subscriber),
            publisher.clone(),
            config.reservation_timeout,
        )),
    };
    tracing::info!(strategy = reserver.strategy(), "inventory reservation configured");

    let saga = OrderSaga::new(
        Arc::clone(&repository),
        catalog,
        reserver,
        gateway,
        publisher.clone(),
    );
    let sweeper = ExpirySweeper::new(repository, publisher).with_interval(config.sweep_interval);

    Ok(Runtime {
        state: Arc::new(AppState {
            saga: Arc::new(saga),
        }),
        sweeper,
        background,
    })
}

/// Builds state on in-memory adapters around the given catalog and gateway.
///
/// Stock is reserved through the catalog directly; restores go over an
/// in-memory broker that the catalog consumes.
pub async fn create_in_memory_state(
    repository: InMemoryOrderRepository,
    catalog: InMemoryCatalog,
    gateway: InMemoryPaymentGateway,
) -> Result<Arc<AppState>, StartupError> {
    let broker = InMemoryBroker::new();
    let publisher = RetryPublisher::new(Arc::new(broker.clone()));
    catalog
        .serve_broker(Arc::new(broker.clone()), Arc::new(broker))
        .await?;

    let catalog = Arc::new(catalog);
    let reserver = RpcInventoryReserver::new(
        catalog.clone(),
        Arc::new(CircuitBreaker::new(CircuitBreakerSettings::new("inventory"))),
    );
    let saga = OrderSaga::new(
        Arc::new(repository),
        catalog,
        Arc::new(reserver),
        Arc::new(gateway),
        publisher,
    );

    Ok(Arc::new(AppState {
        saga: Arc::new(saga),
    }))
}

async fn connect_repository(config: &Config) -> Result<Arc<dyn OrderRepository>, StartupError> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let repository = PostgresOrderRepository::new(pool);
            repository.run_migrations().await?;
            tracing::info!("connected to PostgreSQL");
            Ok(Arc::new(repository))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            Ok(Arc::new(InMemoryOrderRepository::seeded()))
        }
    }
}

type BrokerHandles = (Arc<dyn MessagePublisher>, Arc<dyn MessageSubscriber>);

#[cfg(feature = "kafka")]
async fn connect_broker(config: &Config) -> Result<BrokerHandles, StartupError> {
    match &config.kafka_brokers {
        Some(brokers) => {
            let kafka = messaging::KafkaBroker::connect(messaging::KafkaConfig::new(
                brokers.clone(),
                config.broker_topic.clone(),
            ))
            .await?;
            Ok((Arc::new(kafka.clone()), Arc::new(kafka)))
        }
        None => Ok(in_memory_broker()),
    }
}

#[cfg(not(feature = "kafka"))]
async fn connect_broker(config: &Config) -> Result<BrokerHandles, StartupError> {
    if config.kafka_brokers.is_some() {
        return Err(StartupError::KafkaUnavailable);
    }
    Ok(in_memory_broker())
}

fn in_memory_broker() -> BrokerHandles {
    tracing::warn!("KAFKA_BROKERS not set, using in-memory broker");
    let broker = InMemoryBroker::new();
    (Arc::new(broker.clone()), Arc::new(broker))
}

fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_product("P1", "Kopi Susu", 18000.0, 100)
        .with_product("P2", "Es Teh Manis", 8000.0, 100)
        .with_product("P3", "Roti Bakar", 15000.0, 50)
}
