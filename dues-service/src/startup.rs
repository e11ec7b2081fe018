//! Application startup and lifecycle management.

use crate::config::{DuesConfig, StorageConfig};
use crate::handlers;
use crate::services::{
    init_metrics, spawn_sweeper, Database, LedgerService, LedgerStore, MemoryStore,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use crate::middleware::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, request_span};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DuesConfig,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: Arc<LedgerService>,
    pub shutdown: CancellationToken,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    sweeper: Option<JoinHandle<()>>,
}

impl Application {
    /// Build the application with the given configuration.
    /// PostgreSQL migrations are applied before the listener is bound.
    pub async fn build(config: DuesConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn LedgerStore> = match &config.storage {
            StorageConfig::Postgres(database) => {
                let db = Database::new(
                    &database.url,
                    database.max_connections,
                    database.min_connections,
                    &config.ledger.base_currency,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage - ledger is lost on restart");
                Arc::new(MemoryStore::new(config.ledger.base_currency.clone()))
            }
        };

        let shutdown = CancellationToken::new();
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            config.ledger.eligibility(),
            config.ledger.base_currency.clone(),
            shutdown.clone(),
        ));

        let sweeper = config
            .ledger
            .sweep_interval()
            .map(|interval| spawn_sweeper(ledger.clone(), interval, shutdown.clone()));

        let http_addr = config.common.socket_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Dues service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState {
                config,
                store,
                ledger,
                shutdown,
            },
            sweeper,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Token that stops the server, the sweeper and any running assessment.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.state.shutdown.clone();
        let router = router(self.state);

        tracing::info!(
            service = "dues-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Sweeper task ended abnormally");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// Build the HTTP router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/categories",
            post(handlers::create_category).get(handlers::list_categories),
        )
        .route(
            "/members",
            post(handlers::create_member).get(handlers::list_members),
        )
        .route(
            "/members/:id",
            get(handlers::get_member).delete(handlers::delete_member),
        )
        .route(
            "/members/:id/status",
            axum::routing::patch(handlers::update_member_status),
        )
        .route("/members/:id/balance", get(handlers::member_balance))
        .route("/plans", post(handlers::create_plan).get(handlers::list_plans))
        .route(
            "/plans/:id",
            get(handlers::get_plan).patch(handlers::update_plan),
        )
        .route(
            "/assessments",
            post(handlers::create_assessment).get(handlers::list_assessments),
        )
        .route("/assigned-dues", get(handlers::list_assigned_dues))
        .route("/assigned-dues/:id", get(handlers::get_assigned_due))
        .route("/assigned-dues/:id/sync", post(handlers::sync_assigned_due))
        .route("/assigned-dues/:id/waive", post(handlers::waive_assigned_due))
        .route(
            "/payments",
            post(handlers::record_payment).get(handlers::list_payments),
        )
        .route("/payments/:id", get(handlers::get_payment))
        .route("/maintenance/reconcile", post(handlers::reconcile))
        .route("/reports/outstanding", get(handlers::outstanding_report))
        .layer(TraceLayer::new_for_http().make_span_with(request_span::<axum::body::Body>))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use axum::{body::Body, http};
    use service_core::config::Config as CoreConfig;
    use tower::ServiceExt;

    fn memory_state() -> AppState {
        let config = DuesConfig {
            common: CoreConfig::default(),
            service_name: "dues-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageConfig::Memory,
            ledger: LedgerConfig::default(),
        };
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new("GHS"));
        let shutdown = CancellationToken::new();
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            config.ledger.eligibility(),
            "GHS",
            shutdown.clone(),
        ));
        AppState {
            config,
            store,
            ledger,
            shutdown,
        }
    }

    #[tokio::test]
    async fn not_ready_after_shutdown() {
        let state = memory_state();
        let shutdown = state.shutdown.clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(http::Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        shutdown.cancel();
        let response = app
            .oneshot(http::Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let response = router(memory_state())
            .oneshot(http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn requests_are_counted_by_route_template() {
        let app = router(memory_state());
        let missing = uuid::Uuid::new_v4();
        let response = app
            .clone()
            .oneshot(
                http::Request::builder()
                    .uri(format!("/members/{}", missing))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);

        let response = app
            .oneshot(http::Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("dues_http_request_duration_seconds_bucket"));
        assert!(text.contains(r#"path="/members/:id""#));
        assert!(!text.contains(&missing.to_string()));
    }
}
