//! # Server Configuration
//!
//! Server setup for the marketsync engine: shared state, router, OpenAPI
//! docs, and the background task fleet (executor, sweeper, scheduler,
//! credential refresher).

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::audit::TracingAuditSink;
use crate::auth::auth_middleware;
use crate::batch::BatchActionProcessor;
use crate::chunker::ChunkPlanner;
use crate::config::{AppConfig, ConfigError};
use crate::credentials::CredentialService;
use crate::crypto::CryptoKey;
use crate::executor::JobExecutor;
use crate::handlers;
use crate::marketplace::{ApiClient, SignedRequestExecutor};
use crate::refresher::CredentialRefresher;
use crate::repositories::{
    AccountRepository, BatchActionRepository, RunHealthRepository, SyncJobRepository,
    SyncProgressRepository,
};
use crate::scheduler::JobScheduler;
use crate::sweeper::LeaseSweeper;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub accounts: AccountRepository,
    pub jobs: SyncJobRepository,
    pub progress: SyncProgressRepository,
    pub batch_records: BatchActionRepository,
    pub run_health: RunHealthRepository,
    pub credentials: Arc<CredentialService>,
    pub client: ApiClient,
}

impl AppState {
    /// Wire up repositories and services from config and a database pool.
    pub fn build(config: Arc<AppConfig>, db: DatabaseConnection) -> Result<Self, ConfigError> {
        let key_bytes = config.crypto_key.clone().ok_or(ConfigError::MissingCryptoKey)?;
        let crypto_key = CryptoKey::new(key_bytes)
            .map_err(|_| ConfigError::InvalidCryptoKeyLength { length: 0 })?;

        let db = Arc::new(db);
        let http = reqwest::Client::new();

        let accounts = AccountRepository::new(Arc::clone(&db), crypto_key);
        let jobs = SyncJobRepository::new(Arc::clone(&db));
        let progress = SyncProgressRepository::new(Arc::clone(&db));
        let batch_records = BatchActionRepository::new(Arc::clone(&db));
        let run_health = RunHealthRepository::new(Arc::clone(&db));

        let credentials = Arc::new(CredentialService::new(
            accounts.clone(),
            http.clone(),
            &config.marketplace_api_base,
            config.marketplace_partner_id.clone(),
            &config.credential,
        ));

        let signer = SignedRequestExecutor::new(
            http,
            config.marketplace_api_base.clone(),
            config.marketplace_partner_id.clone(),
            config.marketplace_signing_secret.clone(),
        );
        let client = ApiClient::new(signer, Arc::clone(&credentials));

        Ok(Self {
            config,
            db,
            accounts,
            jobs,
            progress,
            batch_records,
            run_health,
            credentials,
            client,
        })
    }

    /// Spawn the background task fleet; each task runs until `shutdown`.
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let chunker = ChunkPlanner::new(
            self.client.clone(),
            self.jobs.clone(),
            self.progress.clone(),
            self.config.chunking.clone(),
        );
        let batch = BatchActionProcessor::new(
            self.client.clone(),
            self.batch_records.clone(),
            self.run_health.clone(),
            self.config.batch.clone(),
        );
        let executor = JobExecutor::new(
            self.jobs.clone(),
            chunker,
            batch,
            Arc::new(TracingAuditSink),
            self.run_health.clone(),
            self.config.queue.clone(),
            self.config.retry_policy.clone(),
        );
        let sweeper = LeaseSweeper::new(self.jobs.clone(), self.config.queue.sweep_interval_seconds);
        let refresher =
            CredentialRefresher::new(Arc::clone(&self.credentials), self.config.credential.clone());
        let scheduler = JobScheduler::new(
            Arc::clone(&self.db),
            self.accounts.clone(),
            self.jobs.clone(),
            self.run_health.clone(),
            self.config.scheduler.clone(),
            self.config.batch.clone(),
        );

        vec![
            tokio::spawn(executor.run(shutdown.clone())),
            tokio::spawn(sweeper.run(shutdown.clone())),
            tokio::spawn(refresher.run(shutdown.clone())),
            tokio::spawn(scheduler.run(shutdown)),
        ]
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/accounts",
            get(handlers::accounts::list_accounts).post(handlers::accounts::create_account),
        )
        .route(
            "/accounts/{account_id}",
            get(handlers::accounts::get_account).delete(handlers::accounts::delete_account),
        )
        .route(
            "/accounts/{account_id}/sync",
            post(handlers::jobs::trigger_sync),
        )
        .route(
            "/accounts/{account_id}/actions",
            post(handlers::jobs::trigger_batch_action),
        )
        .route(
            "/accounts/{account_id}/actions/records",
            get(handlers::actions::list_action_records),
        )
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{job_id}", get(handlers::jobs::get_job))
        .route("/progress", get(handlers::progress::list_progress))
        .route(
            "/accounts/{account_id}/progress/{sync_kind}",
            get(handlers::progress::get_progress),
        )
        .route(
            "/accounts/{account_id}/progress/{sync_kind}/reset",
            post(handlers::progress::reset_progress),
        )
        .route("/run-health", get(handlers::system::list_run_health))
        .route(
            "/accounts/{account_id}/run-health/{job_kind}/reset",
            post(handlers::system::reset_circuit_breaker),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::system::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and background tasks with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let state = AppState::build(Arc::clone(&config), db)?;

    let shutdown = CancellationToken::new();
    let background = state.spawn_background(shutdown.clone());

    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::system::healthz,
        crate::handlers::system::list_run_health,
        crate::handlers::system::reset_circuit_breaker,
        crate::handlers::accounts::list_accounts,
        crate::handlers::accounts::create_account,
        crate::handlers::accounts::get_account,
        crate::handlers::accounts::delete_account,
        crate::handlers::jobs::trigger_sync,
        crate::handlers::jobs::trigger_batch_action,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::progress::list_progress,
        crate::handlers::progress::get_progress,
        crate::handlers::progress::reset_progress,
        crate::handlers::actions::list_action_records,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::types::AccountResponse,
            crate::handlers::types::CreateAccountRequest,
            crate::handlers::types::JobResponse,
            crate::handlers::types::TriggerSyncRequest,
            crate::handlers::types::TriggerActionRequest,
            crate::handlers::types::ProgressResponse,
            crate::handlers::types::RunHealthResponse,
            crate::handlers::types::ActionRecordResponse,
            crate::handlers::types::HealthResponse,
        )
    ),
    info(
        title = "Marketsync Engine API",
        description = "Operator API for the marketplace synchronization engine",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
