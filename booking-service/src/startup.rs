//! Application startup and lifecycle management.
//!
//! [`Application::build`] wires the store, gateway, notification queue and
//! email provider from configuration. Tests and embedders can supply their
//! own parts through [`Application::build_with`].

use crate::config::{BookingConfig, GatewayProvider, QueueBackend, StoreBackend};
use crate::handlers::{self, amenities, bookings, listings, payments, reviews};
use crate::notifications::{
    channel_queue, EmailProvider, JobSource, MockEmailProvider, NotificationWorker,
    RedisJobSource, RedisNotificationQueue, SharedQueue, SmtpProvider,
};
use crate::services::{
    ChapaClient, InMemoryStore, MockGateway, MongoStore, SharedGateway, SharedStore,
};
use crate::workflow::{BookingWorkflow, WorkflowSettings};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub queue: SharedQueue,
    pub workflow: Arc<BookingWorkflow>,
    pub gateway: SharedGateway,
    pub callback_signature_required: bool,
}

/// Collaborators the application runs on.
pub struct Dependencies {
    pub store: SharedStore,
    pub gateway: SharedGateway,
    pub queue: SharedQueue,
    pub job_source: Arc<dyn JobSource>,
    pub email: Arc<dyn EmailProvider>,
}

impl Dependencies {
    /// Build every collaborator from configuration.
    pub async fn from_config(config: &BookingConfig) -> Result<Self, AppError> {
        let store: SharedStore = match config.store.backend {
            StoreBackend::Mongo => {
                let mut client_options =
                    ClientOptions::parse(config.store.mongodb_uri.expose_secret())
                        .await
                        .map_err(|e| {
                            tracing::error!("Failed to parse MongoDB connection string: {}", e);
                            AppError::DatabaseError(e.into())
                        })?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options).map_err(|e| {
                    tracing::error!("Failed to create MongoDB client: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
                let store = MongoStore::new(&client.database(&config.store.mongodb_database));
                store.init_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store, data will not survive a restart");
                Arc::new(InMemoryStore::new())
            }
        };

        let gateway: SharedGateway = match config.gateway.provider {
            GatewayProvider::Chapa => {
                let chapa = ChapaClient::new(
                    config.chapa.clone(),
                    Duration::from_secs(config.gateway.timeout_seconds),
                )
                .map_err(|e| AppError::ConfigError(e.into()))?;
                if chapa.is_configured() {
                    tracing::info!("Chapa client initialized");
                } else {
                    tracing::warn!("Chapa secret key not configured - payments will fail");
                }
                Arc::new(chapa)
            }
            GatewayProvider::Mock => {
                tracing::warn!("Using mock payment gateway");
                Arc::new(MockGateway::new())
            }
        };

        let (queue, job_source): (SharedQueue, Arc<dyn JobSource>) =
            match config.notifications.queue {
                QueueBackend::Redis => {
                    let client =
                        redis::Client::open(config.notifications.redis_url.expose_secret().as_str())
                            .map_err(|e| {
                                tracing::error!("Failed to connect to Redis: {}", e);
                                AppError::InternalError(e.into())
                            })?;
                    let queue = RedisNotificationQueue::new(&client)
                        .await
                        .map_err(|e| AppError::InternalError(e.into()))?;
                    let source = RedisJobSource::new(&client)
                        .await
                        .map_err(|e| AppError::InternalError(e.into()))?;
                    (Arc::new(queue), Arc::new(source))
                }
                QueueBackend::Memory => {
                    let (queue, source) = channel_queue(config.notifications.queue_size);
                    (Arc::new(queue), Arc::new(source))
                }
            };

        let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
            let smtp = SmtpProvider::new(config.smtp.clone())
                .map_err(|e| AppError::ConfigError(e.into()))?;
            tracing::info!(host = %config.smtp.host, "SMTP provider initialized");
            Arc::new(smtp)
        } else {
            tracing::warn!("SMTP disabled, notification emails will only be logged");
            Arc::new(MockEmailProvider::new())
        };

        Ok(Self {
            store,
            gateway,
            queue,
            job_source,
            email,
        })
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    worker: Option<NotificationWorker>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BookingConfig) -> Result<Self, AppError> {
        let deps = Dependencies::from_config(&config).await?;
        Self::build_with(config, deps).await
    }

    pub async fn build_with(config: BookingConfig, deps: Dependencies) -> Result<Self, AppError> {
        let settings = WorkflowSettings {
            currency: config.payments.currency.clone(),
            public_base_url: config.payments.public_base_url.clone(),
            return_base_url: config.payments.return_base_url.clone(),
            callback_secret: config.payments.callback_signing_secret.clone(),
        };

        let workflow = BookingWorkflow::new(
            deps.store.clone(),
            deps.gateway.clone(),
            deps.queue.clone(),
            settings,
        );

        let state = AppState {
            store: deps.store,
            queue: deps.queue,
            workflow: Arc::new(workflow),
            gateway: deps.gateway,
            callback_signature_required: config.payments.callback_signature_required,
        };

        if config.notifications.worker_enabled {
            match deps.job_source.recover().await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(count, "Requeued notification jobs left unacknowledged");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Failed to requeue unacknowledged notification jobs"
                    );
                }
            }
        }

        let shutdown = CancellationToken::new();
        let worker = config.notifications.worker_enabled.then(|| {
            NotificationWorker::new(
                deps.job_source,
                deps.email,
                Duration::from_secs(config.notifications.max_retry_seconds),
                shutdown.clone(),
            )
        });
        if worker.is_none() {
            tracing::warn!("Notification worker disabled, jobs will accumulate on the queue");
        }

        // Bind HTTP listener (port 0 = random port for testing)
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Booking service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: router(state),
            worker,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until Ctrl-C, then stop the worker after the in-flight job.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let worker: Option<JoinHandle<()>> = self.worker.map(|w| tokio::spawn(w.run()));

        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutdown signal received");
                    }
                    _ = shutdown.cancelled() => {}
                }
            })
            .await;

        self.shutdown.cancel();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Notification worker panicked");
            }
        }

        result
    }

    /// Token that stops the server and worker when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        // Listings
        .route(
            "/listings",
            get(listings::list_listings).post(listings::create_listing),
        )
        .route("/listings/featured", get(listings::featured_listings))
        .route(
            "/listings/:slug",
            get(listings::get_listing).patch(listings::update_listing),
        )
        .route("/listings/:slug/amenities", post(listings::attach_amenity))
        // Amenities
        .route(
            "/amenities",
            get(amenities::list_amenities).post(amenities::create_amenity),
        )
        .route("/amenities/:id", get(amenities::get_amenity))
        // Bookings
        .route(
            "/bookings",
            get(bookings::list_my_bookings).post(bookings::create_booking),
        )
        .route("/bookings/upcoming", get(bookings::upcoming_bookings))
        .route(
            "/bookings/:id",
            get(bookings::get_booking).delete(bookings::delete_booking),
        )
        .route("/bookings/:id/payments", get(bookings::booking_payments))
        .route("/bookings/:id/pay", post(bookings::initiate_payment))
        // Payments
        .route("/payments/verify", get(payments::verify_payment))
        .route("/webhooks/chapa", post(payments::chapa_webhook))
        // Reviews
        .route(
            "/reviews",
            get(reviews::list_reviews).post(reviews::create_review),
        )
        .route("/reviews/mine", get(reviews::my_reviews))
        .route("/reviews/top-rated", get(reviews::top_rated_reviews))
        .route(
            "/reviews/:id",
            get(reviews::get_review)
                .patch(reviews::update_review)
                .delete(reviews::delete_review),
        )
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<axum::body::Body>))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
