use booking_service::config::{
    BookingConfig, ChapaConfig, GatewayConfig, GatewayProvider, NotificationConfig,
    PaymentsConfig, QueueBackend, SmtpConfig, StoreBackend, StoreConfig,
};
use booking_service::notifications::{channel_queue, JobSource, MockEmailProvider, SharedQueue};
use booking_service::services::{InMemoryStore, MockGateway};
use booking_service::startup::{Application, Dependencies};
use reqwest::{Client, RequestBuilder};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const CALLBACK_SECRET: &str = "test-callback-secret";
pub const STAFF_ID: &str = "staff-1";

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub gateway: Arc<MockGateway>,
    pub email: Arc<MockEmailProvider>,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn test_config(signature_required: bool) -> BookingConfig {
    BookingConfig {
        common: service_core::config::Config { port: 0 },
        service_name: "booking-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        store: StoreConfig {
            backend: StoreBackend::Memory,
            mongodb_uri: Secret::new(String::new()),
            mongodb_database: "unused".to_string(),
        },
        notifications: NotificationConfig {
            queue: QueueBackend::Memory,
            redis_url: Secret::new(String::new()),
            queue_size: 64,
            worker_enabled: true,
            max_retry_seconds: 1,
        },
        gateway: GatewayConfig {
            provider: GatewayProvider::Mock,
            timeout_seconds: 5,
        },
        chapa: ChapaConfig {
            secret_key: Secret::new(String::new()),
            webhook_secret: Secret::new(String::new()),
            api_base_url: "http://localhost:1".to_string(),
        },
        payments: PaymentsConfig {
            currency: "ETB".to_string(),
            public_base_url: "http://api.test".to_string(),
            return_base_url: "http://web.test".to_string(),
            callback_signing_secret: Secret::new(CALLBACK_SECRET.to_string()),
            callback_signature_required: signature_required,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@test".to_string(),
            from_name: "Test".to_string(),
            enabled: false,
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(false)).await
    }

    pub async fn spawn_with(config: BookingConfig) -> Self {
        let (queue, source) = channel_queue(config.notifications.queue_size);
        Self::spawn_with_queue(config, Arc::new(queue), Arc::new(source)).await
    }

    /// Spawn on a caller-supplied notification queue.
    pub async fn spawn_with_queue(
        config: BookingConfig,
        queue: SharedQueue,
        job_source: Arc<dyn JobSource>,
    ) -> Self {
        let gateway = Arc::new(MockGateway::new());
        let email = Arc::new(MockEmailProvider::new());

        let deps = Dependencies {
            store: Arc::new(InMemoryStore::new()),
            gateway: gateway.clone(),
            queue,
            job_source,
            email: email.clone(),
        };

        let app = Application::build_with(config, deps)
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.port());
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::new();
        for _ in 0..50 {
            if client.get(format!("{}/health", address)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            client,
            gateway,
            email,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Request carrying a regular user's identity headers.
    pub fn as_user(&self, builder: RequestBuilder, user_id: &str) -> RequestBuilder {
        builder
            .header("X-User-ID", user_id)
            .header("X-User-Email", format!("{}@example.com", user_id))
            .header("X-User-Name", "Sara Tesfaye")
    }

    pub fn as_staff(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-User-ID", STAFF_ID)
            .header("X-User-Roles", "staff")
    }

    pub async fn create_listing(&self, title: &str, price: &str, max_guests: u32) -> Value {
        let response = self
            .as_staff(self.client.post(self.url("/listings")))
            .json(&json!({
                "title": title,
                "description": "A quiet place",
                "listing_type": "villa",
                "price_per_night": price,
                "location": "Bishoftu",
                "address": "Lake road",
                "max_guests": max_guests,
                "bedrooms": 2,
                "bathrooms": 1
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse JSON")
    }

    pub async fn create_booking(&self, user_id: &str, listing_id: &str) -> Value {
        let response = self
            .as_user(self.client.post(self.url("/bookings")), user_id)
            .json(&json!({
                "listing_id": listing_id,
                "check_in_date": "2030-06-01",
                "check_out_date": "2030-06-04",
                "num_guests": 2
            }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse JSON")
    }

    /// Wait until the worker has sent `count` emails.
    pub async fn wait_for_emails(&self, count: u64) {
        for _ in 0..100 {
            if self.email.send_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
