use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_flag};
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Chapa,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub notifications: NotificationConfig,
    pub gateway: GatewayConfig,
    pub chapa: ChapaConfig,
    pub payments: PaymentsConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mongodb_uri: Secret<String>,
    pub mongodb_database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub queue: QueueBackend,
    pub redis_url: Secret<String>,
    pub queue_size: usize,
    pub worker_enabled: bool,
    pub max_retry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub provider: GatewayProvider,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapaConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub currency: String,
    /// Base URL the gateway calls back on, e.g. `https://api.example.com`.
    pub public_base_url: String,
    /// Base URL of the frontend the payer is sent back to.
    pub return_base_url: String,
    pub callback_signing_secret: Secret<String>,
    pub callback_signature_required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

fn parse_choice<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T, AppError> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase())).map_err(|_| {
        AppError::ConfigError(anyhow::anyhow!("{} has unsupported value '{}'", key, value))
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} must be a number", key)))
}

impl BookingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_production();

        let store_backend = get_env("STORE_BACKEND", Some("mongo"), is_prod)?;
        let queue_backend = get_env("NOTIFICATION_QUEUE", Some("redis"), is_prod)?;
        let provider = get_env("GATEWAY_PROVIDER", Some("chapa"), is_prod)?;

        Ok(BookingConfig {
            common,
            service_name: "booking-service".to_string(),
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            store: StoreConfig {
                backend: parse_choice("STORE_BACKEND", &store_backend)?,
                mongodb_uri: Secret::new(get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                mongodb_database: get_env("MONGODB_DATABASE", Some("booking_db"), is_prod)?,
            },
            notifications: NotificationConfig {
                queue: parse_choice("NOTIFICATION_QUEUE", &queue_backend)?,
                redis_url: Secret::new(get_env(
                    "REDIS_URL",
                    Some("redis://localhost:6379"),
                    is_prod,
                )?),
                queue_size: parse_number(
                    "NOTIFICATION_QUEUE_SIZE",
                    &get_env("NOTIFICATION_QUEUE_SIZE", Some("1024"), false)?,
                )?,
                worker_enabled: get_flag("NOTIFICATION_WORKER_ENABLED", true),
                max_retry_seconds: parse_number(
                    "NOTIFICATION_MAX_RETRY_SECONDS",
                    &get_env("NOTIFICATION_MAX_RETRY_SECONDS", Some("300"), false)?,
                )?,
            },
            gateway: GatewayConfig {
                provider: parse_choice("GATEWAY_PROVIDER", &provider)?,
                timeout_seconds: parse_number(
                    "GATEWAY_TIMEOUT_SECONDS",
                    &get_env("GATEWAY_TIMEOUT_SECONDS", Some("30"), false)?,
                )?,
            },
            chapa: ChapaConfig {
                secret_key: Secret::new(get_env("CHAPA_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env("CHAPA_WEBHOOK_SECRET", Some(""), is_prod)?),
                api_base_url: get_env(
                    "CHAPA_API_BASE_URL",
                    Some("https://api.chapa.co/v1"),
                    false,
                )?,
            },
            payments: PaymentsConfig {
                currency: get_env("PAYMENT_CURRENCY", Some("ETB"), false)?,
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    Some("http://localhost:8080"),
                    is_prod,
                )?,
                return_base_url: get_env(
                    "RETURN_BASE_URL",
                    Some("http://localhost:3000"),
                    is_prod,
                )?,
                callback_signing_secret: Secret::new(get_env(
                    "CALLBACK_SIGNING_SECRET",
                    Some("dev-callback-secret"),
                    is_prod,
                )?),
                callback_signature_required: get_flag("CALLBACK_SIGNATURE_REQUIRED", is_prod),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), false)?,
                port: parse_number("SMTP_PORT", &get_env("SMTP_PORT", Some("587"), false)?)?,
                user: get_env("SMTP_USER", Some(""), false)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), false)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), false)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Travel Bookings"), false)?,
                enabled: get_flag("SMTP_ENABLED", false),
            },
        })
    }
}
