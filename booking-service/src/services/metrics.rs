use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    metrics::describe_counter!("bookings_created_total", "Bookings created");
    metrics::describe_counter!(
        "payments_initiated_total",
        "Payment initiations by outcome"
    );
    metrics::describe_counter!(
        "payments_verified_total",
        "Payment verifications by outcome"
    );
    metrics::describe_counter!(
        "notifications_enqueued_total",
        "Notification jobs enqueued by kind"
    );
    metrics::describe_counter!(
        "notifications_enqueue_failed_total",
        "Notification jobs that could not be enqueued"
    );
    metrics::describe_counter!(
        "notifications_delivered_total",
        "Notification emails delivered by kind"
    );
    metrics::describe_counter!(
        "notifications_failed_total",
        "Notification emails abandoned after retries by kind"
    );
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_booking_created() {
    metrics::counter!("bookings_created_total").increment(1);
}

pub fn record_payment_initiated(outcome: &'static str) {
    metrics::counter!("payments_initiated_total", "outcome" => outcome).increment(1);
}

pub fn record_payment_verified(outcome: &'static str) {
    metrics::counter!("payments_verified_total", "outcome" => outcome).increment(1);
}

pub fn record_notification_enqueued(kind: &'static str) {
    metrics::counter!("notifications_enqueued_total", "kind" => kind).increment(1);
}

pub fn record_notification_enqueue_failed() {
    metrics::counter!("notifications_enqueue_failed_total").increment(1);
}

pub fn record_notification_delivered(kind: &'static str) {
    metrics::counter!("notifications_delivered_total", "kind" => kind).increment(1);
}

pub fn record_notification_failed(kind: &'static str) {
    metrics::counter!("notifications_failed_total", "kind" => kind).increment(1);
}
