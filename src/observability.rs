use std::net::SocketAddr;

use crate::booking::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "apptd_bookings_total";

/// Histogram: handler latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "apptd_request_duration_seconds";

/// Counter: rejected credentials. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "apptd_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: appointments held by the store, any status.
pub const APPOINTMENTS_ACTIVE: &str = "apptd_appointments_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "apptd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "apptd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for the outcome of a booking attempt.
pub fn booking_outcome<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(BookingError::Validation(e)) => e.code(),
        Err(BookingError::Conflict { .. }) => "conflict",
        Err(BookingError::Capacity(_)) => "capacity",
        Err(BookingError::Storage(_)) => "storage_error",
    }
}
