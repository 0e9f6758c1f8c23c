//! Metrics collection and export for Tandem.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Matchmaking counters are recorded by
//! `tandem-core`; this module describes them and owns the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tandem_core::{LobbyStats, ManagerHandle};
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tandem_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tandem_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "tandem_connections_rejected_total";
    pub const MESSAGES_TOTAL: &str = "tandem_messages_total";
    pub const MESSAGES_BYTES: &str = "tandem_messages_bytes";
    pub const LATENCY_SECONDS: &str = "tandem_latency_seconds";
    pub const ERRORS_TOTAL: &str = "tandem_errors_total";

    pub const MATCHES_TOTAL: &str = "tandem_matches_total";
    pub const MATCHES_ACTIVE: &str = "tandem_matches_active";
    pub const QUEUE_LENGTH: &str = "tandem_queue_length";
    pub const BROWSING_USERS: &str = "tandem_browsing_users";
    pub const PENDING_REQUESTS: &str = "tandem_pending_requests";
    pub const MATCH_REQUESTS_TOTAL: &str = "tandem_match_requests_total";
    pub const RELAYED_TOTAL: &str = "tandem_relayed_messages_total";
    pub const RELAY_DROPPED_TOTAL: &str = "tandem_relay_dropped_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades refused because the connection limit was reached"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    metrics::describe_counter!(names::MATCHES_TOTAL, "Pairings created, by origin");
    metrics::describe_gauge!(names::MATCHES_ACTIVE, "Current number of active pairings");
    metrics::describe_gauge!(names::QUEUE_LENGTH, "Sessions waiting in the matchmaking queue");
    metrics::describe_gauge!(names::BROWSING_USERS, "Sessions browsing the lobby");
    metrics::describe_gauge!(names::PENDING_REQUESTS, "Unanswered match requests");
    metrics::describe_counter!(
        names::MATCH_REQUESTS_TOTAL,
        "Match requests, by outcome"
    );
    metrics::describe_counter!(names::RELAYED_TOTAL, "Signals forwarded to a partner, by kind");
    metrics::describe_counter!(
        names::RELAY_DROPPED_TOTAL,
        "Signals dropped without a deliverable partner, by reason"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an upgrade refused at the connection limit.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish lobby gauges.
pub fn record_lobby(stats: &LobbyStats) {
    gauge!(names::MATCHES_ACTIVE).set(stats.active_matches as f64);
    gauge!(names::QUEUE_LENGTH).set(stats.waiting_queue as f64);
    gauge!(names::BROWSING_USERS).set(stats.browsing_users as f64);
    gauge!(names::PENDING_REQUESTS).set(stats.pending_requests as f64);
}

/// Refresh lobby gauges from the session manager until it stops.
pub async fn run_lobby_gauges(manager: ManagerHandle, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match manager.stats().await {
            Ok(stats) => record_lobby(&stats),
            Err(e) => {
                debug!(error = %e, "Stopping lobby gauge refresh");
                break;
            }
        }
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{LobbyConfig, SessionManager};

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic.
        let _guard = ConnectionMetricsGuard::new();
        record_lobby(&LobbyStats::default());
    }

    #[tokio::test]
    async fn test_gauge_refresh_stops_with_manager() {
        let (manager, task) = SessionManager::spawn(LobbyConfig::default(), 4);
        let refresh = tokio::spawn(run_lobby_gauges(manager.clone(), Duration::from_millis(5)));

        drop(manager);
        refresh.abort();
        let _ = refresh.await;
        task.await.unwrap();
    }
}
