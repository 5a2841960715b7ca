use std::net::SocketAddr;

// ── Write-path metrics ──────────────────────────────────────────

/// Counter: reservations written by committed transactions. Labels: op.
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "kennel_reservations_committed_total";

/// Counter: writes rejected because the interval overlapped. Labels: field.
pub const OVERLAPS_REJECTED_TOTAL: &str = "kennel_overlaps_rejected_total";

/// Counter: transaction attempts retried after a transient error.
pub const TXN_RETRIES_TOTAL: &str = "kennel_txn_retries_total";

/// Counter: transactions that failed after every attempt.
pub const TXN_RETRIES_EXHAUSTED_TOTAL: &str = "kennel_txn_retries_exhausted_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kennel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "kennel_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "kennel_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber for hosts that have none. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_disabled_without_port() {
        init_tracing();
        init_tracing();
        assert!(init(None).is_ok());
    }
}
