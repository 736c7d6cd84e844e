use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "aulas_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "aulas_query_duration_seconds";

/// Counter: admission decisions. Labels: operation (create/update), outcome.
pub const ADMISSIONS_TOTAL: &str = "aulas_admissions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "aulas_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "aulas_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "aulas_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "aulas_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "aulas_wal_flush_batch_size";

/// Counter: background WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "aulas_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom(_) => "insert_room",
        Command::InsertSlot(_) => "insert_slot",
        Command::InsertUser(_) => "insert_user",
        Command::InsertReservation(_) => "insert_reservation",
        Command::UpdateRoom { .. } => "update_room",
        Command::UpdateSlot { .. } => "update_slot",
        Command::UpdateUser { .. } => "update_user",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteRoom { .. } => "delete_room",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::DeleteUser { .. } => "delete_user",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectUsers { .. } => "select_users",
        Command::SelectReservations { .. } => "select_reservations",
    }
}
