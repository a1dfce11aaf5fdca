use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tandem_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tandem_query_duration_seconds";

// ── Booking workflow ────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "tandem_bookings_created_total";

/// Counter: booking requests that found the slot taken or missing.
pub const BOOKINGS_REJECTED_TOTAL: &str = "tandem_bookings_rejected_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "tandem_bookings_cancelled_total";

/// Counter: meetings not created or not deleted. Labels: reason.
pub const CALENDAR_SOFT_FAILURES_TOTAL: &str = "tandem_calendar_soft_failures_total";

/// Counter: notifications the sink refused. Labels: kind.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "tandem_notifications_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "tandem_connections_active";

pub const CONNECTIONS_TOTAL: &str = "tandem_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tandem_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "tandem_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tandem_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "tandem_wal_flush_batch_size";

/// Counter: background WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "tandem_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when unset.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on query metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SetAvailability { .. } => "set_availability",
        Command::ClearAvailability { .. } => "clear_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectDay { .. } => "select_day",
        Command::SelectAvailableDates { .. } => "select_available_dates",
        Command::InsertBooking(_) => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::ConnectCalendar { .. } => "connect_calendar",
        Command::DisconnectCalendar { .. } => "disconnect_calendar",
        Command::SelectNotifications { .. } => "select_notifications",
        Command::MarkNotificationRead { .. } => "mark_notification_read",
    }
}
