//! Metrics and observability module
//!
//! Provides Prometheus-compatible metrics for monitoring a relay node.
//!
//! Key metrics exposed:
//! - Intake outcomes (accepted, duplicate, expired, forwarded)
//! - Delivery attempts by result
//! - Presence announcements by result
//! - Outbox depth and known routes

pub mod exporter;
pub mod recorder;

pub use exporter::{metrics_route, render_metrics, start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::{
    init_metrics, record_delivery, record_intake, record_presence, set_outbox_pending,
    set_routes_known, DeliveryResult,
};
