//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Session Metrics
    pub static ref SESSIONS_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("docgate_sessions_created_total", "Total number of sessions created"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref SESSIONS_REVOKED_TOTAL: IntCounter = IntCounter::new(
        "docgate_sessions_revoked_total",
        "Total number of sessions revoked explicitly"
    ).expect("metric can be created");
    pub static ref SESSIONS_EXPIRED_TOTAL: IntCounter = IntCounter::new(
        "docgate_sessions_expired_total",
        "Total number of sessions removed after expiry"
    ).expect("metric can be created");
    pub static ref SESSIONS_ACTIVE: IntGauge = IntGauge::new(
        "docgate_sessions_active",
        "Current number of stored sessions"
    ).expect("metric can be created");

    // OAuth Metrics
    pub static ref OAUTH_STATES_PENDING: IntGauge = IntGauge::new(
        "docgate_oauth_states_pending",
        "Current number of unconsumed OAuth handshake states"
    ).expect("metric can be created");
    pub static ref UPSTREAM_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("docgate_upstream_requests_total", "Total number of identity provider calls"),
        &["operation", "outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("docgate_errors_total", "Total number of error responses"),
        &["reason"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(register_metrics);
}

fn register_metrics() {
    REGISTRY
        .register(Box::new(SESSIONS_CREATED_TOTAL.clone()))
        .expect("SESSIONS_CREATED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_REVOKED_TOTAL.clone()))
        .expect("SESSIONS_REVOKED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_EXPIRED_TOTAL.clone()))
        .expect("SESSIONS_EXPIRED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_ACTIVE.clone()))
        .expect("SESSIONS_ACTIVE can be registered");
    REGISTRY
        .register(Box::new(OAUTH_STATES_PENDING.clone()))
        .expect("OAUTH_STATES_PENDING can be registered");
    REGISTRY
        .register(Box::new(UPSTREAM_REQUESTS_TOTAL.clone()))
        .expect("UPSTREAM_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record the outcome of an identity provider call.
pub fn record_upstream(operation: &str, ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    UPSTREAM_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}
