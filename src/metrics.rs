//! Prometheus metrics for the deposit relayer
//!
//! Exposes metrics on the /metrics endpoint for Prometheus scraping.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Gauge, HistogramVec,
};

lazy_static! {
    // Chain scanning metrics
    pub static ref LATEST_BLOCK: Gauge = register_gauge!(
        "relayer_latest_block",
        "Latest block number polled"
    ).unwrap();

    pub static ref KNOWN_CONTRACTS: Gauge = register_gauge!(
        "relayer_known_contracts",
        "Number of deposit contracts currently tracked"
    ).unwrap();

    pub static ref CONTRACTS_DISCOVERED: Counter = register_counter!(
        "relayer_contracts_discovered_total",
        "Total number of deposit contracts discovered"
    ).unwrap();

    pub static ref DEPOSITS_DETECTED: Counter = register_counter!(
        "relayer_deposits_detected_total",
        "Total number of deposit events detected"
    ).unwrap();

    // Relay job metrics
    pub static ref JOB_TRANSITIONS: CounterVec = register_counter_vec!(
        "relayer_job_transitions_total",
        "Total relay job state transitions",
        &["status"]
    ).unwrap();

    pub static ref JOBS_COMPLETED: CounterVec = register_counter_vec!(
        "relayer_jobs_completed_total",
        "Total relay jobs reaching a terminal state",
        &["outcome"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_relay_latency_seconds",
        "Time from deposit detection to terminal state",
        &["outcome"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    pub static ref STATUS_POLLS: Counter = register_counter!(
        "relayer_engine_status_polls_total",
        "Total transfer engine status queries"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["component"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: Gauge = register_gauge!(
        "relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll"
    ).unwrap();
}

/// Record a completed poll tick
pub fn record_poll(block_number: u64) {
    use std::time::{SystemTime, UNIX_EPOCH};
    LATEST_BLOCK.set(block_number as f64);
    if let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) {
        LAST_SUCCESSFUL_POLL.set(elapsed.as_secs_f64());
    }
}

/// Record a newly discovered deposit contract
pub fn record_contract_discovered() {
    CONTRACTS_DISCOVERED.inc();
}

/// Update the tracked contract count
pub fn set_known_contracts(count: usize) {
    KNOWN_CONTRACTS.set(count as f64);
}

/// Record a deposit detected
pub fn record_deposit_detected() {
    DEPOSITS_DETECTED.inc();
}

/// Record a relay job state transition
pub fn record_job_transition(status: &str) {
    JOB_TRANSITIONS.with_label_values(&[status]).inc();
}

/// Record a relay job reaching a terminal state
pub fn record_job_outcome(outcome: &str, seconds: f64) {
    JOBS_COMPLETED.with_label_values(&[outcome]).inc();
    RELAY_LATENCY.with_label_values(&[outcome]).observe(seconds);
}

/// Record a transfer engine status query
pub fn record_status_poll() {
    STATUS_POLLS.inc();
}

/// Record an error
pub fn record_error(component: &str) {
    ERRORS.with_label_values(&[component]).inc();
}

/// Mark the relayer up or down
pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}
