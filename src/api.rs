//! Health & Status API endpoints
//!
//! Provides HTTP endpoints for monitoring and status:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Uptime, chain sync position, job counts

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::metrics;

/// Live relayer state shared between the poller and the API server.
pub struct StatusShared {
    started: Instant,
    last_polled_block: AtomicU64,
    known_contracts: AtomicU64,
    jobs_dispatched: AtomicU64,
    jobs_in_flight: AtomicU64,
}

impl StatusShared {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_polled_block: AtomicU64::new(0),
            known_contracts: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            jobs_in_flight: AtomicU64::new(0),
        }
    }

    pub fn record_poll(&self, block_number: u64, known_contracts: usize, jobs_in_flight: usize) {
        self.last_polled_block.store(block_number, Ordering::Relaxed);
        self.known_contracts
            .store(known_contracts as u64, Ordering::Relaxed);
        self.jobs_in_flight
            .store(jobs_in_flight as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for StatusShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Status response
#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    last_polled_block: u64,
    known_contracts: u64,
    jobs_dispatched: u64,
    jobs_in_flight: u64,
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, status: Arc<StatusShared>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    metrics::set_up(true);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let status = status.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);

            if request.contains("GET /metrics") {
                // Prometheus metrics
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                let _ = encoder.encode(&metric_families, &mut buffer);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                    buffer.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&buffer).await;
            } else if request.contains("GET /health") {
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /status") {
                let body = serde_json::to_string(&build_status_response(&status))
                    .unwrap_or_else(|_| "{}".to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

fn build_status_response(status: &StatusShared) -> StatusResponse {
    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: status.started.elapsed().as_secs(),
        last_polled_block: status.last_polled_block.load(Ordering::Relaxed),
        known_contracts: status.known_contracts.load(Ordering::Relaxed),
        jobs_dispatched: status.jobs_dispatched.load(Ordering::Relaxed),
        jobs_in_flight: status.jobs_in_flight.load(Ordering::Relaxed),
    }
}
