//! Health check probe logic.
//!
//! Performs HTTP health checks against instance addresses and tracks
//! consecutive failures per instance.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use fleetgrid_state::{HealthStatus, Instance};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Tracks consecutive probe results for a single instance.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    /// Failures needed before marking unhealthy.
    unhealthy_threshold: u32,
}

impl HealthTracker {
    /// New instances start out healthy.
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        match result {
            ProbeResult::Healthy => {
                if self.status != HealthStatus::Healthy {
                    debug!(
                        failures = self.consecutive_failures,
                        "instance recovered to healthy"
                    );
                }
                self.consecutive_failures = 0;
                self.status = HealthStatus::Healthy;
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_failures += 1;

                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status != HealthStatus::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "instance marked unhealthy"
                        );
                    }
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    #[cfg(test)]
    fn status(&self) -> HealthStatus {
        self.status
    }

    #[cfg(test)]
    fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether this instance needs replacement (unhealthy).
    #[cfg(test)]
    fn needs_replacement(&self) -> bool {
        self.status == HealthStatus::Unhealthy
    }
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;

/// Something that can check one instance.
///
/// Implementations need not enforce a timeout; the checker bounds every
/// probe with `health_check_timeout`.
pub trait Prober: Send + Sync {
    fn probe<'a>(&'a self, instance: &'a Instance, timeout: Duration) -> ProbeFuture<'a>;
}

/// Probes `GET http://{address}{path}` and expects a 2xx.
#[derive(Debug, Clone)]
pub struct HttpProber {
    path: String,
}

impl HttpProber {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Prober for HttpProber {
    fn probe<'a>(&'a self, instance: &'a Instance, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            match instance.address.as_deref() {
                Some(address) => http_probe(address, &self.path, timeout).await,
                None => {
                    debug!(instance = %instance.id, "no address to probe");
                    ProbeResult::Failed
                }
            }
        })
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "fleetgrid-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "invalid health probe request");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeResult::Healthy
                } else {
                    debug!(status = %resp.status(), %uri, "health probe non-2xx");
                    ProbeResult::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}
