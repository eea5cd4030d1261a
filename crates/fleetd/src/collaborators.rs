//! HTTP clients for the external collaborators.
//!
//! - Compute provisioner: `POST {endpoint}/instances` with `{"region": ..}`
//!   returning `{"handle": .., "address": ..}`, and
//!   `DELETE {endpoint}/instances/{handle}`.
//! - Telemetry: `GET http://{address}{path}` returning a
//!   [`TelemetrySample`] as JSON.
//!
//! Both speak plain HTTP/1.1 over a fresh connection per call. Callers
//! bound every call with their own timeout.

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tracing::debug;

use fleetgrid_lifecycle::{DeprovisionFuture, ProvisionFuture, ProvisionedInstance, Provisioner};
use fleetgrid_metrics::{SampleFuture, TelemetrySample, TelemetrySource};
use fleetgrid_state::Instance;

/// Issue one request and collect the full response body.
async fn http_call(
    authority: &str,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
) -> Result<(StatusCode, Bytes), String> {
    let uri = format!("http://{authority}{path}");

    let stream = tokio::net::TcpStream::connect(authority)
        .await
        .map_err(|e| format!("connect {authority}: {e}"))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| format!("handshake {authority}: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(&uri)
        .header("host", authority)
        .header("user-agent", "fleetd/0.1");
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = builder
        .body(Full::new(Bytes::from(body.unwrap_or_default())))
        .map_err(|e| format!("build request {uri}: {e}"))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| format!("{uri}: {e}"))?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("read body {uri}: {e}"))?
        .to_bytes();
    debug!(%uri, %status, len = bytes.len(), "collaborator call");
    Ok((status, bytes))
}

#[derive(Debug, Deserialize)]
struct ProvisionResponse {
    handle: String,
    #[serde(default)]
    address: Option<String>,
}

/// Compute provisioner reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    endpoint: String,
}

impl HttpProvisioner {
    /// `endpoint` is the provisioner's `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Provisioner for HttpProvisioner {
    fn provision<'a>(&'a self, region: &'a str) -> ProvisionFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_vec(&serde_json::json!({ "region": region }))
                .map_err(|e| e.to_string())?;
            let (status, bytes) =
                http_call(&self.endpoint, Method::POST, "/instances", Some(body)).await?;
            if !status.is_success() {
                return Err(format!(
                    "provisioner returned {status}: {}",
                    String::from_utf8_lossy(&bytes)
                ));
            }
            let resp: ProvisionResponse = serde_json::from_slice(&bytes)
                .map_err(|e| format!("invalid provisioner response: {e}"))?;
            Ok(ProvisionedInstance {
                handle: resp.handle,
                address: resp.address,
            })
        })
    }

    fn deprovision<'a>(&'a self, handle: &'a str) -> DeprovisionFuture<'a> {
        Box::pin(async move {
            let path = format!("/instances/{handle}");
            let (status, _) = http_call(&self.endpoint, Method::DELETE, &path, None).await?;
            // Already gone counts as released.
            if status.is_success() || status == StatusCode::NOT_FOUND {
                Ok(())
            } else {
                Err(format!("provisioner returned {status}"))
            }
        })
    }
}

/// Telemetry pulled from each instance's own endpoint.
#[derive(Debug, Clone)]
pub struct HttpTelemetry {
    path: String,
}

impl HttpTelemetry {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl TelemetrySource for HttpTelemetry {
    fn sample<'a>(&'a self, instance: &'a Instance) -> SampleFuture<'a> {
        Box::pin(async move {
            let address = instance
                .address
                .as_deref()
                .ok_or_else(|| "instance has no address".to_string())?;
            let (status, bytes) = http_call(address, Method::GET, &self.path, None).await?;
            if !status.is_success() {
                return Err(format!("telemetry endpoint returned {status}"));
            }
            serde_json::from_slice(&bytes).map_err(|e| format!("invalid telemetry sample: {e}"))
        })
    }
}
