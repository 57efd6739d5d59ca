//! Ticket verification over HTTP
//!
//! One POST per call, no retry. Every failure mode collapses into
//! `VerificationOutcome::Failure`; the reason only reaches the log.

use crate::domain::{TicketReference, TravelInfo, VerificationOutcome};
use crate::infra::config::Config;
use crate::io::http::ServiceEndpoint;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

pub const VERIFY_ENDPOINT: &str = "verify-ticket";

/// Asks the remote service whether a ticket is valid
#[async_trait]
pub trait VerificationClient: Send + Sync {
    async fn verify(&self, reference: &TicketReference) -> VerificationOutcome;
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("service answered {0}")]
    Status(u16),
    #[error("unusable response body: {0}")]
    Body(String),
    #[error("no answer within {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    travel: Option<TravelInfo>,
}

pub struct HttpVerificationClient {
    endpoint: ServiceEndpoint,
    client: reqwest::Client,
}

impl HttpVerificationClient {
    pub fn new(endpoint: ServiceEndpoint) -> reqwest::Result<Self> {
        let client = endpoint.build_client()?;
        Ok(Self { endpoint, client })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(ServiceEndpoint::from_config(config))
    }

    fn transport_error(&self, e: reqwest::Error) -> VerifyError {
        if e.is_timeout() {
            VerifyError::Timeout(self.endpoint.timeout().as_millis() as u64)
        } else {
            VerifyError::Network(e)
        }
    }

    async fn request(&self, reference: &TicketReference) -> Result<TravelInfo, VerifyError> {
        let request = self.client.post(self.endpoint.url(VERIFY_ENDPOINT)).json(reference);
        let response =
            self.endpoint.authorize(request).send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let body: VerifyResponse =
            serde_json::from_slice(&bytes).map_err(|e| VerifyError::Body(e.to_string()))?;
        body.travel.ok_or_else(|| VerifyError::Body("missing travel".to_string()))
    }
}

#[async_trait]
impl VerificationClient for HttpVerificationClient {
    async fn verify(&self, reference: &TicketReference) -> VerificationOutcome {
        let start = Instant::now();
        match self.request(reference).await {
            Ok(travel) => {
                info!(
                    uniq_id = %reference,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "ticket_verified"
                );
                VerificationOutcome::Success { travel }
            }
            Err(e) => {
                let status = match &e {
                    VerifyError::Status(code) => *code,
                    _ => 0,
                };
                warn!(
                    uniq_id = %reference,
                    latency_ms = start.elapsed().as_millis() as u64,
                    status = status,
                    error = %e,
                    "ticket_verification_failed"
                );
                VerificationOutcome::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::interpret;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// What the service saw of one request
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        authorization: Option<String>,
        body: String,
    }

    /// Serve a canned answer to every request and record what arrived
    async fn canned_service(status: StatusCode, body: &'static str) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let log = log.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let log = log.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let authorization = req
                                .headers()
                                .get(hyper::header::AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let bytes = req.into_body().collect().await.unwrap().to_bytes();
                            let request_body = String::from_utf8_lossy(&bytes).to_string();
                            log.lock().push(Seen { method, path, authorization, body: request_body });

                            let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn client(url: &str) -> HttpVerificationClient {
        HttpVerificationClient::new(ServiceEndpoint::new(url, Duration::from_secs(2))).unwrap()
    }

    #[tokio::test]
    async fn test_success_with_travel() {
        let body = r#"{"travel":{"from":"Chisinau","to":"Iasi","date":"2024-05-01T00:00:00Z","name":"Ion","surname":"Pop"}}"#;
        let (url, seen) = canned_service(StatusCode::OK, body).await;

        let reference = interpret(r#"{"uniq_id":"T-1"}"#).unwrap();
        let outcome = client(&url).verify(&reference).await;

        match outcome {
            VerificationOutcome::Success { travel } => {
                assert_eq!(travel.from, "Chisinau");
                assert_eq!(travel.surname, "Pop");
            }
            VerificationOutcome::Failure => panic!("expected success"),
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/verify-ticket");
        assert_eq!(seen[0].body, r#"{"uniq_id":"T-1"}"#);
        assert!(seen[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_padded_id_sent_unchanged() {
        let (url, seen) = canned_service(StatusCode::NOT_FOUND, "").await;
        let reference = interpret(r#"{"uniq_id":" T-1 "}"#).unwrap();
        client(&url).verify(&reference).await;
        assert_eq!(seen.lock()[0].body, r#"{"uniq_id":" T-1 "}"#);
    }

    #[tokio::test]
    async fn test_success_status_without_travel_is_failure() {
        let (url, _seen) = canned_service(StatusCode::OK, "{}").await;
        let reference = interpret(r#"{"uniq_id":"T-1"}"#).unwrap();
        assert_eq!(client(&url).verify(&reference).await, VerificationOutcome::Failure);
    }

    #[tokio::test]
    async fn test_not_found_is_failure_without_retry() {
        let (url, seen) = canned_service(StatusCode::NOT_FOUND, "").await;
        let reference = interpret(r#"{"uniq_id":"T-9"}"#).unwrap();
        assert_eq!(client(&url).verify(&reference).await, VerificationOutcome::Failure);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reference = interpret(r#"{"uniq_id":"T-1"}"#).unwrap();
        let outcome = client(&format!("http://{}", addr)).verify(&reference).await;
        assert_eq!(outcome, VerificationOutcome::Failure);
    }

    #[tokio::test]
    async fn test_basic_auth_is_sent() {
        let (url, seen) = canned_service(StatusCode::NOT_FOUND, "").await;
        let with_auth = url.replace("http://", "http://scanner:pw@");
        let reference = interpret(r#"{"uniq_id":"T-1"}"#).unwrap();
        client(&with_auth).verify(&reference).await;

        // base64("scanner:pw")
        assert_eq!(seen.lock()[0].authorization.as_deref(), Some("Basic c2Nhbm5lcjpwdw=="));
    }
}
