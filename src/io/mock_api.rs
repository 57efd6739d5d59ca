//! In-memory stand-in for the ticketing REST service
//!
//! Serves the verification and reservation endpoints over hyper http1.
//! A ticket verified successfully once is marked used and answered with 409
//! afterwards, so a duplicate verification is visible to tests.

use crate::domain::reservation::calendar_day;
use crate::domain::{PassengerKind, Reservation, Routes, TravelInfo};
use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
struct TicketRecord {
    travel: TravelInfo,
    used: bool,
}

#[derive(Debug, Default)]
struct MockState {
    tickets: HashMap<String, TicketRecord>,
    reservations: Vec<Reservation>,
    routes: Routes,
    prices: HashMap<(String, String), f64>,
    stopped_days: BTreeSet<NaiveDate>,
    verify_calls: usize,
}

#[derive(Deserialize)]
struct VerifyRequest {
    uniq_id: String,
}

#[derive(Deserialize)]
struct DateRequest {
    date: String,
}

#[derive(Deserialize)]
struct PriceRequest {
    from: String,
    to: String,
    #[serde(default)]
    passengers: Vec<PassengerKind>,
}

#[derive(Deserialize)]
struct UpdatePriceRequest {
    from: String,
    to: String,
    price: f64,
}

/// Shared handle to the mock service state
#[derive(Clone, Default)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

fn travel(from: &str, to: &str, date: &str, name: &str, surname: &str) -> TravelInfo {
    TravelInfo {
        from: from.to_string(),
        to: to.to_string(),
        date: date.to_string(),
        name: name.to_string(),
        surname: surname.to_string(),
    }
}

fn reservation(name: &str, surname: &str, from: &str, to: &str, date: &str) -> Reservation {
    Reservation {
        trip_type: "one-way".to_string(),
        from: from.to_string(),
        from_station: format!("Autogara {}", from),
        departure_time: "08:00".to_string(),
        to: to.to_string(),
        to_station: format!("Autogara {}", to),
        arrival_time: "13:30".to_string(),
        date: date.to_string(),
        name: name.to_string(),
        surname: surname.to_string(),
        phone: "+37360000000".to_string(),
        email: format!("{}.{}@example.com", name.to_lowercase(), surname.to_lowercase()),
        passport_serial: String::new(),
        is_student: false,
        student_id_serial: String::new(),
    }
}

impl MockApi {
    /// Empty service: no tickets, routes or reservations
    pub fn new() -> Self {
        Self::default()
    }

    /// Service seeded with a few tickets, routes and reservations
    pub fn with_fixtures() -> Self {
        let api = Self::new();
        api.add_ticket("T-1", travel("Chisinau", "Iasi", "2024-05-01T00:00:00Z", "Ion", "Pop"));
        api.add_ticket(
            "T-2",
            travel("Iasi", "Chisinau", "2024-05-03T00:00:00Z", "Maria", "Rusu"),
        );
        api.add_ticket(
            "T-3",
            travel("Chisinau", "Bucuresti", "2024-05-01T00:00:00Z", "Andrei", "Ceban"),
        );

        {
            let mut state = api.state.lock();
            state.routes.insert(
                "Chisinau".to_string(),
                vec!["Iasi".to_string(), "Bucuresti".to_string()],
            );
            state.routes.insert("Iasi".to_string(), vec!["Chisinau".to_string()]);
            state.routes.insert("Bucuresti".to_string(), vec!["Chisinau".to_string()]);

            state.prices.insert(("Chisinau".to_string(), "Iasi".to_string()), 250.0);
            state.prices.insert(("Iasi".to_string(), "Chisinau".to_string()), 250.0);
            state.prices.insert(("Chisinau".to_string(), "Bucuresti".to_string()), 600.0);

            state.reservations = vec![
                reservation("Ion", "Pop", "Chisinau", "Iasi", "2024-05-01T00:00:00.000Z"),
                reservation("Andrei", "Ceban", "Chisinau", "Bucuresti", "2024-05-01T00:00:00.000Z"),
                reservation("Maria", "Rusu", "Iasi", "Chisinau", "2024-05-03T00:00:00.000Z"),
            ];
        }
        api
    }

    pub fn add_ticket(&self, uniq_id: &str, travel: TravelInfo) {
        self.state
            .lock()
            .tickets
            .insert(uniq_id.to_string(), TicketRecord { travel, used: false });
    }

    /// Number of verification requests received so far
    pub fn verify_calls(&self) -> usize {
        self.state.lock().verify_calls
    }

    pub fn is_used(&self, uniq_id: &str) -> bool {
        self.state.lock().tickets.get(uniq_id).is_some_and(|t| t.used)
    }

    pub fn price_of(&self, from: &str, to: &str) -> Option<f64> {
        self.state.lock().prices.get(&(from.to_string(), to.to_string())).copied()
    }

    pub fn is_stopped(&self, day: NaiveDate) -> bool {
        self.state.lock().stopped_days.contains(&day)
    }

    /// Accept connections on `listener` until `shutdown` turns true or its sender is dropped
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "mock_api_started");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _peer)) => {
                            let io = TokioIo::new(stream);
                            let api = self.clone();

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let api = api.clone();
                                    async move { api.handle(req).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    error!(error = %e, "mock_api_http_error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "mock_api_accept_error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(addr = %addr, "mock_api_shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Bind an ephemeral localhost port and serve in the background
    pub async fn spawn(&self) -> std::io::Result<MockServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let api = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = api.serve(listener, shutdown_rx).await {
                error!(error = %e, "mock_api_failed");
            }
        });
        Ok(MockServer { addr, shutdown_tx, handle })
    }

    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(path = %path, error = %e, "mock_api_body_error");
                return Ok(respond(StatusCode::BAD_REQUEST, json!({"error": "unreadable body"})));
            }
        };

        let response = match (&method, path.as_str()) {
            (&Method::POST, "/verify-ticket") => self.verify_ticket(&body),
            (&Method::GET, "/reservations") => {
                let state = self.state.lock();
                respond(StatusCode::OK, json!(state.reservations))
            }
            (&Method::GET, "/get-routes") => {
                let state = self.state.lock();
                respond(StatusCode::OK, json!(state.routes))
            }
            (&Method::POST, "/check-reservation-status") => match parse_day(&body) {
                Some(day) => respond(StatusCode::OK, json!({"stopped": self.is_stopped(day)})),
                None => bad_request("date required"),
            },
            (&Method::POST, "/start-reservation") => self.set_sales(&body, false),
            (&Method::POST, "/stop-reservation") => self.set_sales(&body, true),
            (&Method::POST, "/get-price") => self.get_price(&body),
            (&Method::POST, "/update-price") => self.update_price(&body),
            _ => respond(StatusCode::NOT_FOUND, json!({"error": "not found"})),
        };
        Ok(response)
    }

    fn verify_ticket(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Ok(request) = serde_json::from_slice::<VerifyRequest>(body) else {
            return bad_request("uniq_id required");
        };

        let mut state = self.state.lock();
        state.verify_calls += 1;
        let Some(ticket) = state.tickets.get_mut(&request.uniq_id) else {
            info!(uniq_id = %request.uniq_id, status = 404, "mock_verify_ticket");
            return respond(StatusCode::NOT_FOUND, json!({"error": "ticket not found"}));
        };
        if ticket.used {
            info!(uniq_id = %request.uniq_id, status = 409, "mock_verify_ticket");
            return respond(StatusCode::CONFLICT, json!({"error": "ticket already used"}));
        }

        ticket.used = true;
        info!(uniq_id = %request.uniq_id, status = 200, "mock_verify_ticket");
        respond(StatusCode::OK, json!({"travel": ticket.travel}))
    }

    fn set_sales(&self, body: &[u8], stopped: bool) -> Response<Full<Bytes>> {
        let Some(day) = parse_day(body) else {
            return bad_request("date required");
        };
        let mut state = self.state.lock();
        if stopped {
            state.stopped_days.insert(day);
        } else {
            state.stopped_days.remove(&day);
        }
        respond(StatusCode::OK, json!({"stopped": stopped}))
    }

    fn get_price(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Ok(request) = serde_json::from_slice::<PriceRequest>(body) else {
            return bad_request("from and to required");
        };
        match self.price_of(&request.from, &request.to) {
            Some(base) => {
                let passengers = request.passengers.len().max(1) as f64;
                respond(StatusCode::OK, json!({"routePrice": base * passengers}))
            }
            None => respond(StatusCode::OK, json!({})),
        }
    }

    fn update_price(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Ok(request) = serde_json::from_slice::<UpdatePriceRequest>(body) else {
            return bad_request("from, to and price required");
        };
        self.state.lock().prices.insert((request.from, request.to), request.price);
        respond(StatusCode::OK, json!({"ok": true}))
    }
}

fn parse_day(body: &[u8]) -> Option<NaiveDate> {
    let request: DateRequest = serde_json::from_slice(body).ok()?;
    calendar_day(&request.date)
}

fn bad_request(reason: &str) -> Response<Full<Bytes>> {
    respond(StatusCode::BAD_REQUEST, json!({"error": reason}))
}

fn respond(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// A mock service running in the background
pub struct MockServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL to point clients at
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ticket_used_once() {
        let api = MockApi::with_fixtures();
        let server = api.spawn().await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/verify-ticket", server.url());

        let first = client.post(&url).json(&json!({"uniq_id": "T-1"})).send().await.unwrap();
        assert_eq!(first.status().as_u16(), 200);
        let body: serde_json::Value = first.json().await.unwrap();
        assert_eq!(body["travel"]["from"], "Chisinau");

        let second = client.post(&url).json(&json!({"uniq_id": "T-1"})).send().await.unwrap();
        assert_eq!(second.status().as_u16(), 409);

        let unknown = client.post(&url).json(&json!({"uniq_id": "nope"})).send().await.unwrap();
        assert_eq!(unknown.status().as_u16(), 404);

        assert_eq!(api.verify_calls(), 3);
        assert!(api.is_used("T-1"));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let api = MockApi::new();
        let server = api.spawn().await.unwrap();
        let response = reqwest::get(format!("{}/nowhere", server.url())).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
        server.shutdown().await;
    }

    #[test]
    fn test_parse_day_accepts_timestamps() {
        let day = parse_day(br#"{"date":"2024-05-01T00:00:00.000Z"}"#);
        assert_eq!(day, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(parse_day(b"{}").is_none());
    }
}
