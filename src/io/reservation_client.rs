//! Typed client for the reservation administration endpoints

use crate::domain::reservation::day_timestamp;
use crate::domain::{PassengerKind, Reservation, Routes};
use crate::infra::config::Config;
use crate::io::http::ServiceEndpoint;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} answered {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("{endpoint} returned an unreadable body: {reason}")]
    Body { endpoint: &'static str, reason: String },
    #[error("no price known for {from} -> {to}")]
    NoPrice { from: String, to: String },
    #[error("invalid price {0}: must be a positive number")]
    InvalidPrice(f64),
}

#[derive(Serialize)]
struct DateRequest {
    date: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    stopped: bool,
}

#[derive(Serialize)]
struct PriceRequest<'a> {
    from: &'a str,
    to: &'a str,
    passengers: &'a [PassengerKind],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceResponse {
    route_price: Option<f64>,
}

#[derive(Serialize)]
struct UpdatePriceRequest<'a> {
    from: &'a str,
    to: &'a str,
    price: f64,
}

pub struct ReservationClient {
    endpoint: ServiceEndpoint,
    client: reqwest::Client,
}

impl ReservationClient {
    pub fn new(endpoint: ServiceEndpoint) -> reqwest::Result<Self> {
        let client = endpoint.build_client()?;
        Ok(Self { endpoint, client })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(ServiceEndpoint::from_config(config))
    }

    /// All reservations, unfiltered
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, ApiError> {
        self.get("reservations").await
    }

    pub async fn routes(&self) -> Result<Routes, ApiError> {
        self.get("get-routes").await
    }

    /// Whether sales are stopped for `day`
    pub async fn reservation_status(&self, day: NaiveDate) -> Result<bool, ApiError> {
        let body = DateRequest { date: day_timestamp(day) };
        let status: StatusResponse = self.post("check-reservation-status", &body).await?;
        Ok(status.stopped)
    }

    pub async fn price(
        &self,
        from: &str,
        to: &str,
        passengers: &[PassengerKind],
    ) -> Result<f64, ApiError> {
        let body = PriceRequest { from, to, passengers };
        let response: PriceResponse = self.post("get-price", &body).await?;
        response
            .route_price
            .ok_or_else(|| ApiError::NoPrice { from: from.to_string(), to: to.to_string() })
    }

    /// Set the base price of a route. Rejected locally unless positive and finite.
    pub async fn update_price(&self, from: &str, to: &str, price: f64) -> Result<(), ApiError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ApiError::InvalidPrice(price));
        }
        self.post_ignoring_body("update-price", &UpdatePriceRequest { from, to, price }).await?;
        info!(from = %from, to = %to, price = price, "route_price_updated");
        Ok(())
    }

    pub async fn start_sales(&self, day: NaiveDate) -> Result<(), ApiError> {
        self.post_ignoring_body("start-reservation", &DateRequest { date: day_timestamp(day) })
            .await?;
        info!(date = %day, "reservations_started");
        Ok(())
    }

    pub async fn stop_sales(&self, day: NaiveDate) -> Result<(), ApiError> {
        self.post_ignoring_body("stop-reservation", &DateRequest { date: day_timestamp(day) })
            .await?;
        info!(date = %day, "reservations_stopped");
        Ok(())
    }

    /// Flip sales for `day` and return the new stopped flag
    pub async fn toggle_sales(&self, day: NaiveDate) -> Result<bool, ApiError> {
        if self.reservation_status(day).await? {
            self.start_sales(day).await?;
            Ok(false)
        } else {
            self.stop_sales(day).await?;
            Ok(true)
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &'static str) -> Result<T, ApiError> {
        let request = self.endpoint.authorize(self.client.get(self.endpoint.url(endpoint)));
        let response = Self::check(endpoint, request.send().await)?;
        Self::decode(endpoint, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send_post(endpoint, body).await?;
        Self::decode(endpoint, response).await
    }

    async fn post_ignoring_body<B: Serialize>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<(), ApiError> {
        self.send_post(endpoint, body).await.map(|_| ())
    }

    async fn send_post<B: Serialize>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let request =
            self.endpoint.authorize(self.client.post(self.endpoint.url(endpoint)).json(body));
        Self::check(endpoint, request.send().await)
    }

    fn check(
        endpoint: &'static str,
        result: reqwest::Result<reqwest::Response>,
    ) -> Result<reqwest::Response, ApiError> {
        let response = result.map_err(|source| ApiError::Network { endpoint, source })?;
        let status = response.status();
        debug!(endpoint = endpoint, status = status.as_u16(), "api_response");
        if !status.is_success() {
            return Err(ApiError::Status { endpoint, status: status.as_u16() });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let bytes =
            response.bytes().await.map_err(|source| ApiError::Network { endpoint, source })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Body { endpoint, reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_invalid_price_rejected_before_network() {
        // Nothing listens here; a network attempt would yield a Network error
        let endpoint = ServiceEndpoint::new("http://127.0.0.1:9", Duration::from_millis(200));
        let client = ReservationClient::new(endpoint).unwrap();

        for price in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = client.update_price("Chisinau", "Iasi", price).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidPrice(_)), "price {} gave {:?}", price, err);
        }
    }

    #[test]
    fn test_price_request_shape() {
        let passengers = [PassengerKind { is_student: false }];
        let body = PriceRequest { from: "Chisinau", to: "Iasi", passengers: &passengers };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"from":"Chisinau","to":"Iasi","passengers":[{"isStudent":false}]}"#);
    }
}
