//! Reservation records and list filtering for the administration commands

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Route map: departure city -> reachable destination cities
pub type Routes = BTreeMap<String, Vec<String>>;

/// A booking as returned by `GET /reservations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(default)]
    pub trip_type: String,
    pub from: String,
    #[serde(default)]
    pub from_station: String,
    #[serde(default)]
    pub departure_time: String,
    pub to: String,
    #[serde(default)]
    pub to_station: String,
    #[serde(default)]
    pub arrival_time: String,
    pub date: String,
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub passport_serial: String,
    #[serde(default)]
    pub is_student: bool,
    #[serde(default)]
    pub student_id_serial: String,
}

impl Reservation {
    /// Travel day of this reservation, if the date field is readable
    pub fn travel_day(&self) -> Option<NaiveDate> {
        calendar_day(&self.date)
    }
}

/// Extract the calendar day from an ISO-8601 timestamp or plain date
pub fn calendar_day(value: &str) -> Option<NaiveDate> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    value.get(..10).and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

/// ISO-8601 timestamp for midnight UTC of `day`, the form the service expects
pub fn day_timestamp(day: NaiveDate) -> String {
    let midnight = day.and_time(NaiveTime::default());
    Utc.from_utc_datetime(&midnight).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Criteria for narrowing the reservation list. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub date: Option<NaiveDate>,
    pub search: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        let matches_date = match self.date {
            Some(day) => reservation.travel_day() == Some(day),
            None => true,
        };
        let matches_search = match non_empty(&self.search) {
            Some(query) => {
                contains_ci(&reservation.name, query) || contains_ci(&reservation.surname, query)
            }
            None => true,
        };
        let matches_from =
            non_empty(&self.from).map_or(true, |city| contains_ci(&reservation.from, city));
        let matches_to =
            non_empty(&self.to).map_or(true, |city| contains_ci(&reservation.to, city));

        matches_date && matches_search && matches_from && matches_to
    }

    pub fn apply<'a>(&self, reservations: &'a [Reservation]) -> Vec<&'a Reservation> {
        reservations.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Number of reservations travelling on `day`, ignoring other criteria
pub fn count_on(reservations: &[Reservation], day: NaiveDate) -> usize {
    reservations.iter().filter(|r| r.travel_day() == Some(day)).count()
}

/// Passenger entry for a price quote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerKind {
    pub is_student: bool,
}
