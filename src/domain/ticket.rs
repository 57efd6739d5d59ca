//! Ticket verification types and the scan interpreter
//!
//! `interpret` is the only way to build a `TicketReference`, so nothing that
//! reaches the verification client can carry an empty or missing ticket id.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Field carrying the ticket id inside a scanned payload
const TICKET_ID_FIELD: &str = "uniq_id";

/// Identifier of one scan attempt (decode through resolved outcome)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Generate a new time-sortable attempt id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which physical camera is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    Environment,
    User,
}

impl FacingMode {
    /// The other camera
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a booking, extracted from a scanned code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketReference {
    uniq_id: String,
}

impl TicketReference {
    pub fn uniq_id(&self) -> &str {
        &self.uniq_id
    }
}

impl std::fmt::Display for TicketReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uniq_id)
    }
}

/// Why a decoded string was rejected before any network call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
}

/// Parse a raw decoded string into a ticket reference.
///
/// Succeeds iff the payload is a JSON object whose `uniq_id` is a non-empty
/// string. The id is kept exactly as scanned.
pub fn interpret(raw: &str) -> Result<TicketReference, InterpretError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| InterpretError::MalformedPayload("not structured data"))?;

    let object = value
        .as_object()
        .ok_or(InterpretError::MalformedPayload("not an object"))?;

    let uniq_id = match object.get(TICKET_ID_FIELD) {
        Some(serde_json::Value::String(id)) => id,
        Some(_) => return Err(InterpretError::MalformedPayload("ticket id is not a string")),
        None => return Err(InterpretError::MalformedPayload("ticket id missing")),
    };

    if uniq_id.is_empty() {
        return Err(InterpretError::MalformedPayload("ticket id empty"));
    }

    Ok(TicketReference { uniq_id: uniq_id.clone() })
}

/// Travel details returned by the verification service, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelInfo {
    pub from: String,
    pub to: String,
    pub date: String,
    pub name: String,
    pub surname: String,
}

impl TravelInfo {
    /// Departure date as a timestamp, if the service sent a parseable one
    pub fn parsed_date(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.date).ok()
    }

    /// Calendar date for display (`dd.mm.yyyy`), raw value when unparseable
    pub fn display_date(&self) -> String {
        match self.parsed_date() {
            Some(date) => date.format("%d.%m.%Y").to_string(),
            None => self.date.clone(),
        }
    }

    pub fn passenger(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }
}

/// Result of one scan attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success { travel: TravelInfo },
    Failure,
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationOutcome::Success { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationOutcome::Success { .. } => "success",
            VerificationOutcome::Failure => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_valid_payload() {
        let reference = interpret(r#"{"uniq_id":"abc123"}"#).unwrap();
        assert_eq!(reference.uniq_id(), "abc123");
    }

    #[test]
    fn test_interpret_ignores_extra_fields() {
        let reference = interpret(r#"{"uniq_id":"T-1","seat":12,"name":"Ion"}"#).unwrap();
        assert_eq!(reference.uniq_id(), "T-1");
    }

    #[test]
    fn test_interpret_not_json() {
        assert!(matches!(interpret("not json"), Err(InterpretError::MalformedPayload(_))));
        assert!(matches!(interpret("hello-world"), Err(InterpretError::MalformedPayload(_))));
        assert!(matches!(interpret(""), Err(InterpretError::MalformedPayload(_))));
    }

    #[test]
    fn test_interpret_missing_or_empty_id() {
        assert_eq!(
            interpret("{}"),
            Err(InterpretError::MalformedPayload("ticket id missing"))
        );
        assert_eq!(
            interpret(r#"{"uniq_id":""}"#),
            Err(InterpretError::MalformedPayload("ticket id empty"))
        );
    }

    #[test]
    fn test_interpret_keeps_id_verbatim() {
        assert_eq!(interpret(r#"{"uniq_id":" T-1 "}"#).unwrap().uniq_id(), " T-1 ");
        assert_eq!(interpret(r#"{"uniq_id":"   "}"#).unwrap().uniq_id(), "   ");
    }

    #[test]
    fn test_interpret_wrong_shapes() {
        assert!(interpret(r#"{"uniq_id":42}"#).is_err());
        assert!(interpret(r#"{"uniq_id":null}"#).is_err());
        assert!(interpret(r#"["uniq_id","abc"]"#).is_err());
        assert!(interpret(r#""abc123""#).is_err());
    }

    #[test]
    fn test_facing_mode_toggle() {
        assert_eq!(FacingMode::default(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.toggled().toggled(), FacingMode::User);
    }

    #[test]
    fn test_travel_display_date() {
        let travel = TravelInfo {
            from: "Chisinau".to_string(),
            to: "Iasi".to_string(),
            date: "2024-05-01T00:00:00Z".to_string(),
            name: "Ion".to_string(),
            surname: "Pop".to_string(),
        };
        assert_eq!(travel.display_date(), "01.05.2024");
        assert_eq!(travel.passenger(), "Ion Pop");

        let odd = TravelInfo { date: "tomorrow".to_string(), ..travel };
        assert_eq!(odd.display_date(), "tomorrow");
    }
}
