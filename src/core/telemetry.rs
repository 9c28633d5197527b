use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value as Json;

use super::{
    problem::ValidationError,
    profile::{Profile, ResponseMode},
};

pub const REQUEST_CREATED: &str = "oid4vp.request.created";
pub const WALLET_RESPONDED: &str = "oid4vp.wallet.responded";
pub const RESPONSE_VALIDATED: &str = "oid4vp.response.validated";
pub const RESPONSE_ENCRYPTED: &str = "oid4vp.response.encrypted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// A structured telemetry signal.
///
/// Fields carry identifiers, hashes and verdicts only. Tokens, disclosures
/// and key material never end up here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub event: String,
    pub outcome: Outcome,
    pub fields: BTreeMap<String, Json>,
}

impl TelemetryEvent {
    pub fn success(event: &str) -> Self {
        Self {
            event: event.to_owned(),
            outcome: Outcome::Success,
            fields: BTreeMap::new(),
        }
    }

    /// A failure event describing `error`.
    pub fn failure(
        event: &str,
        error: &ValidationError,
        profile: Profile,
        response_mode: Option<ResponseMode>,
    ) -> Self {
        let problem = error.problem();
        Self {
            event: event.to_owned(),
            outcome: Outcome::Failure,
            fields: BTreeMap::new(),
        }
        .field("reason", problem.title.clone())
        .field("status", problem.status)
        .field("profile", profile.as_str())
        .field(
            "responseMode",
            response_mode.map(|rm| rm.as_str().to_owned()),
        )
    }

    pub fn field(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }
}

/// Receives telemetry signals. Implemented by the surrounding application.
pub trait TelemetryPublisher: Debug {
    fn publish(&self, event: TelemetryEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryPublisher for NoopTelemetry {
    fn publish(&self, _event: TelemetryEvent) {}
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryPublisher for TracingTelemetry {
    fn publish(&self, event: TelemetryEvent) {
        let fields = serde_json::to_string(&event.fields).unwrap_or_default();
        match event.outcome {
            Outcome::Success => tracing::info!(event = %event.event, %fields, "telemetry"),
            Outcome::Failure => tracing::warn!(event = %event.event, %fields, "telemetry"),
        }
    }
}

/// Collects events in memory. Not for production use!
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TelemetryPublisher for RecordingTelemetry {
    fn publish(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Monotonic time source used to measure operation latency.
pub trait Clock: Debug {
    fn now(&self) -> Instant;

    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_event_carries_problem_summary() {
        let error = ValidationError::invalid_scope("policy not satisfied");
        let event = TelemetryEvent::failure(
            RESPONSE_VALIDATED,
            &error,
            Profile::Haip,
            Some(ResponseMode::DirectPostJwt),
        );

        assert_eq!(event.outcome, Outcome::Failure);
        assert_eq!(event.fields["reason"], json!("invalid_scope"));
        assert_eq!(event.fields["status"], json!(400));
        assert_eq!(event.fields["profile"], json!("HAIP"));
        assert_eq!(event.fields["responseMode"], json!("direct_post.jwt"));
        assert_eq!(
            event.fields.keys().collect::<Vec<_>>(),
            ["profile", "reason", "responseMode", "status"]
        );
    }

    #[test]
    fn recording_telemetry_keeps_order() {
        let telemetry = RecordingTelemetry::default();
        telemetry.publish(TelemetryEvent::success(REQUEST_CREATED));
        telemetry.publish(TelemetryEvent::success(WALLET_RESPONDED));

        let names: Vec<_> = telemetry.events().into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec![REQUEST_CREATED, WALLET_RESPONDED]);
    }
}
