//! Progress events emitted by the gateway. Listening is optional; nothing depends on it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Validating,
    Executing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayEvent {
    pub event: EventKind,
    pub detail: String,
}

impl GatewayEvent {
    pub fn new(event: EventKind, detail: impl Into<String>) -> Self {
        Self {
            event,
            detail: detail.into(),
        }
    }
}

/// Receives gateway events. Implemented for any `Fn(&GatewayEvent)`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GatewayEvent);
}

impl<F> EventSink for F
where
    F: Fn(&GatewayEvent) + Send + Sync,
{
    fn emit(&self, event: &GatewayEvent) {
        self(event)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &GatewayEvent) {}
}
