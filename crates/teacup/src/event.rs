//! Request lifecycle records
//!
//! An [`Event`] is created for every request or notification the proxy sees
//! and only ever moves forward: pending requests end up completed, errored or
//! cancelled, notifications are born completed. Terminal events never change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::value::RawValue;
use teacup_protocol::RpcError;

/// Which peer originated a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the dialed target ("server")
    Inbound,
    /// Sent by the connecting peer ("client")
    Outbound,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Direction::Inbound => "←",
            Direction::Outbound => "→",
        }
    }

    /// Name of the peer frames in this direction come from
    pub fn peer(self) -> &'static str {
        match self {
            Direction::Inbound => "server",
            Direction::Outbound => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Request,
    Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Completed,
    Errored,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    id: i64,
    method: String,
    direction: Direction,
    kind: EventKind,
    status: EventStatus,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    params: Option<Box<RawValue>>,
    result: Option<Box<RawValue>>,
    error: Option<RpcError>,
}

impl Event {
    /// A fresh call awaiting its reply
    pub fn request(
        direction: Direction,
        id: i64,
        method: impl Into<String>,
        params: Option<&RawValue>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            direction,
            kind: EventKind::Request,
            status: EventStatus::Pending,
            start: Utc::now(),
            end: None,
            params: params.map(ToOwned::to_owned),
            result: None,
            error: None,
        }
    }

    /// A notification, already completed with zero duration
    pub fn notification(
        direction: Direction,
        method: impl Into<String>,
        params: Option<&RawValue>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            method: method.into(),
            direction,
            kind: EventKind::Notification,
            status: EventStatus::Completed,
            start: now,
            end: Some(now),
            params: params.map(ToOwned::to_owned),
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn params(&self) -> Option<&RawValue> {
        self.params.as_deref()
    }

    pub fn result(&self) -> Option<&RawValue> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Time between start and end; zero for notifications and pending requests
    pub fn duration(&self) -> Duration {
        match (self.kind, self.end) {
            (EventKind::Request, Some(end)) => (end - self.start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Returns `false` if the event was already terminal
    pub fn complete(&mut self, result: Option<&RawValue>) -> bool {
        self.finish(EventStatus::Completed, |ev| {
            ev.result = result.map(ToOwned::to_owned);
        })
    }

    /// Returns `false` if the event was already terminal
    pub fn fail(&mut self, error: &RpcError) -> bool {
        self.finish(EventStatus::Errored, |ev| ev.error = Some(error.clone()))
    }

    /// Returns `false` if the event was already terminal
    pub fn cancel(&mut self) -> bool {
        self.finish(EventStatus::Cancelled, |_| {})
    }

    fn finish(&mut self, status: EventStatus, capture: impl FnOnce(&mut Self)) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        capture(self);
        self.status = status;
        self.end = Some(Utc::now());
        true
    }
}
