//! Request Ledger
//!
//! Per-connection bookkeeping of in-flight requests. Request IDs are chosen
//! by each caller independently, so pending requests are kept in two maps,
//! one per direction, and a response is always looked up in the map of the
//! peer it is replying to.
//!
//! The broker is owned by the relay loop and never shared, so it needs no
//! locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use teacup_protocol::{Envelope, Reply, RpcMessage};
use tracing::debug;

use crate::event::{Direction, Event, EventKind};
use crate::render::{EventSink, Renderer};

/// Pending request IDs mapped to their position in the event log
type PendingRequests = HashMap<i64, usize>;

/// What tracking made of one relayed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    /// Not a JSON-RPC envelope
    Unparsed,
    /// Parsed, but neither call nor reply (no id and no method)
    Unclassified,
    Notification,
    Request,
    Resolved,
    /// Reply to an id that is not pending in the expected direction
    Unmatched,
}

/// Renders events as they change and measures time between rendered lines
struct Activity {
    renderer: Renderer,
    sink: Arc<dyn EventSink>,
    last: Instant,
}

impl Activity {
    fn updated(&mut self, event: &Event, depth: usize) {
        if !self.renderer.should_render(event) {
            return;
        }
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.sink.emit(&self.renderer.render(event, depth, delta));
    }
}

pub struct Broker {
    inbound: PendingRequests,
    outbound: PendingRequests,
    events: Vec<Event>,
    activity: Activity,
}

impl Broker {
    pub fn new(renderer: Renderer, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inbound: PendingRequests::new(),
            outbound: PendingRequests::new(),
            events: Vec::new(),
            activity: Activity {
                renderer,
                sink,
                last: Instant::now(),
            },
        }
    }

    pub fn name(&self) -> &str {
        self.activity.renderer.name()
    }

    /// Every event seen so far, oldest first
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of requests awaiting a reply, both directions
    pub fn pending_count(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }

    /// Pending request `id` originated in `direction`
    pub fn get_request(&self, direction: Direction, id: i64) -> Option<&Event> {
        self.pending(direction)
            .get(&id)
            .map(|&index| &self.events[index])
    }

    /// Record a newly observed request or notification.
    ///
    /// A request reusing the id of one still pending from the same caller
    /// supersedes it; the older one is cancelled first.
    pub fn register(&mut self, event: Event) {
        let direction = event.direction();
        let id = event.id();
        let is_request = event.kind() == EventKind::Request;

        if is_request {
            if let Some(stale) = self.pending_mut(direction).remove(&id) {
                debug!(broker = %self.name(), id, "request id reused while pending");
                self.retire_one(stale);
            }
        }

        let depth = self.pending_count();
        let index = self.events.len();
        self.events.push(event);
        self.activity.updated(&self.events[index], depth);

        if is_request {
            self.pending_mut(direction).insert(id, index);
        }
    }

    /// Settle the request `id` that `caller` is waiting on.
    ///
    /// Returns `None` when no such request is pending, which is not an error.
    pub fn resolve(&mut self, caller: Direction, id: i64, reply: Reply<'_>) -> Option<&Event> {
        let index = self.pending_mut(caller).remove(&id)?;
        let event = &mut self.events[index];
        match reply {
            Reply::Result(result) => event.complete(result),
            Reply::Error(error) => event.fail(error),
        };

        let depth = self.pending_count();
        self.activity.updated(&self.events[index], depth);
        Some(&self.events[index])
    }

    /// Interpret one frame travelling `from` the given side.
    ///
    /// Never fails: anything that cannot be tracked, including bytes that are
    /// not UTF-8, is skipped.
    pub fn track(&mut self, from: Direction, frame: impl AsRef<[u8]>) -> Tracking {
        let Ok(text) = std::str::from_utf8(frame.as_ref()) else {
            return Tracking::Unparsed;
        };
        let Ok(msg) = RpcMessage::parse(text) else {
            return Tracking::Unparsed;
        };

        match msg.classify() {
            None => Tracking::Unclassified,
            Some(Envelope::Notification { method, params }) => {
                self.register(Event::notification(from, method, params));
                Tracking::Notification
            }
            Some(Envelope::Request { id, method, params }) => {
                self.register(Event::request(from, id, method, params));
                Tracking::Request
            }
            // A reply travelling `from` one side answers a call made by the other
            Some(Envelope::Response { id, reply }) => {
                match self.resolve(from.opposite(), id, reply) {
                    Some(_) => Tracking::Resolved,
                    None => {
                        debug!(broker = %self.name(), id, from = from.peer(), "response for unknown request");
                        Tracking::Unmatched
                    }
                }
            }
        }
    }

    /// Cancel everything still pending and hand back the full event log.
    ///
    /// Consumes the broker: a connection is retired exactly once.
    pub fn retire(mut self) -> Vec<Event> {
        let mut stale: Vec<(usize, Direction, i64)> = self
            .inbound
            .iter()
            .map(|(&id, &index)| (index, Direction::Inbound, id))
            .chain(
                self.outbound
                    .iter()
                    .map(|(&id, &index)| (index, Direction::Outbound, id)),
            )
            .collect();
        stale.sort_unstable_by_key(|&(index, _, _)| index);

        for (index, direction, id) in stale {
            self.pending_mut(direction).remove(&id);
            self.retire_one(index);
        }
        self.events
    }

    fn retire_one(&mut self, index: usize) {
        if self.events[index].cancel() {
            let depth = self.pending_count();
            self.activity.updated(&self.events[index], depth);
        }
    }

    fn pending(&self, direction: Direction) -> &PendingRequests {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn pending_mut(&mut self, direction: Direction) -> &mut PendingRequests {
        match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        }
    }
}
