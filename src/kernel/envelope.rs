//! The message shape that crosses worker boundaries.
//!
//! Every piece of work routed through the [`super::supervisor::Supervisor`]
//! is wrapped in an [`Envelope`]: a destination, a correlation id, a
//! status, and a JSON payload. `#[serde(default)]` on optional fields
//! keeps older producers/consumers forward-compatible as fields are
//! added, matching the reference's `PublishedMessage` wire shape in
//! `kernel/nats.rs`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known worker-class names addressable as the first hop of a
/// [`RoutePath`]. Plain strings rather than an enum, since destinations
/// name whatever class the deployment configured (including ones this
/// crate never spawns itself, like `BrokerGateway`).
pub const CRAWL_WORKER: &str = "CrawlWorker";
pub const DB_WORKER: &str = "DBWorker";
pub const BROKER_GATEWAY: &str = "BrokerGateway";

/// A single routing hop, of the wire form
/// `<WorkerName>[/<Method>[/<Param>]]` — e.g.
/// `DBWorker/create_new_data/3fa8…` or `BrokerGateway/produce_data/3fa8…`.
/// `worker` names the target class; `method` and `param` are carried
/// through for workers (or external routers) that dispatch on them, but
/// the bus itself only ever routes on `worker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePath {
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl RoutePath {
    pub fn new(worker: impl Into<String>) -> Self {
        Self { worker: worker.into(), method: None, param: None }
    }

    pub fn with_method(worker: impl Into<String>, method: impl Into<String>) -> Self {
        Self { worker: worker.into(), method: Some(method.into()), param: None }
    }

    pub fn with_param(worker: impl Into<String>, method: impl Into<String>, param: impl Into<String>) -> Self {
        Self { worker: worker.into(), method: Some(method.into()), param: Some(param.into()) }
    }

    /// Parse a `<WorkerName>[/<Method>[/<Param>]]` path string.
    pub fn parse(path: &str) -> Self {
        let mut parts = path.splitn(3, '/');
        let worker = parts.next().unwrap_or_default().to_string();
        let method = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let param = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        Self { worker, method, param }
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.worker)?;
        if let Some(method) = &self.method {
            write!(f, "/{method}")?;
            if let Some(param) = &self.param {
                write!(f, "/{param}")?;
            }
        }
        Ok(())
    }
}

/// Lifecycle status carried on an envelope as it moves through a worker.
///
/// `Pending`/`Healthy`/`Error` are supervisor-facing signals rather than
/// job-state: `Pending` marks a request not yet picked up, `Healthy` is
/// a heartbeat-as-envelope the supervisor folds into
/// [`super::health::WorkerHealth`], and `Error` tells the supervisor the
/// sender itself is unwell (distinct from `Failed`, which reports a
/// single job's outcome) and should be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Received,
    Pending,
    Planning,
    Locking,
    Crawling,
    Persisting,
    Healthy,
    Completed,
    Failed,
    Error,
}

/// A message routed between the supervisor and a worker task.
///
/// `correlation_id` ties a request to its eventual completion/failure
/// reply so the supervisor's [`super::pending::PendingMessageTable`] can
/// match replies without the worker needing to know who sent the
/// original request. `destination` is a list of routing hops (§3):
/// only the first hop's `worker` is consulted for bus routing, but a
/// worker may carry the full list through to the next hop itself (e.g.
/// `CrawlWorker` addressing `DBWorker/create_new_data/<project_id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub destination: Vec<RoutePath>,
    pub status: Status,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Envelope {
    pub fn new(destination: Vec<RoutePath>, status: Status, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            destination,
            status,
            payload,
            reason: None,
        }
    }

    /// Convenience constructor for the common case of a single-hop
    /// destination naming just a worker class.
    pub fn to(worker: impl Into<String>, status: Status, payload: serde_json::Value) -> Self {
        Self::new(vec![RoutePath::new(worker)], status, payload)
    }

    /// The worker name of the first routing hop, if any.
    pub fn primary_worker(&self) -> Option<&str> {
        self.destination.first().map(|p| p.worker.as_str())
    }

    /// Build a reply envelope sharing the original's `correlation_id`.
    pub fn reply(&self, status: Status, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            destination: self.destination.clone(),
            status,
            payload,
            reason: None,
        }
    }

    /// A `Failed` reply: this job/request did not succeed.
    pub fn failed(&self, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            destination: self.destination.clone(),
            status: Status::Failed,
            payload: serde_json::Value::Null,
            reason: Some(reason.into()),
        }
    }

    /// An `Error` reply: the worker itself is unwell and should be
    /// restarted, distinct from a job-level [`Self::failed`].
    pub fn errored(&self, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            destination: self.destination.clone(),
            status: Status::Error,
            payload: serde_json::Value::Null,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_preserves_correlation_id() {
        let original = Envelope::to(CRAWL_WORKER, Status::Received, serde_json::json!({}));
        let reply = original.reply(Status::Completed, serde_json::json!({"ok": true}));
        assert_eq!(original.correlation_id, reply.correlation_id);
        assert_ne!(original.id, reply.id);
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let original = Envelope::to(DB_WORKER, Status::Persisting, serde_json::json!({"n": 1}));
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.destination, original.destination);
    }

    #[test]
    fn reason_defaults_to_none_when_absent_from_wire() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "correlation_id": Uuid::new_v4(),
            "destination": [{"worker": "CrawlWorker"}],
            "status": "received",
            "payload": {},
        });
        let decoded: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.reason, None);
    }

    #[test]
    fn route_path_parses_worker_method_and_param() {
        let path = RoutePath::parse("DBWorker/create_new_data/3fa8");
        assert_eq!(path.worker, "DBWorker");
        assert_eq!(path.method.as_deref(), Some("create_new_data"));
        assert_eq!(path.param.as_deref(), Some("3fa8"));
        assert_eq!(path.to_string(), "DBWorker/create_new_data/3fa8");
    }

    #[test]
    fn route_path_parses_bare_worker_name() {
        let path = RoutePath::parse("CrawlWorker");
        assert_eq!(path.worker, "CrawlWorker");
        assert!(path.method.is_none());
        assert!(path.param.is_none());
    }

    #[test]
    fn route_path_can_address_broker_gateway() {
        let path = RoutePath::parse("BrokerGateway/produce_data/3fa8");
        assert_eq!(path.worker, BROKER_GATEWAY);
        assert_eq!(path.method.as_deref(), Some("produce_data"));
    }
}
