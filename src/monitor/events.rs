//! Security event vocabulary and the sinks that consume it.
//!
//! The event shape is shared with the server's audit intake
//! (`POST /security/events`), so everything here is serde-stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::classifier::BlockedAction;
use super::heuristics::DetectionMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "details",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SecurityEventKind {
    ContextMenuBlocked,
    KeyboardBlocked {
        action: BlockedAction,
        key: String,
    },
    PrintscreenBlocked,
    FocusLost,
    TabHidden,
    DevtoolsDetected {
        method: DetectionMethod,
    },
    LargeResizeDetected {
        width_change: u32,
        height_change: u32,
        new_width: u32,
        new_height: u32,
    },
    CopyBlocked,
}

impl SecurityEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContextMenuBlocked => "CONTEXT_MENU_BLOCKED",
            Self::KeyboardBlocked { .. } => "KEYBOARD_BLOCKED",
            Self::PrintscreenBlocked => "PRINTSCREEN_BLOCKED",
            Self::FocusLost => "FOCUS_LOST",
            Self::TabHidden => "TAB_HIDDEN",
            Self::DevtoolsDetected { .. } => "DEVTOOLS_DETECTED",
            Self::LargeResizeDetected { .. } => "LARGE_RESIZE_DETECTED",
            Self::CopyBlocked => "COPY_BLOCKED",
        }
    }
}

/// One detected condition. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub user_agent: String,
    /// Caller-supplied, passed through untouched.
    #[serde(default)]
    pub user_info: Value,
}

impl SecurityEvent {
    /// Kind-specific fields as a flat map (empty for unit kinds).
    pub fn detail(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.kind) {
            Ok(Value::Object(mut obj)) => match obj.remove("details") {
                Some(Value::Object(details)) => details,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

/// Body of an audit submission: the event plus a session/document
/// correlation id chosen by the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSubmission {
    pub correlation_id: String,
    pub event: SecurityEvent,
}

/// Consumer of emitted events. Delivery guarantees are the sink's concern.
pub trait EventSink: Send {
    fn submit(&mut self, event: &SecurityEvent);
}

/// Collects events in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<SecurityEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn submit(&mut self, event: &SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Writes each event to the structured log under the `docguard::audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    pub correlation_id: String,
}

impl EventSink for TracingSink {
    fn submit(&mut self, event: &SecurityEvent) {
        let detail = serde_json::Value::Object(event.detail());
        warn!(
            target: "docguard::audit",
            correlation_id = %self.correlation_id,
            kind = event.kind.name(),
            detail = %detail,
            url = %event.url,
            "Security event"
        );
    }
}

/// Forwards events to a remote audit endpoint, best-effort and at most once.
#[derive(Debug, Clone)]
pub struct HttpAuditSink {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
    correlation_id: String,
}

impl HttpAuditSink {
    pub fn new(endpoint: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bearer: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

impl HttpAuditSink {
    /// Post one event and wait for the endpoint's answer.
    pub async fn deliver(&self, event: &SecurityEvent) -> Result<reqwest::StatusCode, reqwest::Error> {
        let submission = AuditSubmission {
            correlation_id: self.correlation_id.clone(),
            event: event.clone(),
        };
        let mut request = self.client.post(&self.endpoint).json(&submission);
        if let Some(ref token) = self.bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?.status())
    }
}

impl EventSink for HttpAuditSink {
    fn submit(&mut self, event: &SecurityEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; dropping {} audit event", event.kind.name());
            return;
        };

        let sink = self.clone();
        let event = event.clone();
        handle.spawn(async move {
            match sink.deliver(&event).await {
                Ok(status) if status.is_success() => {
                    debug!("Audit event {} delivered", event.kind.name());
                }
                Ok(status) => warn!("Audit endpoint rejected event: {}", status),
                Err(e) => warn!("Failed to deliver audit event: {}", e),
            }
        });
    }
}
