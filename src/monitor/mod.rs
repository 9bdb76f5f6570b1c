//! Client-side deterrence monitor for protected document viewers.
//!
//! The monitor is a state machine over [`ViewerEvent`]s. It never touches
//! a page directly; everything observable goes through the [`ViewerHost`]
//! traits, and every detected condition is handed to an [`EventSink`].
//!
//! ```text
//!  host listeners ──ViewerEvent──▶ SecurityMonitor ──SecurityEvent──▶ EventSink
//!        ▲                            │   │
//!        └── opacity / blur / clipboard   └── TimerQueue (restore, banner)
//! ```
//!
//! [`MonitorRunner`] drives a monitor from a tokio task. Deterrence only:
//! none of this prevents a determined user from capturing content.

mod banner;
mod classifier;
mod engine;
mod events;
mod heuristics;
mod host;
mod layers;
mod runner;
mod session;
mod timers;
mod visibility;

pub use classifier::{BlockedAction, KeyInput, Verdict, classify, is_platform_menu_key, is_print_screen};
pub use engine::SecurityMonitor;
pub use events::{
    AuditSubmission, EventSink, HttpAuditSink, MemorySink, SecurityEvent, SecurityEventKind,
    TracingSink,
};
pub use heuristics::{DetectionMethod, DevtoolsSample, Size, Thresholds};
pub use host::{
    Clipboard, ClipboardUnavailable, HeadlessHost, ListenerRegistry, ViewerHost, ViewportProbe,
};
pub use layers::{Disposition, Layer, ViewerEvent};
pub use runner::{MonitorCommand, MonitorRunner, MonitorStatus};
pub use session::{MonitorPhase, SecuritySession};
pub use visibility::ProtectedSurface;
