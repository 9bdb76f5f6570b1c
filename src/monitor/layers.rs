//! Detection layers.
//!
//! Each layer is one dispatch function over the closed [`ViewerEvent`]
//! set. Layers share no state with each other except through the
//! [`MonitorState`] they are handed by reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classifier::{KeyInput, Verdict, classify, is_platform_menu_key, is_print_screen};
use super::events::{EventSink, SecurityEvent, SecurityEventKind};
use super::heuristics::{DevtoolsDetector, ResizeTracker, Size, Thresholds, Transition};
use super::host::ViewerHost;
use super::session::SecuritySession;
use super::timers::{TimerQueue, TimerTask};
use super::visibility::VisibilityController;
use crate::config::MonitorConfig;

const CONTEXT_MENU_MESSAGE: &str = "Right-click is disabled";
const SCREENSHOT_MESSAGE: &str = "Screenshots are disabled";
const COPY_MESSAGE: &str = "Copying is disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    ContextMenu,
    Keyboard,
    Focus,
    Devtools,
    Resize,
    DragDrop,
    Selection,
}

impl Layer {
    pub const ALL: [Layer; 7] = [
        Layer::ContextMenu,
        Layer::Keyboard,
        Layer::Focus,
        Layer::Devtools,
        Layer::Resize,
        Layer::DragDrop,
        Layer::Selection,
    ];
}

/// Raw input from the page, one variant per listener type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ViewerEvent {
    ContextMenu,
    KeyDown(KeyInput),
    KeyUp(KeyInput),
    WindowBlur,
    WindowFocus,
    VisibilityChange { hidden: bool },
    Resize { outer: Size },
    DragStart,
    Drop,
    SelectStart,
    Copy,
    Cut,
}

/// Whether the host must suppress the browser's default action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Proceed,
    Suppress,
}

impl Disposition {
    pub fn merge(self, other: Disposition) -> Disposition {
        if self == Disposition::Suppress || other == Disposition::Suppress {
            Disposition::Suppress
        } else {
            Disposition::Proceed
        }
    }
}

/// Everything a running monitor owns. Dropped as a whole on stop.
#[derive(Debug)]
pub struct MonitorState {
    pub session: SecuritySession,
    pub(super) visibility: VisibilityController,
    pub(super) timers: TimerQueue,
    pub(super) devtools: DevtoolsDetector,
    pub(super) resize: ResizeTracker,
    pub(super) config: MonitorConfig,
    pub(super) thresholds: Thresholds,
    pub(super) user_info: Value,
}

impl MonitorState {
    pub fn new(config: MonitorConfig, user_info: Value, outer: Size) -> Self {
        Self {
            session: SecuritySession::default(),
            visibility: VisibilityController::new(config.blur_px),
            timers: TimerQueue::default(),
            devtools: DevtoolsDetector::default(),
            resize: ResizeTracker::new(outer),
            thresholds: Thresholds::from(&config),
            config,
            user_info,
        }
    }
}

pub(super) struct LayerContext<'a> {
    pub state: &'a mut MonitorState,
    pub host: &'a mut dyn ViewerHost,
    pub sink: &'a mut dyn EventSink,
    pub now: Duration,
}

impl LayerContext<'_> {
    fn emit(&mut self, kind: SecurityEventKind) {
        let event = SecurityEvent {
            kind,
            timestamp: chrono::Utc::now(),
            url: self.host.page_url(),
            user_agent: self.host.user_agent(),
            user_info: self.state.user_info.clone(),
        };
        debug!(kind = event.kind.name(), "Emitting security event");
        self.state.session.trigger_count += 1;
        self.sink.submit(&event);
    }

    fn raise_violation(&mut self, message: impl Into<String>) {
        let generation = self.state.session.banner.raise(message);
        let due = self.now + Duration::from_millis(self.state.config.violation_display_ms);
        self.state
            .timers
            .schedule(due, TimerTask::ExpireBanner(generation));
    }

    fn hide(&mut self) {
        self.state.visibility.hide_instantly(&mut *self.host);
    }

    fn show_after(&mut self, delay_ms: u64) {
        let ticket = self.state.visibility.ticket();
        let due = self.now + Duration::from_millis(delay_ms);
        self.state.timers.schedule(due, TimerTask::Restore(ticket));
    }

    /// Sample the DevTools heuristics once and fold the verdict into state.
    pub fn check_devtools(&mut self) {
        let sample = self.host.sample_devtools();
        match self.state.devtools.observe(&sample, &self.state.thresholds) {
            Transition::Opened(method) => {
                warn!(?method, "DevTools suspected");
                self.state.session.devtools_suspected = true;
                self.emit(SecurityEventKind::DevtoolsDetected { method });
            }
            Transition::Closed => {
                info!("DevTools no longer suspected");
                self.state.session.devtools_suspected = false;
            }
            Transition::Unchanged => {}
        }
    }
}

impl Layer {
    /// Listener attached: reset whatever this layer tracks.
    pub(super) fn on_attach(self, state: &mut MonitorState, host: &dyn ViewerHost) {
        match self {
            Layer::Resize => state.resize = ResizeTracker::new(host.outer_size()),
            Layer::Devtools => state.devtools.reset(),
            _ => {}
        }
    }

    /// Listener detached: the layer's invariant term returns to its secure value.
    pub(super) fn on_detach(self, state: &mut MonitorState) {
        match self {
            Layer::Devtools => {
                state.devtools.reset();
                state.session.devtools_suspected = false;
            }
            Layer::Focus => state.session.is_focused = true,
            _ => {}
        }
    }

    pub(super) fn dispatch(self, cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
        match self {
            Layer::ContextMenu => context_menu(cx, event),
            Layer::Keyboard => keyboard(cx, event),
            Layer::Focus => focus(cx, event),
            Layer::Devtools => devtools(cx, event),
            Layer::Resize => resize(cx, event),
            Layer::DragDrop => drag_drop(event),
            Layer::Selection => selection(cx, event),
        }
    }
}

fn context_menu(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    if *event != ViewerEvent::ContextMenu {
        return Disposition::Proceed;
    }
    cx.emit(SecurityEventKind::ContextMenuBlocked);
    cx.raise_violation(CONTEXT_MENU_MESSAGE);
    Disposition::Suppress
}

fn keyboard(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    match event {
        ViewerEvent::KeyDown(input) | ViewerEvent::KeyUp(input) if is_print_screen(input) => {
            print_screen(cx)
        }
        ViewerEvent::KeyDown(input) if is_platform_menu_key(input) => {
            cx.hide();
            Disposition::Proceed
        }
        ViewerEvent::KeyUp(input) if is_platform_menu_key(input) => {
            cx.show_after(cx.state.config.platform_key_show_delay_ms);
            Disposition::Proceed
        }
        ViewerEvent::KeyDown(input) => blocked_combination(cx, input),
        _ => Disposition::Proceed,
    }
}

fn blocked_combination(cx: &mut LayerContext<'_>, input: &KeyInput) -> Disposition {
    match classify(input) {
        Verdict::Allow => Disposition::Proceed,
        Verdict::Block(action) => {
            cx.emit(SecurityEventKind::KeyboardBlocked {
                action,
                key: input.key.clone(),
            });
            cx.raise_violation(action.violation_message());
            Disposition::Suppress
        }
    }
}

fn print_screen(cx: &mut LayerContext<'_>) -> Disposition {
    cx.hide();
    let text = cx.state.config.clipboard_overwrite_text.clone();
    if let Err(e) = cx.host.overwrite_clipboard(&text) {
        debug!("Clipboard overwrite skipped: {}", e);
    }
    cx.emit(SecurityEventKind::PrintscreenBlocked);
    cx.raise_violation(SCREENSHOT_MESSAGE);
    cx.show_after(cx.state.config.printscreen_show_delay_ms);
    Disposition::Suppress
}

fn focus(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    match event {
        ViewerEvent::WindowBlur => {
            cx.hide();
            cx.state.session.is_focused = false;
            cx.emit(SecurityEventKind::FocusLost);
        }
        ViewerEvent::VisibilityChange { hidden: true } => {
            cx.hide();
            cx.state.session.is_focused = false;
            cx.emit(SecurityEventKind::TabHidden);
        }
        ViewerEvent::WindowFocus | ViewerEvent::VisibilityChange { hidden: false } => {
            cx.show_after(cx.state.config.refocus_show_delay_ms);
            cx.state.session.is_focused = true;
        }
        _ => {}
    }
    Disposition::Proceed
}

fn devtools(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    if matches!(event, ViewerEvent::Resize { .. }) {
        cx.check_devtools();
    }
    Disposition::Proceed
}

fn resize(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    let ViewerEvent::Resize { outer } = event else {
        return Disposition::Proceed;
    };
    let threshold = cx.state.thresholds.resize_px;
    if let Some(jump) = cx.state.resize.on_resize(*outer, threshold) {
        warn!(
            width_change = jump.width_change,
            height_change = jump.height_change,
            "Large viewport resize"
        );
        cx.emit(SecurityEventKind::LargeResizeDetected {
            width_change: jump.width_change,
            height_change: jump.height_change,
            new_width: jump.new_size.width,
            new_height: jump.new_size.height,
        });
    }
    Disposition::Proceed
}

fn drag_drop(event: &ViewerEvent) -> Disposition {
    match event {
        ViewerEvent::DragStart | ViewerEvent::Drop => Disposition::Suppress,
        _ => Disposition::Proceed,
    }
}

fn selection(cx: &mut LayerContext<'_>, event: &ViewerEvent) -> Disposition {
    match event {
        ViewerEvent::SelectStart | ViewerEvent::Cut => Disposition::Suppress,
        ViewerEvent::Copy => {
            cx.emit(SecurityEventKind::CopyBlocked);
            cx.raise_violation(COPY_MESSAGE);
            Disposition::Suppress
        }
        _ => Disposition::Proceed,
    }
}
