use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use super::events::EventSink;
use super::host::ViewerHost;
use super::layers::{Disposition, Layer, LayerContext, MonitorState, ViewerEvent};
use super::session::{MonitorPhase, SecuritySession};
use super::timers::TimerTask;
use crate::config::MonitorConfig;

/// Client-side deterrence monitor for one mounted viewer.
///
/// The monitor does no I/O of its own. Every call takes `now` as an offset
/// from an arbitrary epoch chosen by the driver (see
/// [`MonitorRunner`](super::runner::MonitorRunner)); timers that fall due
/// are applied before the call's own work.
pub struct SecurityMonitor<H: ViewerHost> {
    config: MonitorConfig,
    host: H,
    sink: Box<dyn EventSink>,
    user_info: Value,
    layers: BTreeSet<Layer>,
    attached: BTreeSet<Layer>,
    state: Option<MonitorState>,
}

impl<H: ViewerHost> SecurityMonitor<H> {
    pub fn new(config: MonitorConfig, host: H, sink: Box<dyn EventSink>) -> Self {
        Self {
            config,
            host,
            sink,
            user_info: Value::Null,
            layers: Layer::ALL.into_iter().collect(),
            attached: BTreeSet::new(),
            state: None,
        }
    }

    /// Opaque caller data copied into every emitted event.
    pub fn with_user_info(mut self, user_info: Value) -> Self {
        self.user_info = user_info;
        self
    }

    /// Restrict the layers attached on start.
    pub fn with_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.layers = layers.into_iter().collect();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    /// Disabled -> Armed. No-op when already running.
    pub fn start(&mut self) {
        if self.state.is_some() {
            return;
        }
        let mut state = MonitorState::new(
            self.config.clone(),
            self.user_info.clone(),
            self.host.outer_size(),
        );
        for layer in self.layers.clone() {
            self.host.listen(layer);
            layer.on_attach(&mut state, &self.host);
            self.attached.insert(layer);
        }
        self.state = Some(state);
        info!(layers = self.attached.len(), "Security monitor started");
    }

    /// Detach every layer and drop the session with its pending timers.
    pub fn stop(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        for layer in std::mem::take(&mut self.attached) {
            self.host.unlisten(layer);
        }
        if state.visibility.is_hidden() {
            let ticket = state.visibility.ticket();
            state.visibility.restore(ticket, &mut self.host);
        }
        info!(
            triggers = state.session.trigger_count,
            "Security monitor stopped"
        );
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn enable_layer(&mut self, layer: Layer) {
        self.layers.insert(layer);
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if self.attached.insert(layer) {
            self.host.listen(layer);
            layer.on_attach(state, &self.host);
            debug!(?layer, "Layer attached");
        }
    }

    /// Detaching an already detached layer does nothing.
    pub fn disable_layer(&mut self, layer: Layer) {
        self.layers.remove(&layer);
        if !self.attached.remove(&layer) {
            return;
        }
        self.host.unlisten(layer);
        if let Some(state) = self.state.as_mut() {
            let before = state.session.phase();
            layer.on_detach(state);
            log_transition(before, state.session.phase());
        }
        debug!(?layer, "Layer detached");
    }

    pub fn is_attached(&self, layer: Layer) -> bool {
        self.attached.contains(&layer)
    }

    /// Feed one host event. The returned disposition tells the host
    /// whether to suppress the browser default.
    pub fn handle(&mut self, event: &ViewerEvent, now: Duration) -> Disposition {
        self.advance(now);
        let Some(state) = self.state.as_mut() else {
            return Disposition::Proceed;
        };
        let before = state.session.phase();
        let mut cx = LayerContext {
            state,
            host: &mut self.host,
            sink: self.sink.as_mut(),
            now,
        };
        let disposition = self
            .attached
            .iter()
            .fold(Disposition::Proceed, |acc, layer| {
                acc.merge(layer.dispatch(&mut cx, event))
            });
        log_transition(before, cx.state.session.phase());
        disposition
    }

    /// Periodic tick: apply due timers and sample the DevTools heuristics.
    pub fn poll(&mut self, now: Duration) {
        self.advance(now);
        if !self.attached.contains(&Layer::Devtools) {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let before = state.session.phase();
        let mut cx = LayerContext {
            state,
            host: &mut self.host,
            sink: self.sink.as_mut(),
            now,
        };
        cx.check_devtools();
        log_transition(before, cx.state.session.phase());
    }

    /// Fire every timer due at or before `now`, in deadline order.
    pub fn advance(&mut self, now: Duration) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let before = state.session.phase();
        while let Some(task) = state.timers.pop_due(now) {
            match task {
                TimerTask::Restore(ticket) => {
                    state.visibility.restore(ticket, &mut self.host);
                }
                TimerTask::ExpireBanner(generation) => {
                    state.session.banner.expire(generation);
                }
            }
        }
        log_transition(before, state.session.phase());
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.state.as_ref().and_then(|s| s.timers.next_deadline())
    }

    pub fn phase(&self) -> MonitorPhase {
        self.state
            .as_ref()
            .map_or(MonitorPhase::Disabled, |s| s.session.phase())
    }

    /// A disabled monitor reports secure: there is nothing to enforce.
    pub fn is_secure(&self) -> bool {
        self.state.as_ref().is_none_or(|s| s.session.is_secure())
    }

    pub fn violation_message(&self) -> Option<&str> {
        self.state
            .as_ref()
            .and_then(|s| s.session.active_violation_message())
    }

    pub fn trigger_count(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.session.trigger_count)
    }

    pub fn session(&self) -> Option<&SecuritySession> {
        self.state.as_ref().map(|s| &s.session)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<H: ViewerHost> Drop for SecurityMonitor<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_transition(before: MonitorPhase, after: MonitorPhase) {
    if before != after {
        info!(from = ?before, to = ?after, "Monitor phase changed");
    }
}
