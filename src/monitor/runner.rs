//! Tokio driver for a [`SecurityMonitor`].
//!
//! The runner owns the monitor on one task. Host events arrive over an
//! mpsc channel; the poll tick and the earliest pending timer deadline are
//! awaited alongside. Closing the channel stops the monitor.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, info};

use super::engine::SecurityMonitor;
use crate::config::MonitorConfig;
use super::host::ViewerHost;
use super::layers::{Disposition, Layer, ViewerEvent};
use super::session::MonitorPhase;

pub enum MonitorCommand {
    /// A host event; the reply carries the suppress-default decision.
    Event {
        event: ViewerEvent,
        reply: Option<oneshot::Sender<Disposition>>,
    },
    SetEnabled(bool),
    SetLayer { layer: Layer, enabled: bool },
    Status(oneshot::Sender<MonitorStatus>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub phase: MonitorPhase,
    pub secure: bool,
    pub violation_message: Option<String>,
    pub trigger_count: u64,
}

pub struct MonitorRunner<H: ViewerHost> {
    monitor: SecurityMonitor<H>,
    poll_interval: Duration,
}

impl<H: ViewerHost> MonitorRunner<H> {
    pub fn new(monitor: SecurityMonitor<H>, poll_interval: Duration) -> Self {
        Self {
            monitor,
            poll_interval,
        }
    }

    /// Poll on `monitor.poll_interval_ms` (at least 1 ms).
    pub fn from_config(monitor: SecurityMonitor<H>, config: &MonitorConfig) -> Self {
        Self::new(
            monitor,
            Duration::from_millis(config.poll_interval_ms.max(1)),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run until every sender is dropped, then hand the stopped monitor back.
    pub async fn run(mut self, mut commands: mpsc::Receiver<MonitorCommand>) -> SecurityMonitor<H> {
        info!(
            "Starting monitor runner with poll interval: {:?}",
            self.poll_interval
        );

        let origin = Instant::now();
        let mut ticker = interval_at(origin + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.monitor.start();

        loop {
            let deadline = self.monitor.next_deadline().map(|d| origin + d);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.apply(command, origin.elapsed()),
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.monitor.is_enabled() {
                        self.monitor.poll(origin.elapsed());
                    }
                }
                _ = wait_for(deadline) => self.monitor.advance(origin.elapsed()),
            }
        }

        debug!("Monitor command channel closed");
        self.monitor.stop();
        self.monitor
    }

    fn apply(&mut self, command: MonitorCommand, now: Duration) {
        match command {
            MonitorCommand::Event { event, reply } => {
                let disposition = self.monitor.handle(&event, now);
                if let Some(reply) = reply {
                    // Host may have stopped waiting.
                    let _ = reply.send(disposition);
                }
            }
            MonitorCommand::SetEnabled(enabled) => self.monitor.set_enabled(enabled),
            MonitorCommand::SetLayer { layer, enabled } => {
                if enabled {
                    self.monitor.enable_layer(layer);
                } else {
                    self.monitor.disable_layer(layer);
                }
            }
            MonitorCommand::Status(reply) => {
                self.monitor.advance(now);
                let _ = reply.send(MonitorStatus {
                    phase: self.monitor.phase(),
                    secure: self.monitor.is_secure(),
                    violation_message: self.monitor.violation_message().map(str::to_string),
                    trigger_count: self.monitor.trigger_count(),
                });
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::classifier::KeyInput;
    use crate::monitor::events::{MemorySink, SecurityEventKind};
    use crate::monitor::heuristics::Size;
    use crate::monitor::host::HeadlessHost;

    fn spawn(
        host: HeadlessHost,
    ) -> (
        mpsc::Sender<MonitorCommand>,
        tokio::task::JoinHandle<SecurityMonitor<HeadlessHost>>,
        MemorySink,
    ) {
        spawn_with(MonitorConfig::default(), host)
    }

    fn spawn_with(
        config: MonitorConfig,
        host: HeadlessHost,
    ) -> (
        mpsc::Sender<MonitorCommand>,
        tokio::task::JoinHandle<SecurityMonitor<HeadlessHost>>,
        MemorySink,
    ) {
        let sink = MemorySink::default();
        let monitor = SecurityMonitor::new(config.clone(), host, Box::new(sink.clone()));
        let runner = MonitorRunner::from_config(monitor, &config);
        let (tx, rx) = mpsc::channel(16);
        (tx, tokio::spawn(runner.run(rx)), sink)
    }

    async fn send_event(tx: &mpsc::Sender<MonitorCommand>, event: ViewerEvent) -> Disposition {
        let (reply, rx) = oneshot::channel();
        tx.send(MonitorCommand::Event {
            event,
            reply: Some(reply),
        })
        .await
        .unwrap();
        rx.await.unwrap()
    }

    async fn status(tx: &mpsc::Sender<MonitorCommand>) -> MonitorStatus {
        let (reply, rx) = oneshot::channel();
        tx.send(MonitorCommand::Status(reply)).await.unwrap();
        rx.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn banner_expires_on_runner_clock() {
        let (tx, handle, sink) = spawn(HeadlessHost::default());

        let d = send_event(&tx, ViewerEvent::KeyDown(KeyInput::new("s").ctrl())).await;
        assert_eq!(d, Disposition::Suppress);
        let s = status(&tx).await;
        assert_eq!(s.phase, MonitorPhase::Alerted);
        assert_eq!(s.violation_message.as_deref(), Some("save is disabled"));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let s = status(&tx).await;
        assert_eq!(s.phase, MonitorPhase::Armed);
        assert_eq!(s.violation_message, None);
        assert_eq!(s.trigger_count, 1);

        drop(tx);
        let monitor = handle.await.unwrap();
        assert_eq!(monitor.phase(), MonitorPhase::Disabled);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_tick_samples_devtools() {
        let mut host = HeadlessHost::default();
        host.sample.inner = Size::new(900, 720);
        let (tx, handle, sink) = spawn(host);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let s = status(&tx).await;
        assert!(!s.secure);
        assert_eq!(
            sink.kinds()
                .iter()
                .filter(|k| matches!(k, SecurityEventKind::DevtoolsDetected { .. }))
                .count(),
            1
        );

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_comes_from_config() {
        let config = MonitorConfig {
            poll_interval_ms: 250,
            ..MonitorConfig::default()
        };
        let mut host = HeadlessHost::default();
        host.sample.inner = Size::new(900, 720);
        let (tx, handle, sink) = spawn_with(config, host);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!status(&tx).await.secure);
        assert_eq!(sink.len(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = MonitorConfig {
            poll_interval_ms: 0,
            ..MonitorConfig::default()
        };
        let monitor = SecurityMonitor::new(
            config.clone(),
            HeadlessHost::default(),
            Box::new(MemorySink::default()),
        );
        let runner = MonitorRunner::from_config(monitor, &config);
        assert_eq!(runner.poll_interval(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_stops_enforcement() {
        let (tx, handle, sink) = spawn(HeadlessHost::default());

        tx.send(MonitorCommand::SetEnabled(false)).await.unwrap();
        let d = send_event(&tx, ViewerEvent::ContextMenu).await;
        assert_eq!(d, Disposition::Proceed);
        assert_eq!(status(&tx).await.phase, MonitorPhase::Disabled);

        tx.send(MonitorCommand::SetEnabled(true)).await.unwrap();
        tx.send(MonitorCommand::SetLayer {
            layer: Layer::ContextMenu,
            enabled: false,
        })
        .await
        .unwrap();
        let d = send_event(&tx, ViewerEvent::ContextMenu).await;
        assert_eq!(d, Disposition::Proceed);
        assert!(sink.is_empty());

        drop(tx);
        let monitor = handle.await.unwrap();
        assert!(monitor.host().listeners.is_empty());
    }
}
