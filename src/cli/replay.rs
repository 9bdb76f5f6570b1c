//! CLI subcommand: `docguard replay <trace.jsonl>`
//!
//! Feeds a recorded viewer trace through a [`SecurityMonitor`] backed by a
//! [`HeadlessHost`] and prints every emitted security event as one JSON
//! line on stdout. A trace line looks like:
//!
//! ```text
//! {"atMs": 0, "event": {"type": "key-down", "key": "p", "ctrl": true}}
//! {"atMs": 250, "sample": {"outer": {"width": 1280, "height": 800}, "inner": {"width": 900, "height": 720}}}
//! {"atMs": 4000}
//! ```
//!
//! `sample` replaces the host's DevTools sample and triggers a poll; a bare
//! `atMs` only advances the clock.

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::monitor::{
    DevtoolsSample, Disposition, EventSink, HeadlessHost, SecurityEvent, SecurityMonitor,
    ViewerEvent,
};

#[derive(Args)]
pub struct ReplayArgs {
    /// Trace file with one JSON step per line ("-" reads stdin)
    pub trace: PathBuf,

    /// Page URL reported in emitted events
    #[arg(long)]
    pub url: Option<String>,

    /// Opaque user info (JSON) attached to emitted events
    #[arg(long)]
    pub user_info: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TraceStep {
    pub at_ms: u64,
    #[serde(default)]
    pub event: Option<ViewerEvent>,
    #[serde(default)]
    pub sample: Option<DevtoolsSample>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub steps: usize,
    pub suppressed: usize,
    pub triggers: u64,
    pub secure_at_end: bool,
}

/// Writes each event as a JSON line.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn submit(&mut self, event: &SecurityEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize {}: {}", event.kind.name(), e);
                return;
            }
        };
        if let Err(e) = writeln!(self.out, "{}", line) {
            warn!("Failed to write event: {}", e);
        }
    }
}

pub fn run(args: ReplayArgs, config: &Config) -> Result<()> {
    let user_info = match args.user_info {
        Some(ref raw) => serde_json::from_str(raw).context("--user-info is not valid JSON")?,
        None => serde_json::Value::Null,
    };

    let mut host = HeadlessHost::default();
    if let Some(url) = args.url {
        host.url = url;
    }

    let mut monitor = SecurityMonitor::new(
        config.monitor.clone(),
        host,
        Box::new(JsonLinesSink::new(io::stdout())),
    )
    .with_user_info(user_info);
    monitor.start();

    let reader: Box<dyn BufRead> = if args.trace.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.trace)
            .with_context(|| format!("Failed to open {}", args.trace.display()))?;
        Box::new(BufReader::new(file))
    };

    let summary = replay(&mut monitor, reader)?;
    info!(
        steps = summary.steps,
        suppressed = summary.suppressed,
        triggers = summary.triggers,
        secure = summary.secure_at_end,
        "Replay finished"
    );
    Ok(())
}

/// Drive a started monitor through a trace. Timestamps must not go
/// backwards.
pub fn replay(
    monitor: &mut SecurityMonitor<HeadlessHost>,
    reader: impl BufRead,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut last = Duration::ZERO;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let step: TraceStep = serde_json::from_str(line)
            .with_context(|| format!("Invalid trace step on line {}", line_no))?;
        let now = Duration::from_millis(step.at_ms);
        if now < last {
            anyhow::bail!(
                "Trace goes back in time on line {} ({} ms < {} ms)",
                line_no,
                step.at_ms,
                last.as_millis()
            );
        }
        last = now;

        if let Some(sample) = step.sample {
            monitor.host_mut().sample = sample;
        }
        if let Some(ref event) = step.event {
            if let ViewerEvent::Resize { outer } = event {
                monitor.host_mut().sample.outer = *outer;
            }
            if monitor.handle(event, now) == Disposition::Suppress {
                summary.suppressed += 1;
            }
        }
        if step.sample.is_some() {
            monitor.poll(now);
        } else if step.event.is_none() {
            monitor.advance(now);
        }

        debug!(at_ms = step.at_ms, phase = ?monitor.phase(), "Step replayed");
        summary.steps += 1;
    }

    summary.triggers = monitor.trigger_count();
    summary.secure_at_end = monitor.is_secure();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::MemorySink;
    use std::io::Cursor;

    fn started(sink: &MemorySink) -> SecurityMonitor<HeadlessHost> {
        let mut monitor = SecurityMonitor::new(
            MonitorConfig::default(),
            HeadlessHost::default(),
            Box::new(sink.clone()),
        );
        monitor.start();
        monitor
    }

    #[test]
    fn replays_blocked_print_and_focus_loss() {
        let sink = MemorySink::default();
        let mut monitor = started(&sink);
        let trace = r#"
# ctrl+P, then a blur/focus round trip
{"atMs": 0, "event": {"type": "key-down", "key": "p", "ctrl": true}}
{"atMs": 100, "event": {"type": "window-blur"}}
{"atMs": 200, "event": {"type": "window-focus"}}
{"atMs": 10000}
"#;

        let summary = replay(&mut monitor, Cursor::new(trace)).unwrap();

        let names: Vec<_> = sink.kinds().iter().map(|k| k.name()).collect();
        assert_eq!(names, ["KEYBOARD_BLOCKED", "FOCUS_LOST"]);
        assert_eq!(summary.steps, 4);
        assert_eq!(summary.suppressed, 1);
        assert_eq!(summary.triggers, 2);
        assert!(summary.secure_at_end);
        assert_eq!(monitor.host().opacity, 1.0);
    }

    #[test]
    fn sample_steps_poll_devtools() {
        let sink = MemorySink::default();
        let mut monitor = started(&sink);
        let trace = r#"
{"atMs": 0, "sample": {"outer": {"width": 1280, "height": 800}, "inner": {"width": 1000, "height": 720}}}
{"atMs": 500, "sample": {"outer": {"width": 1280, "height": 800}, "inner": {"width": 1000, "height": 720}}}
"#;

        let summary = replay(&mut monitor, Cursor::new(trace)).unwrap();

        let names: Vec<_> = sink.kinds().iter().map(|k| k.name()).collect();
        assert_eq!(names, ["DEVTOOLS_DETECTED"]);
        assert!(!summary.secure_at_end);
    }

    #[test]
    fn rejects_time_travel_and_garbage() {
        let sink = MemorySink::default();
        let mut monitor = started(&sink);
        let trace = "{\"atMs\": 50}\n{\"atMs\": 10}\n";
        let err = replay(&mut monitor, Cursor::new(trace)).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let err = replay(&mut monitor, Cursor::new("{\"at\": 1}\n")).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_event() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let event = SecurityEvent {
            kind: crate::monitor::SecurityEventKind::CopyBlocked,
            timestamp: chrono::Utc::now(),
            url: "about:blank".to_string(),
            user_agent: "test".to_string(),
            user_info: serde_json::Value::Null,
        };
        sink.submit(&event);
        sink.submit(&event);

        let out = String::from_utf8(sink.out).unwrap();
        assert_eq!(out.lines().count(), 2);
        let parsed: SecurityEvent = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.kind, event.kind);
    }
}
