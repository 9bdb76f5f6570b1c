//! DevTools and abnormal-resize heuristics.
//!
//! Every signal here may produce false positives. They are deterrent
//! signals, not proofs, and none of them is ever treated as an error.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::MonitorConfig;

/// Width/height in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One sample of the three DevTools signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevtoolsSample {
    pub outer: Size,
    pub inner: Size,
    /// Time spent on a formatted console write followed by a clear.
    #[serde(default, with = "millis")]
    pub console_probe: Duration,
    /// Time elapsed across a breakpoint-sensitive checkpoint.
    #[serde(default, with = "millis")]
    pub debugger_checkpoint: Duration,
}

/// Which signal tripped the DevTools verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Size,
    Console,
    Debugger,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub size_px: u32,
    pub console: Duration,
    pub debugger: Duration,
    pub resize_px: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for Thresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            size_px: config.devtools_size_threshold_px,
            console: Duration::from_millis(config.console_timing_threshold_ms),
            debugger: Duration::from_millis(config.debugger_pause_threshold_ms),
            resize_px: config.large_resize_threshold_px,
        }
    }
}

/// Evaluate a sample. Returns the first true signal in priority order
/// geometry > console timing > debugger pause.
pub fn evaluate(sample: &DevtoolsSample, thresholds: &Thresholds) -> Option<DetectionMethod> {
    let width_gap = sample.outer.width.saturating_sub(sample.inner.width);
    let height_gap = sample.outer.height.saturating_sub(sample.inner.height);

    if width_gap > thresholds.size_px || height_gap > thresholds.size_px {
        Some(DetectionMethod::Size)
    } else if sample.console_probe > thresholds.console {
        Some(DetectionMethod::Console)
    } else if sample.debugger_checkpoint > thresholds.debugger {
        Some(DetectionMethod::Debugger)
    } else {
        None
    }
}

/// Change of the DevTools verdict produced by one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened(DetectionMethod),
    Closed,
    Unchanged,
}

/// Edge-triggered DevTools verdict.
#[derive(Debug, Default)]
pub struct DevtoolsDetector {
    suspected: bool,
}

impl DevtoolsDetector {
    pub fn suspected(&self) -> bool {
        self.suspected
    }

    pub fn observe(&mut self, sample: &DevtoolsSample, thresholds: &Thresholds) -> Transition {
        match (self.suspected, evaluate(sample, thresholds)) {
            (false, Some(method)) => {
                self.suspected = true;
                Transition::Opened(method)
            }
            (true, None) => {
                self.suspected = false;
                Transition::Closed
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn reset(&mut self) {
        self.suspected = false;
    }
}

/// A resize whose width or height jumped past the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeJump {
    pub width_change: u32,
    pub height_change: u32,
    pub new_size: Size,
}

/// Level-triggered resize tracking with unconditional rebasing.
#[derive(Debug)]
pub struct ResizeTracker {
    last: Size,
}

impl ResizeTracker {
    pub fn new(initial: Size) -> Self {
        Self { last: initial }
    }

    pub fn last(&self) -> Size {
        self.last
    }

    pub fn on_resize(&mut self, outer: Size, threshold_px: u32) -> Option<ResizeJump> {
        let width_change = outer.width.abs_diff(self.last.width);
        let height_change = outer.height.abs_diff(self.last.height);
        self.last = outer;

        (width_change > threshold_px || height_change > threshold_px).then_some(ResizeJump {
            width_change,
            height_change,
            new_size: outer,
        })
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
