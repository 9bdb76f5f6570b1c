//! Deadline-ordered queue for the monitor's fire-and-forget timers.
//!
//! Time is an offset from session start so the monitor stays independent
//! of any particular clock.

use std::collections::BTreeMap;
use std::time::Duration;

use super::visibility::RestoreTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    Restore(RestoreTicket),
    ExpireBanner(u64),
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<(Duration, u64), TimerTask>,
    seq: u64,
}

impl TimerQueue {
    /// Timers with equal deadlines fire in scheduling order.
    pub fn schedule(&mut self, due: Duration, task: TimerTask) {
        self.seq += 1;
        self.entries.insert((due, self.seq), task);
    }

    pub fn pop_due(&mut self, now: Duration) -> Option<TimerTask> {
        let (&key, _) = self.entries.first_key_value()?;
        if key.0 > now {
            return None;
        }
        self.entries.remove(&key)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.first_key_value().map(|(&(due, _), _)| due)
    }
}
