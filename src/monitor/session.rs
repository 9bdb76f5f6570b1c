use serde::Serialize;

use super::banner::ViolationBanner;

/// Observable protection state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPhase {
    Disabled,
    /// Enabled and secure.
    Armed,
    /// Enabled, at least one invariant term violated.
    Alerted,
}

/// Per-viewer security state. Created on start, dropped on stop.
#[derive(Debug)]
pub struct SecuritySession {
    pub is_focused: bool,
    pub devtools_suspected: bool,
    pub trigger_count: u64,
    pub(super) banner: ViolationBanner,
}

impl Default for SecuritySession {
    fn default() -> Self {
        Self {
            is_focused: true,
            devtools_suspected: false,
            trigger_count: 0,
            banner: ViolationBanner::default(),
        }
    }
}

impl SecuritySession {
    pub fn active_violation_message(&self) -> Option<&str> {
        self.banner.message()
    }

    /// Pure function of the current flags; safe under any interleaving.
    pub fn is_secure(&self) -> bool {
        self.is_focused && !self.devtools_suspected && !self.banner.is_active()
    }

    pub fn phase(&self) -> MonitorPhase {
        if self.is_secure() {
            MonitorPhase::Armed
        } else {
            MonitorPhase::Alerted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_secure() {
        let session = SecuritySession::default();
        assert!(session.is_secure());
        assert_eq!(session.phase(), MonitorPhase::Armed);
    }

    #[test]
    fn every_term_matters() {
        // All 8 flag combinations: secure only when every term holds.
        for bits in 0u8..8 {
            let mut session = SecuritySession {
                is_focused: bits & 1 != 0,
                devtools_suspected: bits & 2 != 0,
                ..SecuritySession::default()
            };
            if bits & 4 != 0 {
                session.banner.raise("blocked");
            }
            let expected =
                session.is_focused && !session.devtools_suspected && session.banner.message().is_none();
            assert_eq!(session.is_secure(), expected, "bits={bits:03b}");
        }
    }
}
