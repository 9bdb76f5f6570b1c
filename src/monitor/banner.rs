//! Violation banner: one message at a time, last write wins.

/// Transient "action blocked" message.
///
/// Each raise bumps a generation; the expiry timer scheduled for an older
/// generation is ignored, which restarts the display window on overwrite.
#[derive(Debug, Default)]
pub struct ViolationBanner {
    message: Option<String>,
    generation: u64,
}

impl ViolationBanner {
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.message.is_some()
    }

    /// Show `message`, replacing any pending one. Returns the generation the
    /// caller must pass to [`expire`](Self::expire) when the window elapses.
    pub fn raise(&mut self, message: impl Into<String>) -> u64 {
        self.generation += 1;
        self.message = Some(message.into());
        self.generation
    }

    pub fn expire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.message.is_none() {
            return false;
        }
        self.message = None;
        true
    }
}
