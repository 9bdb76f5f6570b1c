//! Imperative show/hide of the protected region.
//!
//! Hiding is synchronous. Showing is always delayed through the monitor's
//! timer queue; the controller only hands out tickets and validates them
//! when the timer fires.

use tracing::debug;

/// The element that renders the protected document.
pub trait ProtectedSurface {
    fn set_opacity(&mut self, opacity: f32);

    /// Blur radius in pixels; 0 removes the filter.
    fn set_blur(&mut self, px: u32);
}

/// Permission to restore the surface, valid until the next hide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreTicket {
    epoch: u64,
}

#[derive(Debug)]
pub struct VisibilityController {
    epoch: u64,
    hidden: bool,
    blur_px: u32,
}

impl VisibilityController {
    pub fn new(blur_px: u32) -> Self {
        Self {
            epoch: 0,
            hidden: false,
            blur_px,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn hide_instantly<S: ProtectedSurface + ?Sized>(&mut self, surface: &mut S) {
        self.epoch += 1;
        self.hidden = true;
        surface.set_opacity(0.0);
        surface.set_blur(self.blur_px);
    }

    /// Ticket for a delayed restore scheduled now.
    pub fn ticket(&self) -> RestoreTicket {
        RestoreTicket { epoch: self.epoch }
    }

    /// Apply a restore whose timer elapsed. A hide issued after the ticket
    /// was taken invalidates it. Returns whether the surface was restored.
    pub fn restore<S: ProtectedSurface + ?Sized>(
        &mut self,
        ticket: RestoreTicket,
        surface: &mut S,
    ) -> bool {
        if ticket.epoch != self.epoch {
            debug!(
                ticket = ticket.epoch,
                current = self.epoch,
                "Skipping stale restore"
            );
            return false;
        }
        self.hidden = false;
        surface.set_opacity(1.0);
        surface.set_blur(0);
        true
    }
}
