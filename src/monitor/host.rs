//! The seams between the monitor and the page it protects.
//!
//! A browser binding implements [`ViewerHost`] over the DOM; the
//! [`HeadlessHost`] implementation backs trace replay and tests.

use std::collections::BTreeSet;

use super::heuristics::{DevtoolsSample, Size};
use super::layers::Layer;
use super::visibility::ProtectedSurface;

#[derive(Debug, thiserror::Error)]
#[error("clipboard unavailable: {0}")]
pub struct ClipboardUnavailable(pub String);

pub trait Clipboard {
    /// Best-effort overwrite. Callers discard the error.
    fn overwrite_clipboard(&mut self, text: &str) -> Result<(), ClipboardUnavailable>;
}

pub trait ViewportProbe {
    /// Take one DevTools heuristic sample (geometry plus probe timings).
    fn sample_devtools(&mut self) -> DevtoolsSample;

    fn outer_size(&self) -> Size;
}

/// Registration of the host-side listeners a layer needs.
///
/// The monitor guarantees balanced calls: `unlisten` only follows a
/// matching `listen`.
pub trait ListenerRegistry {
    fn listen(&mut self, layer: Layer);
    fn unlisten(&mut self, layer: Layer);
}

pub trait ViewerHost: ProtectedSurface + Clipboard + ViewportProbe + ListenerRegistry + Send {
    fn page_url(&self) -> String;
    fn user_agent(&self) -> String;
}

/// In-memory host with observable state.
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    pub opacity: f32,
    pub blur_px: u32,
    pub listeners: BTreeSet<Layer>,
    pub clipboard: Option<String>,
    pub clipboard_available: bool,
    pub sample: DevtoolsSample,
    pub url: String,
    pub agent: String,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        let outer = Size::new(1280, 800);
        Self {
            opacity: 1.0,
            blur_px: 0,
            listeners: BTreeSet::new(),
            clipboard: None,
            clipboard_available: true,
            sample: DevtoolsSample {
                outer,
                inner: Size::new(1280, 720),
                ..DevtoolsSample::default()
            },
            url: "about:blank".to_string(),
            agent: format!("docguard-headless/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ProtectedSurface for HeadlessHost {
    fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity;
    }

    fn set_blur(&mut self, px: u32) {
        self.blur_px = px;
    }
}

impl Clipboard for HeadlessHost {
    fn overwrite_clipboard(&mut self, text: &str) -> Result<(), ClipboardUnavailable> {
        if !self.clipboard_available {
            return Err(ClipboardUnavailable("permission denied".to_string()));
        }
        self.clipboard = Some(text.to_string());
        Ok(())
    }
}

impl ViewportProbe for HeadlessHost {
    fn sample_devtools(&mut self) -> DevtoolsSample {
        self.sample
    }

    fn outer_size(&self) -> Size {
        self.sample.outer
    }
}

impl ListenerRegistry for HeadlessHost {
    fn listen(&mut self, layer: Layer) {
        self.listeners.insert(layer);
    }

    fn unlisten(&mut self, layer: Layer) {
        self.listeners.remove(&layer);
    }
}

impl ViewerHost for HeadlessHost {
    fn page_url(&self) -> String {
        self.url.clone()
    }

    fn user_agent(&self) -> String {
        self.agent.clone()
    }
}
