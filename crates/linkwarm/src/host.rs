//! Host environment capabilities consumed by the engine
//!
//! The engine never talks to a document directly. A [`Host`] hands out the
//! rendered anchors and, when it can, an intersection observer and an idle
//! callback. Missing capabilities are reported by returning `None` / `false`
//! and the engine degrades instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque identity of a rendered anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub u64);

/// A navigable anchor currently in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Element identity
    pub id: AnchorId,
    /// Raw navigation target
    pub href: String,
}

impl Anchor {
    /// Create an anchor
    pub fn new(id: u64, href: impl Into<String>) -> Self {
        Self {
            id: AnchorId(id),
            href: href.into(),
        }
    }
}

/// One intersection change reported by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    /// Anchor whose visibility changed
    pub anchor: AnchorId,
    /// Whether the anchor crossed the observer threshold into view
    pub is_intersecting: bool,
    /// Visible fraction (0.0 - 1.0)
    pub ratio: f32,
}

/// Callback receiving batches of intersection changes
pub type IntersectionCallback = Arc<dyn Fn(&[IntersectionEntry]) + Send + Sync>;

/// Work scheduled for an idle period
pub type IdleTask = Box<dyn FnOnce() + Send + 'static>;

/// Live intersection observer owned by the host
pub trait IntersectionObserver: Send + Sync {
    /// Start watching an anchor
    fn observe(&self, anchor: AnchorId);

    /// Stop watching an anchor
    fn unobserve(&self, anchor: AnchorId);

    /// Stop watching everything; no callbacks are delivered afterwards
    fn disconnect(&self);
}

/// Relationship of a resource hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HintRel {
    /// Open a connection early
    Preconnect,
    /// Resolve DNS early
    DnsPrefetch,
    /// Fetch at low priority for a likely next navigation
    Prefetch,
    /// Fetch now for the current navigation
    Preload,
}

impl fmt::Display for HintRel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rel = match self {
            HintRel::Preconnect => "preconnect",
            HintRel::DnsPrefetch => "dns-prefetch",
            HintRel::Prefetch => "prefetch",
            HintRel::Preload => "preload",
        };
        f.write_str(rel)
    }
}

/// A `<link rel=...>` style hint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHint {
    /// Hint relationship
    pub rel: HintRel,
    /// Target URL or origin
    pub href: String,
    /// Destination type for preload hints (`script`, `style`, `font`, ...)
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_type: Option<String>,
    /// Request with CORS credentials mode
    #[serde(default)]
    pub crossorigin: bool,
}

impl ResourceHint {
    /// Create a hint
    pub fn new(rel: HintRel, href: impl Into<String>) -> Self {
        Self {
            rel,
            href: href.into(),
            as_type: None,
            crossorigin: false,
        }
    }

    /// Set the destination type
    pub fn with_as(mut self, as_type: impl Into<String>) -> Self {
        self.as_type = Some(as_type.into());
        self
    }

    /// Request in CORS mode
    pub fn with_crossorigin(mut self) -> Self {
        self.crossorigin = true;
        self
    }
}

/// Environment the engine runs in
pub trait Host: Send + Sync {
    /// Anchors currently rendered
    fn anchors(&self) -> Vec<Anchor>;

    /// Create an intersection observer, or `None` when unsupported
    fn create_intersection_observer(
        &self,
        threshold: f32,
        callback: IntersectionCallback,
    ) -> Option<Box<dyn IntersectionObserver>>;

    /// Run `task` once the host is idle. Returns `false` when the host has no
    /// idle primitive; the task is dropped unrun in that case.
    fn request_idle_callback(&self, task: IdleTask) -> bool;

    /// Insert a resource hint into the document
    fn add_resource_hint(&self, _hint: &ResourceHint) {}
}

/// Host without a document: no anchors, no observer, no idle callback
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessHost;

impl Host for HeadlessHost {
    fn anchors(&self) -> Vec<Anchor> {
        Vec::new()
    }

    fn create_intersection_observer(
        &self,
        _threshold: f32,
        _callback: IntersectionCallback,
    ) -> Option<Box<dyn IntersectionObserver>> {
        None
    }

    fn request_idle_callback(&self, _task: IdleTask) -> bool {
        false
    }
}
