//! Speculative Navigation Prefetch
//!
//! Warms the code and data behind likely next routes before the user
//! navigates:
//! - Link-level hover/focus triggers with a cancellable delay
//! - Application-level strategies (immediate, idle, visible)
//! - Locale-aware path normalization with suffix fallback
//! - At-most-one in-flight load per route, failures retried on next trigger
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PreloadEngine                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Link hover ──> PreloadTrigger ──┐                           │
//! │  (50ms delay)   idle/armed/...   │                           │
//! │                                  ↓                           │
//! │  "/es/dashboard/acme/projects" ──> PathResolver              │
//! │                                    "/dashboard/projects"     │
//! │                                  │                           │
//! │  immediate / idle / visible ──> PreloadScheduler ──> loader  │
//! │                                  │                           │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              PreloadRegistry                          │   │
//! │  │   Loaded:  [/dashboard/projects]                      │   │
//! │  │   Loading: [/travel/trips]                            │   │
//! │  │   Cold:    everything else (failures land here)       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use linkwarm::{loader_fn, EngineConfig, HeadlessHost, PreloadEngine, RouteModules};
//!
//! # async fn run() -> linkwarm::Result<()> {
//! let engine = PreloadEngine::new(EngineConfig::from_file("linkwarm.json")?)?;
//! engine.register_routes(
//!     RouteModules::new().with_route("/dashboard", loader_fn(|| async { Ok(()) })),
//! );
//!
//! let _guard = engine.initialize(&HeadlessHost);
//! let link = engine.link("/en/dashboard").mount()?;
//! link.on_pointer_enter();
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod host;
mod policy;
mod registry;
mod resolver;
mod route;
mod scheduler;
mod trigger;

pub use config::EngineConfig;
pub use engine::{EngineBuilder, PreloadEngine, Teardown};
pub use error::{LoaderError, PrefetchError, Result};
pub use host::{
    Anchor, AnchorId, HeadlessHost, HintRel, Host, IdleTask, IntersectionCallback,
    IntersectionEntry, IntersectionObserver, ResourceHint,
};
pub use policy::{Condition, PreloadPolicy, Priority, Trigger};
pub use registry::{LoadState, PreloadRegistry, PreloadStatus, RegistryStats};
pub use resolver::{NormalizationRule, PathResolver, SuffixMatch};
pub use route::{loader_fn, LoaderFn, LoaderFuture, NavTarget, RouteKey, RouteModules};
pub use scheduler::{
    ErrorHook, IdleHandle, PreloadScheduler, VisibleObservation, DEFAULT_IDLE_FALLBACK,
    DEFAULT_VISIBLE_THRESHOLD,
};
pub use trigger::{LinkBuilder, PreloadTrigger, TriggerPhase, DEFAULT_PRELOAD_DELAY};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        loader_fn, EngineConfig, Host, NavTarget, PreloadEngine, PreloadPolicy, Priority,
        Result, RouteModules, Trigger,
    };
}
