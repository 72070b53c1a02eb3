//! Link-level hover/focus prefetch trigger
//!
//! Each mounted link owns one [`PreloadTrigger`]:
//!
//! ```text
//!            hover / focus            delay elapsed           settled
//!   Idle ─────────────────> Armed ───────────────> Dispatched ───────> Idle
//!    ↑                        │
//!    └────── leave / blur ────┘   (timer cancelled, loader never called)
//! ```
//!
//! Dropping the trigger is the unmount: a pending timer is cancelled, a
//! dispatched load runs to completion.

use crate::{
    LoaderFn, NavTarget, NormalizationRule, PathResolver, PreloadScheduler, Result, RouteKey,
    RouteModules, Trigger,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default hover/focus delay before a link dispatches its loader
pub const DEFAULT_PRELOAD_DELAY: Duration = Duration::from_millis(50);

/// Observable phase of a link trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    /// Nothing pending
    Idle,
    /// Timer running
    Armed,
    /// Loader started, not settled yet
    Dispatched,
}

struct TriggerState {
    phase: TriggerPhase,
    /// Bumped on every arm and cancel so a stale timer recognises itself
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Builder for a link trigger
pub struct LinkBuilder {
    scheduler: Arc<PreloadScheduler>,
    resolver: Arc<PathResolver>,
    to: NavTarget,
    loader: Option<LoaderFn>,
    delay: Duration,
    routes: Option<Arc<RouteModules>>,
    language_prefixes: Option<Vec<String>>,
    normalizations: Option<Vec<NormalizationRule>>,
}

impl LinkBuilder {
    /// Start building a trigger for `to`
    pub fn new(
        scheduler: Arc<PreloadScheduler>,
        resolver: Arc<PathResolver>,
        to: impl Into<NavTarget>,
    ) -> Self {
        Self {
            scheduler,
            resolver,
            to: to.into(),
            loader: None,
            delay: DEFAULT_PRELOAD_DELAY,
            routes: None,
            language_prefixes: None,
            normalizations: None,
        }
    }

    /// Use `loader` instead of resolving one from a route map
    pub fn with_loader(mut self, loader: LoaderFn) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the hover/focus delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Resolve against this route map instead of the scheduler's
    pub fn with_routes(mut self, routes: Arc<RouteModules>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Per-link locale prefixes
    pub fn with_language_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.language_prefixes = Some(prefixes.into_iter().map(Into::into).collect());
        self
    }

    /// Per-link normalization rules
    pub fn with_normalizations(mut self, rules: Vec<NormalizationRule>) -> Self {
        self.normalizations = Some(rules);
        self
    }

    /// Mount the trigger.
    ///
    /// Per-link prefixes or normalizations replace the shared resolver's
    /// rules entirely (an unset half is empty); the suffix match policy is
    /// kept.
    pub fn mount(self) -> Result<PreloadTrigger> {
        let resolver = if self.language_prefixes.is_some() || self.normalizations.is_some() {
            let prefixes = self.language_prefixes.unwrap_or_default();
            let rules = self.normalizations.unwrap_or_default();
            let custom = PathResolver::new(prefixes.as_slice(), &rules)?
                .with_suffix_match(self.resolver.suffix_match());
            Arc::new(custom)
        } else {
            self.resolver
        };

        Ok(PreloadTrigger {
            scheduler: self.scheduler,
            target: Arc::new(LinkTarget {
                resolver,
                to: self.to,
                loader: self.loader,
                routes: self.routes,
            }),
            delay: self.delay,
            state: Arc::new(Mutex::new(TriggerState {
                phase: TriggerPhase::Idle,
                generation: 0,
                timer: None,
            })),
        })
    }
}

/// What a link points at and how it resolves
struct LinkTarget {
    resolver: Arc<PathResolver>,
    to: NavTarget,
    loader: Option<LoaderFn>,
    routes: Option<Arc<RouteModules>>,
}

impl LinkTarget {
    /// An explicit loader is keyed by the normalized target path
    fn resolve(&self, scheduler: &PreloadScheduler) -> Option<(RouteKey, LoaderFn)> {
        if let Some(loader) = &self.loader {
            let key = RouteKey::new(self.resolver.normalize(self.to.pathname()));
            return Some((key, loader.clone()));
        }

        let routes = match &self.routes {
            Some(routes) => routes.clone(),
            None => scheduler.routes(),
        };
        self.resolver.resolve(&self.to, &routes)
    }
}

/// Hover/focus prefetch controller for one link
pub struct PreloadTrigger {
    scheduler: Arc<PreloadScheduler>,
    target: Arc<LinkTarget>,
    delay: Duration,
    state: Arc<Mutex<TriggerState>>,
}

impl PreloadTrigger {
    /// Navigation target of the link
    pub fn to(&self) -> &NavTarget {
        &self.target.to
    }

    /// Configured delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Current phase
    pub fn phase(&self) -> TriggerPhase {
        self.state.lock().phase
    }

    /// Key and loader this link would warm right now, if any.
    ///
    /// An explicit loader is keyed by the normalized target path.
    pub fn resolve(&self) -> Option<(RouteKey, LoaderFn)> {
        self.target.resolve(&self.scheduler)
    }

    /// Pointer entered the link
    pub fn on_pointer_enter(&self) -> bool {
        self.arm(Trigger::Hover)
    }

    /// Link gained focus
    pub fn on_focus(&self) -> bool {
        self.arm(Trigger::Focus)
    }

    /// Pointer left the link
    pub fn on_pointer_leave(&self) -> bool {
        self.cancel()
    }

    /// Link lost focus
    pub fn on_blur(&self) -> bool {
        self.cancel()
    }

    /// Unmount the link, cancelling a pending timer
    pub fn unmount(self) {
        drop(self);
    }

    /// Arm the timer. Returns `true` if a timer was started.
    ///
    /// The route is resolved again when the timer fires, so a reconfigured
    /// route map in between is honoured.
    fn arm(&self, cause: Trigger) -> bool {
        let Some((key, _)) = self.resolve() else {
            trace!("No loader for '{}'", self.target.to.pathname());
            return false;
        };

        let registry = self.scheduler.registry();
        if registry.has(key.as_str()) || registry.is_loading(key.as_str()) {
            trace!("'{}' already warm or in flight", key);
            return false;
        }

        let Some(runtime) = self.scheduler.runtime() else {
            warn!("No tokio runtime available, '{}' not armed", key);
            return false;
        };

        let mut state = self.state.lock();
        if state.phase != TriggerPhase::Idle {
            return false;
        }

        state.generation += 1;
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        let target = Arc::clone(&self.target);
        let delay = self.delay;

        trace!("Armed '{}' on {} ({:?})", key, cause, delay);
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let resolved = {
                let mut state = shared.lock();
                if state.generation != generation || state.phase != TriggerPhase::Armed {
                    return;
                }
                state.timer = None;
                let resolved = target.resolve(&scheduler);
                state.phase = match resolved {
                    Some(_) => TriggerPhase::Dispatched,
                    None => TriggerPhase::Idle,
                };
                resolved
            };

            let Some((key, loader)) = resolved else {
                trace!("'{}' no longer resolves, nothing to warm", target.to.pathname());
                return;
            };
            debug!("Hover delay elapsed for '{}'", key);
            scheduler.preload_with(key, loader).await;

            let mut state = shared.lock();
            if state.generation == generation && state.phase == TriggerPhase::Dispatched {
                state.phase = TriggerPhase::Idle;
            }
        }));
        state.phase = TriggerPhase::Armed;
        true
    }

    /// Cancel a pending timer. Returns `true` if one was cancelled.
    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != TriggerPhase::Armed {
            return false;
        }

        state.phase = TriggerPhase::Idle;
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        trace!("Cancelled pending preload for '{}'", self.target.to.pathname());
        true
    }
}

impl Drop for PreloadTrigger {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PreloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadTrigger")
            .field("to", &self.target.to)
            .field("delay", &self.delay)
            .field("override", &self.target.loader.is_some())
            .field("phase", &self.phase())
            .finish()
    }
}
