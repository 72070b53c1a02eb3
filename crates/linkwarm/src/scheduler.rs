//! Preload scheduler: dedup, strategies and dispatch
//!
//! # Dispatch
//!
//! ```text
//!  preload(K) ─┐
//!  hover(K) ───┼──> mark_loading(K) ──> loader() ──> await ──> mark_loaded(K)
//!  visible(K) ─┤        │ false                        │ Err
//!  idle(K) ────┘        ↓                              ↓
//!                  return (warm or               mark_failed(K)
//!                  already in flight)            error hook
//! ```
//!
//! The claim and the loader call happen synchronously, before the first
//! await, so racing triggers for one key invoke its loader at most once.

use crate::{
    AnchorId, Host, IntersectionCallback, IntersectionEntry, IntersectionObserver, LoaderError,
    LoaderFn, LoaderFuture, PathResolver, PreloadPolicy, PreloadRegistry, RouteKey, RouteModules,
    Trigger,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default delay before the idle strategy runs on hosts without an idle callback
pub const DEFAULT_IDLE_FALLBACK: Duration = Duration::from_millis(2000);

/// Default visible fraction at which an anchor counts as on screen
pub const DEFAULT_VISIBLE_THRESHOLD: f32 = 0.5;

/// Observer for loader failures. Called after the key is demoted.
pub type ErrorHook = Arc<dyn Fn(&RouteKey, &LoaderError) + Send + Sync>;

struct SchedulerState {
    routes: Arc<RouteModules>,
    policies: Arc<Vec<PreloadPolicy>>,
}

/// Coordinates route loaders, policies and the registry
pub struct PreloadScheduler {
    registry: Arc<PreloadRegistry>,
    state: RwLock<SchedulerState>,
    on_error: Option<ErrorHook>,
    idle_fallback: Duration,
    visible_threshold: f32,
    idle_scheduled: AtomicBool,
    /// Runtime captured at construction, used when called from host threads
    runtime: Option<Handle>,
}

/// Demotes a claimed key if its load is dropped before settling.
///
/// Created together with the claim, so a settle task that is never polled
/// still releases the key.
struct InFlight {
    registry: Arc<PreloadRegistry>,
    key: RouteKey,
    settled: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            trace!("Load of '{}' abandoned before settling", self.key);
            self.registry.mark_failed(&self.key);
        }
    }
}

impl PreloadScheduler {
    /// Create a scheduler with no routes or policies
    pub fn new(registry: Arc<PreloadRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(SchedulerState {
                routes: Arc::new(RouteModules::new()),
                policies: Arc::new(Vec::new()),
            }),
            on_error: None,
            idle_fallback: DEFAULT_IDLE_FALLBACK,
            visible_threshold: DEFAULT_VISIBLE_THRESHOLD,
            idle_scheduled: AtomicBool::new(false),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Report loader failures to `hook`
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Set the idle fallback delay
    pub fn with_idle_fallback(mut self, delay: Duration) -> Self {
        self.idle_fallback = delay;
        self
    }

    /// Set the intersection threshold for the visible strategy
    pub fn with_visible_threshold(mut self, threshold: f32) -> Self {
        self.visible_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Use `handle` for fire-and-forget work started outside a runtime
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Replace the route map and policy list
    pub fn configure(&self, routes: RouteModules, policies: Vec<PreloadPolicy>) {
        info!(
            "Configured {} routes, {} preload policies",
            routes.len(),
            policies.len()
        );
        let mut state = self.state.write();
        state.routes = Arc::new(routes);
        state.policies = Arc::new(policies);
    }

    /// Active route map
    pub fn routes(&self) -> Arc<RouteModules> {
        self.state.read().routes.clone()
    }

    /// Active policy list
    pub fn policies(&self) -> Arc<Vec<PreloadPolicy>> {
        self.state.read().policies.clone()
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<PreloadRegistry> {
        &self.registry
    }

    /// Claim `key` and invoke its loader, or `None` if warm or in flight
    fn begin(&self, key: &RouteKey, loader: &LoaderFn) -> Option<(InFlight, LoaderFuture)> {
        if !self.registry.mark_loading(key) {
            return None;
        }
        let in_flight = InFlight {
            registry: Arc::clone(&self.registry),
            key: key.clone(),
            settled: false,
        };
        debug!("Preloading '{}'", key);
        Some((in_flight, loader()))
    }

    async fn settle(&self, mut in_flight: InFlight, load: LoaderFuture) {
        let result = load.await;
        in_flight.settled = true;

        match result {
            Ok(()) => {
                self.registry.mark_loaded(&in_flight.key);
                debug!("Preloaded '{}'", in_flight.key);
            }
            Err(err) => {
                self.registry.mark_failed(&in_flight.key);
                debug!("Preload of '{}' did not complete", in_flight.key);
                if let Some(hook) = &self.on_error {
                    hook(&in_flight.key, &err);
                }
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<(RouteKey, LoaderFn)> {
        let routes = self.routes();
        let found = routes
            .get_entry(key)
            .map(|(key, loader)| (key.clone(), loader.clone()));
        if found.is_none() {
            trace!("No loader registered for '{}'", key);
        }
        found
    }

    /// Warm a configured route and wait for it to settle.
    ///
    /// Returns immediately when the key is unknown, warm or already in
    /// flight. Loader failures are swallowed.
    pub async fn preload(&self, key: &str) {
        if let Some((key, loader)) = self.lookup(key) {
            self.preload_with(key, loader).await;
        }
    }

    /// Warm `key` with an explicit loader and wait for it to settle
    pub async fn preload_with(&self, key: RouteKey, loader: LoaderFn) {
        if let Some((in_flight, load)) = self.begin(&key, &loader) {
            self.settle(in_flight, load).await;
        }
    }

    /// Runtime for spawned work: the caller's, else the captured one
    pub(crate) fn runtime(&self) -> Option<Handle> {
        Handle::try_current().ok().or_else(|| self.runtime.clone())
    }

    fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Some(self.runtime()?.spawn(task))
    }

    /// Fire-and-forget variant of [`preload_with`](Self::preload_with).
    ///
    /// The loader is invoked before this returns; its completion runs on
    /// the tokio runtime. Returns `None` when nothing was started.
    pub fn dispatch_with(
        self: &Arc<Self>,
        key: RouteKey,
        loader: LoaderFn,
    ) -> Option<JoinHandle<()>> {
        if self.runtime().is_none() {
            warn!("No tokio runtime available, skipping preload of '{}'", key);
            return None;
        }

        let (in_flight, load) = self.begin(&key, &loader)?;
        let scheduler = Arc::clone(self);
        self.spawn(async move { scheduler.settle(in_flight, load).await })
    }

    /// Fire-and-forget variant of [`preload`](Self::preload)
    pub fn dispatch(self: &Arc<Self>, key: &str) -> Option<JoinHandle<()>> {
        let (key, loader) = self.lookup(key)?;
        self.dispatch_with(key, loader)
    }

    /// Enabled policies for `trigger`, highest priority first.
    ///
    /// The sort is stable: equal priorities keep their configured order.
    pub fn plan(&self, trigger: Trigger) -> Vec<PreloadPolicy> {
        let mut selected: Vec<PreloadPolicy> = self
            .policies()
            .iter()
            .filter(|policy| policy.applies_to(trigger))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority));
        selected
    }

    /// Dispatch every enabled policy of a strategy without waiting.
    ///
    /// Returns the keys whose loaders were started, in dispatch order.
    pub fn run_strategy(self: &Arc<Self>, trigger: Trigger) -> Vec<RouteKey> {
        let plan = self.plan(trigger);
        let mut started = Vec::new();

        for policy in &plan {
            if self.dispatch(policy.route.as_str()).is_some() {
                started.push(policy.route.clone());
            }
        }

        debug!(
            "Strategy '{}': {} policies, {} loads started",
            trigger,
            plan.len(),
            started.len()
        );
        started
    }

    /// Run the idle strategy once the host is idle.
    ///
    /// One-shot per scheduler: later calls return an inert handle. Hosts
    /// without an idle callback get a fixed-delay fallback.
    pub fn schedule_idle(self: &Arc<Self>, host: &dyn Host) -> IdleHandle {
        if self.idle_scheduled.swap(true, Ordering::SeqCst) {
            debug!("Idle strategy already scheduled");
            return IdleHandle::inert();
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let make_task = || {
            let scheduler: Weak<Self> = Arc::downgrade(self);
            let cancelled = cancelled.clone();
            move || {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.run_strategy(Trigger::Idle);
                }
            }
        };

        if host.request_idle_callback(Box::new(make_task())) {
            trace!("Idle strategy queued on host idle callback");
            return IdleHandle {
                cancelled,
                fallback: None,
            };
        }

        let delay = self.idle_fallback;
        let task = make_task();
        let fallback = self.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });

        if fallback.is_none() {
            self.idle_scheduled.store(false, Ordering::SeqCst);
            warn!("No tokio runtime available, idle strategy not scheduled");
            return IdleHandle::inert();
        }
        trace!("Idle strategy falls back to a {:?} timer", delay);

        IdleHandle {
            cancelled,
            fallback,
        }
    }

    /// Warm `visible` routes as their anchors scroll into view.
    ///
    /// Observes every host anchor whose href resolves into the route map.
    /// Each anchor triggers at most once and is unobserved on its first
    /// intersection.
    pub fn observe_visible(
        self: &Arc<Self>,
        host: &dyn Host,
        resolver: &PathResolver,
    ) -> VisibleObservation {
        let routes = self.routes();
        let watched: Arc<DashMap<AnchorId, RouteKey>> = Arc::new(DashMap::new());

        for anchor in host.anchors() {
            if let Some(key) = resolver.resolve_key(&anchor.href, &routes) {
                watched.insert(anchor.id, key);
            }
        }

        if watched.is_empty() {
            trace!("No routed anchors to observe");
            return VisibleObservation::inert();
        }

        let slot: Arc<OnceLock<Box<dyn IntersectionObserver>>> = Arc::new(OnceLock::new());
        let callback: IntersectionCallback = {
            let scheduler = Arc::downgrade(self);
            let watched = watched.clone();
            let slot = slot.clone();
            Arc::new(move |entries: &[IntersectionEntry]| {
                for entry in entries.iter().filter(|entry| entry.is_intersecting) {
                    let Some((anchor, key)) = watched.remove(&entry.anchor) else {
                        continue;
                    };
                    if let Some(observer) = slot.get() {
                        observer.unobserve(anchor);
                    }
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.warm_visible(&key);
                    }
                }
            })
        };

        let Some(observer) = host.create_intersection_observer(self.visible_threshold, callback)
        else {
            debug!("Intersection observer unavailable, visible strategy disabled");
            return VisibleObservation::inert();
        };

        let ids: Vec<AnchorId> = watched.iter().map(|entry| *entry.key()).collect();
        let observer: &dyn IntersectionObserver = slot.get_or_init(|| observer).as_ref();
        for id in &ids {
            observer.observe(*id);
        }

        debug!("Observing {} anchors for visibility", ids.len());
        VisibleObservation {
            observer: Some(slot),
            watched,
            disconnected: AtomicBool::new(false),
        }
    }

    fn warm_visible(self: &Arc<Self>, key: &RouteKey) {
        let enabled = self
            .policies()
            .iter()
            .any(|policy| policy.route == *key && policy.applies_to(Trigger::Visible));

        if enabled {
            self.dispatch(key.as_str());
        } else {
            trace!("'{}' scrolled into view without an enabled visible policy", key);
        }
    }
}

/// Pending idle strategy
#[derive(Debug)]
pub struct IdleHandle {
    cancelled: Arc<AtomicBool>,
    fallback: Option<JoinHandle<()>>,
}

impl IdleHandle {
    fn inert() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
            fallback: None,
        }
    }

    /// Prevent the idle strategy from running if it has not run yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(fallback) = &self.fallback {
            fallback.abort();
        }
    }

    /// Whether the handle has been cancelled (or never scheduled anything)
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Active visible-link observation; dropping it disconnects the observer
#[must_use = "dropping the observation disconnects the intersection observer"]
pub struct VisibleObservation {
    observer: Option<Arc<OnceLock<Box<dyn IntersectionObserver>>>>,
    watched: Arc<DashMap<AnchorId, RouteKey>>,
    disconnected: AtomicBool,
}

impl VisibleObservation {
    fn inert() -> Self {
        Self {
            observer: None,
            watched: Arc::new(DashMap::new()),
            disconnected: AtomicBool::new(true),
        }
    }

    /// Whether an observer was created
    pub fn is_active(&self) -> bool {
        self.observer.is_some() && !self.disconnected.load(Ordering::SeqCst)
    }

    /// Anchors still waiting for their first intersection
    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Disconnect the observer. Idempotent.
    pub fn teardown(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watched.clear();
        if let Some(observer) = self.observer.as_ref().and_then(|slot| slot.get()) {
            observer.disconnect();
        }
        debug!("Visible-link observer disconnected");
    }
}

impl Drop for VisibleObservation {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for VisibleObservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibleObservation")
            .field("active", &self.is_active())
            .field("watched", &self.watched.len())
            .finish()
    }
}
