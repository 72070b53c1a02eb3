//! Engine façade wiring config, registry, scheduler and resolver together

use crate::{
    EngineConfig, ErrorHook, HintRel, Host, IdleHandle, LinkBuilder, LoaderError, NavTarget,
    PathResolver, PreloadPolicy, PreloadRegistry, PreloadScheduler, PreloadStatus, RegistryStats,
    Result, RouteKey, RouteModules, Trigger, VisibleObservation,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

/// Builder for [`PreloadEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    on_error: Option<ErrorHook>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    /// Report loader failures to `hook`
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RouteKey, &LoaderError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Runtime for work started from host threads
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the config and build the engine
    pub fn build(self) -> Result<PreloadEngine> {
        self.config.validate()?;
        let resolver = Arc::new(self.config.resolver()?);
        let registry = Arc::new(PreloadRegistry::new());

        let mut scheduler = PreloadScheduler::new(registry.clone())
            .with_idle_fallback(self.config.idle_fallback())
            .with_visible_threshold(self.config.visible_threshold);
        if let Some(hook) = self.on_error {
            scheduler = scheduler.with_error_hook(hook);
        }
        if let Some(handle) = self.runtime {
            scheduler = scheduler.with_runtime(handle);
        }
        scheduler.configure(RouteModules::new(), self.config.policies.clone());

        Ok(PreloadEngine {
            config: self.config,
            registry,
            scheduler: Arc::new(scheduler),
            resolver,
            applied_hints: Mutex::new(HashSet::new()),
        })
    }
}

/// Navigation prefetch engine.
///
/// One instance per application. Everything it owns is shared through
/// `Arc`s, so links and strategies created from it see one registry.
pub struct PreloadEngine {
    config: EngineConfig,
    registry: Arc<PreloadRegistry>,
    scheduler: Arc<PreloadScheduler>,
    resolver: Arc<PathResolver>,
    applied_hints: Mutex<HashSet<(HintRel, String)>>,
}

impl PreloadEngine {
    /// Build an engine from `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start a builder
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            on_error: None,
            runtime: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared scheduler
    pub fn scheduler(&self) -> &Arc<PreloadScheduler> {
        &self.scheduler
    }

    /// Shared path resolver
    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    /// Replace the route map and policy list
    pub fn configure(&self, routes: RouteModules, policies: Vec<PreloadPolicy>) {
        self.scheduler.configure(routes, policies);
    }

    /// Replace the route map, keeping the current policies
    pub fn register_routes(&self, routes: RouteModules) {
        let policies = self.scheduler.policies().as_ref().clone();
        self.scheduler.configure(routes, policies);
    }

    /// Start a link trigger for `to` with the configured delay
    pub fn link(&self, to: impl Into<NavTarget>) -> LinkBuilder {
        LinkBuilder::new(self.scheduler.clone(), self.resolver.clone(), to)
            .with_delay(self.config.preload_delay())
    }

    /// Route key a navigation target resolves to
    pub fn resolve(&self, to: &NavTarget) -> Option<RouteKey> {
        self.resolver
            .resolve(to, &self.scheduler.routes())
            .map(|(key, _)| key)
    }

    /// Warm a configured route key and wait for it to settle
    pub async fn preload(&self, key: &str) {
        self.scheduler.preload(key).await;
    }

    /// Resolve a navigation target and warm its route
    pub async fn preload_target(&self, to: impl Into<NavTarget>) {
        let to = to.into();
        let routes = self.scheduler.routes();
        match self.resolver.resolve(&to, &routes) {
            Some((key, loader)) => self.scheduler.preload_with(key, loader).await,
            None => trace!("'{}' does not resolve to a route", to.pathname()),
        }
    }

    /// Dispatch a strategy without waiting
    pub fn run_strategy(&self, trigger: Trigger) -> Vec<RouteKey> {
        self.scheduler.run_strategy(trigger)
    }

    /// Policies a strategy would dispatch, in order
    pub fn plan(&self, trigger: Trigger) -> Vec<PreloadPolicy> {
        self.scheduler.plan(trigger)
    }

    /// Whether `key` has finished loading
    pub fn is_preloaded(&self, key: &str) -> bool {
        self.registry.has(key)
    }

    /// Snapshot of loaded and in-flight keys
    pub fn preloading_status(&self) -> PreloadStatus {
        self.registry.status()
    }

    /// Forget every loaded and in-flight key
    pub fn clear_preload_cache(&self) {
        self.registry.clear();
    }

    /// Registry counters
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Start the engine against `host`.
    ///
    /// Applies resource hints, dispatches the immediate strategy, schedules
    /// the idle strategy and starts visible-link observation. Dropping the
    /// returned guard stops the idle and visible strategies.
    pub fn initialize(&self, host: &dyn Host) -> Teardown {
        let hints = self.apply_resource_hints(host);
        let immediate = self.scheduler.run_strategy(Trigger::Immediate);
        let idle = self.scheduler.schedule_idle(host);
        let visible = self.scheduler.observe_visible(host, &self.resolver);

        info!(
            "Prefetch engine initialized: {} hints, {} immediate loads, {} anchors observed",
            hints,
            immediate.len(),
            visible.watched()
        );

        Teardown {
            immediate,
            hints,
            idle,
            visible,
            torn_down: AtomicBool::new(false),
        }
    }

    fn apply_resource_hints(&self, host: &dyn Host) -> usize {
        let mut applied = self.applied_hints.lock();
        let mut count = 0;

        for hint in &self.config.resource_hints {
            if !applied.insert((hint.rel, hint.href.clone())) {
                trace!("Skipping duplicate {} hint for {}", hint.rel, hint.href);
                continue;
            }
            host.add_resource_hint(hint);
            count += 1;
        }

        if count > 0 {
            debug!("Applied {} resource hints", count);
        }
        count
    }
}

impl std::fmt::Debug for PreloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadEngine")
            .field("routes", &self.scheduler.routes().len())
            .field("policies", &self.scheduler.policies().len())
            .field("stats", &self.registry.stats())
            .finish()
    }
}

/// Guard returned by [`PreloadEngine::initialize`]
#[must_use = "dropping the guard stops the idle and visible strategies"]
#[derive(Debug)]
pub struct Teardown {
    immediate: Vec<RouteKey>,
    hints: usize,
    idle: IdleHandle,
    visible: VisibleObservation,
    torn_down: AtomicBool,
}

impl Teardown {
    /// Keys whose loaders the immediate strategy started
    pub fn immediate(&self) -> &[RouteKey] {
        &self.immediate
    }

    /// Resource hints applied during initialization
    pub fn hints_applied(&self) -> usize {
        self.hints
    }

    /// Visible-link observation
    pub fn visible(&self) -> &VisibleObservation {
        &self.visible
    }

    /// Pending idle strategy
    pub fn idle(&self) -> &IdleHandle {
        &self.idle
    }

    /// Cancel the idle strategy and disconnect the observer. Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.idle.cancel();
        self.visible.teardown();
        debug!("Prefetch engine torn down");
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.teardown();
    }
}
