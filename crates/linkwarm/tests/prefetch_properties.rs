//! End-to-end behaviour of the prefetch engine against a scripted host.
//!
//! Run with: cargo test -p linkwarm --test prefetch_properties

use linkwarm::{
    loader_fn, Anchor, AnchorId, EngineConfig, Host, IdleTask, IntersectionCallback,
    IntersectionEntry, IntersectionObserver, LoaderError, LoaderFn, NormalizationRule,
    PreloadEngine, PreloadPolicy, PrefetchError, Priority, RouteKey, RouteModules, Trigger,
    TriggerPhase,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Scripted host
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ObserverLog {
    callback: Mutex<Option<IntersectionCallback>>,
    observed: Mutex<HashSet<AnchorId>>,
    unobserved: Mutex<Vec<AnchorId>>,
    disconnected: AtomicBool,
}

struct ManualObserver {
    log: Arc<ObserverLog>,
}

impl IntersectionObserver for ManualObserver {
    fn observe(&self, anchor: AnchorId) {
        self.log.observed.lock().insert(anchor);
    }

    fn unobserve(&self, anchor: AnchorId) {
        self.log.observed.lock().remove(&anchor);
        self.log.unobserved.lock().push(anchor);
    }

    fn disconnect(&self) {
        self.log.observed.lock().clear();
        self.log.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Host whose anchors and intersections are driven by the test
#[derive(Default)]
struct ScriptedHost {
    anchors: Vec<Anchor>,
    observer: Arc<ObserverLog>,
    idle: Mutex<Vec<IdleTask>>,
}

impl ScriptedHost {
    fn with_anchors(anchors: Vec<Anchor>) -> Self {
        Self {
            anchors,
            ..Self::default()
        }
    }

    /// Deliver an intersection for `anchor` if the observer still watches it
    fn scroll_into_view(&self, anchor: u64) {
        let id = AnchorId(anchor);
        if self.observer.disconnected.load(Ordering::SeqCst)
            || !self.observer.observed.lock().contains(&id)
        {
            return;
        }
        let callback = self.observer.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&[IntersectionEntry {
                anchor: id,
                is_intersecting: true,
                ratio: 1.0,
            }]);
        }
    }

    fn run_idle(&self) {
        let tasks: Vec<IdleTask> = self.idle.lock().drain(..).collect();
        for task in tasks {
            task();
        }
    }
}

impl Host for ScriptedHost {
    fn anchors(&self) -> Vec<Anchor> {
        self.anchors.clone()
    }

    fn create_intersection_observer(
        &self,
        _threshold: f32,
        callback: IntersectionCallback,
    ) -> Option<Box<dyn IntersectionObserver>> {
        *self.observer.callback.lock() = Some(callback);
        Some(Box::new(ManualObserver {
            log: self.observer.clone(),
        }))
    }

    fn request_idle_callback(&self, task: IdleTask) -> bool {
        self.idle.lock().push(task);
        true
    }
}

fn counting_loader(calls: Arc<AtomicUsize>) -> LoaderFn {
    loader_fn(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    })
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_preloads_invoke_loader_once() {
    init_tracing();
    let engine = Arc::new(PreloadEngine::new(EngineConfig::default()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    engine.configure(
        RouteModules::new().with_route(
            "/dashboard",
            loader_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            }),
        ),
        vec![],
    );

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.preload("/dashboard").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.is_preloaded("/dashboard"));
    let stats = engine.stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.deduplicated, 15);
}

#[tokio::test(start_paused = true)]
async fn hover_after_immediate_does_not_reload() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/travel", counting_loader(calls.clone())),
        vec![PreloadPolicy::new("/travel", Trigger::Immediate)],
    );

    let _guard = engine.initialize(&ScriptedHost::default());
    settle().await;
    assert!(engine.is_preloaded("/travel"));

    let link = engine.link("/travel").mount().unwrap();
    assert!(!link.on_pointer_enter());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.is_preloaded("/travel"));
}

#[tokio::test(start_paused = true)]
async fn hover_then_immediate_shares_one_load() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/food", counting_loader(calls.clone())),
        vec![],
    );

    let link = engine.link("/food").mount().unwrap();
    assert!(link.on_pointer_enter());
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;

    engine.preload("/food").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.is_preloaded("/food"));
}

#[tokio::test(start_paused = true)]
async fn leave_before_delay_cancels() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/gaming", counting_loader(calls.clone())),
        vec![],
    );
    let link = engine.link("/gaming").mount().unwrap();

    assert!(link.on_pointer_enter());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(link.on_pointer_leave());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(link.phase(), TriggerPhase::Idle);
    assert!(!engine.is_preloaded("/gaming"));
}

#[tokio::test]
async fn locale_and_dynamic_segments_normalize() {
    init_tracing();
    let config = EngineConfig {
        language_prefixes: vec!["en".into(), "es".into()],
        path_normalizations: vec![NormalizationRule::new(r"/dashboard/[^/]+", "/dashboard")],
        ..EngineConfig::default()
    };
    let engine = PreloadEngine::new(config).unwrap();
    let projects = loader_fn(|| async { Ok(()) });
    engine.configure(
        RouteModules::new()
            .with_route("/dashboard", loader_fn(|| async { Ok(()) }))
            .with_route("/dashboard/projects", projects.clone()),
        vec![],
    );

    let (key, loader) = engine
        .resolver()
        .resolve_path("/es/dashboard/acme-corp/projects", &engine.scheduler().routes())
        .unwrap();

    assert_eq!(key, RouteKey::new("/dashboard/projects"));
    assert!(Arc::ptr_eq(&loader, &projects));
}

#[tokio::test]
async fn failed_load_can_be_retried() {
    init_tracing();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    let engine = PreloadEngine::builder(EngineConfig::default())
        .with_error_hook(move |key: &RouteKey, err: &LoaderError| {
            seen.lock()
                .push(PrefetchError::load_failed(key.as_str(), err).to_string());
        })
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    engine.configure(
        RouteModules::new().with_route(
            "/travel/trips",
            loader_fn(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(LoaderError::from("chunk load error"))
                    } else {
                        Ok(())
                    }
                }
            }),
        ),
        vec![],
    );

    engine.preload("/travel/trips").await;
    assert!(!engine.is_preloaded("/travel/trips"));
    assert_eq!(engine.preloading_status().total, 0);

    engine.preload("/travel/trips").await;
    assert!(engine.is_preloaded("/travel/trips"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        failures.lock().as_slice(),
        ["Loader for '/travel/trips' failed: chunk load error"]
    );
}

#[tokio::test]
async fn priorities_order_dispatch() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let loader = |name: &'static str| {
        let order = order.clone();
        loader_fn(move || {
            order.lock().push(name);
            async { Ok(()) }
        })
    };
    engine.configure(
        RouteModules::new()
            .with_route("/a", loader("A"))
            .with_route("/b", loader("B"))
            .with_route("/c", loader("C")),
        vec![
            PreloadPolicy::new("/a", Trigger::Immediate).with_priority(Priority::Low),
            PreloadPolicy::new("/b", Trigger::Immediate).with_priority(Priority::High),
            PreloadPolicy::new("/c", Trigger::Immediate).with_priority(Priority::Medium),
        ],
    );

    let guard = engine.initialize(&ScriptedHost::default());

    assert_eq!(order.lock().as_slice(), ["B", "C", "A"]);
    assert_eq!(
        guard.immediate(),
        [RouteKey::new("/b"), RouteKey::new("/c"), RouteKey::new("/a")]
    );
}

#[tokio::test]
async fn visible_anchor_loads_once_and_is_unobserved() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig {
        language_prefixes: vec!["en".into()],
        ..EngineConfig::default()
    })
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/travel/trips", counting_loader(calls.clone())),
        vec![PreloadPolicy::new("/travel/trips", Trigger::Visible)],
    );
    let host = ScriptedHost::with_anchors(vec![
        Anchor::new(1, "/en/travel/trips"),
        Anchor::new(2, "/unrouted"),
    ]);

    let guard = engine.initialize(&host);
    assert!(guard.visible().is_active());
    assert_eq!(guard.visible().watched(), 1);

    host.scroll_into_view(1);
    settle().await;
    host.scroll_into_view(1);
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.is_preloaded("/travel/trips"));
    assert_eq!(host.observer.unobserved.lock().as_slice(), [AnchorId(1)]);
    assert_eq!(guard.visible().watched(), 0);
}

#[tokio::test]
async fn visible_anchor_without_policy_is_not_loaded() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/food", counting_loader(calls.clone())),
        vec![PreloadPolicy::new("/food", Trigger::Visible).with_condition(|| false)],
    );
    let host = ScriptedHost::with_anchors(vec![Anchor::new(7, "/food")]);

    let _guard = engine.initialize(&host);
    host.scroll_into_view(7);
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn teardown_disconnects_and_cancels_idle() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new()
            .with_route("/food", counting_loader(calls.clone()))
            .with_route("/gaming", counting_loader(calls.clone())),
        vec![
            PreloadPolicy::new("/food", Trigger::Visible),
            PreloadPolicy::new("/gaming", Trigger::Idle),
        ],
    );
    let host = ScriptedHost::with_anchors(vec![Anchor::new(3, "/food")]);

    let guard = engine.initialize(&host);
    drop(guard);

    assert!(host.observer.disconnected.load(Ordering::SeqCst));
    host.scroll_into_view(3);
    host.run_idle();
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn idle_strategy_runs_on_host_idle() {
    init_tracing();
    let engine = PreloadEngine::new(EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    engine.configure(
        RouteModules::new().with_route("/analytics", counting_loader(calls.clone())),
        vec![PreloadPolicy::new("/analytics", Trigger::Idle)],
    );
    let host = ScriptedHost::default();

    let _guard = engine.initialize(&host);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    host.run_idle();
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.is_preloaded("/analytics"));
}
