//! Shared fixtures for the engine integration tests.

#![allow(dead_code)] // Each test binary uses a different subset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use waypoint_engine::{
    CorrelationState, Destination, DestinationId, DestinationLoader, LifecycleState,
    NavigationEngine, NavigationRequest, PresentationChange, Presenter, ResultHandlers,
    RouteParams,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A minimal destination for tests: ready or still initializing, with a
/// typed-handler registry.
pub struct TestScreen {
    id: DestinationId,
    correlation: CorrelationState,
    lifecycle: LifecycleState,
    handlers: ResultHandlers,
}

impl TestScreen {
    pub fn ready(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id: DestinationId::from_static(id),
            correlation: CorrelationState::new(),
            lifecycle: LifecycleState::ready(),
            handlers: ResultHandlers::new(),
        })
    }

    pub fn uninitialized(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id: DestinationId::from_static(id),
            correlation: CorrelationState::new(),
            lifecycle: LifecycleState::new(),
            handlers: ResultHandlers::new(),
        })
    }
}

impl Destination for TestScreen {
    fn destination_id(&self) -> DestinationId {
        self.id.clone()
    }

    fn correlation(&self) -> &CorrelationState {
        &self.correlation
    }

    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    fn result_handlers(&self) -> Option<&ResultHandlers> {
        Some(&self.handlers)
    }
}

/// Presenter double that records every call into one ordered log.
///
/// Log entries are `show:<id>`, `close:<id>` and `hint:<id>`; tests may
/// interleave their own markers via [`RecordingPresenter::push`] to assert
/// cross-component ordering.
pub struct RecordingPresenter {
    log: Mutex<Vec<String>>,
    last_params: Mutex<Option<RouteParams>>,
    accept_show: AtomicBool,
    accept_close: AtomicBool,
    show_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
            accept_show: AtomicBool::new(true),
            accept_close: AtomicBool::new(true),
            show_gate: Mutex::new(None),
        })
    }

    pub fn refuse_shows(&self) {
        self.accept_show.store(false, Ordering::SeqCst);
    }

    pub fn refuse_closes(&self) {
        self.accept_close.store(false, Ordering::SeqCst);
    }

    pub fn accept_closes(&self) {
        self.accept_close.store(true, Ordering::SeqCst);
    }

    /// Make subsequent `show` calls block until permits are added to the
    /// returned gate.
    pub fn hold_shows(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.show_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn last_params(&self) -> Option<RouteParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn show(&self, request: &NavigationRequest) -> bool {
        self.push(format!("show:{}", request.destination));
        *self.last_params.lock().unwrap() = Some(request.params.clone());

        let gate = self.show_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("show gate closed");
            permit.forget();
        }
        self.accept_show.load(Ordering::SeqCst)
    }

    async fn change_presentation(&self, change: &PresentationChange) -> bool {
        match change {
            PresentationChange::Close { destination } => {
                self.push(format!("close:{}", destination.destination_id()));
                self.accept_close.load(Ordering::SeqCst)
            }
            PresentationChange::Hint { destination, .. } => {
                self.push(format!("hint:{}", destination.destination_id()));
                true
            }
        }
    }
}

/// Loader double handing out pre-registered instances by destination id.
#[derive(Default)]
pub struct StaticLoader {
    instances: Mutex<HashMap<DestinationId, Arc<dyn Destination>>>,
}

impl StaticLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn provide(&self, instance: Arc<dyn Destination>) {
        self.instances
            .lock()
            .unwrap()
            .insert(instance.destination_id(), instance);
    }
}

impl DestinationLoader for StaticLoader {
    fn load(&self, request: &NavigationRequest) -> anyhow::Result<Arc<dyn Destination>> {
        self.instances
            .lock()
            .unwrap()
            .get(&request.destination)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no instance registered for `{}`", request.destination))
    }
}

pub struct Harness {
    pub engine: NavigationEngine,
    pub presenter: Arc<RecordingPresenter>,
    pub loader: Arc<StaticLoader>,
}

pub fn harness() -> Harness {
    init_tracing();
    let presenter = RecordingPresenter::new();
    let loader = StaticLoader::new();
    let engine = NavigationEngine::new(
        Arc::clone(&presenter) as Arc<dyn Presenter>,
        Arc::clone(&loader) as Arc<dyn DestinationLoader>,
    );
    Harness {
        engine,
        presenter,
        loader,
    }
}

/// Poll `cond` until it holds or the test times out.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}
