//! Destination model: identity, lifecycle, correlation slots, and typed
//! result handlers.
//!
//! A destination is a navigable unit of application behavior. The engine
//! never constructs destinations itself (that is the loader's job); it only
//! requires the small amount of shared state defined here: the two stamped
//! transaction slots, the attach/init/destroy lifecycle flags, and the
//! registry of typed result callbacks.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use waypoint_types::{DestinationId, TransactionId};

/// A boxed result value passed from a responder to a requester.
pub type ResultValue = Box<dyn Any + Send>;

pub(crate) type HandlerFn = Arc<dyn Fn(ResultValue) + Send + Sync>;

/// A navigable unit of application state/behavior.
///
/// Implementations embed a [`CorrelationState`] and a [`LifecycleState`];
/// destinations that request results also embed [`ResultHandlers`] and
/// return them from [`Destination::result_handlers`].
pub trait Destination: Send + Sync + 'static {
    /// Stable type identifier, matched against route bindings.
    fn destination_id(&self) -> DestinationId;

    /// The transaction slots stamped by the ledger.
    fn correlation(&self) -> &CorrelationState;

    /// Attach/init/destroy flags consulted before result delivery.
    fn lifecycle(&self) -> &LifecycleState;

    /// Typed result callbacks, for destinations that await results.
    fn result_handlers(&self) -> Option<&ResultHandlers> {
        None
    }
}

/// Pointer identity of a destination instance.
///
/// Used to key per-call completion state; distinct from `destination_id`,
/// which names the destination *type* and is shared by recreated instances.
pub(crate) fn instance_key(destination: &Arc<dyn Destination>) -> usize {
    Arc::as_ptr(destination) as *const () as usize
}

/// The two transaction slots every participant carries.
///
/// `requester_id` is non-null exactly while the holder has an outstanding,
/// undelivered, uncancelled request; `responder_id` is non-null exactly
/// while the holder still owes a result.
#[derive(Debug, Default)]
pub struct CorrelationState {
    requester: Mutex<Option<TransactionId>>,
    responder: Mutex<Option<TransactionId>>,
}

impl CorrelationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requester_id(&self) -> Option<TransactionId> {
        *self.requester.lock().expect("correlation lock poisoned")
    }

    #[must_use]
    pub fn responder_id(&self) -> Option<TransactionId> {
        *self.responder.lock().expect("correlation lock poisoned")
    }

    pub(crate) fn stamp_requester(&self, id: TransactionId) {
        *self.requester.lock().expect("correlation lock poisoned") = Some(id);
    }

    pub(crate) fn stamp_responder(&self, id: TransactionId) {
        *self.responder.lock().expect("correlation lock poisoned") = Some(id);
    }

    pub(crate) fn take_requester(&self) -> Option<TransactionId> {
        self.requester
            .lock()
            .expect("correlation lock poisoned")
            .take()
    }

    pub(crate) fn take_responder(&self) -> Option<TransactionId> {
        self.responder
            .lock()
            .expect("correlation lock poisoned")
            .take()
    }

    /// Clear the requester slot only if it still holds `id`; guards against
    /// clearing a newer transaction stamped on a reused holder.
    pub(crate) fn clear_requester_if(&self, id: TransactionId) {
        let mut slot = self.requester.lock().expect("correlation lock poisoned");
        if *slot == Some(id) {
            *slot = None;
        }
    }

    pub(crate) fn clear_responder_if(&self, id: TransactionId) {
        let mut slot = self.responder.lock().expect("correlation lock poisoned");
        if *slot == Some(id) {
            *slot = None;
        }
    }
}

/// Attach/init/destroy lifecycle of a destination.
///
/// The engine reads these flags; the application (view layer, platform
/// glue) writes them. A destination is *result-capable* once it has
/// finished initialization, is attached to an active view, and has not been
/// destroyed — the only state in which it may receive a transaction result.
pub struct LifecycleState {
    init: watch::Sender<bool>,
    attached: AtomicBool,
    destroyed: AtomicBool,
}

impl LifecycleState {
    /// A destination that still has asynchronous setup to run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            init: watch::Sender::new(false),
            attached: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// A destination with no async setup: already initialized and attached.
    #[must_use]
    pub fn ready() -> Self {
        let state = Self::new();
        state.mark_initialized();
        state.mark_attached();
        state
    }

    pub fn mark_initialized(&self) {
        self.init.send_replace(true);
    }

    pub fn mark_attached(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    pub fn mark_detached(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        *self.init.borrow()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_result_capable(&self) -> bool {
        self.is_initialized() && self.is_attached() && !self.is_destroyed()
    }

    /// Wait until the destination has finished its own setup. Resolves
    /// immediately if initialization already completed.
    pub async fn initialized(&self) {
        let mut rx = self.init.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleState")
            .field("initialized", &self.is_initialized())
            .field("attached", &self.is_attached())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

struct RegisteredHandler {
    type_name: &'static str,
    callback: HandlerFn,
}

/// Typed result callbacks registered by a requester destination.
///
/// Registration replaces any runtime overload lookup: a handler is keyed by
/// the concrete result type it accepts, and dispatch downcasts the boxed
/// value to exactly that type. Registering a second handler for the same
/// type replaces the first.
#[derive(Default)]
pub struct ResultHandlers {
    by_type: Mutex<HashMap<TypeId, RegisteredHandler>>,
}

impl ResultHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for results of type `R`.
    pub fn on<R: Send + 'static>(&self, callback: impl Fn(R) + Send + Sync + 'static) {
        let wrapped: HandlerFn = Arc::new(move |value: ResultValue| {
            if let Ok(value) = value.downcast::<R>() {
                callback(*value);
            }
        });
        self.by_type.lock().expect("handler lock poisoned").insert(
            TypeId::of::<R>(),
            RegisteredHandler {
                type_name: std::any::type_name::<R>(),
                callback: wrapped,
            },
        );
    }

    /// Look up the handler for a result type, if one is registered.
    ///
    /// Returns a clone of the callback so the caller can invoke it without
    /// holding the registry lock.
    pub(crate) fn lookup(&self, type_id: TypeId) -> Option<HandlerFn> {
        self.by_type
            .lock()
            .expect("handler lock poisoned")
            .get(&type_id)
            .map(|handler| Arc::clone(&handler.callback))
    }

    /// Whether a handler is registered for a result type.
    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.by_type
            .lock()
            .expect("handler lock poisoned")
            .contains_key(&type_id)
    }
}

impl fmt::Debug for ResultHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.by_type.lock().expect("handler lock poisoned");
        let mut names: Vec<&str> = registry.values().map(|h| h.type_name).collect();
        names.sort_unstable();
        f.debug_struct("ResultHandlers")
            .field("types", &names)
            .finish()
    }
}
