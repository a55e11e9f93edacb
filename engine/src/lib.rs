//! Navigation engine for Waypoint - route resolution and show/close
//! orchestration.
//!
//! The engine resolves logical destinations from string routes or type
//! identifiers, drives the asynchronous show/close lifecycle through an
//! external presenter, and correlates a child destination's eventual result
//! back to the parent that requested it — including across the parent being
//! torn down and recreated from persisted state.
//!
//! Each engine instance owns its route table, transaction ledger and event
//! hub; independent instances never interfere. The engine is cheaply
//! cloneable and all clones share the same state.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;

mod config;
mod destination;
mod events;
mod persistence;
mod request;
mod routes;
mod transactions;

pub use config::routes_from_toml;
pub use destination::{
    CorrelationState, Destination, LifecycleState, ResultHandlers, ResultValue,
};
pub use events::{EventHub, NavigationEvent, NavigationEventKind, SubscriptionId};
pub use persistence::{
    REQUESTER_TRANSACTION_KEY, RESPONDER_TRANSACTION_KEY, StateBundle, restore_correlation,
    save_correlation,
};
pub use request::{DestinationLoader, NavigationRequest, RouteFacade};
pub use routes::{RouteEntry, RouteResolution, RouteTable};
pub use tokio_util::sync::CancellationToken;
pub use transactions::{DeliveryOutcome, ObtainOutcome, TransactionLedger};

// Re-export the domain types for callers that only depend on the engine.
pub use waypoint_types::{
    DestinationId, NavigationError, NavigationMode, PresentationHints, RouteParams, TransactionId,
};

use async_trait::async_trait;
use destination::instance_key;

/// Presentation-change request brokered to the presenter.
///
/// Closing a destination is itself a presentation change; the engine never
/// decides *how* a destination leaves the screen.
pub enum PresentationChange {
    /// Dismiss the destination.
    Close { destination: Arc<dyn Destination> },
    /// Apply opaque hints to an already-presented destination.
    Hint {
        destination: Arc<dyn Destination>,
        hints: PresentationHints,
    },
}

impl PresentationChange {
    #[must_use]
    pub fn destination(&self) -> &Arc<dyn Destination> {
        match self {
            Self::Close { destination } | Self::Hint { destination, .. } => destination,
        }
    }
}

impl fmt::Debug for PresentationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close { destination } => f
                .debug_struct("Close")
                .field("destination", &destination.destination_id())
                .finish(),
            Self::Hint { destination, hints } => f
                .debug_struct("Hint")
                .field("destination", &destination.destination_id())
                .field("hints", hints)
                .finish(),
        }
    }
}

/// External collaborator that puts destinations on and off the screen.
///
/// A `false` return is a presenter *refusal*, not an error: callers branch
/// on the boolean without exception-handling overhead.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn show(&self, request: &NavigationRequest) -> bool;
    async fn change_presentation(&self, change: &PresentationChange) -> bool;
}

struct EngineShared {
    routes: RwLock<RouteTable>,
    facades: RwLock<HashMap<DestinationId, Arc<dyn RouteFacade>>>,
    presenter: Arc<dyn Presenter>,
    loader: Arc<dyn DestinationLoader>,
    events: EventHub,
    ledger: TransactionLedger,
    /// Completion futures for result-bearing navigations, keyed by instance
    /// identity. Take-semantics on the sender give the single-assignment
    /// settle guard: whichever side removes the sender first wins.
    pending: Mutex<HashMap<usize, oneshot::Sender<ResultValue>>>,
}

/// The navigation engine.
#[derive(Clone)]
pub struct NavigationEngine {
    shared: Arc<EngineShared>,
}

impl NavigationEngine {
    pub fn new(presenter: Arc<dyn Presenter>, loader: Arc<dyn DestinationLoader>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                routes: RwLock::new(RouteTable::new()),
                facades: RwLock::new(HashMap::new()),
                presenter,
                loader,
                events: EventHub::new(),
                ledger: TransactionLedger::new(),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------

    /// Replace the entire route table. Readers never observe a partial
    /// merge.
    pub fn load_routes(&self, entries: Vec<RouteEntry>) {
        let mut table = RouteTable::new();
        table.load(entries);
        *self.shared.routes.write().expect("route lock poisoned") = table;
    }

    /// Replace the route table from a TOML definition.
    pub fn load_routes_toml(&self, text: &str) -> Result<(), NavigationError> {
        let entries = routes_from_toml(text)?;
        self.load_routes(entries);
        Ok(())
    }

    /// Resolve a path without navigating.
    #[must_use]
    pub fn resolve(&self, path: &str) -> RouteResolution {
        self.shared
            .routes
            .read()
            .expect("route lock poisoned")
            .resolve(path)
    }

    /// Whether a path resolves to exactly one destination. Unresolvable and
    /// ambiguous paths report `false`; probing is expected to be
    /// speculative, so nothing is raised.
    #[must_use]
    pub fn can_navigate(&self, path: &str) -> bool {
        !path.trim().is_empty() && self.resolve(path).is_match()
    }

    /// Associate a facade with a destination id. The facade intercepts
    /// route resolutions targeting that destination.
    pub fn register_facade(&self, destination: DestinationId, facade: Arc<dyn RouteFacade>) {
        self.shared
            .facades
            .write()
            .expect("facade lock poisoned")
            .insert(destination, facade);
    }

    /// Lifecycle event hub shared by all clones of this engine.
    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }

    /// The transaction ledger shared by all clones of this engine.
    #[must_use]
    pub fn ledger(&self) -> &TransactionLedger {
        &self.shared.ledger
    }

    // ------------------------------------------------------------------
    // Request building
    // ------------------------------------------------------------------

    async fn build_for_path(
        &self,
        path: &str,
        params: RouteParams,
        hints: PresentationHints,
    ) -> Result<NavigationRequest, NavigationError> {
        if path.trim().is_empty() {
            return Err(NavigationError::InvalidArgument("path"));
        }

        let resolution = self.resolve(path);
        let (destination, extracted) = match resolution {
            RouteResolution::Match {
                destination,
                params,
            } => (destination, params),
            RouteResolution::NotFound => {
                return Err(NavigationError::RouteNotFound {
                    path: path.to_string(),
                });
            }
            RouteResolution::Ambiguous { candidates } => {
                return Err(NavigationError::RouteAmbiguous {
                    path: path.to_string(),
                    count: candidates.len(),
                });
            }
        };

        let mut merged = extracted;
        merged.merge(params);

        let facade = self
            .shared
            .facades
            .read()
            .expect("facade lock poisoned")
            .get(&destination)
            .cloned();

        let mut request = match facade {
            Some(facade) => match facade.build_request(path, merged).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    return Err(NavigationError::FacadeFailure {
                        path: path.to_string(),
                        destination,
                        reason: "facade returned no request".to_string(),
                    });
                }
                Err(e) => {
                    return Err(NavigationError::FacadeFailure {
                        path: path.to_string(),
                        destination,
                        reason: format!("{e:#}"),
                    });
                }
            },
            None => NavigationRequest::new(destination).with_params(merged),
        };

        if request.hints.is_empty() {
            request.hints = hints;
        }
        self.materialize(request)
    }

    fn build_for_destination(
        &self,
        destination: DestinationId,
        params: RouteParams,
        hints: PresentationHints,
        instance: Option<Arc<dyn Destination>>,
    ) -> Result<NavigationRequest, NavigationError> {
        if destination.as_str().trim().is_empty() {
            return Err(NavigationError::InvalidArgument("destination"));
        }
        let mut request = NavigationRequest::new(destination)
            .with_params(params)
            .with_hints(hints);
        if let Some(instance) = instance {
            request = request.with_instance(instance);
        }
        self.materialize(request)
    }

    /// Ask the loader to materialize (or refresh) the request's instance.
    fn materialize(
        &self,
        mut request: NavigationRequest,
    ) -> Result<NavigationRequest, NavigationError> {
        let loaded = match request.instance.take() {
            Some(existing) => self.shared.loader.reload(existing, &request),
            None => self.shared.loader.load(&request),
        };
        let instance = loaded.map_err(|e| NavigationError::LoadFailure {
            destination: request.destination.clone(),
            reason: format!("{e:#}"),
        })?;
        request.instance = Some(instance);
        Ok(request)
    }

    fn request_instance(request: &NavigationRequest) -> Arc<dyn Destination> {
        Arc::clone(
            request
                .instance
                .as_ref()
                .expect("materialized request always carries an instance"),
        )
    }

    // ------------------------------------------------------------------
    // Show
    // ------------------------------------------------------------------

    /// Drive one show attempt to a terminal state. Returns `true` only for
    /// `Completed`; vetoes, pre-show cancellation and presenter refusals
    /// all report `false`.
    async fn perform_show(
        &self,
        request: &NavigationRequest,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let destination = Self::request_instance(request);

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(destination = %request.destination, "navigation cancelled before show");
            return false;
        }
        if self
            .shared
            .events
            .emit(NavigationEventKind::WillNavigate, NavigationMode::Show, &destination)
        {
            tracing::debug!(destination = %request.destination, "navigation vetoed");
            return false;
        }
        if !self.shared.presenter.show(request).await {
            tracing::warn!(destination = %request.destination, "presenter declined to show");
            return false;
        }

        // Observers must never see "navigated" before the destination has
        // finished its own setup.
        destination.lifecycle().initialized().await;
        self.shared
            .events
            .emit(NavigationEventKind::DidNavigate, NavigationMode::Show, &destination);
        self.pickup_parked(&destination);
        true
    }

    /// Result-capability was just (re)gained: consume any parked entry.
    fn pickup_parked(&self, destination: &Arc<dyn Destination>) {
        if let Err(e) = self.shared.ledger.try_obtain(destination) {
            tracing::error!(
                destination = %destination.destination_id(),
                error = %e,
                "parked result pickup failed"
            );
        }
    }

    /// Navigate to a string route.
    pub async fn navigate(&self, path: &str) -> Result<bool, NavigationError> {
        self.navigate_with(path, RouteParams::new(), PresentationHints::new(), None)
            .await
    }

    /// Navigate to a string route with parameters, presentation hints, and
    /// an optional cancellation token (observed up to the presenter call).
    pub async fn navigate_with(
        &self,
        path: &str,
        params: RouteParams,
        hints: PresentationHints,
        cancel: Option<CancellationToken>,
    ) -> Result<bool, NavigationError> {
        let request = self.build_for_path(path, params, hints).await?;
        Ok(self.perform_show(&request, cancel.as_ref()).await)
    }

    /// Navigate directly to a destination identifier, bypassing route
    /// resolution (and therefore any facade).
    pub async fn navigate_to(
        &self,
        destination: DestinationId,
        params: RouteParams,
        hints: PresentationHints,
    ) -> Result<bool, NavigationError> {
        let request = self.build_for_destination(destination, params, hints, None)?;
        Ok(self.perform_show(&request, None).await)
    }

    /// Present a caller-supplied, pre-built destination instance. The
    /// loader's `reload` gets a chance to refresh it for the new request.
    pub async fn navigate_instance(
        &self,
        instance: Arc<dyn Destination>,
        params: RouteParams,
        hints: PresentationHints,
    ) -> Result<bool, NavigationError> {
        let request = self.build_for_destination(
            instance.destination_id(),
            params,
            hints,
            Some(instance),
        )?;
        Ok(self.perform_show(&request, None).await)
    }

    // ------------------------------------------------------------------
    // Result-bearing navigation (completion future)
    // ------------------------------------------------------------------

    /// Navigate and await the value the destination is closed with.
    ///
    /// Resolves to `None` when the navigation is vetoed, the presenter
    /// declines, the call is cancelled, or the destination side faults —
    /// "no result" is a valid terminal state of a result-bearing
    /// navigation and never surfaces as an error.
    ///
    /// Cancellation semantics: before the destination is shown, the
    /// in-flight show is still awaited but the completion future is
    /// discarded and no close is issued (the destination stays up,
    /// intentionally inert). After the destination is shown, an
    /// asynchronous close with no result is requested; that close may race
    /// a concurrent natural close, and whichever settles the completion
    /// future first wins.
    pub async fn navigate_for_value<R: Send + 'static>(
        &self,
        path: &str,
        params: RouteParams,
        hints: PresentationHints,
        cancel: Option<CancellationToken>,
    ) -> Result<Option<R>, NavigationError> {
        let request = self.build_for_path(path, params, hints).await?;
        let destination = Self::request_instance(&request);
        let key = instance_key(&destination);

        if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Ok(None);
        }

        // Attach the completion future before presenting, so a same-thread
        // synchronous close cannot race ahead of the subscription.
        let (tx, mut rx) = oneshot::channel::<ResultValue>();
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(key, tx);

        if self
            .shared
            .events
            .emit(NavigationEventKind::WillNavigate, NavigationMode::Show, &destination)
        {
            self.remove_pending(key);
            tracing::debug!(destination = %request.destination, "navigation vetoed");
            return Ok(None);
        }
        if !self.shared.presenter.show(&request).await {
            self.remove_pending(key);
            tracing::warn!(destination = %request.destination, "presenter declined to show");
            return Ok(None);
        }
        if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            // Cancelled while the show was in flight. The destination now
            // exists on screen and stays there; only the future is thrown
            // away.
            self.remove_pending(key);
            tracing::debug!(destination = %request.destination, "navigation cancelled during show");
            return Ok(None);
        }

        destination.lifecycle().initialized().await;
        self.shared
            .events
            .emit(NavigationEventKind::DidNavigate, NavigationMode::Show, &destination);
        self.pickup_parked(&destination);

        let value = match cancel {
            None => rx.await.ok(),
            Some(token) => {
                tokio::select! {
                    biased;
                    value = &mut rx => value.ok(),
                    () = token.cancelled() => {
                        // First to take the sender wins; losing the race
                        // here means a natural close already settled.
                        if self.take_pending(&destination).is_some() {
                            let engine = self.clone();
                            let target = Arc::clone(&destination);
                            tokio::spawn(async move {
                                let _ = engine.close(&target).await;
                            });
                        }
                        None
                    }
                }
            }
        };

        Ok(value.and_then(|boxed| match boxed.downcast::<R>() {
            Ok(value) => Some(*value),
            Err(_) => {
                // A mistyped delivery is a fault on the destination side;
                // swallowed at this boundary and reported as "no result".
                tracing::warn!(
                    destination = %request.destination,
                    "close value type did not match the awaited result type"
                );
                None
            }
        }))
    }

    /// Close a destination, fulfilling its pending completion future with
    /// `value` only if the close succeeds. On presenter refusal the future
    /// is left armed so a later retry can still deliver.
    pub async fn close_with_value<R: Send + 'static>(
        &self,
        destination: &Arc<dyn Destination>,
        value: R,
    ) -> bool {
        let sender = self.take_pending(destination);
        let closed = self.close(destination).await;
        match (closed, sender) {
            (true, Some(sender)) => {
                // The awaiting side may have given up; that is its call.
                let _ = sender.send(Box::new(value));
                true
            }
            (false, Some(sender)) => {
                self.shared
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .insert(instance_key(destination), sender);
                false
            }
            (closed, None) => closed,
        }
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// Close a destination with no result. Vetoable via `WillClose`;
    /// presenter refusal reports `false`.
    pub async fn close(&self, destination: &Arc<dyn Destination>) -> bool {
        if self
            .shared
            .events
            .emit(NavigationEventKind::WillClose, NavigationMode::Close, destination)
        {
            tracing::debug!(destination = %destination.destination_id(), "close vetoed");
            return false;
        }
        let change = PresentationChange::Close {
            destination: Arc::clone(destination),
        };
        if !self.shared.presenter.change_presentation(&change).await {
            tracing::warn!(destination = %destination.destination_id(), "presenter declined to close");
            return false;
        }
        self.shared
            .events
            .emit(NavigationEventKind::DidClose, NavigationMode::Close, destination);
        true
    }

    /// Broker a presentation change for an already-presented destination.
    pub async fn change_presentation(
        &self,
        destination: &Arc<dyn Destination>,
        hints: PresentationHints,
    ) -> bool {
        if self.shared.events.emit(
            NavigationEventKind::WillChangePresentation,
            NavigationMode::Show,
            destination,
        ) {
            return false;
        }
        let change = PresentationChange::Hint {
            destination: Arc::clone(destination),
            hints,
        };
        if !self.shared.presenter.change_presentation(&change).await {
            tracing::warn!(
                destination = %destination.destination_id(),
                "presenter declined presentation change"
            );
            return false;
        }
        self.shared.events.emit(
            NavigationEventKind::DidChangePresentation,
            NavigationMode::Show,
            destination,
        );
        true
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Navigate to a string route on behalf of `requester`, opening a
    /// transaction before the destination is shown. The result arrives
    /// later through the requester's registered typed handler, not through
    /// this call's return value.
    pub async fn navigate_for_result(
        &self,
        requester: &Arc<dyn Destination>,
        path: &str,
        params: RouteParams,
    ) -> Result<bool, NavigationError> {
        let request = self
            .build_for_path(path, params, PresentationHints::new())
            .await?;
        self.show_for_result(requester, request).await
    }

    /// Transaction-opening navigation addressed by destination id.
    pub async fn navigate_for_result_to(
        &self,
        requester: &Arc<dyn Destination>,
        destination: DestinationId,
        params: RouteParams,
    ) -> Result<bool, NavigationError> {
        let request =
            self.build_for_destination(destination, params, PresentationHints::new(), None)?;
        self.show_for_result(requester, request).await
    }

    async fn show_for_result(
        &self,
        requester: &Arc<dyn Destination>,
        request: NavigationRequest,
    ) -> Result<bool, NavigationError> {
        let responder = Self::request_instance(&request);
        let token = self.shared.ledger.begin(requester, &responder);

        if self.perform_show(&request, None).await {
            return Ok(true);
        }

        // The show never happened; unwind the stamps so neither side is
        // left waiting on it.
        self.shared.ledger.cancel(requester);
        responder.correlation().clear_responder_if(token);
        Ok(false)
    }

    /// Deliver `result` for the transaction the responder was created to
    /// answer, then close the responder. Delivery is synchronous when the
    /// requester is reachable and result-capable; otherwise the result is
    /// parked for later pickup. The close proceeds regardless of the
    /// delivery path.
    pub async fn close_with_result<R: Send + 'static>(
        &self,
        responder: &Arc<dyn Destination>,
        result: R,
    ) -> Result<bool, NavigationError> {
        let outcome = self.shared.ledger.deliver(
            responder,
            TypeId::of::<R>(),
            std::any::type_name::<R>(),
            Box::new(result),
        );
        let closed = self.close(responder).await;
        match outcome {
            DeliveryOutcome::HandlerMissing {
                destination,
                type_name,
                ..
            } => Err(NavigationError::TypeMismatch {
                destination,
                type_name,
            }),
            _ => Ok(closed),
        }
    }

    /// Abandon the holder's outstanding request.
    pub fn cancel_transaction(&self, holder: &Arc<dyn Destination>) {
        self.shared.ledger.cancel(holder);
    }

    /// Pick up a parked result for a (possibly recreated) requester. Called
    /// automatically when a navigation completes; rehydrated holders that
    /// regain result-capability outside a navigation call it directly.
    pub fn try_obtain_result(
        &self,
        requester: &Arc<dyn Destination>,
    ) -> Result<ObtainOutcome, NavigationError> {
        self.shared.ledger.try_obtain(requester)
    }

    // ------------------------------------------------------------------
    // Persistence bridge
    // ------------------------------------------------------------------

    /// Write the holder's transaction stamps into the bundle.
    pub fn save_state(&self, destination: &Arc<dyn Destination>, bundle: &mut dyn StateBundle) {
        persistence::save_correlation(destination.as_ref(), bundle);
    }

    /// Re-stamp a recreated holder from the bundle. Must run before the
    /// holder becomes result-capable so the parked pickup can find its
    /// entry.
    pub fn restore_state(&self, destination: &Arc<dyn Destination>, bundle: &dyn StateBundle) {
        persistence::restore_correlation(destination.as_ref(), bundle);
    }

    // ------------------------------------------------------------------

    fn take_pending(
        &self,
        destination: &Arc<dyn Destination>,
    ) -> Option<oneshot::Sender<ResultValue>> {
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&instance_key(destination))
    }

    fn remove_pending(&self, key: usize) {
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&key);
    }
}

impl fmt::Debug for NavigationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationEngine")
            .field(
                "routes",
                &self.shared.routes.read().expect("route lock poisoned").len(),
            )
            .field("open_transactions", &self.shared.ledger.open_count())
            .field("parked_results", &self.shared.ledger.parked_count())
            .finish()
    }
}
