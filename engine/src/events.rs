//! Lifecycle events fired around navigation operations.
//!
//! `Will*` events are vetoable: a subscriber may cancel the pending
//! operation before the presenter is invoked. `Did*` events are
//! notifications only; vetoes on them are ignored.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use waypoint_types::{DestinationId, NavigationMode};

use crate::destination::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEventKind {
    WillNavigate,
    DidNavigate,
    WillClose,
    DidClose,
    WillChangePresentation,
    DidChangePresentation,
}

impl NavigationEventKind {
    /// Whether subscribers may veto the operation this event announces.
    #[must_use]
    pub fn is_vetoable(self) -> bool {
        matches!(
            self,
            Self::WillNavigate | Self::WillClose | Self::WillChangePresentation
        )
    }
}

/// Payload handed to lifecycle subscribers.
pub struct NavigationEvent {
    kind: NavigationEventKind,
    mode: NavigationMode,
    destination: Arc<dyn Destination>,
    veto: AtomicBool,
}

impl NavigationEvent {
    fn new(
        kind: NavigationEventKind,
        mode: NavigationMode,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self {
            kind,
            mode,
            destination,
            veto: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> NavigationEventKind {
        self.kind
    }

    #[must_use]
    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    #[must_use]
    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.destination
    }

    #[must_use]
    pub fn destination_id(&self) -> DestinationId {
        self.destination.destination_id()
    }

    /// Cancel the pending operation. Honored only for `Will*` events.
    pub fn veto(&self) {
        self.veto.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_vetoed(&self) -> bool {
        self.veto.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&NavigationEvent) + Send + Sync>;

/// Subscriber registry for navigation lifecycle events.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&NavigationEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .expect("event hub lock poisoned")
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners
            .lock()
            .expect("event hub lock poisoned")
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Fire an event and report whether a subscriber vetoed it.
    ///
    /// Listeners are invoked outside the registry lock so they may
    /// subscribe or unsubscribe re-entrantly.
    pub(crate) fn emit(
        &self,
        kind: NavigationEventKind,
        mode: NavigationMode,
        destination: &Arc<dyn Destination>,
    ) -> bool {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .expect("event hub lock poisoned")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let event = NavigationEvent::new(kind, mode, Arc::clone(destination));
        for listener in snapshot {
            listener(&event);
        }
        kind.is_vetoable() && event.is_vetoed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{CorrelationState, LifecycleState};
    use std::sync::atomic::AtomicU32;

    struct Dummy {
        correlation: CorrelationState,
        lifecycle: LifecycleState,
    }

    impl Dummy {
        fn new() -> Arc<dyn Destination> {
            Arc::new(Self {
                correlation: CorrelationState::new(),
                lifecycle: LifecycleState::ready(),
            })
        }
    }

    impl Destination for Dummy {
        fn destination_id(&self) -> DestinationId {
            DestinationId::from_static("Dummy")
        }

        fn correlation(&self) -> &CorrelationState {
            &self.correlation
        }

        fn lifecycle(&self) -> &LifecycleState {
            &self.lifecycle
        }
    }

    #[test]
    fn veto_is_reported_for_will_events_only() {
        let hub = EventHub::new();
        hub.subscribe(|event| event.veto());

        let dest = Dummy::new();
        assert!(hub.emit(
            NavigationEventKind::WillNavigate,
            NavigationMode::Show,
            &dest
        ));
        assert!(!hub.emit(
            NavigationEventKind::DidNavigate,
            NavigationMode::Show,
            &dest
        ));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = EventHub::new();
        let hits = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&hits);
        let id = hub.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let dest = Dummy::new();
        hub.emit(
            NavigationEventKind::WillClose,
            NavigationMode::Close,
            &dest,
        );
        hub.unsubscribe(id);
        hub.emit(
            NavigationEventKind::WillClose,
            NavigationMode::Close,
            &dest,
        );

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
