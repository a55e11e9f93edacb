//! Transaction ledger: correlates a requester destination with the
//! responder that owes it a result, across their independent lifetimes.
//!
//! The ledger is two-tiered. A live record holds a *weak* reference to the
//! requester — waiting for a result must not extend the requester's
//! lifetime. When the requester cannot be reached at delivery time
//! (destroyed, detached, mid-rehydration), the result is parked keyed by
//! the transaction token, and a recreated holder that restores the same
//! token picks it up via [`TransactionLedger::try_obtain`].
//!
//! Every lookup-then-mutate sequence on the two maps runs inside a single
//! critical section; the delivered-once invariant depends on that. Handler
//! callbacks are invoked after the lock is released.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use waypoint_types::{DestinationId, NavigationError, TransactionId};

use crate::destination::{Destination, HandlerFn, ResultValue};

struct TransactionRecord {
    requester: Weak<dyn Destination>,
}

enum ParkedEntry {
    /// A result that could not be handed over directly.
    Value {
        type_id: TypeId,
        type_name: &'static str,
        value: ResultValue,
    },
    /// The requester cancelled before the responder answered.
    Cancelled,
}

#[derive(Default)]
struct LedgerState {
    live: HashMap<TransactionId, TransactionRecord>,
    parked: HashMap<TransactionId, ParkedEntry>,
}

/// How a delivery attempt concluded.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The requester's typed handler was invoked synchronously.
    Delivered { transaction: TransactionId },
    /// The requester was unreachable or not result-capable; the value is
    /// parked for later pickup.
    Parked { transaction: TransactionId },
    /// The requester was reachable but has no handler for this result type.
    HandlerMissing {
        transaction: TransactionId,
        destination: DestinationId,
        type_name: &'static str,
    },
    /// The responder carried no open transaction.
    NoTransaction,
}

/// What a parked-result pickup found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObtainOutcome {
    /// A parked value was dispatched to the matching handler.
    Delivered,
    /// A parked cancellation marker was consumed; no handler is notified.
    CancellationConsumed,
    /// Nothing was parked for this holder.
    Nothing,
    /// The holder is not result-capable yet; nothing was touched.
    NotReady,
}

enum Decision {
    Invoke(HandlerFn, ResultValue),
    Missing(DestinationId),
    Park,
}

/// Correlation table linking requesters and responders.
#[derive(Default)]
pub struct TransactionLedger {
    state: Mutex<LedgerState>,
}

impl TransactionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction: allocate a fresh token, stamp it on both sides,
    /// and record a weak association from the token to the requester.
    pub fn begin(
        &self,
        requester: &Arc<dyn Destination>,
        responder: &Arc<dyn Destination>,
    ) -> TransactionId {
        let token = TransactionId::new();
        requester.correlation().stamp_requester(token);
        responder.correlation().stamp_responder(token);
        self.state
            .lock()
            .expect("ledger lock poisoned")
            .live
            .insert(
                token,
                TransactionRecord {
                    requester: Arc::downgrade(requester),
                },
            );
        tracing::debug!(
            %token,
            requester = %requester.destination_id(),
            responder = %responder.destination_id(),
            "transaction opened"
        );
        token
    }

    /// Deliver a result from the responder side.
    ///
    /// Reads and clears the responder's stamped token. If the requester is
    /// still reachable, result-capable, and stamped with the same token,
    /// its typed handler is invoked synchronously before this call returns;
    /// otherwise the value is parked under the token.
    pub fn deliver(
        &self,
        responder: &Arc<dyn Destination>,
        type_id: TypeId,
        type_name: &'static str,
        value: ResultValue,
    ) -> DeliveryOutcome {
        let Some(token) = responder.correlation().take_responder() else {
            tracing::warn!(
                responder = %responder.destination_id(),
                "result delivered with no open transaction"
            );
            return DeliveryOutcome::NoTransaction;
        };

        let decision = {
            let mut state = self.state.lock().expect("ledger lock poisoned");
            let reachable = state.live.remove(&token).and_then(|record| {
                record.requester.upgrade().filter(|req| {
                    req.lifecycle().is_result_capable()
                        && req.correlation().requester_id() == Some(token)
                })
            });
            match reachable {
                Some(requester) => {
                    // Clearing the stamp here keeps "requester id set" and
                    // "delivery still outstanding" equivalent even if the
                    // handler re-enters the engine.
                    requester.correlation().clear_requester_if(token);
                    match requester.result_handlers().and_then(|h| h.lookup(type_id)) {
                        Some(handler) => Decision::Invoke(handler, value),
                        None => Decision::Missing(requester.destination_id()),
                    }
                }
                None => {
                    state.parked.insert(
                        token,
                        ParkedEntry::Value {
                            type_id,
                            type_name,
                            value,
                        },
                    );
                    Decision::Park
                }
            }
        };

        match decision {
            Decision::Invoke(handler, value) => {
                handler(value);
                tracing::debug!(%token, type_name, "result delivered");
                DeliveryOutcome::Delivered { transaction: token }
            }
            Decision::Missing(destination) => {
                tracing::error!(
                    %token,
                    %destination,
                    type_name,
                    "requester has no handler for delivered result type"
                );
                DeliveryOutcome::HandlerMissing {
                    transaction: token,
                    destination,
                    type_name,
                }
            }
            Decision::Park => {
                tracing::debug!(%token, type_name, "result parked for unreachable requester");
                DeliveryOutcome::Parked { transaction: token }
            }
        }
    }

    /// Abandon the holder's outstanding request.
    ///
    /// Clears the holder's stamped token. If the live record's requester is
    /// still reachable (possibly a recreated instance carrying the same
    /// restored token) its stamp is cleared too; if not, a cancellation
    /// marker is parked so a future rehydration finds a terminal state
    /// instead of waiting forever.
    pub fn cancel(&self, holder: &Arc<dyn Destination>) {
        let Some(token) = holder.correlation().take_requester() else {
            return;
        };

        let mut state = self.state.lock().expect("ledger lock poisoned");
        if let Some(record) = state.live.remove(&token) {
            match record.requester.upgrade() {
                Some(requester) => requester.correlation().clear_requester_if(token),
                None => {
                    state.parked.insert(token, ParkedEntry::Cancelled);
                }
            }
        }
        tracing::debug!(%token, "transaction cancelled");
    }

    /// Pick up a parked entry for a (possibly recreated) requester.
    ///
    /// Only a result-capable holder may obtain results. The parked entry is
    /// consumed exactly once: a second call finds nothing. A parked
    /// cancellation is consumed without notifying any handler.
    pub fn try_obtain(
        &self,
        requester: &Arc<dyn Destination>,
    ) -> Result<ObtainOutcome, NavigationError> {
        if !requester.lifecycle().is_result_capable() {
            return Ok(ObtainOutcome::NotReady);
        }
        let Some(token) = requester.correlation().requester_id() else {
            return Ok(ObtainOutcome::Nothing);
        };

        let entry = {
            let mut state = self.state.lock().expect("ledger lock poisoned");
            match state.parked.remove(&token) {
                Some(entry) => {
                    requester.correlation().clear_requester_if(token);
                    entry
                }
                None => return Ok(ObtainOutcome::Nothing),
            }
        };

        match entry {
            ParkedEntry::Cancelled => {
                tracing::debug!(%token, "parked cancellation consumed");
                Ok(ObtainOutcome::CancellationConsumed)
            }
            ParkedEntry::Value {
                type_id,
                type_name,
                value,
            } => match requester.result_handlers().and_then(|h| h.lookup(type_id)) {
                Some(handler) => {
                    handler(value);
                    tracing::debug!(%token, type_name, "parked result delivered");
                    Ok(ObtainOutcome::Delivered)
                }
                None => Err(NavigationError::TypeMismatch {
                    destination: requester.destination_id(),
                    type_name,
                }),
            },
        }
    }

    /// Number of open (undelivered, uncancelled) transactions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().expect("ledger lock poisoned").live.len()
    }

    /// Number of parked entries awaiting pickup.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.state
            .lock()
            .expect("ledger lock poisoned")
            .parked
            .len()
    }
}
