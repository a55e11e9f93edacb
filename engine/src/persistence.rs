//! Persistence bridge: round-trips a holder's transaction stamps through
//! an opaque key/value state bundle.
//!
//! Exactly two reserved keys are written per holder. Restoration must run
//! before the holder becomes result-capable, so that the automatic
//! parked-result pickup can find its entry.

use std::collections::HashMap;

use waypoint_types::TransactionId;

use crate::destination::Destination;

/// Reserved bundle key for the requester-side transaction token.
pub const REQUESTER_TRANSACTION_KEY: &str = "waypoint.transaction.requester";
/// Reserved bundle key for the responder-side transaction token.
pub const RESPONDER_TRANSACTION_KEY: &str = "waypoint.transaction.responder";

/// Opaque string-keyed store used for process-restart survival.
///
/// The engine only ever touches its two reserved keys; everything else in
/// the bundle belongs to the application.
pub trait StateBundle {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
}

impl StateBundle for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// Write the holder's stamped tokens into the bundle.
pub fn save_correlation(destination: &dyn Destination, bundle: &mut dyn StateBundle) {
    let correlation = destination.correlation();
    if let Some(token) = correlation.requester_id() {
        bundle.set(REQUESTER_TRANSACTION_KEY, token.to_string());
    }
    if let Some(token) = correlation.responder_id() {
        bundle.set(RESPONDER_TRANSACTION_KEY, token.to_string());
    }
}

/// Re-stamp a recreated holder from the bundle.
///
/// Unparseable tokens are logged and skipped rather than propagated: a
/// corrupt bundle must not prevent the destination from coming back up.
pub fn restore_correlation(destination: &dyn Destination, bundle: &dyn StateBundle) {
    let correlation = destination.correlation();
    if let Some(raw) = bundle.get(REQUESTER_TRANSACTION_KEY) {
        match TransactionId::parse(&raw) {
            Ok(token) => correlation.stamp_requester(token),
            Err(_) => {
                tracing::warn!(raw, "discarding unparseable requester transaction token");
            }
        }
    }
    if let Some(raw) = bundle.get(RESPONDER_TRANSACTION_KEY) {
        match TransactionId::parse(&raw) {
            Ok(token) => correlation.stamp_responder(token),
            Err(_) => {
                tracing::warn!(raw, "discarding unparseable responder transaction token");
            }
        }
    }
}
