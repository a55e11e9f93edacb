//! Core domain types for Waypoint.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application.

mod error;
mod ids;
mod params;

pub use error::NavigationError;
pub use ids::{DestinationId, InvalidTransactionId, TransactionId};
pub use params::{PresentationHints, RouteParams};

/// Which side of the show/close lifecycle an operation or event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    Show,
    Close,
}
