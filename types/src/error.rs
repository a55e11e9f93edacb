use thiserror::Error;

use crate::ids::DestinationId;

/// Failures surfaced by the navigation engine.
///
/// Presenter refusals are deliberately absent: a presenter reporting that it
/// could not show or dismiss a destination is a boolean outcome callers are
/// expected to branch on, not an exception.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// A required argument was null/empty. Raised synchronously, before any
    /// state mutation.
    #[error("{0} must not be empty")]
    InvalidArgument(&'static str),

    #[error("no route matches `{path}`")]
    RouteNotFound { path: String },

    /// Several equally-specific patterns matched; resolution refuses to
    /// guess.
    #[error("route `{path}` is ambiguous across {count} equally specific patterns")]
    RouteAmbiguous { path: String, count: usize },

    #[error("route pattern `{pattern}` is invalid: {reason}")]
    InvalidRoutePattern { pattern: String, reason: String },

    #[error("route configuration is invalid: {reason}")]
    InvalidRouteConfig { reason: String },

    /// A facade threw or returned no request while rewriting a resolution.
    /// Carries the originating path and the failing destination so the
    /// misbehaving facade can be identified from the error alone.
    #[error("facade for `{destination}` failed while rewriting `{path}`: {reason}")]
    FacadeFailure {
        path: String,
        destination: DestinationId,
        reason: String,
    },

    #[error("destination loader failed for `{destination}`: {reason}")]
    LoadFailure {
        destination: DestinationId,
        reason: String,
    },

    /// A delivered or parked result's type has no registered handler on the
    /// requester. This is a misconfiguration, never silently dropped.
    #[error("no result handler for `{type_name}` registered on `{destination}`")]
    TypeMismatch {
        destination: DestinationId,
        type_name: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_failure_names_path_and_destination() {
        let err = NavigationError::FacadeFailure {
            path: "/items/42".to_string(),
            destination: DestinationId::from_static("ItemView"),
            reason: "backend unreachable".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("/items/42"));
        assert!(rendered.contains("ItemView"));
    }
}
