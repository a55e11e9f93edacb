//! Navigation requests and the collaborator seams used to build them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use waypoint_types::{DestinationId, PresentationHints, RouteParams};

use crate::destination::Destination;

/// A fully-populated navigation request.
///
/// Created fresh per navigation call and consumed once by the engine. The
/// `instance` field is filled by the loader, or by the caller when it
/// already holds a destination to present.
pub struct NavigationRequest {
    pub destination: DestinationId,
    pub params: RouteParams,
    pub hints: PresentationHints,
    pub instance: Option<Arc<dyn Destination>>,
}

impl NavigationRequest {
    #[must_use]
    pub fn new(destination: DestinationId) -> Self {
        Self {
            destination,
            params: RouteParams::new(),
            hints: PresentationHints::new(),
            instance: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: RouteParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_hints(mut self, hints: PresentationHints) -> Self {
        self.hints = hints;
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: Arc<dyn Destination>) -> Self {
        self.instance = Some(instance);
        self
    }
}

impl fmt::Debug for NavigationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationRequest")
            .field("destination", &self.destination)
            .field("params", &self.params)
            .field("hints", &self.hints)
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}

/// Intercepts a route resolution and rewrites it before the destination is
/// loaded.
///
/// A facade returning `Ok(None)` is a build failure, reported as such — a
/// facade that decides not to rewrite must return the request it was going
/// to produce anyway.
#[async_trait]
pub trait RouteFacade: Send + Sync {
    async fn build_request(
        &self,
        path: &str,
        params: RouteParams,
    ) -> anyhow::Result<Option<NavigationRequest>>;
}

/// Materializes destination instances for requests.
pub trait DestinationLoader: Send + Sync {
    fn load(&self, request: &NavigationRequest) -> anyhow::Result<Arc<dyn Destination>>;

    /// Refresh a caller-supplied instance for a new request. The default
    /// keeps the instance as-is.
    fn reload(
        &self,
        existing: Arc<dyn Destination>,
        request: &NavigationRequest,
    ) -> anyhow::Result<Arc<dyn Destination>> {
        let _ = request;
        Ok(existing)
    }
}
