//! Route configuration loading.
//!
//! Route bindings can be declared in TOML and loaded as a whole table:
//!
//! ```toml
//! [[routes]]
//! pattern = "^/items/(?<id>\\d+)$"
//! destination = "ItemView"
//! ```

use serde::Deserialize;

use waypoint_types::{DestinationId, NavigationError};

use crate::routes::RouteEntry;

#[derive(Debug, Deserialize)]
struct RouteFile {
    #[serde(default)]
    routes: Vec<RouteBinding>,
}

#[derive(Debug, Deserialize)]
struct RouteBinding {
    pattern: String,
    destination: String,
}

/// Parse a TOML route definition into entries ready for
/// [`RouteTable::load`](crate::RouteTable::load).
///
/// Fails on the first invalid binding; no partial table is produced.
pub fn routes_from_toml(text: &str) -> Result<Vec<RouteEntry>, NavigationError> {
    let file: RouteFile =
        toml::from_str(text).map_err(|e| NavigationError::InvalidRouteConfig {
            reason: e.to_string(),
        })?;

    file.routes
        .into_iter()
        .map(|binding| {
            if binding.destination.trim().is_empty() {
                return Err(NavigationError::InvalidArgument("destination"));
            }
            RouteEntry::new(&binding.pattern, DestinationId::new(binding.destination))
        })
        .collect()
}
