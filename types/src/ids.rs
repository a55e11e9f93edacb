use std::borrow::Cow;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Logical type identifier of a navigable destination.
///
/// Routes bind to destination ids, and the loader materializes instances
/// from them. Ids are opaque to the engine; `for_type` derives one from a
/// Rust type so that statically-known destinations need no naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DestinationId(Cow<'static, str>);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    #[must_use]
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Derive an id from a Rust type.
    #[must_use]
    pub fn for_type<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for DestinationId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for DestinationId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

#[derive(Debug, Error)]
#[error("transaction token is not a valid identifier")]
pub struct InvalidTransactionId;

/// Opaque token correlating a requester and a responder destination.
///
/// Tokens are collision-resistant (UUID v4) and round-trip through the
/// persisted-state bundle as strings, so a recreated holder can resume the
/// correlation it was stamped with before teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Allocate a fresh unique token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(token: &str) -> Result<Self, InvalidTransactionId> {
        Uuid::parse_str(token)
            .map(Self)
            .map_err(|_| InvalidTransactionId)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
