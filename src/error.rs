//! Stable, matchable error kinds for the content backend.
//!
//! Modeled on the teacher SDK's `crate::error::{Error, ErrorCode, Result}`
//! pattern: callers match on variants rather than inspect opaque error
//! chains, because the work loop and the service facade both branch on
//! error *kind* (retry vs. propagate vs. swallow).

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The name of an entity kind, used to qualify [`Error::InvalidEntity`],
/// [`Error::AlreadyExists`], and [`Error::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A [`crate::model::Schema`].
    Schema,
    /// An [`crate::model::Operation`].
    Operation,
    /// A [`crate::model::Snapshot`].
    Snapshot,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Schema => write!(f, "schema"),
            EntityKind::Operation => write!(f, "operation"),
            EntityKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Stable error kinds surfaced to RPC callers and stream consumers.
///
/// Every variant corresponds 1:1 to an error kind in spec §7. None of them
/// carry stack traces or other non-deterministic, environment-dependent
/// detail — this is a deliberate API design, not an oversight: callers use
/// these to decide how to react (retry, surface to the user, drop the
/// connection), so the shape of the error must be stable across builds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Failed validation of a schema/operation argument.
    #[error("invalid {entity}: {key}: {reason}")]
    InvalidEntity {
        /// Entity kind that failed validation.
        entity: EntityKind,
        /// The entity's key (e.g. a schema hash or operation key).
        key: String,
        /// Human-readable reason, not matched on.
        reason: String,
    },

    /// The store rejected a write because the entity already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists {
        /// Entity kind that collided.
        entity: EntityKind,
        /// The colliding primary key.
        key: String,
        /// Opaque description of the conflicting value, for diagnostics only.
        value: String,
    },

    /// A referenced entity does not exist in the store.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind that was missing.
        entity: EntityKind,
        /// The key that was looked up.
        key: String,
    },

    /// Caller is not authenticated, or not permitted to perform the action.
    #[error("auth: {0}")]
    Auth(String),

    /// Serialized size of an entity exceeds its configured ceiling.
    #[error("{0} exceeds maximum serialized size")]
    EntityTooLarge(EntityKind),

    /// An internal invariant was violated (programmer error).
    ///
    /// Out-of-sequence operation versions, a migration shape-mismatch
    /// post-condition failure, and similar "this should never happen"
    /// conditions all surface here. Spec §7 treats this as fatal to the
    /// operation it occurred in, never silently downgraded.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A collaborator (store, pub/sub) failed in a way that isn't one of
    /// the above — wrapped rather than downcast, since the backend has no
    /// use for the collaborator's internal error type.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Construct [`Error::InvalidEntity`].
    pub fn invalid(entity: EntityKind, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidEntity {
            entity,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Construct [`Error::AlreadyExists`].
    pub fn already_exists(
        entity: EntityKind,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Error::AlreadyExists {
            entity,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Construct [`Error::NotFound`].
    pub fn not_found(entity: EntityKind, key: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Construct [`Error::Auth`].
    pub fn auth(reason: impl Into<String>) -> Self {
        Error::Auth(reason.into())
    }

    /// Construct [`Error::EntityTooLarge`].
    pub fn too_large(entity: EntityKind) -> Self {
        Error::EntityTooLarge(entity)
    }

    /// Construct [`Error::Assertion`].
    pub fn assertion(reason: impl Into<String>) -> Self {
        Error::Assertion(reason.into())
    }

    /// Construct [`Error::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal(reason.into())
    }

    /// True if the store rejected a duplicate write.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_display_contains_key() {
        let err = Error::already_exists(EntityKind::Operation, "op-42", "<redacted>");
        assert!(err.to_string().contains("op-42"));
        assert!(err.is_already_exists());
    }

    #[test]
    fn not_found_is_not_already_exists() {
        let err = Error::not_found(EntityKind::Schema, "deadbeef");
        assert!(!err.is_already_exists());
    }
}
