//! The authentication/authorization collaborator (spec §6 "Auth
//! interface").
//!
//! Out of scope per spec §1: this crate only defines the interface the
//! service facade consumes to gate reads/writes and to stamp `meta`. A real
//! deployment backs this with a session/identity service.

use crate::error::Result;
use async_trait::async_trait;

/// A validated caller identity and its authorization decisions for this
/// request.
///
/// Modeled on the teacher's `AuthContext` (`src/server/auth/traits.rs`):
/// library code never sees raw tokens or provider-specific claims, only
/// this narrow, provider-agnostic view.
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Whether this session is authenticated. The service facade rejects
    /// every request when this is `false` (spec §4.4).
    fn active(&self) -> bool;

    /// The authenticated user's id, stamped into `meta.user`.
    fn user_id(&self) -> &str;

    /// The session's id, stamped into `meta.session`.
    fn session_id(&self) -> &str;

    /// Whether this session may read `(type, id)`'s content.
    async fn may_read_content(&self, doc_type: &str, id: &str) -> Result<bool>;

    /// Whether this session may write `(type, id)`'s content.
    async fn may_write_content(&self, doc_type: &str, id: &str) -> Result<bool>;
}
