//! Server-side core of a collaborative rich-text editing platform: a
//! per-document content backend, operation streaming, and a schema
//! migration engine.
//!
//! [`facade::ServiceFacade`] is the entry point most callers embed: it
//! validates arguments, stamps attribution metadata, and enforces
//! authorization in front of a [`backend::ContentBackend`]. The backend in
//! turn is generic over a [`store::Store`] and a [`pubsub::PubSub`]
//! collaborator, so a deployment supplies its own database- and
//! broker-backed implementations; [`test_support`] ships in-memory ones
//! for tests.
//!
//! [`migration`] is independent of all of the above: it's a pure function
//! from a document tree and a target schema to a migrated tree.

pub mod auth;
pub mod backend;
pub mod content_type;
pub mod error;
pub mod facade;
pub mod migration;
pub mod model;
pub mod pubsub;
pub mod store;
pub mod stream;

pub mod test_support;

pub use error::{Error, Result};
pub use facade::ServiceFacade;

/// Install a `tracing-subscriber` that reads its filter from `RUST_LOG`,
/// falling back to `content_core=debug` when unset. A convenience for
/// examples and integration tests, not something library code calls itself.
/// Safe to call more than once per process — later calls are no-ops, since
/// several tests in the same binary may each want logging on.
#[cfg(feature = "logging")]
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("content_core=debug")),
            )
            .init();
    });
}
