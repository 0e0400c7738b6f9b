//! Application server
//!
//! The long-lived process that hosts deployed contexts: a
//! [`ContextHandlerCollection`] of mounted [`ContextHandler`]s and an HTTP
//! listener that dispatches to them by context path.

pub mod context;
pub mod http;
#[allow(clippy::module_inception)]
pub mod server;

pub use context::{
    ContextHandler, ContextHandlerCollection, ContextKind, LifecycleState, WebAppSettings,
    KNOWN_CONFIGURATIONS,
};
pub use server::ApplicationServer;
