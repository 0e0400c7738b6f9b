//! Module system observed by the deployment bridge
//!
//! Modules are deployable units with manifest headers and a lifecycle. The
//! bridge never owns them: it watches their transitions through
//! [`FrameworkEvent`]s and reacts.
//!
//! ## Drivers
//!
//! - [`ModuleDiscovery`]: installs every module found in a directory
//! - [`ModuleWatcher`]: installs, starts, stops and uninstalls modules as
//!   they appear in or vanish from a directory

pub mod discovery;
pub mod framework;
pub mod manifest;
pub mod model;
pub mod traits;
pub mod watcher;

pub use discovery::ModuleDiscovery;
pub use framework::ModuleFramework;
pub use manifest::Manifest;
pub use model::{Module, PublishedDescriptor};
pub use traits::{
    FrameworkEvent, ModuleError, ModuleEvent, ModuleEventKind, ModuleId, ModuleState, ServiceEvent,
    ServiceEventKind, ServiceId,
};
pub use watcher::ModuleWatcher;
