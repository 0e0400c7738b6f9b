//! Deployment bridge
//!
//! Turns module deployment declarations into context handlers on the
//! application server.
//!
//! - [`LocationResolver`]: where a module lives on disk
//! - [`ClassLoaderComposer`]: class resolution for deployed contexts
//! - [`DeploymentDescriptor`]: what a module asks to deploy
//! - [`WebappRegistrationHelper`]: builds, registers and starts contexts
//! - [`DeploymentTracker`]: reacts to module and descriptor events

pub mod classloader;
pub mod context_file;
pub mod descriptor;
pub mod errors;
pub mod helper;
pub mod location;
pub mod tracker;

pub use classloader::{
    ArchiveEnumerable, ClassDef, ClassLoaderComposer, ClassNotFound, ClassSpace,
    ComposedClassLoader, DelegatingResolver, Resolver, WebAppClassLoader,
};
pub use context_file::{ConfigLoader, PropertyTable, TomlContextLoader};
pub use descriptor::DeploymentDescriptor;
pub use errors::DeployError;
pub use helper::{WebappDeployer, WebappRegistrationHelper};
pub use location::{ConfiguredEntryLocator, EntryLocator, LocationResolver};
pub use tracker::{DeploymentTracker, TrackingKey};
