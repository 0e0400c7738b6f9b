//! webapp-bridge - deploys web applications declared by dynamic modules
//!
//! Runs a long-lived application server and keeps its mounted contexts in
//! step with a module lifecycle: modules that declare a web application
//! (through manifest headers or a published descriptor object) are deployed
//! when they start and undeployed when they stop.
//!
//! ## Layout
//!
//! 1. `module`: the observed module system (manifests, lifecycle, events,
//!    directory discovery and watch drivers)
//! 2. `deploy`: location resolution, class-loader composition, registration
//!    helper and deployment tracker
//! 3. `server`: context handlers, their collection and the HTTP surface
//! 4. `bootstrap`: system properties, server descriptor and wiring
//!
//! ## Design Principles
//!
//! 1. **Explicit wiring**: the server, helper and tracker receive their
//!    collaborators as `Arc`s; there is no global server instance
//! 2. **Configured, not introspected**: deployer defaults come from the
//!    server descriptor
//! 3. **One bad module never stops the rest**: deployment failures are
//!    logged with the module identity and processing continues

pub mod bootstrap;
pub mod config;
pub mod deploy;
pub mod module;
pub mod server;
pub mod utils;

pub use bootstrap::{Bootstrap, SystemProperties};
pub use config::{BridgeConfig, ServerDescriptor};
pub use deploy::{
    DeployError, DeploymentDescriptor, DeploymentTracker, LocationResolver, WebappDeployer,
    WebappRegistrationHelper,
};
pub use module::{Module, ModuleError, ModuleFramework};
pub use server::{ApplicationServer, ContextHandler, ContextHandlerCollection};
