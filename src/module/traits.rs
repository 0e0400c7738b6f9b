//! Module system types and lifecycle events
//!
//! Defines module identity, lifecycle state and the events a module system
//! delivers to observers such as the deployment tracker.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::module::model::{Module, PublishedDescriptor};

/// Unique module identity, assigned at install time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Identity of a published descriptor object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Installed but not running
    Installed,
    /// Start in progress
    Starting,
    /// Running
    Active,
    /// Stop in progress
    Stopping,
    /// Removed from the module system
    Uninstalled,
}

impl ModuleState {
    /// Whether a module in this state is a deployment candidate
    pub fn is_starting_or_active(self) -> bool {
        matches!(self, ModuleState::Starting | ModuleState::Active)
    }
}

/// Kind of module lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEventKind {
    Installed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Uninstalled,
}

/// A module lifecycle transition
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub kind: ModuleEventKind,
    pub module: Arc<Module>,
}

impl ModuleEvent {
    pub fn new(kind: ModuleEventKind, module: Arc<Module>) -> Self {
        Self { kind, module }
    }
}

/// Kind of descriptor publication change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Unregistering,
}

/// A descriptor object was published or is being withdrawn
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub descriptor: Arc<PublishedDescriptor>,
}

/// Everything a module system reports to its observers
#[derive(Debug, Clone)]
pub enum FrameworkEvent {
    Module(ModuleEvent),
    Service(ServiceEvent),
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {module} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        module: ModuleId,
        from: ModuleState,
        to: ModuleState,
    },

    #[error("Class {class} not found in {module}")]
    ClassNotFound { class: String, module: String },

    #[error("Module archive error: {0}")]
    Archive(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ModuleError {
    fn from(e: zip::result::ZipError) -> Self {
        ModuleError::Archive(e.to_string())
    }
}
