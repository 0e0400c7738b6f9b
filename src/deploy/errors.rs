//! Deployment error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating, composing, registering or starting contexts
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Unsupported module location scheme: {scheme}")]
    UnsupportedLocationScheme { scheme: String },

    #[error("Cannot resolve module location {entry}: {reason}")]
    LocationUnresolvable { entry: String, reason: String },

    #[error("Archive scan failed for {}: {reason}", path.display())]
    ArchiveScanFailure { path: PathBuf, reason: String },

    #[error("Web root {} for context {context_path} does not exist", path.display())]
    WebRootNotFound { context_path: String, path: PathBuf },

    #[error("Invalid deployment descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Failed to parse context file {}: {reason}", path.display())]
    DescriptorParseFailure { path: PathBuf, reason: String },

    #[error("Class {class} cannot be resolved for module {module}")]
    ClassResolutionFailure { class: String, module: String },

    #[error("Context path {0} is already in use")]
    ContextPathInUse(String),

    #[error("Context {context_path} failed to start: {reason}")]
    ContextStartFailure {
        context_path: String,
        reason: String,
    },

    #[error("Deployer configuration missing: {0}")]
    MissingDeployerConfiguration(String),

    #[error("Deployment unavailable: {0}")]
    DeploymentUnavailable(String),

    #[error("Deployment task failed: {0}")]
    TaskFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn archive_scan(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DeployError::ArchiveScanFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn start_failure(context_path: &str, reason: impl ToString) -> Self {
        DeployError::ContextStartFailure {
            context_path: context_path.to_string(),
            reason: reason.to_string(),
        }
    }
}
