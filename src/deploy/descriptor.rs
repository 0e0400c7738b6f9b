//! Deployment descriptors
//!
//! What a module asks to deploy, read from its manifest headers or from the
//! properties of a descriptor object it published.

use std::collections::BTreeMap;

use crate::deploy::errors::DeployError;
use crate::module::manifest::{Manifest, ACTIVATOR};
use crate::module::model::{
    PROP_CLASS_IN_BUNDLE, PROP_CONTEXT_FILE_PATH, PROP_CONTEXT_PATH, PROP_WAR,
};

/// Recognized manifest headers
pub mod headers {
    pub const WAR_FOLDER_PATH: &str = "Jetty-WarFolderPath";
    pub const RELATIVE_ROOT_FOLDER: &str = "WebappRelativeRootFolder";
    pub const WAR_CONTEXT_PATH: &str = "Jetty-WarContextPath";
    pub const CONTEXT_PATH: &str = "WebappContextPath";
    pub const CLASS_IN_BUNDLE: &str = "Jetty-ClassInBundle";
    pub const BUNDLE_CLASS: &str = "WebappBundleClass";
    pub const INTERNAL_CLASS_NAME: &str = "Webapp-InternalClassName";
    pub const CONTEXT_FILE_PATH: &str = "Jetty-ContextFilePath";

    pub const WEB_ROOT: &[&str] = &[WAR_FOLDER_PATH, RELATIVE_ROOT_FOLDER];
    pub const CONTEXT_PATHS: &[&str] = &[WAR_CONTEXT_PATH, CONTEXT_PATH];
    pub const CLASS_NAMES: &[&str] = &[CLASS_IN_BUNDLE, BUNDLE_CLASS, INTERNAL_CLASS_NAME];
}

/// One application a module asks to deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentDescriptor {
    /// Directory-based web application
    WebApp {
        context_path: String,
        web_root: String,
        internal_class_name: Option<String>,
    },
    /// Declarative context file
    ContextFile {
        context_file_path: String,
        internal_class_name: Option<String>,
    },
}

impl DeploymentDescriptor {
    /// Read from manifest headers; `None` when the module deploys nothing
    ///
    /// A web-root header wins over a context-file header. The legacy
    /// `WebappContextPath` header alone deploys the module root.
    pub fn from_manifest(manifest: &Manifest) -> Result<Option<Self>, DeployError> {
        let internal_class_name = manifest
            .first_of(headers::CLASS_NAMES)
            .or_else(|| manifest.get(ACTIVATOR))
            .map(str::to_string);

        let web_root = manifest.first_of(headers::WEB_ROOT).or_else(|| {
            manifest
                .contains(headers::CONTEXT_PATH)
                .then_some("")
        });
        if let Some(web_root) = web_root {
            let context_path = validate_context_path(manifest.first_of(headers::CONTEXT_PATHS))?;
            return Ok(Some(DeploymentDescriptor::WebApp {
                context_path,
                web_root: web_root.to_string(),
                internal_class_name,
            }));
        }

        Ok(manifest
            .get(headers::CONTEXT_FILE_PATH)
            .map(|path| DeploymentDescriptor::ContextFile {
                context_file_path: path.to_string(),
                internal_class_name,
            }))
    }

    /// Read from published descriptor properties, falling back to the
    /// owning module's activator for the internal class name
    pub fn from_properties(
        properties: &BTreeMap<String, String>,
        manifest: &Manifest,
    ) -> Result<Option<Self>, DeployError> {
        let internal_class_name = properties
            .get(PROP_CLASS_IN_BUNDLE)
            .map(String::as_str)
            .or_else(|| manifest.get(ACTIVATOR))
            .map(str::to_string);

        let war = properties.get(PROP_WAR);
        let context_path = properties.get(PROP_CONTEXT_PATH);
        if war.is_some() || context_path.is_some() {
            return Ok(Some(DeploymentDescriptor::WebApp {
                context_path: validate_context_path(context_path.map(String::as_str))?,
                web_root: war.cloned().unwrap_or_default(),
                internal_class_name,
            }));
        }

        Ok(properties
            .get(PROP_CONTEXT_FILE_PATH)
            .map(|path| DeploymentDescriptor::ContextFile {
                context_file_path: path.clone(),
                internal_class_name,
            }))
    }

    pub fn internal_class_name(&self) -> Option<&str> {
        match self {
            DeploymentDescriptor::WebApp {
                internal_class_name,
                ..
            }
            | DeploymentDescriptor::ContextFile {
                internal_class_name,
                ..
            } => internal_class_name.as_deref(),
        }
    }
}

fn validate_context_path(path: Option<&str>) -> Result<String, DeployError> {
    match path {
        Some(path) if path.starts_with('/') => Ok(path.to_string()),
        Some(path) => Err(DeployError::InvalidDescriptor(format!(
            "context path {:?} must start with '/'",
            path
        ))),
        None => Err(DeployError::InvalidDescriptor(
            "a web root is declared without a context path".to_string(),
        )),
    }
}
