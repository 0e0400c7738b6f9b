//! Context descriptor files
//!
//! A context descriptor is a TOML file describing one context. String values
//! may reference `${name}` properties from a [`PropertyTable`], which carries
//! the server instance, server-wide properties and the contributing module's
//! install location. References are expanded after parsing, so property
//! values are never read as TOML.
//!
//! ```toml
//! kind = "webapp"
//! context_path = "/acme"
//! war = "${module.location}/web"
//! welcome_files = ["index.html"]
//!
//! [attributes]
//! "acme.greeting" = "hello"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::deploy::classloader::Resolver;
use crate::deploy::errors::DeployError;
use crate::server::context::ContextHandler;
use crate::server::ApplicationServer;

/// Property naming the server instance
pub const SERVER_NAME: &str = "server.name";
/// Property holding the contributing module's install location
pub const MODULE_LOCATION: &str = "module.location";
/// Property holding the contributing module's symbolic name
pub const MODULE_NAME: &str = "module.name";

/// Properties visible to a context descriptor, seeded with the server
#[derive(Clone)]
pub struct PropertyTable {
    server: Arc<ApplicationServer>,
    values: BTreeMap<String, String>,
}

impl PropertyTable {
    pub fn new(server: Arc<ApplicationServer>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(SERVER_NAME.to_string(), server.name().to_string());
        Self { server, values }
    }

    pub fn server(&self) -> &Arc<ApplicationServer> {
        &self.server
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<'a>(&mut self, properties: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in properties {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every `${name}` in `text`; undefined names are an error
    pub fn substitute(&self, text: &str) -> Result<String, String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| "unterminated ${ reference".to_string())?;
            let key = &after[..end];
            let value = self
                .get(key)
                .ok_or_else(|| format!("undefined property `{}`", key))?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Parses a context descriptor file into an unstarted context
pub trait ConfigLoader: Send + Sync {
    /// `loader` is the host class space, used to check classes the
    /// descriptor requires
    fn load(
        &self,
        path: &Path,
        properties: &PropertyTable,
        loader: &Arc<dyn Resolver>,
    ) -> Result<ContextHandler, DeployError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContextFileKind {
    #[default]
    Context,
    Webapp,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContextFile {
    #[serde(default)]
    kind: ContextFileKind,
    context_path: String,
    #[serde(default)]
    war: Option<PathBuf>,
    #[serde(default)]
    resource_base: Option<PathBuf>,
    #[serde(default)]
    welcome_files: Option<Vec<String>>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    required_classes: Vec<String>,
}

/// Default [`ConfigLoader`] reading TOML descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlContextLoader;

impl ConfigLoader for TomlContextLoader {
    fn load(
        &self,
        path: &Path,
        properties: &PropertyTable,
        loader: &Arc<dyn Resolver>,
    ) -> Result<ContextHandler, DeployError> {
        let parse_failure = |reason: String| DeployError::DescriptorParseFailure {
            path: path.to_path_buf(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| parse_failure(e.to_string()))?;
        let mut document: toml::Value =
            toml::from_str(&raw).map_err(|e| parse_failure(e.to_string()))?;
        substitute_strings(&mut document, properties).map_err(parse_failure)?;
        let file = toml::Value::try_into::<ContextFile>(document)
            .map_err(|e| parse_failure(e.to_string()))?;

        if !file.context_path.starts_with('/') {
            return Err(parse_failure(format!(
                "context_path {:?} must start with '/'",
                file.context_path
            )));
        }
        for class in &file.required_classes {
            loader
                .load_class(class)
                .map_err(|e| parse_failure(e.to_string()))?;
        }

        let mut handler = match file.kind {
            ContextFileKind::Webapp => {
                let war = file
                    .war
                    .ok_or_else(|| parse_failure("kind = \"webapp\" requires war".to_string()))?;
                let mut handler = ContextHandler::webapp(file.context_path, war);
                if file.resource_base.is_some() {
                    handler.set_resource_base(file.resource_base);
                }
                handler
            }
            ContextFileKind::Context => {
                let mut handler = ContextHandler::new(file.context_path);
                handler.set_resource_base(file.resource_base);
                handler
            }
        };
        if let Some(welcome_files) = file.welcome_files {
            handler.set_welcome_files(welcome_files);
        }
        for (name, value) in file.attributes {
            handler.set_attribute(name, value);
        }

        debug!(
            "Loaded context {} from {:?}",
            handler.context_path(),
            path
        );
        Ok(handler)
    }
}

/// Expand `${name}` references inside every string value of `value`
fn substitute_strings(value: &mut toml::Value, properties: &PropertyTable) -> Result<(), String> {
    match value {
        toml::Value::String(text) => *text = properties.substitute(text)?,
        toml::Value::Array(items) => {
            for item in items {
                substitute_strings(item, properties)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_strings(item, properties)?;
            }
        }
        _ => {}
    }
    Ok(())
}
