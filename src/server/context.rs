//! Context handlers and the collection they are mounted in

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tracing::{debug, info};

use crate::deploy::classloader::Resolver;
use crate::deploy::errors::DeployError;
use crate::module::traits::ModuleId;

/// Configuration steps a web application may request
pub const KNOWN_CONFIGURATIONS: &[&str] = &[
    "web-descriptor",
    "server-web-descriptor",
    "meta-inf",
    "fragment",
    "naming",
];

/// Context lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
}

/// Web application settings copied from the deployer defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebAppSettings {
    pub war: PathBuf,
    pub configuration_classes: Vec<String>,
    pub defaults_descriptor: Option<String>,
    pub parent_loader_priority: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// Directory-based web application
    WebApp(WebAppSettings),
    /// Plain context
    Plain,
}

/// One application mounted at a context path
///
/// Configured while owned, then shared behind an `Arc` once added to a
/// [`ContextHandlerCollection`].
#[derive(Debug)]
pub struct ContextHandler {
    context_path: String,
    kind: ContextKind,
    resource_base: Option<PathBuf>,
    welcome_files: Vec<String>,
    attributes: BTreeMap<String, String>,
    class_loader: Option<Arc<dyn Resolver>>,
    contributor: Option<ModuleId>,
    server: OnceLock<String>,
    state: Mutex<LifecycleState>,
}

impl ContextHandler {
    /// Plain context with no resource base
    pub fn new(context_path: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            kind: ContextKind::Plain,
            resource_base: None,
            welcome_files: default_welcome_files(),
            attributes: BTreeMap::new(),
            class_loader: None,
            contributor: None,
            server: OnceLock::new(),
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    /// Web application serving `war`
    pub fn webapp(context_path: impl Into<String>, war: PathBuf) -> Self {
        let mut handler = Self::new(context_path);
        handler.resource_base = Some(war.clone());
        handler.kind = ContextKind::WebApp(WebAppSettings {
            war,
            ..WebAppSettings::default()
        });
        handler
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn is_webapp(&self) -> bool {
        matches!(self.kind, ContextKind::WebApp(_))
    }

    pub fn webapp_settings(&self) -> Option<&WebAppSettings> {
        match &self.kind {
            ContextKind::WebApp(settings) => Some(settings),
            ContextKind::Plain => None,
        }
    }

    pub fn webapp_settings_mut(&mut self) -> Option<&mut WebAppSettings> {
        match &mut self.kind {
            ContextKind::WebApp(settings) => Some(settings),
            ContextKind::Plain => None,
        }
    }

    pub fn resource_base(&self) -> Option<&Path> {
        self.resource_base.as_deref()
    }

    pub fn set_resource_base(&mut self, base: Option<PathBuf>) {
        self.resource_base = base;
    }

    pub fn welcome_files(&self) -> &[String] {
        &self.welcome_files
    }

    pub fn set_welcome_files(&mut self, files: Vec<String>) {
        self.welcome_files = files;
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Add attributes without replacing ones already set
    pub fn add_default_attributes(&mut self, defaults: &BTreeMap<String, String>) {
        for (name, value) in defaults {
            self.attributes
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn class_loader(&self) -> Option<&Arc<dyn Resolver>> {
        self.class_loader.as_ref()
    }

    pub fn set_class_loader(&mut self, loader: Arc<dyn Resolver>) {
        self.class_loader = Some(loader);
    }

    /// Module that contributed this context
    pub fn contributor(&self) -> Option<ModuleId> {
        self.contributor
    }

    pub fn set_contributor(&mut self, module: ModuleId) {
        self.contributor = Some(module);
    }

    /// Name of the server this context is mounted on
    pub fn server(&self) -> Option<&str> {
        self.server.get().map(String::as_str)
    }

    pub(crate) fn bind_server(&self, name: &str) {
        let _ = self.server.set(name.to_string());
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Start the context
    pub fn start(&self) -> Result<(), DeployError> {
        self.set_state(LifecycleState::Starting);
        match self.check_startable() {
            Ok(()) => {
                self.set_state(LifecycleState::Started);
                info!("Started context {}", self.context_path);
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    fn check_startable(&self) -> Result<(), DeployError> {
        if let Some(base) = &self.resource_base {
            if !base.is_dir() {
                return Err(DeployError::start_failure(
                    &self.context_path,
                    format!("resource base {} is not a directory", base.display()),
                ));
            }
        }
        if let ContextKind::WebApp(settings) = &self.kind {
            if self.class_loader.is_none() {
                return Err(DeployError::start_failure(
                    &self.context_path,
                    "web application has no class loader",
                ));
            }
            if let Some(unknown) = settings
                .configuration_classes
                .iter()
                .find(|c| !KNOWN_CONFIGURATIONS.contains(&c.as_str()))
            {
                return Err(DeployError::start_failure(
                    &self.context_path,
                    format!("unknown configuration {}", unknown),
                ));
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.state() == LifecycleState::Stopped {
            return;
        }
        self.set_state(LifecycleState::Stopping);
        self.set_state(LifecycleState::Stopped);
        info!("Stopped context {}", self.context_path);
    }

    /// Remainder of `path` below this context, if the context covers it
    pub fn sub_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.context_path == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.context_path.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

fn default_welcome_files() -> Vec<String> {
    vec!["index.html".to_string(), "index.htm".to_string()]
}

/// Mounted contexts, keyed by context path
#[derive(Debug, Default)]
pub struct ContextHandlerCollection {
    handlers: RwLock<Vec<Arc<ContextHandler>>>,
}

impl ContextHandlerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a handler; its context path must be free
    pub fn add(&self, handler: Arc<ContextHandler>) -> Result<(), DeployError> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers
            .iter()
            .any(|h| h.context_path() == handler.context_path())
        {
            return Err(DeployError::ContextPathInUse(
                handler.context_path().to_string(),
            ));
        }
        debug!("Mounted {}", handler.context_path());
        handlers.push(handler);
        Ok(())
    }

    /// Unmount the handler at `context_path`
    pub fn remove(&self, context_path: &str) -> Option<Arc<ContextHandler>> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let index = handlers
            .iter()
            .position(|h| h.context_path() == context_path)?;
        debug!("Unmounted {}", context_path);
        Some(handlers.remove(index))
    }

    pub fn get(&self, context_path: &str) -> Option<Arc<ContextHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|h| h.context_path() == context_path)
            .cloned()
    }

    pub fn handlers(&self) -> Vec<Arc<ContextHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Started handler with the longest context path covering `path`
    pub fn match_request(&self, path: &str) -> Option<(Arc<ContextHandler>, String)> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| h.is_started())
            .filter_map(|h| h.sub_path(path).map(|rest| (h, rest)))
            .max_by_key(|(h, _)| h.context_path().len())
            .map(|(h, rest)| (Arc::clone(h), rest.to_string()))
    }

    /// Stop every handler, leaving them mounted
    pub fn stop_all(&self) {
        for handler in self.handlers() {
            handler.stop();
        }
    }
}
