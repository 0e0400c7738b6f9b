//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use webapp_bridge::config::ServerDescriptor;
use webapp_bridge::deploy::{
    ClassSpace, DeployError, LocationResolver, Resolver, WebappDeployer, WebappRegistrationHelper,
};
use webapp_bridge::module::Module;
use webapp_bridge::server::{ApplicationServer, ContextHandler};

/// A directory of exploded modules
pub struct ModuleFixture {
    pub dir: TempDir,
}

impl ModuleFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>/META-INF/MANIFEST.MF` with `headers`, plus empty `dirs`
    pub fn module(&self, name: &str, headers: &[(&str, &str)], dirs: &[&str]) -> PathBuf {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(root.join("META-INF")).unwrap();
        let mut manifest = format!("Manifest-Version: 1.0\nBundle-SymbolicName: {}\n", name);
        for (key, value) in headers {
            manifest.push_str(&format!("{}: {}\n", key, value));
        }
        std::fs::write(root.join("META-INF/MANIFEST.MF"), manifest).unwrap();
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        root
    }
}

pub fn host() -> Arc<dyn Resolver> {
    Arc::new(ClassSpace::empty("host"))
}

/// Helper over a fresh default server with no listener
pub fn helper() -> Arc<WebappRegistrationHelper> {
    helper_for(ServerDescriptor::default())
}

pub fn helper_for(descriptor: ServerDescriptor) -> Arc<WebappRegistrationHelper> {
    Arc::new(WebappRegistrationHelper::new(
        Arc::new(ApplicationServer::new(descriptor)),
        Arc::new(LocationResolver::new(vec!["jar".to_string()])),
        host(),
    ))
}

/// One deployer call as seen by [`Recorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Webapp {
        module: String,
        web_root: PathBuf,
        context_path: String,
    },
    Context {
        module: String,
        context_file: String,
    },
    Unregister(String),
}

/// Records calls, then forwards them to an inner deployer
pub struct Recorder {
    inner: Arc<dyn WebappDeployer>,
    locations: LocationResolver,
    pub calls: Mutex<Vec<Call>>,
    pub failures: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new(inner: Arc<dyn WebappDeployer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            locations: LocationResolver::new(vec!["jar".to_string()]),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn webapp_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Webapp { .. }))
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    fn record<T>(&self, result: Result<T, DeployError>) -> Result<T, DeployError> {
        if let Err(e) = &result {
            self.failures.lock().unwrap().push(format!("{:?}", e));
        }
        result
    }
}

impl WebappDeployer for Recorder {
    fn register_webapplication(
        &self,
        module: &Module,
        web_root: &str,
        context_path: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        let root = self
            .locations
            .resolve(module)
            .unwrap_or_default()
            .join(web_root);
        self.calls.lock().unwrap().push(Call::Webapp {
            module: module.symbolic_name().to_string(),
            web_root: root,
            context_path: context_path.to_string(),
        });
        self.record(self.inner.register_webapplication(
            module,
            web_root,
            context_path,
            internal_class_name,
        ))
    }

    fn register_context(
        &self,
        module: &Module,
        context_file: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        self.calls.lock().unwrap().push(Call::Context {
            module: module.symbolic_name().to_string(),
            context_file: context_file.to_string(),
        });
        self.record(
            self.inner
                .register_context(module, context_file, internal_class_name),
        )
    }

    fn unregister(&self, context_path: &str) -> Result<(), DeployError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Unregister(context_path.to_string()));
        self.record(self.inner.unregister(context_path))
    }
}
