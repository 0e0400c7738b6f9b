//! Web application and context registration
//!
//! [`WebappRegistrationHelper`] performs one concrete deployment or
//! undeployment against the server's context-handler collection: it builds
//! the context, applies the deployer defaults from the server descriptor,
//! attaches a composed class loader, mounts the context and starts it.
//!
//! The host class space is passed explicitly into every deployment; no
//! ambient loader state is read or modified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ContextDeployerConfig, WebAppDeployerConfig};
use crate::deploy::classloader::{ClassLoaderComposer, Resolver, WebAppClassLoader};
use crate::deploy::context_file::{
    ConfigLoader, PropertyTable, TomlContextLoader, MODULE_LOCATION, MODULE_NAME,
};
use crate::deploy::descriptor::headers;
use crate::deploy::errors::DeployError;
use crate::deploy::location::LocationResolver;
use crate::module::manifest::ACTIVATOR;
use crate::module::model::Module;
use crate::server::context::{ContextHandler, ContextHandlerCollection};
use crate::server::ApplicationServer;

/// Deployment operations the tracker drives
pub trait WebappDeployer: Send + Sync {
    /// Deploy the directory `web_root` (relative to the module root, empty
    /// for the root itself) at `context_path`
    fn register_webapplication(
        &self,
        module: &Module,
        web_root: &str,
        context_path: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError>;

    /// Deploy the context described by `context_file` (relative to the
    /// module root unless absolute)
    fn register_context(
        &self,
        module: &Module,
        context_file: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError>;

    /// Stop and unmount the context at `context_path`; unknown paths are a no-op
    fn unregister(&self, context_path: &str) -> Result<(), DeployError>;
}

/// Settings captured from the server at construction
struct Deployers {
    contexts: Arc<ContextHandlerCollection>,
    webapp: WebAppDeployerConfig,
    context: ContextDeployerConfig,
}

/// Registers web applications and contexts on an [`ApplicationServer`]
pub struct WebappRegistrationHelper {
    server: Arc<ApplicationServer>,
    locations: Arc<LocationResolver>,
    composer: ClassLoaderComposer,
    config_loader: Arc<dyn ConfigLoader>,
    scanner_support: Option<Arc<Module>>,
    properties: BTreeMap<String, String>,
    deployers: Result<Deployers, DeployError>,
}

impl WebappRegistrationHelper {
    /// Capture the server's deployer settings
    ///
    /// A server without a context-handler collection leaves the helper
    /// unavailable: the failure is logged here and every deployment fails
    /// with [`DeployError::DeploymentUnavailable`].
    pub fn new(
        server: Arc<ApplicationServer>,
        locations: Arc<LocationResolver>,
        host: Arc<dyn Resolver>,
    ) -> Self {
        let deployers = match server.contexts() {
            Some(contexts) => {
                let webapp = server.webapp_deployer().cloned().unwrap_or_else(|| {
                    warn!(
                        "Server {} has no web application deployer settings, using defaults",
                        server.name()
                    );
                    WebAppDeployerConfig::default()
                });
                let context = server.context_deployer().cloned().unwrap_or_else(|| {
                    warn!(
                        "Server {} has no context deployer settings, using defaults",
                        server.name()
                    );
                    ContextDeployerConfig::default()
                });
                Ok(Deployers {
                    contexts: Arc::clone(contexts),
                    webapp,
                    context,
                })
            }
            None => {
                let e = DeployError::MissingDeployerConfiguration(format!(
                    "server {} has no context-handler collection",
                    server.name()
                ));
                error!("{}; applications cannot be deployed", e);
                Err(e)
            }
        };

        Self {
            server,
            locations,
            composer: ClassLoaderComposer::new(host),
            config_loader: Arc::new(TomlContextLoader),
            scanner_support: None,
            properties: BTreeMap::new(),
            deployers,
        }
    }

    pub fn with_config_loader(mut self, loader: Arc<dyn ConfigLoader>) -> Self {
        self.config_loader = loader;
        self
    }

    /// Module whose archives are exposed to descriptor scanners
    pub fn with_scanner_support(mut self, module: Option<Arc<Module>>) -> Self {
        self.scanner_support = module;
        self
    }

    /// Server-wide properties made available to context descriptors
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn server(&self) -> &Arc<ApplicationServer> {
        &self.server
    }

    /// Why the helper cannot deploy, if it cannot
    pub fn initialization_error(&self) -> Option<&DeployError> {
        self.deployers.as_ref().err()
    }

    pub fn is_available(&self) -> bool {
        self.deployers.is_ok()
    }

    fn deployers(&self) -> Result<&Deployers, DeployError> {
        self.deployers
            .as_ref()
            .map_err(|e| DeployError::DeploymentUnavailable(e.to_string()))
    }

    /// Deploy an already-resolved web root directory
    pub fn register_webapplication_at(
        &self,
        module: &Module,
        war: &Path,
        context_path: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        let deployers = self.deployers()?;
        if !war.is_dir() {
            return Err(DeployError::WebRootNotFound {
                context_path: context_path.to_string(),
                path: war.to_path_buf(),
            });
        }

        let mut context = ContextHandler::webapp(context_path, war.to_path_buf());
        apply_webapp_defaults(&mut context, &deployers.webapp);
        self.attach_webapp_loader(&mut context, module, war, internal_class_name)?;
        context.set_contributor(module.id());

        self.mount_and_start(&deployers.contexts, context)
    }

    fn attach_webapp_loader(
        &self,
        context: &mut ContextHandler,
        module: &Module,
        war: &Path,
        internal_class_name: Option<&str>,
    ) -> Result<(), DeployError> {
        let class_name = fallback_class_name(module, internal_class_name);
        let composed = self
            .composer
            .compose(module, class_name.as_deref(), self.scanner_archives()?)?;
        let parent_first = context
            .webapp_settings()
            .is_some_and(|s| s.parent_loader_priority);
        let loader = WebAppClassLoader::new(
            Arc::new(composed),
            war,
            parent_first,
            self.locations.archive_extensions(),
        );
        context.set_class_loader(Arc::new(loader));
        Ok(())
    }

    fn scanner_archives(&self) -> Result<Vec<PathBuf>, DeployError> {
        match &self.scanner_support {
            Some(module) => self.locations.locate_archives(module),
            None => Ok(Vec::new()),
        }
    }

    fn property_table(&self, deployers: &Deployers, module: &Module, location: &Path) -> PropertyTable {
        let mut table = PropertyTable::new(Arc::clone(&self.server));
        table.extend(&self.properties);
        table.extend(&deployers.context.properties);
        table.insert(MODULE_LOCATION, location.to_string_lossy());
        table.insert(MODULE_NAME, module.symbolic_name());
        table
    }

    /// Mount, then start; a context that fails to start is unmounted again
    fn mount_and_start(
        &self,
        contexts: &ContextHandlerCollection,
        context: ContextHandler,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        let context = Arc::new(context);
        contexts.add(Arc::clone(&context))?;
        context.bind_server(self.server.name());
        if let Err(e) = context.start() {
            contexts.remove(context.context_path());
            return Err(e);
        }
        info!(
            "Deployed {} on {}",
            context.context_path(),
            self.server.name()
        );
        Ok(context)
    }
}

impl WebappDeployer for WebappRegistrationHelper {
    fn register_webapplication(
        &self,
        module: &Module,
        web_root: &str,
        context_path: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        self.deployers()?;
        let root = self.locations.resolve(module)?;
        let war = if web_root.is_empty() {
            root
        } else {
            root.join(web_root)
        };
        debug!(
            "Registering {} from {:?} for {}",
            context_path,
            war,
            module.symbolic_name()
        );
        self.register_webapplication_at(module, &war, context_path, internal_class_name)
    }

    fn register_context(
        &self,
        module: &Module,
        context_file: &str,
        internal_class_name: Option<&str>,
    ) -> Result<Arc<ContextHandler>, DeployError> {
        let deployers = self.deployers()?;
        let root = self.locations.resolve(module)?;
        let file = if Path::new(context_file).is_absolute() {
            PathBuf::from(context_file)
        } else {
            root.join(context_file)
        };
        if !file.is_file() {
            return Err(DeployError::DescriptorParseFailure {
                path: file,
                reason: "context file does not exist".to_string(),
            });
        }

        let properties = self.property_table(deployers, module, &root);
        let mut context = self
            .config_loader
            .load(&file, &properties, self.composer.host())?;
        context.add_default_attributes(&deployers.context.context_attributes);

        if context.is_webapp() {
            apply_webapp_defaults(&mut context, &deployers.webapp);
            let war = context
                .webapp_settings()
                .map(|s| s.war.clone())
                .unwrap_or_else(|| root.clone());
            if !war.is_dir() {
                return Err(DeployError::WebRootNotFound {
                    context_path: context.context_path().to_string(),
                    path: war,
                });
            }
            self.attach_webapp_loader(&mut context, module, &war, internal_class_name)?;
        } else {
            let class_name = fallback_class_name(module, internal_class_name);
            let loader = self
                .composer
                .compose_simple(module, class_name.as_deref())?;
            context.set_class_loader(Arc::new(loader));
        }
        context.set_contributor(module.id());

        self.mount_and_start(&deployers.contexts, context)
    }

    fn unregister(&self, context_path: &str) -> Result<(), DeployError> {
        let Ok(deployers) = &self.deployers else {
            return Ok(());
        };
        match deployers.contexts.remove(context_path) {
            Some(context) => {
                context.stop();
                info!("Undeployed {}", context_path);
            }
            None => debug!("Nothing deployed at {}", context_path),
        }
        Ok(())
    }
}

/// Copy web application deployer defaults onto `context`
fn apply_webapp_defaults(context: &mut ContextHandler, defaults: &WebAppDeployerConfig) {
    if let Some(settings) = context.webapp_settings_mut() {
        settings.configuration_classes = defaults.configuration_classes.clone();
        settings.defaults_descriptor = defaults.defaults_descriptor.clone();
        settings.parent_loader_priority = defaults.parent_loader_priority;
    }
    context.add_default_attributes(&defaults.context_attributes);
}

fn fallback_class_name(module: &Module, explicit: Option<&str>) -> Option<String> {
    explicit
        .or_else(|| module.header(headers::INTERNAL_CLASS_NAME))
        .or_else(|| module.header(ACTIVATOR))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerDescriptor;
    use crate::deploy::classloader::ClassSpace;
    use crate::module::manifest::{Manifest, MANIFEST_ENTRY};
    use crate::module::traits::ModuleId;
    use std::fs;
    use tempfile::TempDir;
    use url::Url;

    fn module_in(root: &Path, headers: &[(&str, &str)], classes: ClassSpace) -> Module {
        Module::new(
            ModuleId(1),
            "org.example.app",
            Manifest::from_pairs(headers.iter().copied()),
            Some(Url::from_file_path(root.join(MANIFEST_ENTRY)).unwrap()),
            Arc::new(classes),
        )
    }

    fn helper_for(descriptor: ServerDescriptor) -> WebappRegistrationHelper {
        WebappRegistrationHelper::new(
            Arc::new(ApplicationServer::new(descriptor)),
            Arc::new(LocationResolver::new(vec!["jar".to_string()])),
            Arc::new(ClassSpace::empty("host")),
        )
    }

    #[test]
    fn registers_and_unregisters_webapp() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("web")).unwrap();
        let module = module_in(
            dir.path(),
            &[],
            ClassSpace::in_memory("app", [("org.example.Init", vec![0])]),
        );
        let mut descriptor = ServerDescriptor::default();
        if let Some(webapp) = descriptor.webapp_deployer.as_mut() {
            webapp.parent_loader_priority = true;
            webapp.configuration_classes = vec!["web-descriptor".to_string()];
            webapp
                .context_attributes
                .insert("scan".to_string(), ".*\\.jar".to_string());
        }
        let helper = helper_for(descriptor);

        let context = helper
            .register_webapplication(&module, "web", "/app1", Some("org.example.Init"))
            .unwrap();
        assert!(context.is_started());
        assert!(context.resource_base().unwrap().ends_with("web"));
        assert_eq!(context.attribute("scan"), Some(".*\\.jar"));
        assert_eq!(context.contributor(), Some(ModuleId(1)));
        assert_eq!(context.server(), Some("webapp-bridge"));
        assert!(context.webapp_settings().unwrap().parent_loader_priority);
        assert!(context
            .class_loader()
            .unwrap()
            .find_class("org.example.Init")
            .is_some());

        helper.unregister("/app1").unwrap();
        assert!(!context.is_started());
        helper.unregister("/app1").unwrap();
        assert!(helper.server().contexts().unwrap().is_empty());
    }

    #[test]
    fn missing_web_root_is_reported() {
        let dir = TempDir::new().unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        let err = helper_for(ServerDescriptor::default())
            .register_webapplication(&module, "missing", "/gone", None)
            .unwrap_err();
        assert!(matches!(err, DeployError::WebRootNotFound { .. }));
    }

    #[test]
    fn failed_start_unmounts_context() {
        let dir = TempDir::new().unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        let mut descriptor = ServerDescriptor::default();
        if let Some(webapp) = descriptor.webapp_deployer.as_mut() {
            webapp.configuration_classes = vec!["no-such-step".to_string()];
        }
        let helper = helper_for(descriptor);

        let err = helper
            .register_webapplication(&module, "", "/root", None)
            .unwrap_err();
        assert!(matches!(err, DeployError::ContextStartFailure { .. }));
        assert!(helper.server().contexts().unwrap().get("/root").is_none());
    }

    #[test]
    fn duplicate_context_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        let helper = helper_for(ServerDescriptor::default());
        helper
            .register_webapplication(&module, "", "/dup", None)
            .unwrap();
        assert!(matches!(
            helper.register_webapplication(&module, "", "/dup", None),
            Err(DeployError::ContextPathInUse(_))
        ));
    }

    #[test]
    fn activator_is_the_last_resort_class_name() {
        let dir = TempDir::new().unwrap();
        let module = module_in(
            dir.path(),
            &[("Bundle-Activator", "org.example.Missing")],
            ClassSpace::empty("app"),
        );
        let err = helper_for(ServerDescriptor::default())
            .register_webapplication(&module, "", "/a", None)
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::ClassResolutionFailure { class, .. } if class == "org.example.Missing"
        ));
    }

    #[test]
    fn keyless_server_makes_helper_unavailable() {
        let dir = TempDir::new().unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        let helper = helper_for(ServerDescriptor::keyless());

        assert!(matches!(
            helper.initialization_error(),
            Some(DeployError::MissingDeployerConfiguration(_))
        ));
        assert!(matches!(
            helper.register_webapplication(&module, "", "/a", None),
            Err(DeployError::DeploymentUnavailable(_))
        ));
        assert!(matches!(
            helper.register_context(&module, "ctx.toml", None),
            Err(DeployError::DeploymentUnavailable(_))
        ));
        helper.unregister("/a").unwrap();
    }

    #[test]
    fn registers_plain_context_from_descriptor() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("contexts")).unwrap();
        fs::create_dir_all(root.join("static")).unwrap();
        fs::write(
            root.join("contexts/acme.toml"),
            r#"
context_path = "/acme"
resource_base = "${module.location}/static"

[attributes]
"acme.owner" = "${module.name}"
"acme.region" = "${region}"
"#,
        )
        .unwrap();
        let module = module_in(root, &[], ClassSpace::empty("app"));

        let mut descriptor = ServerDescriptor::default();
        if let Some(context) = descriptor.context_deployer.as_mut() {
            context
                .properties
                .insert("region".to_string(), "eu".to_string());
            context
                .context_attributes
                .insert("acme.owner".to_string(), "overridden".to_string());
            context
                .context_attributes
                .insert("deployer.flag".to_string(), "on".to_string());
        }
        let helper = helper_for(descriptor);

        let context = helper
            .register_context(&module, "contexts/acme.toml", None)
            .unwrap();
        assert!(!context.is_webapp());
        assert!(context.is_started());
        assert_eq!(context.attribute("acme.owner"), Some("org.example.app"));
        assert_eq!(context.attribute("acme.region"), Some("eu"));
        assert_eq!(context.attribute("deployer.flag"), Some("on"));
        assert_eq!(
            context.resource_base().unwrap(),
            root.join("static").as_path()
        );
    }

    /// Loader that ignores the file body and mounts a context named after it
    struct FromFileName;

    impl ConfigLoader for FromFileName {
        fn load(
            &self,
            path: &Path,
            properties: &PropertyTable,
            _loader: &Arc<dyn Resolver>,
        ) -> Result<ContextHandler, DeployError> {
            let stem = path.file_stem().unwrap().to_string_lossy();
            let mut context = ContextHandler::new(format!("/{}", stem));
            context.set_attribute("location", properties.get(MODULE_LOCATION).unwrap());
            Ok(context)
        }
    }

    #[test]
    fn custom_config_loader_is_used() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("custom.ctx"), "opaque").unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        let helper =
            helper_for(ServerDescriptor::default()).with_config_loader(Arc::new(FromFileName));

        let context = helper.register_context(&module, "custom.ctx", None).unwrap();
        assert_eq!(context.context_path(), "/custom");
        assert!(context.is_started());
        let location = dir.path().to_string_lossy().into_owned();
        assert_eq!(context.attribute("location"), Some(location.as_str()));
    }

    #[test]
    fn missing_context_file_is_a_parse_failure() {
        let dir = TempDir::new().unwrap();
        let module = module_in(dir.path(), &[], ClassSpace::empty("app"));
        assert!(matches!(
            helper_for(ServerDescriptor::default()).register_context(&module, "nope.toml", None),
            Err(DeployError::DescriptorParseFailure { .. })
        ));
    }
}
