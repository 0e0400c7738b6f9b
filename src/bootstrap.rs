//! Server bootstrap
//!
//! Resolves the server's system properties, reads its descriptor from
//! `${server.home}/etc/server.toml`, starts it, and wires the registration
//! helper and deployment tracker to a module framework.
//!
//! A descriptor that cannot be read is logged and replaced by a key-less
//! one: the server still runs, but cannot host applications.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{BridgeConfig, ServerDescriptor, ServerSettings};
use crate::deploy::classloader::{ClassSpace, Resolver};
use crate::deploy::helper::{WebappDeployer, WebappRegistrationHelper};
use crate::deploy::location::LocationResolver;
use crate::deploy::tracker::DeploymentTracker;
use crate::module::framework::ModuleFramework;
use crate::server::ApplicationServer;
use crate::utils::{env_opt, env_or_else};

pub const PROP_HOME: &str = "server.home";
pub const PROP_LOGS: &str = "server.logs";
pub const PROP_NAMING_FACTORY: &str = "naming.factory.initial";
pub const PROP_NAMING_URL_PKGS: &str = "naming.factory.url.pkgs";

pub const ENV_HOME: &str = "WEBAPP_BRIDGE_HOME";
pub const ENV_LOGS: &str = "WEBAPP_BRIDGE_LOGS";
pub const ENV_NAMING_FACTORY: &str = "WEBAPP_BRIDGE_NAMING_FACTORY";
pub const ENV_NAMING_URL_PKGS: &str = "WEBAPP_BRIDGE_NAMING_URL_PKGS";

pub const DEFAULT_NAMING_FACTORY: &str = "webapp_bridge.naming.InitialContextFactory";
pub const DEFAULT_NAMING_URL_PKGS: &str = "webapp_bridge.naming";

/// Server home, relative to the install location
pub const HOME_DIR: &str = "serverhome";
/// Host class space, relative to the server home
pub const HOST_CLASSES_DIR: &str = "classes";

/// Properties resolved at server start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    pub install_dir: PathBuf,
    pub home: PathBuf,
    pub logs: PathBuf,
    pub naming_factory_initial: String,
    pub naming_url_pkgs: String,
}

impl SystemProperties {
    /// Environment first, then configuration, then defaults
    pub fn resolve(settings: &ServerSettings, install_dir: &Path) -> Self {
        let home = env_opt(ENV_HOME)
            .or_else(|| settings.home.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| install_dir.join(HOME_DIR));
        let logs = env_opt(ENV_LOGS)
            .or_else(|| settings.logs.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("logs"));
        let naming_factory_initial = env_or_else(ENV_NAMING_FACTORY, || {
            settings
                .naming_factory_initial
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMING_FACTORY.to_string())
        });
        let naming_url_pkgs = env_or_else(ENV_NAMING_URL_PKGS, || {
            settings
                .naming_url_pkgs
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMING_URL_PKGS.to_string())
        });

        Self {
            install_dir: install_dir.to_path_buf(),
            home,
            logs,
            naming_factory_initial,
            naming_url_pkgs,
        }
    }

    /// `${server.home}/etc/server.toml`
    pub fn server_descriptor_path(&self) -> PathBuf {
        self.home.join("etc").join("server.toml")
    }

    /// Properties exposed to context descriptors
    pub fn as_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (PROP_HOME.to_string(), self.home.display().to_string()),
            (PROP_LOGS.to_string(), self.logs.display().to_string()),
            (
                PROP_NAMING_FACTORY.to_string(),
                self.naming_factory_initial.clone(),
            ),
            (PROP_NAMING_URL_PKGS.to_string(), self.naming_url_pkgs.clone()),
        ])
    }
}

/// Read the server descriptor, falling back to a key-less one
pub fn load_server_descriptor(properties: &SystemProperties) -> ServerDescriptor {
    let path = properties.server_descriptor_path();
    match ServerDescriptor::from_file(&path) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(
                "Cannot read server descriptor {:?}: {}; running without deployment capability",
                path, e
            );
            ServerDescriptor::keyless()
        }
    }
}

/// A started server with its deployment machinery
pub struct Bootstrap {
    pub properties: SystemProperties,
    pub server: Arc<ApplicationServer>,
    pub helper: Arc<WebappRegistrationHelper>,
    pub tracker: Arc<DeploymentTracker>,
    tracker_task: JoinHandle<()>,
}

impl Bootstrap {
    /// Start the server and begin tracking `framework`
    pub async fn start(config: &BridgeConfig, framework: Arc<ModuleFramework>) -> Result<Self> {
        let install_dir = match &config.server.install_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let properties = SystemProperties::resolve(&config.server, &install_dir);
        info!(
            "Server home {:?}, logs {:?}",
            properties.home, properties.logs
        );

        let mut descriptor = load_server_descriptor(&properties);
        if let Some(addr) = config.server.listen_addr {
            descriptor.listen_addr = Some(addr);
        }
        let server = Arc::new(ApplicationServer::new(descriptor));
        if let Err(e) = server.start().await {
            error!("Server {} failed to start: {}", server.name(), e);
        }

        let host: Arc<dyn Resolver> = Arc::new(ClassSpace::directory(
            "host",
            properties.home.join(HOST_CLASSES_DIR),
        ));
        let scanner_support = match &config.modules.scanner_support_module {
            Some(name) => {
                let module = framework.find_by_name(name).await;
                if module.is_none() {
                    warn!("Scanner support module {} is not installed", name);
                }
                module
            }
            None => None,
        };
        let helper = Arc::new(
            WebappRegistrationHelper::new(
                Arc::clone(&server),
                Arc::new(LocationResolver::from_config(config)),
                host,
            )
            .with_scanner_support(scanner_support)
            .with_properties(properties.as_properties()),
        );

        let deployer: Arc<dyn WebappDeployer> = helper.clone();
        let tracker = Arc::new(DeploymentTracker::new(deployer));
        let tracker_task = Arc::clone(&tracker).spawn(framework).await;

        Ok(Self {
            properties,
            server,
            helper,
            tracker,
            tracker_task,
        })
    }

    /// Undeploy everything and stop the server
    pub async fn shutdown(self) {
        self.tracker_task.abort();
        self.tracker.close().await;
        self.server.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_install_location() {
        let settings = ServerSettings::default();
        let properties = SystemProperties::resolve(&settings, Path::new("/opt/bridge"));
        if env_opt(ENV_HOME).is_none() {
            assert_eq!(properties.home, PathBuf::from("/opt/bridge/serverhome"));
            assert_eq!(
                properties.server_descriptor_path(),
                PathBuf::from("/opt/bridge/serverhome/etc/server.toml")
            );
        }
        if env_opt(ENV_LOGS).is_none() && env_opt(ENV_HOME).is_none() {
            assert_eq!(properties.logs, PathBuf::from("/opt/bridge/serverhome/logs"));
        }
        if env_opt(ENV_NAMING_FACTORY).is_none() {
            assert_eq!(properties.naming_factory_initial, DEFAULT_NAMING_FACTORY);
        }
    }

    #[test]
    fn configuration_overrides_defaults() {
        let settings = ServerSettings {
            home: Some("/srv/home".to_string()),
            naming_url_pkgs: Some("custom.pkgs".to_string()),
            ..ServerSettings::default()
        };
        let properties = SystemProperties::resolve(&settings, Path::new("/opt/bridge"));
        if env_opt(ENV_HOME).is_none() {
            assert_eq!(properties.home, PathBuf::from("/srv/home"));
        }
        if env_opt(ENV_NAMING_URL_PKGS).is_none() {
            assert_eq!(
                properties.as_properties().get(PROP_NAMING_URL_PKGS).map(String::as_str),
                Some("custom.pkgs")
            );
        }
    }

    #[test]
    fn unreadable_descriptor_yields_keyless_server() {
        let settings = ServerSettings {
            home: Some("/nonexistent/webapp-bridge-home".to_string()),
            ..ServerSettings::default()
        };
        let mut properties = SystemProperties::resolve(&settings, Path::new("/nonexistent"));
        properties.home = PathBuf::from("/nonexistent/webapp-bridge-home");
        let descriptor = load_server_descriptor(&properties);
        assert!(!descriptor.has_contexts());
    }
}
