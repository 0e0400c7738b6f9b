//! Configuration management for webapp-bridge
//!
//! Two files are involved:
//! - [`BridgeConfig`]: process-level settings (logging, module directory,
//!   server home, location mappings). Loaded from TOML or JSON.
//! - [`ServerDescriptor`]: the server's own bootstrap descriptor found at
//!   `${server.home}/etc/server.toml`. It declares the handler layout and the
//!   deployer defaults applied to every deployed context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "webapp_bridge::deploy=debug"). RUST_LOG wins.
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

/// Module system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory scanned for module directories and module archives
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// Install/start modules as they appear in `modules_dir` and stop them when removed
    #[serde(default)]
    pub watch: bool,

    /// File extensions treated as archives when scanning module locations
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Symbolic name of the module bundling descriptor-scanning support.
    /// Its archives are exposed through every composed class loader.
    #[serde(default)]
    pub scanner_support_module: Option<String>,
}

fn default_modules_dir() -> String {
    "modules".to_string()
}

fn default_archive_extensions() -> Vec<String> {
    vec!["jar".to_string()]
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            watch: false,
            archive_extensions: default_archive_extensions(),
            scanner_support_module: None,
        }
    }
}

/// Server process settings
///
/// Unset values are derived at bootstrap, see
/// [`SystemProperties`](crate::bootstrap::SystemProperties).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Install location of the bridge; defaults to the current directory
    #[serde(default)]
    pub install_dir: Option<String>,

    /// Server home directory (holds `etc/server.toml`)
    #[serde(default)]
    pub home: Option<String>,

    /// Server logs directory
    #[serde(default)]
    pub logs: Option<String>,

    /// Naming service initial factory
    #[serde(default)]
    pub naming_factory_initial: Option<String>,

    /// Naming service URL package prefixes
    #[serde(default)]
    pub naming_url_pkgs: Option<String>,

    /// Overrides `listen_addr` from the server descriptor
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// Location resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Opaque module entry host (e.g. `"17.fwk1"` for `bundleentry://17.fwk1/...`)
    /// mapped to the module's root directory
    #[serde(default)]
    pub mappings: BTreeMap<String, PathBuf>,
}

/// Bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    /// Module system configuration
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Server process settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Location resolution configuration
    #[serde(default)]
    pub location: LocationConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML or JSON file (picked by extension)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Handler name that enables the context-handler collection
pub const CONTEXTS_HANDLER: &str = "contexts";

/// Defaults applied to every directory-based web application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebAppDeployerConfig {
    /// Configuration steps run when a web application starts
    #[serde(default)]
    pub configuration_classes: Vec<String>,

    /// Descriptor applied before the application's own descriptor
    #[serde(default)]
    pub defaults_descriptor: Option<String>,

    /// Prefer the parent loader over the application's own classes
    #[serde(default)]
    pub parent_loader_priority: bool,

    /// Attributes copied into each web application
    #[serde(default)]
    pub context_attributes: BTreeMap<String, String>,
}

/// Defaults applied to every context created from a context descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDeployerConfig {
    /// Configuration-manager properties made available to context descriptors
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Attributes copied into each context
    #[serde(default)]
    pub context_attributes: BTreeMap<String, String>,
}

/// The server's bootstrap descriptor (`etc/server.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Server name, exposed to context descriptors as `server.name`
    #[serde(default = "default_server_name")]
    pub name: String,

    /// HTTP listen address; `None` keeps the server off the network
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,

    /// Handlers installed on the server. Applications can only be attached
    /// when [`CONTEXTS_HANDLER`] is present.
    #[serde(default)]
    pub handlers: Vec<String>,

    /// Web application deployer defaults
    #[serde(default)]
    pub webapp_deployer: Option<WebAppDeployerConfig>,

    /// Context deployer defaults
    #[serde(default)]
    pub context_deployer: Option<ContextDeployerConfig>,
}

fn default_server_name() -> String {
    "webapp-bridge".to_string()
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            listen_addr: None,
            handlers: vec![CONTEXTS_HANDLER.to_string()],
            webapp_deployer: Some(WebAppDeployerConfig::default()),
            context_deployer: Some(ContextDeployerConfig::default()),
        }
    }
}

impl ServerDescriptor {
    /// Descriptor used when the bootstrap descriptor cannot be read: no
    /// handlers, so the server runs but cannot host applications.
    pub fn keyless() -> Self {
        Self {
            name: default_server_name(),
            listen_addr: None,
            handlers: Vec::new(),
            webapp_deployer: None,
            context_deployer: None,
        }
    }

    /// Load the descriptor from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Whether the descriptor installs a context-handler collection
    pub fn has_contexts(&self) -> bool {
        self.handlers.iter().any(|h| h == CONTEXTS_HANDLER)
    }
}
