//! Module install locations
//!
//! Resolves where a module lives on disk from the URL of its
//! `META-INF/MANIFEST.MF` entry and lists the archives it carries.
//!
//! | Entry scheme | Location |
//! |---|---|
//! | `file:` | grandparent directory of the entry |
//! | `jar:file:…!/…` | the archive itself |
//! | `bundleentry:` | first [`EntryLocator`] that knows the entry |
//! | anything else | [`DeployError::UnsupportedLocationScheme`] |

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use url::Url;
use zip::ZipArchive;

use crate::config::BridgeConfig;
use crate::deploy::classloader::{archives_in, has_archive_extension};
use crate::deploy::errors::DeployError;
use crate::module::manifest::MANIFEST_ENTRY;
use crate::module::model::Module;

/// Scheme of opaque entry handles
pub const OPAQUE_ENTRY_SCHEME: &str = "bundleentry";

/// Library child directory scanned for archives
pub const LIB_DIR: &str = "lib";

/// Maps an opaque entry handle to a module root
pub trait EntryLocator: Send + Sync {
    fn locate_root(&self, entry: &Url) -> Option<PathBuf>;
}

/// Host-to-root table, read from `[location.mappings]`
#[derive(Debug, Clone, Default)]
pub struct ConfiguredEntryLocator {
    mappings: BTreeMap<String, PathBuf>,
}

impl ConfiguredEntryLocator {
    pub fn new(mappings: BTreeMap<String, PathBuf>) -> Self {
        Self { mappings }
    }
}

impl EntryLocator for ConfiguredEntryLocator {
    fn locate_root(&self, entry: &Url) -> Option<PathBuf> {
        entry
            .host_str()
            .and_then(|host| self.mappings.get(host))
            .cloned()
    }
}

/// Resolves module roots and the archives under them
pub struct LocationResolver {
    locators: Vec<Arc<dyn EntryLocator>>,
    archive_extensions: Vec<String>,
}

impl LocationResolver {
    pub fn new(archive_extensions: Vec<String>) -> Self {
        Self {
            locators: Vec::new(),
            archive_extensions,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut resolver = Self::new(config.modules.archive_extensions.clone());
        if !config.location.mappings.is_empty() {
            resolver = resolver.with_locator(Arc::new(ConfiguredEntryLocator::new(
                config.location.mappings.clone(),
            )));
        }
        resolver
    }

    /// Add a locator for opaque entry handles; earlier locators win
    pub fn with_locator(mut self, locator: Arc<dyn EntryLocator>) -> Self {
        self.locators.push(locator);
        self
    }

    pub fn archive_extensions(&self) -> &[String] {
        &self.archive_extensions
    }

    pub fn is_archive(&self, path: &Path) -> bool {
        has_archive_extension(path, &self.archive_extensions)
    }

    /// Absolute install location of `module`, cached on the module
    pub fn resolve(&self, module: &Module) -> Result<PathBuf, DeployError> {
        let cell = module.install_location();
        if let Some(location) = cell.get() {
            return Ok(location.clone());
        }
        let location = self.resolve_uncached(module)?;
        debug!("{} is located at {:?}", module.symbolic_name(), location);
        Ok(cell.get_or_init(|| location).clone())
    }

    fn resolve_uncached(&self, module: &Module) -> Result<PathBuf, DeployError> {
        let entry = module
            .entry(MANIFEST_ENTRY)
            .ok_or_else(|| DeployError::LocationUnresolvable {
                entry: format!("{}/{}", module.symbolic_name(), MANIFEST_ENTRY),
                reason: "the module has no manifest entry".to_string(),
            })?;

        match entry.scheme() {
            "file" => {
                let file = file_path(entry)?;
                file.parent()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
                    .ok_or_else(|| unresolvable(entry, "entry has no grandparent directory"))
            }
            "jar" => {
                let (archive, _) = entry
                    .path()
                    .split_once("!/")
                    .ok_or_else(|| unresolvable(entry, "missing '!/' separator"))?;
                let inner = Url::parse(archive).map_err(|e| unresolvable(entry, e))?;
                if inner.scheme() != "file" {
                    return Err(DeployError::UnsupportedLocationScheme {
                        scheme: format!("jar:{}", inner.scheme()),
                    });
                }
                file_path(&inner)
            }
            OPAQUE_ENTRY_SCHEME => self
                .locators
                .iter()
                .find_map(|locator| locator.locate_root(entry))
                .ok_or_else(|| unresolvable(entry, "no entry locator knows this handle")),
            other => Err(DeployError::UnsupportedLocationScheme {
                scheme: other.to_string(),
            }),
        }
    }

    /// Archives carried by `module`, in a stable order
    pub fn locate_archives(&self, module: &Module) -> Result<Vec<PathBuf>, DeployError> {
        let location = self.resolve(module)?;

        if location.is_file() {
            if !self.is_archive(&location) {
                return Err(DeployError::archive_scan(
                    &location,
                    "module location is a file but not an archive",
                ));
            }
            self.reject_nested_archives(&location)?;
            return Ok(vec![location]);
        }

        fs::read_dir(&location).map_err(|e| DeployError::archive_scan(&location, e))?;
        let mut archives = archives_in(&location, &self.archive_extensions);
        archives.extend(archives_in(&location.join(LIB_DIR), &self.archive_extensions));
        Ok(archives)
    }

    fn reject_nested_archives(&self, archive: &Path) -> Result<(), DeployError> {
        let file = File::open(archive).map_err(|e| DeployError::archive_scan(archive, e))?;
        let zip = ZipArchive::new(file).map_err(|e| DeployError::archive_scan(archive, e))?;
        if let Some(nested) = zip
            .file_names()
            .find(|name| self.is_archive(Path::new(name)))
        {
            return Err(DeployError::archive_scan(
                archive,
                format!("nested archive {} is not supported", nested),
            ));
        }
        Ok(())
    }
}

fn file_path(url: &Url) -> Result<PathBuf, DeployError> {
    url.to_file_path()
        .map_err(|_| unresolvable(url, "not a local file path"))
}

fn unresolvable(entry: &Url, reason: impl ToString) -> DeployError {
    DeployError::LocationUnresolvable {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}
