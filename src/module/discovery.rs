//! Module discovery
//!
//! Scans a modules directory for exploded modules (directories holding
//! `META-INF/MANIFEST.MF`) and module archives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::module::framework::ModuleFramework;
use crate::module::manifest::MANIFEST_ENTRY;
use crate::module::model::Module;
use crate::module::traits::ModuleError;

/// Module discovery scanner
pub struct ModuleDiscovery {
    modules_dir: PathBuf,
    archive_extensions: Vec<String>,
}

impl ModuleDiscovery {
    pub fn new<P: AsRef<Path>>(modules_dir: P, archive_extensions: Vec<String>) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            archive_extensions,
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Whether `path` looks like an installable module
    pub fn is_candidate(&self, path: &Path) -> bool {
        if path.is_dir() {
            return path.join(MANIFEST_ENTRY).is_file();
        }
        path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    self.archive_extensions
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(ext))
                })
    }

    /// List installable module locations, sorted by path
    pub fn discover_modules(&self) -> Result<Vec<PathBuf>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        if !self.modules_dir.exists() {
            debug!(
                "Modules directory does not exist, creating: {:?}",
                self.modules_dir
            );
            fs::create_dir_all(&self.modules_dir).map_err(|e| {
                ModuleError::OperationError(format!("Failed to create modules directory: {}", e))
            })?;
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.modules_dir).map_err(|e| {
            ModuleError::OperationError(format!("Failed to read modules directory: {}", e))
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| {
                    ModuleError::OperationError(format!("Failed to read directory entry: {}", e))
                })?
                .path();
            if self.is_candidate(&path) {
                found.push(path);
            } else {
                debug!("Skipping {:?}: not a module", path);
            }
        }
        found.sort();

        info!("Discovered {} modules", found.len());
        Ok(found)
    }

    /// Install every discovered module, logging and skipping failures
    pub async fn install_all(&self, framework: &ModuleFramework) -> Vec<Arc<Module>> {
        let locations = match self.discover_modules() {
            Ok(locations) => locations,
            Err(e) => {
                warn!("Module discovery failed: {}", e);
                return Vec::new();
            }
        };

        let mut installed = Vec::with_capacity(locations.len());
        for location in locations {
            match framework.install(&location).await {
                Ok(module) => installed.push(module),
                Err(e) => warn!("Failed to install module from {:?}: {}", location, e),
            }
        }
        installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exploded(root: &Path, name: &str) {
        let dir = root.join(name).join("META-INF");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("MANIFEST.MF"),
            format!("Bundle-SymbolicName: {}\n", name),
        )
        .unwrap();
    }

    #[test]
    fn finds_exploded_modules_and_archives() {
        let dir = TempDir::new().unwrap();
        exploded(dir.path(), "b");
        exploded(dir.path(), "a");
        fs::create_dir_all(dir.path().join("not-a-module")).unwrap();
        fs::write(dir.path().join("lib.jar"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let discovery = ModuleDiscovery::new(dir.path(), vec!["jar".to_string()]);
        let names: Vec<String> = discovery
            .discover_modules()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "lib.jar"]);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let modules = dir.path().join("modules");
        let discovery = ModuleDiscovery::new(&modules, vec!["jar".to_string()]);
        assert!(discovery.discover_modules().unwrap().is_empty());
        assert!(modules.is_dir());
    }

    #[tokio::test]
    async fn install_all_skips_broken_modules() {
        let dir = TempDir::new().unwrap();
        exploded(dir.path(), "good");
        // Archive with no zip content fails to install
        fs::write(dir.path().join("broken.jar"), b"not a zip").unwrap();

        let framework = ModuleFramework::new();
        let discovery = ModuleDiscovery::new(dir.path(), vec!["jar".to_string()]);
        let installed = discovery.install_all(&framework).await;
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].symbolic_name(), "good");
    }
}
