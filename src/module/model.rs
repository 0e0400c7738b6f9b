//! Installed modules and the descriptors they publish

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use url::Url;
use zip::ZipArchive;

use crate::deploy::classloader::{ClassDef, ClassSpace, Resolver};
use crate::module::manifest::{Manifest, MANIFEST_ENTRY};
use crate::module::traits::{ModuleError, ModuleId, ModuleState, ServiceId};

/// A deployable unit known to the module system
#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    symbolic_name: String,
    source: Option<PathBuf>,
    manifest: Manifest,
    manifest_entry: Option<Url>,
    classes: Arc<dyn Resolver>,
    state: Mutex<ModuleState>,
    install_location: OnceLock<PathBuf>,
}

impl Module {
    /// Create a module from already-parsed parts
    pub fn new(
        id: ModuleId,
        symbolic_name: impl Into<String>,
        manifest: Manifest,
        manifest_entry: Option<Url>,
        classes: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            id,
            symbolic_name: symbolic_name.into(),
            source: None,
            manifest,
            manifest_entry,
            classes,
            state: Mutex::new(ModuleState::Installed),
            install_location: OnceLock::new(),
        }
    }

    /// Load a module from an exploded directory or an archive
    pub fn from_location(id: ModuleId, location: &Path) -> Result<Self, ModuleError> {
        let location = location.canonicalize()?;
        let fallback_name = location
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());

        let (manifest_text, entry, classes) = if location.is_dir() {
            let manifest_path = location.join(MANIFEST_ENTRY);
            let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
                ModuleError::InvalidManifest(format!("{}: {}", manifest_path.display(), e))
            })?;
            let entry = Url::from_file_path(&manifest_path).map_err(|_| {
                ModuleError::OperationError(format!(
                    "cannot express {} as a file URL",
                    manifest_path.display()
                ))
            })?;
            let classes = ClassSpace::directory(fallback_name.clone(), location.clone());
            (text, entry, classes)
        } else {
            let mut archive = ZipArchive::new(File::open(&location)?)?;
            let mut text = String::new();
            archive
                .by_name(MANIFEST_ENTRY)
                .map_err(|e| {
                    ModuleError::InvalidManifest(format!("{}: {}", location.display(), e))
                })?
                .read_to_string(&mut text)?;
            let archive_url = Url::from_file_path(&location).map_err(|_| {
                ModuleError::OperationError(format!(
                    "cannot express {} as a file URL",
                    location.display()
                ))
            })?;
            let entry = Url::parse(&format!("jar:{}!/{}", archive_url, MANIFEST_ENTRY))
                .map_err(|e| ModuleError::OperationError(e.to_string()))?;
            let classes = ClassSpace::archive(fallback_name.clone(), location.clone());
            (text, entry, classes)
        };

        let manifest = Manifest::parse(&manifest_text)?;
        let symbolic_name = manifest
            .symbolic_name()
            .map(str::to_string)
            .unwrap_or(fallback_name);

        let mut module = Self::new(
            id,
            symbolic_name,
            manifest,
            Some(entry),
            Arc::new(classes),
        );
        module.source = Some(location);
        Ok(module)
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// Where the module was installed from, when it came from disk
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.manifest.get(name)
    }

    /// URL of a named entry; only the manifest entry is indexed
    pub fn entry(&self, name: &str) -> Option<&Url> {
        if name.trim_start_matches('/') == MANIFEST_ENTRY {
            self.manifest_entry.as_ref()
        } else {
            None
        }
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ModuleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// The module's own class space
    pub fn class_loader(&self) -> Arc<dyn Resolver> {
        Arc::clone(&self.classes)
    }

    /// Resolve a class through the module's class space
    pub fn load_class(&self, name: &str) -> Result<Arc<ClassDef>, ModuleError> {
        self.classes
            .find_class(name)
            .ok_or_else(|| ModuleError::ClassNotFound {
                class: name.to_string(),
                module: self.symbolic_name.clone(),
            })
    }

    /// Cache cell for the resolved install location
    pub(crate) fn install_location(&self) -> &OnceLock<PathBuf> {
        &self.install_location
    }
}

/// Descriptor property: web root relative to the module
pub const PROP_WAR: &str = "war";
/// Descriptor property: context path
pub const PROP_CONTEXT_PATH: &str = "contextPath";
/// Descriptor property: internal class name
pub const PROP_CLASS_IN_BUNDLE: &str = "classInBundle";
/// Descriptor property: context file path
pub const PROP_CONTEXT_FILE_PATH: &str = "contextFilePath";

/// A descriptor object published by a module, carrying deployment properties
#[derive(Debug)]
pub struct PublishedDescriptor {
    id: ServiceId,
    module: Arc<Module>,
    properties: BTreeMap<String, String>,
    bound_server: Option<String>,
}

impl PublishedDescriptor {
    pub fn new(
        id: ServiceId,
        module: Arc<Module>,
        properties: BTreeMap<String, String>,
        bound_server: Option<String>,
    ) -> Self {
        Self {
            id,
            module,
            properties,
            bound_server,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Server the descriptor object already belongs to, if any
    pub fn bound_server(&self) -> Option<&str> {
        self.bound_server.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn loads_exploded_module() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("app1");
        std::fs::create_dir_all(root.join("META-INF")).unwrap();
        std::fs::write(
            root.join(MANIFEST_ENTRY),
            "Bundle-SymbolicName: org.example.app1\nJetty-WarFolderPath: web\n",
        )
        .unwrap();

        let module = Module::from_location(ModuleId(1), &root).unwrap();
        assert_eq!(module.symbolic_name(), "org.example.app1");
        assert_eq!(module.header("Jetty-WarFolderPath"), Some("web"));
        let entry = module.entry(MANIFEST_ENTRY).unwrap();
        assert_eq!(entry.scheme(), "file");
        assert_eq!(module.state(), ModuleState::Installed);
    }

    #[test]
    fn loads_archive_module() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("lib1.jar");
        let mut writer = zip::ZipWriter::new(File::create(&jar).unwrap());
        writer
            .start_file(MANIFEST_ENTRY, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"Manifest-Version: 1.0\n").unwrap();
        writer.finish().unwrap();

        let module = Module::from_location(ModuleId(2), &jar).unwrap();
        assert_eq!(module.symbolic_name(), "lib1");
        let entry = module.entry("/META-INF/MANIFEST.MF").unwrap();
        assert_eq!(entry.scheme(), "jar");
        assert!(entry.as_str().ends_with("!/META-INF/MANIFEST.MF"));
    }

    #[test]
    fn missing_manifest_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Module::from_location(ModuleId(3), dir.path()).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidManifest(_)));
    }
}
