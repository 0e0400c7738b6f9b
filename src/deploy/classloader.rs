//! Class resolution for deployed contexts
//!
//! A [`Resolver`] answers "where does class `a.b.C` come from". Resolvers
//! chain through [`DelegatingResolver`], where the first delegate that finds
//! the class wins. [`ArchiveEnumerable`] is a separate capability: a fixed
//! list of archive paths handed to descriptor scanners.
//!
//! Deployments get a [`ComposedClassLoader`] (host first, contributing
//! module second) and web applications additionally wrap it in a
//! [`WebAppClassLoader`] over `WEB-INF/classes` and `WEB-INF/lib`.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

use crate::deploy::errors::DeployError;
use crate::module::model::Module;
use crate::module::traits::ModuleId;

/// A resolved class: its name, the space that defined it, and its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    name: String,
    defined_by: String,
    bytes: Vec<u8>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, defined_by: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            defined_by: defined_by.into(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label of the class space that defined the class
    pub fn defined_by(&self) -> &str {
        &self.defined_by
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Error)]
#[error("Class {class} not found by {loader}")]
pub struct ClassNotFound {
    pub class: String,
    pub loader: String,
}

/// Class lookup
pub trait Resolver: Send + Sync + fmt::Debug {
    /// Human-readable name of this resolver
    fn label(&self) -> &str;

    fn find_class(&self, name: &str) -> Option<Arc<ClassDef>>;

    fn load_class(&self, name: &str) -> Result<Arc<ClassDef>, ClassNotFound> {
        self.find_class(name).ok_or_else(|| ClassNotFound {
            class: name.to_string(),
            loader: self.label().to_string(),
        })
    }
}

/// Fixed archive list for descriptor scanners
pub trait ArchiveEnumerable {
    fn archives(&self) -> &[PathBuf];
}

/// `a.b.C` is valid; empty segments and path separators are not
pub fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

/// Relative resource path of a class, `a.b.C` -> `a/b/C.class`
pub fn class_resource_path(name: &str) -> String {
    format!("{}.class", name.replace('.', "/"))
}

#[derive(Debug)]
enum ClassSource {
    Memory(HashMap<String, Vec<u8>>),
    Directory(PathBuf),
    Archive(PathBuf),
}

/// A single source of class definitions
#[derive(Debug)]
pub struct ClassSpace {
    label: String,
    source: ClassSource,
    cache: Mutex<HashMap<String, Arc<ClassDef>>>,
}

impl ClassSpace {
    fn with_source(label: impl Into<String>, source: ClassSource) -> Self {
        Self {
            label: label.into(),
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Class space that defines nothing
    pub fn empty(label: impl Into<String>) -> Self {
        Self::with_source(label, ClassSource::Memory(HashMap::new()))
    }

    pub fn in_memory<I, N>(label: impl Into<String>, classes: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        let classes = classes.into_iter().map(|(n, b)| (n.into(), b)).collect();
        Self::with_source(label, ClassSource::Memory(classes))
    }

    /// Classes stored as `a/b/C.class` under `root`
    pub fn directory(label: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::with_source(label, ClassSource::Directory(root.into()))
    }

    /// Classes stored as `a/b/C.class` entries of a zip archive
    pub fn archive(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_source(label, ClassSource::Archive(path.into()))
    }

    fn read(&self, name: &str) -> Option<Vec<u8>> {
        match &self.source {
            ClassSource::Memory(classes) => classes.get(name).cloned(),
            ClassSource::Directory(root) => fs::read(root.join(class_resource_path(name))).ok(),
            ClassSource::Archive(path) => match read_archive_entry(path, &class_resource_path(name))
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("{}: cannot read {:?}: {}", self.label, path, e);
                    None
                }
            },
        }
    }
}

fn read_archive_entry(path: &Path, entry: &str) -> zip::result::ZipResult<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut file = match archive.by_name(entry) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

impl Resolver for ClassSpace {
    fn label(&self) -> &str {
        &self.label
    }

    fn find_class(&self, name: &str) -> Option<Arc<ClassDef>> {
        if !is_valid_class_name(name) {
            return None;
        }
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(Arc::clone(hit));
        }
        let def = Arc::new(ClassDef::new(name, self.label.clone(), self.read(name)?));
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&def));
        Some(def)
    }
}

/// Ordered delegates; the first to find a class wins
#[derive(Debug)]
pub struct DelegatingResolver {
    label: String,
    delegates: Vec<Arc<dyn Resolver>>,
}

impl DelegatingResolver {
    pub fn new(label: impl Into<String>, delegates: Vec<Arc<dyn Resolver>>) -> Self {
        Self {
            label: label.into(),
            delegates,
        }
    }

}

impl Resolver for DelegatingResolver {
    fn label(&self) -> &str {
        &self.label
    }

    fn find_class(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.delegates.iter().find_map(|d| d.find_class(name))
    }
}

/// Loader handed to a deployed context
#[derive(Debug)]
pub struct ComposedClassLoader {
    host: Arc<dyn Resolver>,
    resolver: DelegatingResolver,
    archives: Vec<PathBuf>,
    contributor: Option<ModuleId>,
}

impl ComposedClassLoader {
    /// Host class space, always the first delegate
    pub fn host(&self) -> &Arc<dyn Resolver> {
        &self.host
    }

    /// Module whose classes back this loader, if it was reached
    pub fn contributor(&self) -> Option<ModuleId> {
        self.contributor
    }

    pub fn has_contributor(&self) -> bool {
        self.contributor.is_some()
    }
}

impl Resolver for ComposedClassLoader {
    fn label(&self) -> &str {
        self.resolver.label()
    }

    fn find_class(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.resolver.find_class(name)
    }
}

impl ArchiveEnumerable for ComposedClassLoader {
    fn archives(&self) -> &[PathBuf] {
        &self.archives
    }
}

/// Per-web-application loader over `WEB-INF/classes` and `WEB-INF/lib`
///
/// Host classes are always resolved first. `parent_loader_priority` only
/// orders the contributing module against the web application's own classes.
#[derive(Debug)]
pub struct WebAppClassLoader {
    label: String,
    parent: Arc<ComposedClassLoader>,
    local: DelegatingResolver,
    parent_first: bool,
}

impl WebAppClassLoader {
    pub fn new(
        parent: Arc<ComposedClassLoader>,
        web_root: &Path,
        parent_loader_priority: bool,
        archive_extensions: &[String],
    ) -> Self {
        let label = format!("webapp:{}", web_root.display());
        let web_inf = web_root.join("WEB-INF");

        let mut local: Vec<Arc<dyn Resolver>> = Vec::new();
        let classes = web_inf.join("classes");
        if classes.is_dir() {
            local.push(Arc::new(ClassSpace::directory(
                format!("{}/WEB-INF/classes", label),
                classes,
            )));
        }
        for jar in archives_in(&web_inf.join("lib"), archive_extensions) {
            let jar_label = format!("{}/{}", label, jar.display());
            local.push(Arc::new(ClassSpace::archive(jar_label, jar)));
        }

        Self {
            local: DelegatingResolver::new(label.clone(), local),
            label,
            parent,
            parent_first: parent_loader_priority,
        }
    }

    pub fn parent(&self) -> &Arc<ComposedClassLoader> {
        &self.parent
    }

    pub fn is_parent_first(&self) -> bool {
        self.parent_first
    }
}

impl Resolver for WebAppClassLoader {
    fn label(&self) -> &str {
        &self.label
    }

    fn find_class(&self, name: &str) -> Option<Arc<ClassDef>> {
        if let Some(def) = self.parent.host().find_class(name) {
            return Some(def);
        }
        if self.parent_first {
            self.parent
                .find_class(name)
                .or_else(|| self.local.find_class(name))
        } else {
            self.local
                .find_class(name)
                .or_else(|| self.parent.find_class(name))
        }
    }
}

impl ArchiveEnumerable for WebAppClassLoader {
    fn archives(&self) -> &[PathBuf] {
        self.parent.archives()
    }
}

/// Archive files directly inside `dir`, sorted; a missing directory yields none
pub(crate) fn archives_in(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_archive_extension(p, extensions))
        .collect();
    found.sort();
    found
}

pub(crate) fn has_archive_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Builds loaders with the host's class space as first delegate
#[derive(Debug, Clone)]
pub struct ClassLoaderComposer {
    host: Arc<dyn Resolver>,
}

impl ClassLoaderComposer {
    pub fn new(host: Arc<dyn Resolver>) -> Self {
        Self { host }
    }

    /// The host server's class space
    pub fn host(&self) -> &Arc<dyn Resolver> {
        &self.host
    }

    /// Host first, then the contributor when `internal_class_name` reaches it
    pub fn compose(
        &self,
        contributor: &Module,
        internal_class_name: Option<&str>,
        archives: Vec<PathBuf>,
    ) -> Result<ComposedClassLoader, DeployError> {
        let label = format!("composed:{}", contributor.symbolic_name());
        let mut delegates = vec![Arc::clone(&self.host)];
        let mut reached = None;

        if let Some(class) = internal_class_name {
            contributor
                .load_class(class)
                .map_err(|_| DeployError::ClassResolutionFailure {
                    class: class.to_string(),
                    module: contributor.symbolic_name().to_string(),
                })?;
            delegates.push(contributor.class_loader());
            reached = Some(contributor.id());
        } else {
            debug!(
                "No internal class for {}, resolving through the host only",
                contributor.symbolic_name()
            );
        }

        Ok(ComposedClassLoader {
            host: Arc::clone(&self.host),
            resolver: DelegatingResolver::new(label, delegates),
            archives,
            contributor: reached,
        })
    }

    /// Loader for plain contexts: no archive list
    pub fn compose_simple(
        &self,
        contributor: &Module,
        internal_class_name: Option<&str>,
    ) -> Result<ComposedClassLoader, DeployError> {
        self.compose(contributor, internal_class_name, Vec::new())
    }
}
