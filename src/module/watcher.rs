//! Filesystem-watch module driver
//!
//! Watches a modules directory. A module that appears is installed and
//! started; a module that disappears is stopped and uninstalled.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::module::discovery::ModuleDiscovery;
use crate::module::framework::ModuleFramework;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Appeared,
    Vanished,
}

/// Running directory watch; dropping it stops the watch
pub struct ModuleWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ModuleWatcher {
    /// Start watching `discovery`'s directory, driving `framework`
    pub fn spawn(
        framework: Arc<ModuleFramework>,
        discovery: ModuleDiscovery,
    ) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<(PathBuf, Change)>();
        let root = discovery
            .modules_dir()
            .canonicalize()
            .unwrap_or_else(|_| discovery.modules_dir().to_path_buf());
        let watch_root = root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let change = match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => Change::Appeared,
                        EventKind::Remove(_) => Change::Vanished,
                        _ => return,
                    };
                    let tops: BTreeSet<PathBuf> = event
                        .paths
                        .iter()
                        .filter_map(|p| top_level(&watch_root, p))
                        .collect();
                    for top in tops {
                        let _ = tx.send((top, change));
                    }
                }
                Err(e) => warn!("module watch error: {e:?}"),
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {:?} for modules", root);

        let task = tokio::spawn(drive(framework, discovery, rx));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Direct child of `root` that contains `path`
fn top_level(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    Some(root.join(first))
}

async fn drive(
    framework: Arc<ModuleFramework>,
    discovery: ModuleDiscovery,
    mut rx: mpsc::UnboundedReceiver<(PathBuf, Change)>,
) {
    while let Some((path, change)) = rx.recv().await {
        match change {
            Change::Appeared => {
                if !discovery.is_candidate(&path) {
                    continue;
                }
                if framework.find_by_source(&path).await.is_some() {
                    continue;
                }
                match framework.install(&path).await {
                    Ok(module) => {
                        if let Err(e) = framework.start(module.id()).await {
                            warn!("Failed to start {}: {}", module.symbolic_name(), e);
                        }
                    }
                    // Partially copied modules show up again on the next event
                    Err(e) => debug!("Not installing {:?} yet: {}", path, e),
                }
            }
            Change::Vanished => {
                if path.exists() {
                    continue;
                }
                let installed = framework
                    .modules()
                    .await
                    .into_iter()
                    .find(|m| m.source() == Some(path.as_path()));
                if let Some(module) = installed {
                    if let Err(e) = framework.uninstall(module.id()).await {
                        warn!("Failed to uninstall {}: {}", module.symbolic_name(), e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_nested_paths_to_module_root() {
        let root = Path::new("/srv/modules");
        assert_eq!(
            top_level(root, Path::new("/srv/modules/app1/META-INF/MANIFEST.MF")),
            Some(PathBuf::from("/srv/modules/app1"))
        );
        assert_eq!(
            top_level(root, Path::new("/srv/modules/lib.jar")),
            Some(PathBuf::from("/srv/modules/lib.jar"))
        );
        assert_eq!(top_level(root, Path::new("/srv/modules")), None);
        assert_eq!(top_level(root, Path::new("/elsewhere/x")), None);
    }
}
