//! Deployment tracker
//!
//! Observes module lifecycle and descriptor publication events and keeps
//! the server's deployments in step with them.
//!
//! ## Tracking
//!
//! Every deployment source (a module, or a published descriptor object) is
//! tracked under a [`TrackingKey`]. Registering reserves the key under the
//! lock and deploys outside it, so duplicate events racing for the same key
//! see the reservation and back off. A failed deployment releases the key;
//! restarting the module is the retry path.
//!
//! Each reservation carries a generation. Only the deployment holding the
//! current generation may settle the key; a deployment whose key was
//! released or re-reserved meanwhile undeploys what it mounted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::deploy::descriptor::DeploymentDescriptor;
use crate::deploy::errors::DeployError;
use crate::deploy::helper::WebappDeployer;
use crate::module::framework::ModuleFramework;
use crate::module::model::{Module, PublishedDescriptor};
use crate::module::traits::{
    FrameworkEvent, ModuleEvent, ModuleEventKind, ModuleId, ServiceEvent, ServiceEventKind,
    ServiceId,
};
use crate::server::context::ContextHandler;

/// What a deployment is tracked under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingKey {
    Module(ModuleId),
    Descriptor(ServiceId),
}

#[derive(Debug)]
enum Registration {
    /// Deployment in flight under the given generation
    Pending(u64),
    /// Context paths mounted for the key
    Deployed(Vec<String>),
}

/// Keeps deployments in step with module and descriptor events
pub struct DeploymentTracker {
    deployer: Arc<dyn WebappDeployer>,
    tracked: Mutex<HashMap<TrackingKey, Registration>>,
    generation: AtomicU64,
}

impl DeploymentTracker {
    pub fn new(deployer: Arc<dyn WebappDeployer>) -> Self {
        Self {
            deployer,
            tracked: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Subscribe to `framework`, catch up on running modules, then follow
    /// events until the framework goes away
    pub async fn spawn(self: Arc<Self>, framework: Arc<ModuleFramework>) -> JoinHandle<()> {
        let mut events = framework.subscribe().await;
        self.catch_up(&framework).await;
        drop(framework);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(&event).await;
            }
            debug!("Framework event stream closed");
        })
    }

    /// Process modules and descriptors that were live before the tracker
    pub async fn catch_up(&self, framework: &ModuleFramework) {
        let mut caught_up = 0usize;
        for module in framework.modules().await {
            if module.state().is_starting_or_active() {
                self.register_module(&module).await;
                caught_up += 1;
            }
        }
        for descriptor in framework.descriptors().await {
            self.register_descriptor(&descriptor).await;
        }
        info!("Deployment tracker caught up on {} running modules", caught_up);
    }

    pub async fn handle_event(&self, event: &FrameworkEvent) {
        match event {
            FrameworkEvent::Module(e) => self.module_changed(e).await,
            FrameworkEvent::Service(e) => self.service_changed(e).await,
        }
    }

    pub async fn module_changed(&self, event: &ModuleEvent) {
        match event.kind {
            ModuleEventKind::Started => self.register_module(&event.module).await,
            ModuleEventKind::Stopping | ModuleEventKind::Stopped | ModuleEventKind::Uninstalled => {
                self.unregister_key(TrackingKey::Module(event.module.id()))
                    .await
            }
            // Modules caught mid-start are picked up by catch_up
            ModuleEventKind::Installed | ModuleEventKind::Starting => {}
        }
    }

    pub async fn service_changed(&self, event: &ServiceEvent) {
        match event.kind {
            ServiceEventKind::Registered => self.register_descriptor(&event.descriptor).await,
            ServiceEventKind::Unregistering => {
                self.unregister_key(TrackingKey::Descriptor(event.descriptor.id()))
                    .await
            }
        }
    }

    pub async fn is_tracked(&self, key: TrackingKey) -> bool {
        self.tracked.lock().await.contains_key(&key)
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.lock().await.len()
    }

    /// Context paths deployed for `key`
    pub async fn deployed_paths(&self, key: TrackingKey) -> Vec<String> {
        match self.tracked.lock().await.get(&key) {
            Some(Registration::Deployed(paths)) => paths.clone(),
            _ => Vec::new(),
        }
    }

    /// Undeploy everything still tracked
    pub async fn close(&self) {
        let keys: Vec<TrackingKey> = self.tracked.lock().await.keys().copied().collect();
        for key in keys {
            self.unregister_key(key).await;
        }
        info!("Deployment tracker closed");
    }

    async fn register_module(&self, module: &Arc<Module>) {
        let descriptor = match DeploymentDescriptor::from_manifest(module.manifest()) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                debug!("{} declares no deployment", module.symbolic_name());
                return;
            }
            Err(e) => {
                warn!(
                    module = %module.id(),
                    "Ignoring {}: {}",
                    module.symbolic_name(),
                    e
                );
                return;
            }
        };
        self.register(TrackingKey::Module(module.id()), module, &descriptor)
            .await;
    }

    async fn register_descriptor(&self, published: &Arc<PublishedDescriptor>) {
        if let Some(server) = published.bound_server() {
            debug!(
                "{} is already bound to server {}, skipping",
                published.id(),
                server
            );
            return;
        }
        let module = published.module();
        let descriptor =
            match DeploymentDescriptor::from_properties(published.properties(), module.manifest()) {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => {
                    debug!("{} describes no deployment", published.id());
                    return;
                }
                Err(e) => {
                    warn!(
                        module = %module.id(),
                        "Ignoring {} from {}: {}",
                        published.id(),
                        module.symbolic_name(),
                        e
                    );
                    return;
                }
            };
        self.register(TrackingKey::Descriptor(published.id()), module, &descriptor)
            .await;
    }

    async fn register(
        &self,
        key: TrackingKey,
        module: &Arc<Module>,
        descriptor: &DeploymentDescriptor,
    ) {
        let generation = {
            let mut tracked = self.tracked.lock().await;
            if tracked.contains_key(&key) {
                debug!("{:?} already registered", key);
                return;
            }
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            tracked.insert(key, Registration::Pending(generation));
            generation
        };

        // Deployers touch the filesystem synchronously
        let result = tokio::task::spawn_blocking({
            let deployer = Arc::clone(&self.deployer);
            let module = Arc::clone(module);
            let descriptor = descriptor.clone();
            move || deploy(deployer.as_ref(), &module, &descriptor)
        })
        .await
        .map_err(|e| DeployError::TaskFailure(format!("Task join error: {e}")))
        .and_then(|result| result);

        let mut tracked = self.tracked.lock().await;
        let owned = matches!(tracked.get(&key), Some(Registration::Pending(g)) if *g == generation);
        match result {
            Ok(context) => {
                let path = context.context_path().to_string();
                if owned {
                    tracked.insert(key, Registration::Deployed(vec![path]));
                } else {
                    drop(tracked);
                    debug!("{:?} went away during deployment of {}", key, path);
                    if let Err(e) = self.deployer.unregister(&path) {
                        warn!("Failed to undeploy {}: {}", path, e);
                    }
                }
            }
            Err(e) => {
                if owned {
                    tracked.remove(&key);
                }
                error!(
                    module = %module.id(),
                    "Failed to deploy {}: {}",
                    module.symbolic_name(),
                    e
                );
            }
        }
    }

    async fn unregister_key(&self, key: TrackingKey) {
        let removed = self.tracked.lock().await.remove(&key);
        if let Some(Registration::Deployed(paths)) = removed {
            for path in paths {
                if let Err(e) = self.deployer.unregister(&path) {
                    warn!("Failed to undeploy {}: {}", path, e);
                }
            }
        }
    }
}

fn deploy(
    deployer: &dyn WebappDeployer,
    module: &Module,
    descriptor: &DeploymentDescriptor,
) -> Result<Arc<ContextHandler>, DeployError> {
    match descriptor {
        DeploymentDescriptor::WebApp {
            context_path,
            web_root,
            internal_class_name,
        } => deployer.register_webapplication(
            module,
            web_root,
            context_path,
            internal_class_name.as_deref(),
        ),
        DeploymentDescriptor::ContextFile {
            context_file_path,
            internal_class_name,
        } => deployer.register_context(module, context_file_path, internal_class_name.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::classloader::ClassSpace;
    use crate::module::manifest::Manifest;
    use std::collections::VecDeque;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recording {
        calls: StdMutex<Vec<String>>,
        fail_paths: Vec<String>,
    }

    impl WebappDeployer for Recording {
        fn register_webapplication(
            &self,
            _module: &Module,
            web_root: &str,
            context_path: &str,
            _internal_class_name: Option<&str>,
        ) -> Result<Arc<ContextHandler>, DeployError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("webapp {} {}", context_path, web_root));
            if self.fail_paths.iter().any(|p| p == context_path) {
                return Err(DeployError::WebRootNotFound {
                    context_path: context_path.to_string(),
                    path: web_root.into(),
                });
            }
            Ok(Arc::new(ContextHandler::new(context_path)))
        }

        fn register_context(
            &self,
            _module: &Module,
            context_file: &str,
            _internal_class_name: Option<&str>,
        ) -> Result<Arc<ContextHandler>, DeployError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("context {}", context_file));
            Ok(Arc::new(ContextHandler::new("/from-file")))
        }

        fn unregister(&self, context_path: &str) -> Result<(), DeployError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unregister {}", context_path));
            Ok(())
        }
    }

    fn module(id: u64, headers: &[(&str, &str)]) -> Arc<Module> {
        Arc::new(Module::new(
            ModuleId(id),
            format!("m{}", id),
            Manifest::from_pairs(headers.iter().copied()),
            None,
            Arc::new(ClassSpace::empty("m")),
        ))
    }

    fn event(kind: ModuleEventKind, module: &Arc<Module>) -> ModuleEvent {
        ModuleEvent::new(kind, Arc::clone(module))
    }

    #[tokio::test]
    async fn stop_tears_down_and_restart_redeploys() {
        let deployer = Arc::new(Recording::default());
        let tracker = DeploymentTracker::new(deployer.clone());
        let m = module(1, &[("Jetty-WarFolderPath", "web"), ("Jetty-WarContextPath", "/a")]);

        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        assert_eq!(
            tracker.deployed_paths(TrackingKey::Module(m.id())).await,
            vec!["/a".to_string()]
        );
        tracker.module_changed(&event(ModuleEventKind::Stopping, &m)).await;
        tracker.module_changed(&event(ModuleEventKind::Stopped, &m)).await;
        assert_eq!(tracker.tracked_count().await, 0);
        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;

        assert_eq!(
            *deployer.calls.lock().unwrap(),
            vec!["webapp /a web", "unregister /a", "webapp /a web"]
        );
    }

    #[tokio::test]
    async fn failed_deployment_releases_the_key() {
        let deployer = Arc::new(Recording {
            fail_paths: vec!["/bad".to_string()],
            ..Recording::default()
        });
        let tracker = DeploymentTracker::new(deployer.clone());
        let m = module(2, &[("Jetty-WarFolderPath", "x"), ("Jetty-WarContextPath", "/bad")]);

        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        assert!(!tracker.is_tracked(TrackingKey::Module(m.id())).await);
        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        assert_eq!(deployer.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn context_file_deploys_once_started() {
        let deployer = Arc::new(Recording::default());
        let tracker = DeploymentTracker::new(deployer.clone());
        let m = module(3, &[("Jetty-ContextFilePath", "contexts/app.toml")]);

        tracker.module_changed(&event(ModuleEventKind::Starting, &m)).await;
        assert!(deployer.calls.lock().unwrap().is_empty());
        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        assert_eq!(
            *deployer.calls.lock().unwrap(),
            vec!["context contexts/app.toml"]
        );
    }

    #[tokio::test]
    async fn invalid_context_path_is_ignored() {
        let deployer = Arc::new(Recording::default());
        let tracker = DeploymentTracker::new(deployer.clone());
        let m = module(4, &[("Jetty-WarFolderPath", "web"), ("Jetty-WarContextPath", "nope")]);

        tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        assert!(deployer.calls.lock().unwrap().is_empty());
        assert_eq!(tracker.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn close_undeploys_everything() {
        let deployer = Arc::new(Recording::default());
        let tracker = DeploymentTracker::new(deployer.clone());
        for (id, path) in [(5, "/x"), (6, "/y")] {
            let m = module(id, &[("Jetty-WarFolderPath", "w"), ("Jetty-WarContextPath", path)]);
            tracker.module_changed(&event(ModuleEventKind::Started, &m)).await;
        }
        tracker.close().await;
        assert_eq!(tracker.tracked_count().await, 0);
        let calls = deployer.calls.lock().unwrap();
        assert!(calls.contains(&"unregister /x".to_string()));
        assert!(calls.contains(&"unregister /y".to_string()));
    }

    /// Blocks each deployment until its gate opens; mounts like a server would
    struct Gated {
        gates: StdMutex<VecDeque<std_mpsc::Receiver<()>>>,
        entered: mpsc::UnboundedSender<()>,
        mounted: StdMutex<Vec<String>>,
    }

    impl Gated {
        fn new(
            deployments: usize,
        ) -> (Arc<Self>, Vec<std_mpsc::Sender<()>>, mpsc::UnboundedReceiver<()>) {
            let (senders, receivers): (Vec<_>, VecDeque<_>) =
                (0..deployments).map(|_| std_mpsc::channel()).unzip();
            let (entered, entered_rx) = mpsc::unbounded_channel();
            let gated = Arc::new(Self {
                gates: StdMutex::new(receivers),
                entered,
                mounted: StdMutex::new(Vec::new()),
            });
            (gated, senders, entered_rx)
        }

        fn mounted(&self) -> Vec<String> {
            self.mounted.lock().unwrap().clone()
        }
    }

    impl WebappDeployer for Gated {
        fn register_webapplication(
            &self,
            _module: &Module,
            _web_root: &str,
            context_path: &str,
            _internal_class_name: Option<&str>,
        ) -> Result<Arc<ContextHandler>, DeployError> {
            let gate = self.gates.lock().unwrap().pop_front().unwrap();
            self.entered.send(()).unwrap();
            gate.recv().unwrap();

            let mut mounted = self.mounted.lock().unwrap();
            if mounted.iter().any(|p| p == context_path) {
                return Err(DeployError::ContextPathInUse(context_path.to_string()));
            }
            mounted.push(context_path.to_string());
            Ok(Arc::new(ContextHandler::new(context_path)))
        }

        fn register_context(
            &self,
            _module: &Module,
            context_file: &str,
            _internal_class_name: Option<&str>,
        ) -> Result<Arc<ContextHandler>, DeployError> {
            Err(DeployError::InvalidDescriptor(context_file.to_string()))
        }

        fn unregister(&self, context_path: &str) -> Result<(), DeployError> {
            self.mounted.lock().unwrap().retain(|p| p != context_path);
            Ok(())
        }
    }

    /// Start, stop and start again while the first deployment is blocked,
    /// then release the deployments in `release_order`
    async fn restart_during_deploy(
        release_order: [usize; 2],
    ) -> (Arc<Gated>, Arc<DeploymentTracker>, Arc<Module>) {
        let (deployer, gates, mut entered) = Gated::new(2);
        let tracker = Arc::new(DeploymentTracker::new(deployer.clone()));
        let m = module(9, &[("Jetty-WarFolderPath", "web"), ("Jetty-WarContextPath", "/r")]);

        let start = |tracker: &Arc<DeploymentTracker>| {
            let tracker = Arc::clone(tracker);
            let started = event(ModuleEventKind::Started, &m);
            tokio::spawn(async move { tracker.module_changed(&started).await })
        };

        let first = start(&tracker);
        entered.recv().await.unwrap();
        tracker.module_changed(&event(ModuleEventKind::Stopped, &m)).await;
        let second = start(&tracker);
        entered.recv().await.unwrap();

        let mut tasks = [Some(first), Some(second)];
        for index in release_order {
            gates[index].send(()).unwrap();
            if let Some(task) = tasks[index].take() {
                task.await.unwrap();
            }
        }
        (deployer, tracker, m)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn restart_during_deploy_keeps_the_current_deployment() {
        for order in [[0, 1], [1, 0]] {
            let (deployer, tracker, m) = restart_during_deploy(order).await;
            let key = TrackingKey::Module(m.id());

            assert!(tracker.is_tracked(key).await, "{:?}", order);
            assert_eq!(deployer.mounted(), vec!["/r".to_string()], "{:?}", order);
            assert_eq!(tracker.deployed_paths(key).await, vec!["/r".to_string()]);

            tracker.module_changed(&event(ModuleEventKind::Stopped, &m)).await;
            assert!(!tracker.is_tracked(key).await);
            assert!(deployer.mounted().is_empty(), "{:?}", order);
        }
    }
}
