//! In-process module system
//!
//! Holds installed modules and published descriptors, drives lifecycle
//! transitions and delivers [`FrameworkEvent`]s to subscribers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::module::model::{Module, PublishedDescriptor};
use crate::module::traits::{
    FrameworkEvent, ModuleError, ModuleEvent, ModuleEventKind, ModuleId, ModuleState, ServiceEvent,
    ServiceEventKind, ServiceId,
};

/// Module registry and event source
pub struct ModuleFramework {
    modules: RwLock<BTreeMap<ModuleId, Arc<Module>>>,
    services: RwLock<BTreeMap<ServiceId, Arc<PublishedDescriptor>>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<FrameworkEvent>>>,
    next_module_id: AtomicU64,
    next_service_id: AtomicU64,
}

impl ModuleFramework {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(BTreeMap::new()),
            services: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_module_id: AtomicU64::new(1),
            next_service_id: AtomicU64::new(1),
        }
    }

    /// Reserve an id for a module built outside the framework
    pub fn allocate_id(&self) -> ModuleId {
        ModuleId(self.next_module_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Install a module from a directory or archive
    pub async fn install(&self, location: &Path) -> Result<Arc<Module>, ModuleError> {
        if let Some(existing) = self.find_by_source(location).await {
            return Err(ModuleError::OperationError(format!(
                "{} is already installed as {}",
                location.display(),
                existing.id()
            )));
        }
        // Manifest and archive reads are synchronous
        let module = tokio::task::spawn_blocking({
            let id = self.allocate_id();
            let location = location.to_path_buf();
            move || Module::from_location(id, &location)
        })
        .await
        .map_err(|e| ModuleError::OperationError(format!("Task join error: {e}")))??;
        self.install_module(module).await
    }

    /// Install an already-built module
    pub async fn install_module(&self, module: Module) -> Result<Arc<Module>, ModuleError> {
        let module = Arc::new(module);
        {
            let mut modules = self.modules.write().await;
            if modules.contains_key(&module.id()) {
                return Err(ModuleError::OperationError(format!(
                    "{} is already installed",
                    module.id()
                )));
            }
            modules.insert(module.id(), Arc::clone(&module));
        }
        info!(
            "Installed {} ({})",
            module.symbolic_name(),
            module.id()
        );
        self.emit_module(ModuleEventKind::Installed, &module).await;
        Ok(module)
    }

    /// Start a module; starting an active module is a no-op
    pub async fn start(&self, id: ModuleId) -> Result<(), ModuleError> {
        let module = self.require(id).await?;
        match module.state() {
            ModuleState::Active | ModuleState::Starting => return Ok(()),
            ModuleState::Installed => {}
            other => {
                return Err(ModuleError::InvalidTransition {
                    module: id,
                    from: other,
                    to: ModuleState::Active,
                })
            }
        }
        module.set_state(ModuleState::Starting);
        self.emit_module(ModuleEventKind::Starting, &module).await;
        module.set_state(ModuleState::Active);
        info!("Started {}", module.symbolic_name());
        self.emit_module(ModuleEventKind::Started, &module).await;
        Ok(())
    }

    /// Stop a module and withdraw its published descriptors
    pub async fn stop(&self, id: ModuleId) -> Result<(), ModuleError> {
        let module = self.require(id).await?;
        match module.state() {
            ModuleState::Installed | ModuleState::Stopping => return Ok(()),
            ModuleState::Active | ModuleState::Starting => {}
            other => {
                return Err(ModuleError::InvalidTransition {
                    module: id,
                    from: other,
                    to: ModuleState::Installed,
                })
            }
        }
        module.set_state(ModuleState::Stopping);
        self.emit_module(ModuleEventKind::Stopping, &module).await;

        let owned: Vec<ServiceId> = self
            .services
            .read()
            .await
            .values()
            .filter(|d| d.module().id() == id)
            .map(|d| d.id())
            .collect();
        for service in owned {
            self.unpublish(service).await?;
        }

        module.set_state(ModuleState::Installed);
        info!("Stopped {}", module.symbolic_name());
        self.emit_module(ModuleEventKind::Stopped, &module).await;
        Ok(())
    }

    /// Stop if needed, then remove the module
    pub async fn uninstall(&self, id: ModuleId) -> Result<(), ModuleError> {
        self.stop(id).await?;
        let module = self
            .modules
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        module.set_state(ModuleState::Uninstalled);
        info!("Uninstalled {}", module.symbolic_name());
        self.emit_module(ModuleEventKind::Uninstalled, &module).await;
        Ok(())
    }

    /// Publish a descriptor object on behalf of an installed module
    pub async fn publish(
        &self,
        module: ModuleId,
        properties: BTreeMap<String, String>,
        bound_server: Option<String>,
    ) -> Result<ServiceId, ModuleError> {
        let owner = self.require(module).await?;
        let id = ServiceId(self.next_service_id.fetch_add(1, Ordering::Relaxed));
        let descriptor = Arc::new(PublishedDescriptor::new(
            id,
            owner,
            properties,
            bound_server,
        ));
        self.services
            .write()
            .await
            .insert(id, Arc::clone(&descriptor));
        debug!("Published {} for {}", id, module);
        self.emit(FrameworkEvent::Service(ServiceEvent {
            kind: ServiceEventKind::Registered,
            descriptor,
        }))
        .await;
        Ok(id)
    }

    /// Withdraw a published descriptor object
    pub async fn unpublish(&self, id: ServiceId) -> Result<(), ModuleError> {
        let descriptor = self
            .services
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        self.emit(FrameworkEvent::Service(ServiceEvent {
            kind: ServiceEventKind::Unregistering,
            descriptor,
        }))
        .await;
        self.services.write().await.remove(&id);
        debug!("Unpublished {}", id);
        Ok(())
    }

    pub async fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().await.values().cloned().collect()
    }

    pub async fn module(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.modules.read().await.get(&id).cloned()
    }

    pub async fn find_by_name(&self, symbolic_name: &str) -> Option<Arc<Module>> {
        self.modules
            .read()
            .await
            .values()
            .find(|m| m.symbolic_name() == symbolic_name)
            .cloned()
    }

    /// Module installed from `location`, comparing canonical paths
    pub async fn find_by_source(&self, location: &Path) -> Option<Arc<Module>> {
        let wanted = location
            .canonicalize()
            .unwrap_or_else(|_| location.to_path_buf());
        self.modules
            .read()
            .await
            .values()
            .find(|m| m.source() == Some(wanted.as_path()))
            .cloned()
    }

    /// Descriptors currently published
    pub async fn descriptors(&self) -> Vec<Arc<PublishedDescriptor>> {
        self.services.read().await.values().cloned().collect()
    }

    /// Subscribe to all subsequent framework events
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<FrameworkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().await.push(tx);
        rx
    }

    async fn require(&self, id: ModuleId) -> Result<Arc<Module>, ModuleError> {
        self.module(id)
            .await
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))
    }

    async fn emit_module(&self, kind: ModuleEventKind, module: &Arc<Module>) {
        self.emit(FrameworkEvent::Module(ModuleEvent::new(
            kind,
            Arc::clone(module),
        )))
        .await;
    }

    async fn emit(&self, event: FrameworkEvent) {
        let mut listeners = self.listeners.lock().await;
        let before = listeners.len();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
        if listeners.len() < before {
            warn!("Dropped {} closed event subscribers", before - listeners.len());
        }
    }
}

impl Default for ModuleFramework {
    fn default() -> Self {
        Self::new()
    }
}
