//! The application server process

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ContextDeployerConfig, ServerDescriptor, WebAppDeployerConfig};
use crate::server::context::ContextHandlerCollection;
use crate::server::http;

/// Long-lived server hosting deployed contexts
pub struct ApplicationServer {
    descriptor: ServerDescriptor,
    contexts: Option<Arc<ContextHandlerCollection>>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl ApplicationServer {
    /// Build the server described by `descriptor`; nothing is bound yet
    pub fn new(descriptor: ServerDescriptor) -> Self {
        let contexts = descriptor
            .has_contexts()
            .then(|| Arc::new(ContextHandlerCollection::new()));
        let (shutdown, _) = watch::channel(false);
        Self {
            descriptor,
            contexts,
            shutdown,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// The context-handler collection, when the server installs one
    pub fn contexts(&self) -> Option<&Arc<ContextHandlerCollection>> {
        self.contexts.as_ref()
    }

    pub fn webapp_deployer(&self) -> Option<&WebAppDeployerConfig> {
        self.descriptor.webapp_deployer.as_ref()
    }

    pub fn context_deployer(&self) -> Option<&ContextDeployerConfig> {
        self.descriptor.context_deployer.as_ref()
    }

    /// Address the HTTP listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the HTTP listener if the descriptor names an address
    pub async fn start(&self) -> Result<()> {
        let Some(addr) = self.descriptor.listen_addr else {
            info!("Server {} started without an HTTP listener", self.name());
            return Ok(());
        };
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let socket = TcpListener::bind(addr).await?;
        let bound = socket.local_addr()?;
        let _ = self.local_addr.set(bound);
        info!("Server {} listening on {}", self.name(), bound);

        self.shutdown.send_replace(false);
        *listener = Some(tokio::spawn(http::serve(
            socket,
            self.contexts.clone(),
            self.shutdown.subscribe(),
        )));
        Ok(())
    }

    /// Stop every context and the HTTP listener
    pub async fn stop(&self) {
        if let Some(contexts) = &self.contexts {
            contexts.stop_all();
        }
        self.shutdown.send_replace(true);
        if let Some(task) = self.listener.lock().await.take() {
            if let Err(e) = task.await {
                warn!("HTTP listener ended abnormally: {}", e);
            }
        }
        info!("Server {} stopped", self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::context::ContextHandler;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn keyless_server_has_no_collection() {
        let server = ApplicationServer::new(ServerDescriptor::keyless());
        assert!(server.contexts().is_none());
        assert!(server.webapp_deployer().is_none());
    }

    #[tokio::test]
    async fn serves_mounted_context_over_http() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "hello from app1").unwrap();

        let descriptor = ServerDescriptor {
            listen_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..ServerDescriptor::default()
        };
        let server = ApplicationServer::new(descriptor);
        let mut handler = ContextHandler::new("/app1");
        handler.set_resource_base(Some(dir.path().to_path_buf()));
        let handler = Arc::new(handler);
        handler.start().unwrap();
        server.contexts().unwrap().add(handler).unwrap();

        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /app1/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"));
        assert!(reply.ends_with("hello from app1"));

        server.stop().await;
        assert!(!server.contexts().unwrap().handlers()[0].is_started());
    }
}
