//! webapp-bridge binary
//!
//! Installs the modules found in the modules directory, starts the server
//! and its deployment tracker, and optionally follows the directory for
//! modules that appear or vanish later.

// Disabled for Windows cross-compilation (mimalloc linking issues with MinGW)
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use webapp_bridge::config::{BridgeConfig, LoggingConfig};
use webapp_bridge::module::{ModuleDiscovery, ModuleFramework, ModuleWatcher};
use webapp_bridge::utils::{
    env_bool, init_logging_from_config, log_error, result_to_option, wait_for_shutdown_signal,
};
use webapp_bridge::Bootstrap;

/// Enables the directory watch like `--watch`
const ENV_WATCH: &str = "WEBAPP_BRIDGE_WATCH";

#[derive(Parser, Debug)]
#[command(name = "webapp-bridge", version, about)]
struct Args {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory scanned for modules
    #[arg(long)]
    modules_dir: Option<String>,

    /// Server home directory
    #[arg(long)]
    home: Option<String>,

    /// HTTP listen address, overriding the server descriptor
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Follow the modules directory for changes
    #[arg(long)]
    watch: bool,

    /// Log filter, e.g. `webapp_bridge=debug`
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(dir) = self.modules_dir {
            config.modules.modules_dir = dir;
        }
        if let Some(home) = self.home {
            config.server.home = Some(home);
        }
        if let Some(addr) = self.listen {
            config.server.listen_addr = Some(addr);
        }
        if self.watch {
            config.modules.watch = true;
        }
        if let Some(filter) = self.log_filter {
            let logging = config.logging.get_or_insert_with(LoggingConfig::default);
            logging.filter = Some(filter);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    init_logging_from_config(config.logging.as_ref());

    let framework = Arc::new(ModuleFramework::new());
    let extensions = config.modules.archive_extensions.clone();
    let installed = ModuleDiscovery::new(&config.modules.modules_dir, extensions.clone())
        .install_all(&framework)
        .await;
    info!("Installed {} modules", installed.len());

    let bootstrap = Bootstrap::start(&config, Arc::clone(&framework)).await?;

    for module in &installed {
        result_to_option(
            framework.start(module.id()).await,
            &format!("Failed to start {}", module.symbolic_name()),
        );
    }

    let watcher = if config.modules.watch || env_bool(ENV_WATCH) {
        log_error(
            || {
                ModuleWatcher::spawn(
                    Arc::clone(&framework),
                    ModuleDiscovery::new(&config.modules.modules_dir, extensions),
                )
            },
            &format!("Cannot watch {}", config.modules.modules_dir),
        )
    } else {
        None
    };

    wait_for_shutdown_signal().await;

    drop(watcher);
    bootstrap.shutdown().await;
    Ok(())
}
