//! Platform adapters
//!
//! Everything that differs between Linux and Windows hosts lives behind
//! [`PlatformAdapter`]. One adapter is built at startup (see
//! [`host_platform`]) and passed down explicitly; tests construct whichever
//! variant they need.

use headcni_core::{DefaultPaths, Document, NetworkConfig, Result};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::subnet_env::SubnetEnvironment;

/// Netns reference used by Windows runtimes for the pause container
const PAUSE_CONTAINER_NETNS: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
}

impl TargetOs {
    /// The OS this binary was compiled for
    pub fn host() -> Self {
        if cfg!(windows) {
            TargetOs::Windows
        } else {
            TargetOs::Linux
        }
    }
}

/// Host-specific behaviour consulted by the loaders and the chain executor
pub trait PlatformAdapter: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Map the runtime's container ID to the ID the host network stack uses
    fn resolve_container_id(&self, container_id: &str, netns: &str) -> String;

    fn default_paths(&self) -> DefaultPaths;

    /// Delegate plugin used when the configuration names none
    fn default_delegate_type(&self) -> &'static str;

    /// Add platform keys to a delegate configuration. Keys the delegate
    /// already declares are left alone.
    fn configure_delegate(
        &self,
        delegate: &mut Document,
        network: &NetworkConfig,
        env: &SubnetEnvironment,
    ) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxAdapter;

impl PlatformAdapter for LinuxAdapter {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn resolve_container_id(&self, container_id: &str, _netns: &str) -> String {
        container_id.to_string()
    }

    fn default_paths(&self) -> DefaultPaths {
        DefaultPaths {
            subnet_file: PathBuf::from("/var/lib/headcni/env.yaml"),
            data_dir: PathBuf::from("/var/lib/cni/headcni"),
        }
    }

    fn default_delegate_type(&self) -> &'static str {
        "bridge"
    }

    fn configure_delegate(
        &self,
        delegate: &mut Document,
        _network: &NetworkConfig,
        env: &SubnetEnvironment,
    ) -> Result<()> {
        // the delegate masquerades only when the node does not
        delegate.set_default("ipMasq", !env.ipmasq);

        if delegate.get_str("type")? == Some("bridge") {
            delegate.set_default("isGateway", true);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsAdapter;

impl PlatformAdapter for WindowsAdapter {
    fn name(&self) -> &'static str {
        "windows"
    }

    /// HNS endpoints belong to the sandbox: a netns of the form
    /// `<prefix>:<sandbox-id>` names the real owner.
    fn resolve_container_id(&self, container_id: &str, netns: &str) -> String {
        if netns.is_empty() || netns == PAUSE_CONTAINER_NETNS {
            return container_id.to_string();
        }
        match netns.split_once(':') {
            Some((_, sandbox_id)) => sandbox_id.to_string(),
            None => container_id.to_string(),
        }
    }

    fn default_paths(&self) -> DefaultPaths {
        DefaultPaths {
            subnet_file: PathBuf::from(r"C:\ProgramData\headcni\env.yaml"),
            data_dir: PathBuf::from(r"C:\ProgramData\headcni\data"),
        }
    }

    fn default_delegate_type(&self) -> &'static str {
        "win-bridge"
    }

    fn configure_delegate(
        &self,
        delegate: &mut Document,
        _network: &NetworkConfig,
        env: &SubnetEnvironment,
    ) -> Result<()> {
        // win-bridge performs outbound NAT itself when asked to
        delegate.set_default("ipMasq", env.ipmasq);
        Ok(())
    }
}

/// Build the adapter for a given target
pub fn platform_for(target: TargetOs) -> Arc<dyn PlatformAdapter> {
    match target {
        TargetOs::Linux => Arc::new(LinuxAdapter),
        TargetOs::Windows => Arc::new(WindowsAdapter),
    }
}

/// Build the adapter for the host this binary was compiled for
pub fn host_platform() -> Arc<dyn PlatformAdapter> {
    platform_for(TargetOs::host())
}
