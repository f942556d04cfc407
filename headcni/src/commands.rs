//! ADD / DEL / CHECK handlers

use headcni_core::{NetworkConfig, Result};
use headcni_network::{CniResult, PlatformAdapter, SubnetEnvironment, CURRENT_CNI_VERSION};
use headcni_plugins::{ChainExecutor, ContainerRef, ExecInvoker};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::skel::CmdArgs;

fn load_network(args: &CmdArgs, platform: &dyn PlatformAdapter) -> Result<NetworkConfig> {
    NetworkConfig::load(&args.stdin_data, &platform.default_paths())
}

fn executor(args: &CmdArgs, network: &NetworkConfig, platform: Arc<dyn PlatformAdapter>) -> ChainExecutor {
    let invoker = Arc::new(ExecInvoker::new(args.search_path()));
    ChainExecutor::new(platform, invoker, &network.data_dir)
}

fn container(args: &CmdArgs) -> ContainerRef {
    ContainerRef::new(&args.container_id, &args.netns)
}

pub async fn cmd_add(args: &CmdArgs, platform: Arc<dyn PlatformAdapter>) -> Result<Value> {
    let network = load_network(args, platform.as_ref())?;
    let env = SubnetEnvironment::load(&network.subnet_file).await?;

    info!(
        container_id = %args.container_id,
        network = %network.name,
        platform = platform.name(),
        chain = network.is_chain(),
        "ADD"
    );

    let result = executor(args, &network, platform)
        .execute_chain(&container(args), &network, &env)
        .await?;

    // an empty chain hands back what the runtime gave us
    let result = match result {
        Some(result) => result.to_value()?,
        None => match network.prev_result {
            Some(prev) => CniResult::normalize(prev)?.to_value()?,
            None => CniResult {
                cni_version: CURRENT_CNI_VERSION.to_string(),
                ..Default::default()
            }
            .to_value()?,
        },
    };
    Ok(result)
}

/// DEL works from persisted state alone, so a missing or broken subnet
/// environment never blocks teardown.
pub async fn cmd_del(args: &CmdArgs, platform: Arc<dyn PlatformAdapter>) -> Result<()> {
    let network = load_network(args, platform.as_ref())?;
    info!(container_id = %args.container_id, network = %network.name, "DEL");

    executor(args, &network, platform)
        .delete_chain(&container(args), &network)
        .await
}

pub async fn cmd_check(args: &CmdArgs, platform: Arc<dyn PlatformAdapter>) -> Result<()> {
    let network = load_network(args, platform.as_ref())?;
    SubnetEnvironment::load(&network.subnet_file).await?;
    info!(container_id = %args.container_id, network = %network.name, "CHECK");

    executor(args, &network, platform)
        .check(&container(args), &network)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use headcni_network::LinuxAdapter;
    use serde_json::json;
    use tempfile::TempDir;

    fn args(dir: &TempDir, netconf: Value) -> CmdArgs {
        CmdArgs {
            container_id: "c1".to_string(),
            netns: "/var/run/netns/c1".to_string(),
            if_name: "eth0".to_string(),
            args: String::new(),
            path: dir.path().join("bin").display().to_string(),
            stdin_data: serde_json::to_vec(&netconf).unwrap(),
        }
    }

    fn netconf(dir: &TempDir, extra: Value) -> Value {
        let mut conf = json!({
            "name": "pods",
            "cniVersion": "1.0.0",
            "subnetFile": dir.path().join("env.yaml").display().to_string(),
            "dataDir": dir.path().join("data").display().to_string(),
        });
        conf.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        conf
    }

    #[tokio::test]
    async fn test_add_requires_environment() {
        let dir = TempDir::new().unwrap();
        let args = args(&dir, netconf(&dir, json!({})));

        let err = cmd_add(&args, Arc::new(LinuxAdapter)).await.unwrap_err();
        assert!(matches!(err, headcni_core::Error::EnvFileNotFound(_)));
    }

    #[tokio::test]
    async fn test_del_without_state_or_environment() {
        let dir = TempDir::new().unwrap();
        let args = args(&dir, netconf(&dir, json!({})));

        cmd_del(&args, Arc::new(LinuxAdapter)).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_chain_passes_prev_result_through() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("env.yaml"),
            "network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: 1450\nipmasq: true\n",
        )
        .unwrap();
        let conf = netconf(
            &dir,
            json!({
                "plugins": [],
                "prevResult": {"cniVersion": "0.4.0", "ips": [{"version": "4", "address": "10.1.2.9/24"}]}
            }),
        );

        let result = cmd_add(&args(&dir, conf), Arc::new(LinuxAdapter)).await.unwrap();
        assert_eq!(result["cniVersion"], "1.0.0");
        assert_eq!(result["ips"][0]["address"], "10.1.2.9/24");
        assert!(result["ips"][0].get("version").is_none());
    }
}
