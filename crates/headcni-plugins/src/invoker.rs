//! Delegate invocation
//!
//! The chain executor never runs plugin binaries itself; it hands a plugin
//! type and a configuration blob to a [`DelegateInvoker`]. [`ExecInvoker`]
//! is the production implementation that follows the CNI exec protocol.

use async_trait::async_trait;
use headcni_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs delegate plugins on behalf of the chain executor
#[async_trait]
pub trait DelegateInvoker: Send + Sync {
    /// ADD: returns the delegate's raw JSON result
    async fn invoke(&self, plugin_type: &str, config: &[u8]) -> Result<Value>;

    /// DEL
    async fn invoke_delete(&self, plugin_type: &str, config: &[u8]) -> Result<()>;

    /// CHECK; invokers that cannot check report success
    async fn invoke_check(&self, _plugin_type: &str, _config: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Error object printed by a failing CNI plugin
#[derive(Debug, Deserialize)]
struct PluginError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

/// Executes delegate binaries found on `CNI_PATH`
#[derive(Debug, Clone)]
pub struct ExecInvoker {
    search_path: Vec<PathBuf>,
}

impl ExecInvoker {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    fn find_plugin(&self, plugin_type: &str) -> Result<PathBuf> {
        if plugin_type.is_empty()
            || plugin_type.contains('/')
            || plugin_type.contains('\\')
            || plugin_type.contains("..")
        {
            return Err(Error::delegate(plugin_type, "invalid plugin type"));
        }

        let mut candidates = vec![plugin_type.to_string()];
        if cfg!(windows) {
            candidates.insert(0, format!("{}.exe", plugin_type));
        }

        self.search_path
            .iter()
            .flat_map(|dir| candidates.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                Error::delegate(
                    plugin_type,
                    format!("failed to find plugin in CNI_PATH {:?}", self.search_path),
                )
            })
    }

    async fn exec(&self, plugin_type: &str, command: &str, config: &[u8]) -> Result<Vec<u8>> {
        let path = self.find_plugin(plugin_type)?;
        debug!(plugin = %path.display(), command, "Executing delegate plugin");

        let mut child = Command::new(&path)
            .env("CNI_COMMAND", command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::delegate(plugin_type, format!("failed to spawn: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config)
                .await
                .map_err(|e| Error::delegate(plugin_type, format!("failed to write config: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::delegate(plugin_type, e.to_string()))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let message = match serde_json::from_slice::<PluginError>(&output.stdout) {
            Ok(err) if err.details.is_empty() => format!("{} (code {})", err.msg, err.code),
            Ok(err) => format!("{}; {} (code {})", err.msg, err.details, err.code),
            Err(_) => format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stdout).trim()
            ),
        };
        Err(Error::delegate(plugin_type, message))
    }
}

#[async_trait]
impl DelegateInvoker for ExecInvoker {
    async fn invoke(&self, plugin_type: &str, config: &[u8]) -> Result<Value> {
        let stdout = self.exec(plugin_type, "ADD", config).await?;
        serde_json::from_slice(&stdout).map_err(|e| {
            Error::delegate(plugin_type, format!("failed to decode result: {}", e))
        })
    }

    async fn invoke_delete(&self, plugin_type: &str, config: &[u8]) -> Result<()> {
        self.exec(plugin_type, "DEL", config).await.map(|_| ())
    }

    async fn invoke_check(&self, plugin_type: &str, config: &[u8]) -> Result<()> {
        self.exec(plugin_type, "CHECK", config).await.map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install(dir: &TempDir, name: &str, script: &str) {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_exec_add_returns_result() {
        let dir = TempDir::new().unwrap();
        install(
            &dir,
            "fake",
            r#"cat >/dev/null; echo "{\"cniVersion\":\"1.0.0\",\"ips\":[{\"address\":\"10.1.2.5/24\"}],\"cmd\":\"$CNI_COMMAND\"}""#,
        );
        let invoker = ExecInvoker::new(vec![dir.path().to_path_buf()]);
        let result = invoker.invoke("fake", b"{}").await.unwrap();
        assert_eq!(result["cmd"], "ADD");
        assert_eq!(result["ips"][0]["address"], "10.1.2.5/24");
    }

    #[tokio::test]
    async fn test_exec_failure_surfaces_plugin_error() {
        let dir = TempDir::new().unwrap();
        install(
            &dir,
            "broken",
            r#"cat >/dev/null; echo '{"code":11,"msg":"try again later"}'; exit 1"#,
        );
        let invoker = ExecInvoker::new(vec![dir.path().to_path_buf()]);
        let err = invoker.invoke_delete("broken", b"{}").await.unwrap_err();
        assert!(err.to_string().contains("try again later"));
    }

    #[tokio::test]
    async fn test_missing_plugin() {
        let invoker = ExecInvoker::new(vec![]);
        let err = invoker.invoke("bridge", b"{}").await.unwrap_err();
        assert!(matches!(err, Error::Delegate { .. }));
        assert!(invoker.invoke("../bin/sh", b"{}").await.is_err());
    }
}
