//! Plugin chain executor
//!
//! ADD runs the configured steps strictly in order. Each step that succeeds
//! is committed to disk as a [`PluginState`] before the next one starts;
//! if a later step fails, every committed step is torn down in reverse and
//! its state removed. DEL rebuilds the chain from disk alone and tears it
//! down in reverse, best effort: one failing step never stops the others.
//!
//! Without a `plugins` list the executor runs a single delegate and keeps
//! only the `<container-id>-delegate` snapshot.

use headcni_core::{is_self_step, Document, Error, NetworkConfig, Result, SELF_STEP_TYPES};
use headcni_network::{CniResult, PlatformAdapter, SubnetEnvironment};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::delegate::DelegateBuilder;
use crate::invoker::DelegateInvoker;
use crate::result::normalize_and_enhance;
use crate::state::{PluginState, StateStore};

/// Attempts per regular step before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts, multiplied by the attempt number
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The container a lifecycle event refers to, as the runtime names it
#[derive(Debug, Clone, Default)]
pub struct ContainerRef {
    pub container_id: String,
    pub netns: String,
}

impl ContainerRef {
    pub fn new(container_id: impl Into<String>, netns: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            netns: netns.into(),
        }
    }
}

/// Executes, rolls back and tears down delegate chains
pub struct ChainExecutor {
    platform: Arc<dyn PlatformAdapter>,
    invoker: Arc<dyn DelegateInvoker>,
    store: StateStore,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ChainExecutor {
    pub fn new(
        platform: Arc<dyn PlatformAdapter>,
        invoker: Arc<dyn DelegateInvoker>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            platform,
            invoker,
            store: StateStore::new(data_dir),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the retry policy for regular steps
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn resolve(&self, container: &ContainerRef) -> String {
        self.platform
            .resolve_container_id(&container.container_id, &container.netns)
    }

    // ========================================================================
    // ADD
    // ========================================================================

    /// Attach: run the chain (or the single delegate) and return the final
    /// result. An empty chain succeeds with no result.
    pub async fn execute_chain(
        &self,
        container: &ContainerRef,
        network: &NetworkConfig,
        env: &SubnetEnvironment,
    ) -> Result<Option<CniResult>> {
        network.validate()?;
        let container_id = self.resolve(container);

        let Some(plugins) = &network.plugins else {
            return self
                .add_single_delegate(&container_id, network, env)
                .await
                .map(Some);
        };

        info!(container_id = %container_id, steps = plugins.len(), "Executing plugin chain");

        let mut committed: Vec<PluginState> = Vec::with_capacity(plugins.len());
        let mut last_result: Option<CniResult> = None;

        for (index, step) in plugins.iter().enumerate() {
            let plugin_type = step.require_str("type")?.to_string();
            let prev_result = last_result.as_ref().map(CniResult::to_value).transpose()?;

            let outcome = self
                .run_step(&container_id, index, &plugin_type, step, network, env, prev_result.as_ref())
                .await;

            match outcome {
                Ok((state, result)) => {
                    debug!(container_id = %container_id, index, plugin_type = %plugin_type, "Step committed");
                    committed.push(state);
                    last_result = Some(result);
                }
                Err(e) => {
                    error!(
                        container_id = %container_id,
                        index,
                        plugin_type = %plugin_type,
                        error = %e,
                        "Plugin chain step failed, rolling back"
                    );
                    self.rollback(&container_id, index, &committed).await;
                    return Err(e.at_step(index, plugin_type));
                }
            }
        }

        info!(container_id = %container_id, steps = committed.len(), "✓ Plugin chain complete");
        Ok(last_result)
    }

    /// Run one step and commit its state. Nothing is committed on error.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        container_id: &str,
        index: usize,
        plugin_type: &str,
        step: &Document,
        network: &NetworkConfig,
        env: &SubnetEnvironment,
        prev_result: Option<&Value>,
    ) -> Result<(PluginState, CniResult)> {
        let (state, result) = if is_self_step(plugin_type, step) {
            let mut declared = step.get_object("delegate")?.unwrap_or_default();
            if !declared.contains("type") && !SELF_STEP_TYPES.contains(&plugin_type) {
                declared.set("type", plugin_type);
            }
            let delegate = DelegateBuilder::new(network, env, self.platform.as_ref())
                .build(declared, prev_result)?;

            // self steps are not retried: their failures are configuration problems
            let result = self.add_delegate(container_id, &delegate, env, false).await?;
            (PluginState::new(index, plugin_type, delegate, true), result)
        } else {
            let merged = merge_step_config(step, network, prev_result);
            let raw = self.invoke_with_retry(plugin_type, &merged.to_bytes()?).await?;
            let result = CniResult::normalize(raw)?;
            (PluginState::new(index, plugin_type, merged, false), result)
        };

        self.store.save_plugin_state(container_id, &state).await?;
        Ok((state, result))
    }

    async fn add_single_delegate(
        &self,
        container_id: &str,
        network: &NetworkConfig,
        env: &SubnetEnvironment,
    ) -> Result<CniResult> {
        let declared = network.delegate.clone().unwrap_or_default();
        let delegate = DelegateBuilder::new(network, env, self.platform.as_ref()).build(declared, None)?;
        self.add_delegate(container_id, &delegate, env, true).await
    }

    /// Persist the delegate snapshot, invoke it, enhance the result
    async fn add_delegate(
        &self,
        container_id: &str,
        delegate: &Document,
        env: &SubnetEnvironment,
        retry: bool,
    ) -> Result<CniResult> {
        let plugin_type = delegate.require_str("type")?;
        let config = delegate.to_bytes()?;
        debug!(
            container_id,
            plugin_type,
            netconf = %String::from_utf8_lossy(&config),
            "Netconf sent to delegate plugin"
        );

        // saved first so DEL can release a delegate that failed half way
        self.store.save_delegate(container_id, &config).await?;

        let raw = if retry {
            self.invoke_with_retry(plugin_type, &config).await?
        } else {
            self.invoker.invoke(plugin_type, &config).await?
        };
        normalize_and_enhance(raw, env)
    }

    async fn invoke_with_retry(&self, plugin_type: &str, config: &[u8]) -> Result<Value> {
        let mut attempt = 1;
        loop {
            match self.invoker.invoke(plugin_type, config).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        plugin_type,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Delegate invocation failed, retrying"
                    );
                    sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Undo steps `0..failed_index` in reverse. Errors are logged and the
    /// unwind continues; every state file is removed.
    async fn rollback(&self, container_id: &str, failed_index: usize, committed: &[PluginState]) {
        for state in committed.iter().take(failed_index).rev() {
            info!(container_id, index = state.index, plugin_type = %state.plugin_type, "Rolling back step");
            if let Err(e) = self.teardown_step(container_id, state).await {
                warn!(
                    container_id,
                    index = state.index,
                    plugin_type = %state.plugin_type,
                    error = %e,
                    "Rollback of step failed"
                );
            }
            if let Err(e) = self.store.remove_plugin_state(container_id, state.index).await {
                warn!(container_id, index = state.index, error = %e, "Failed to remove plugin state");
            }
        }
    }

    // ========================================================================
    // DEL
    // ========================================================================

    /// Detach: tear down every persisted step in reverse. Each step is
    /// attempted exactly once and its state file removed whatever happens;
    /// a delegate snapshot no step accounts for is released last. The last
    /// error seen is returned.
    pub async fn delete_chain(&self, container: &ContainerRef, _network: &NetworkConfig) -> Result<()> {
        let container_id = self.resolve(container);
        let len = self.store.chain_len(&container_id).await?;

        if len == 0 {
            debug!(container_id = %container_id, "No chain state, tearing down single delegate");
            return self.teardown_self(&container_id, None).await;
        }

        info!(container_id = %container_id, steps = len, "Tearing down plugin chain");

        let mut last_error = None;
        let mut self_step_seen = false;
        for index in (0..len).rev() {
            let outcome = match self.store.load_plugin_state(&container_id, index).await {
                Ok(Some(state)) => {
                    self_step_seen |= state.self_step;
                    self.teardown_step(&container_id, &state)
                        .await
                        .map_err(|e| e.at_step(index, state.plugin_type.clone()))
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(container_id = %container_id, index, error = %e, "Teardown of step failed");
                last_error = Some(e);
            }

            if let Err(e) = self.store.remove_plugin_state(&container_id, index).await {
                warn!(container_id = %container_id, index, error = %e, "Failed to remove plugin state");
                last_error = Some(e);
            }
        }

        // a self step interrupted before its state file was written leaves
        // only the snapshot behind
        if !self_step_seen {
            if let Err(e) = self.teardown_self(&container_id, None).await {
                warn!(container_id = %container_id, error = %e, "Teardown of orphaned delegate snapshot failed");
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn teardown_step(&self, container_id: &str, state: &PluginState) -> Result<()> {
        if state.self_step {
            return self.teardown_self(container_id, Some(state)).await;
        }
        let config = state.config_bytes()?;
        self.invoker.invoke_delete(&state.plugin_type, &config).await
    }

    /// Tear down through the delegate snapshot, falling back to the step's
    /// own record when the snapshot is gone. The snapshot is always removed.
    async fn teardown_self(&self, container_id: &str, fallback: Option<&PluginState>) -> Result<()> {
        let outcome = self.delete_from_snapshot(container_id, fallback).await;
        if let Err(e) = self.store.remove_delegate(container_id).await {
            warn!(container_id, error = %e, "Failed to remove delegate snapshot");
        }
        outcome
    }

    async fn delete_from_snapshot(&self, container_id: &str, fallback: Option<&PluginState>) -> Result<()> {
        let config = match (self.store.load_delegate(container_id).await?, fallback) {
            (Some(config), _) => config,
            (None, Some(state)) => state.config_bytes()?,
            (None, None) => {
                debug!(container_id, "No delegate snapshot, nothing to tear down");
                return Ok(());
            }
        };
        let delegate = Document::from_slice(&config)?;
        let plugin_type = delegate.require_str("type")?;
        self.invoker.invoke_delete(plugin_type, &config).await
    }

    // ========================================================================
    // CHECK
    // ========================================================================

    /// Verify: ask every persisted delegate to check its work against the
    /// runtime-supplied `prevResult`.
    pub async fn check(&self, container: &ContainerRef, network: &NetworkConfig) -> Result<()> {
        let container_id = self.resolve(container);
        let len = self.store.chain_len(&container_id).await?;

        if len == 0 {
            let config = self.store.load_delegate(&container_id).await?.ok_or_else(|| {
                Error::not_found(format!("no persisted state for container {}", container_id))
            })?;
            let mut delegate = Document::from_slice(&config)?;
            let plugin_type = delegate.require_str("type")?.to_string();
            if let Some(prev) = &network.prev_result {
                delegate.set("prevResult", prev.clone());
            }
            return self.invoker.invoke_check(&plugin_type, &delegate.to_bytes()?).await;
        }

        for index in 0..len {
            let state = self
                .store
                .load_plugin_state(&container_id, index)
                .await?
                .ok_or_else(|| Error::not_found(format!("plugin state {} for {}", index, container_id)))?;
            let mut config = Document::from_value(state.config.clone())?;
            if let Some(prev) = &network.prev_result {
                config.set("prevResult", prev.clone());
            }
            self.invoker
                .invoke_check(&state.delegate_type()?, &config.to_bytes()?)
                .await
                .map_err(|e| e.at_step(index, state.plugin_type.clone()))?;
        }
        Ok(())
    }
}

/// Step config as handed to a regular delegate: the declared fields plus
/// network identity, the runtime-config overlay and the previous result.
fn merge_step_config(step: &Document, network: &NetworkConfig, prev_result: Option<&Value>) -> Document {
    let mut config = step.clone();
    config.set("name", network.name.clone());
    if !network.cni_version.is_empty() {
        config.set("cniVersion", network.cni_version.clone());
    }
    if let Some(runtime_config) = &network.runtime_config {
        config.set("runtimeConfig", runtime_config.clone());
    }
    if let Some(prev) = prev_result {
        config.set("prevResult", prev.clone());
    }
    config
}
