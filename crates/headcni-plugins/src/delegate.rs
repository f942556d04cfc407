//! Delegate configuration construction
//!
//! Layers, lowest priority first: the declared delegate fields, the
//! network identity (`name`, `cniVersion`), synthesized defaults (type,
//! IPAM, MTU, DNS, platform keys) that only fill gaps, then `prevResult`
//! and the runtime-config overlay.

use headcni_core::{Document, Error, NetworkConfig, Result};
use headcni_network::{first_usable_address, PlatformAdapter, Route, SubnetEnvironment};
use serde_json::{json, Map, Value};

/// Builds fully resolved delegate configurations for one invocation
pub struct DelegateBuilder<'a> {
    network: &'a NetworkConfig,
    env: &'a SubnetEnvironment,
    platform: &'a dyn PlatformAdapter,
}

impl<'a> DelegateBuilder<'a> {
    pub fn new(
        network: &'a NetworkConfig,
        env: &'a SubnetEnvironment,
        platform: &'a dyn PlatformAdapter,
    ) -> Self {
        Self {
            network,
            env,
            platform,
        }
    }

    pub fn build(&self, declared: Document, prev_result: Option<&Value>) -> Result<Document> {
        let mut delegate = declared;

        delegate.set("name", self.network.name.clone());
        if !self.network.cni_version.is_empty() {
            delegate.set("cniVersion", self.network.cni_version.clone());
        }

        let has_type = delegate.get_str("type")?.is_some_and(|t| !t.is_empty());
        if !has_type {
            delegate.set("type", self.platform.default_delegate_type());
        }

        if !delegate.contains("ipam") {
            delegate.set("ipam", self.synthesize_ipam()?);
        }

        delegate.set_default("mtu", self.env.mtu);

        if let Some(dns) = &self.env.dns {
            delegate.set_default("dns", serde_json::to_value(dns)?);
        }

        self.platform
            .configure_delegate(&mut delegate, self.network, self.env)?;

        if let Some(prev) = prev_result {
            delegate.set("prevResult", prev.clone());
        }
        if let Some(runtime_config) = &self.network.runtime_config {
            delegate.set("runtimeConfig", runtime_config.clone());
        }

        Ok(delegate)
    }

    /// host-local IPAM covering the node's subnets, routing every cluster
    /// network through the pod interface
    pub fn synthesize_ipam(&self) -> Result<Document> {
        let mut ipam = self.network.ipam.clone().unwrap_or_default();
        ipam.set_default("type", "host-local");

        if !ipam.contains("ranges") && !ipam.contains("subnet") {
            let ranges: Vec<Value> = self
                .env
                .subnets()
                .map(|subnet| {
                    let mut range = Map::new();
                    range.insert("subnet".to_string(), json!(subnet.to_string()));
                    if let Some(gateway) = first_usable_address(subnet) {
                        range.insert("gateway".to_string(), json!(gateway.to_string()));
                    }
                    json!([range])
                })
                .collect();
            ipam.set("ranges", ranges);
        }

        let mut routes: Vec<Route> = match ipam.get("routes") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::config(format!("failed to parse ipam.routes: {}", e)))?,
            None => Vec::new(),
        };
        let synthesized = self
            .env
            .networks()
            .map(|network| Route::new(network.to_string()))
            .chain(self.env.routes.iter().cloned());
        for route in synthesized {
            if !routes.iter().any(|existing| existing.same_route(&route)) {
                routes.push(route);
            }
        }
        ipam.set("routes", serde_json::to_value(routes)?);

        Ok(ipam)
    }
}
