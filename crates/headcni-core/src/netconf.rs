//! headcni network configuration
//!
//! The runtime hands headcni its own netconf on stdin. It either names one
//! `delegate` (single-delegate mode) or an ordered `plugins` chain, never
//! both. The subnet file and data directory are resolved with this
//! precedence: environment override, then the netconf value, then the
//! platform default.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{get_config_opt, DATA_DIR_ENV, SUBNET_FILE_ENV};
use crate::document::Document;
use crate::error::{Error, Result};

/// Step types that are handled by headcni itself
pub const SELF_STEP_TYPES: &[&str] = &["self", "headcni"];

/// Platform-supplied default locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPaths {
    pub subnet_file: PathBuf,
    pub data_dir: PathBuf,
}

/// The meta-plugin's own network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub cni_version: String,

    /// Base IPAM block; headcni fills in ranges and routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Document>,

    #[serde(default)]
    pub subnet_file: String,

    #[serde(default)]
    pub data_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Document>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<Document>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<Document>,

    /// Only present on CHECK, supplied by the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<Value>,
}

impl NetworkConfig {
    /// Parse and validate raw netconf bytes, resolving paths from the
    /// process environment.
    pub fn load(bytes: &[u8], defaults: &DefaultPaths) -> Result<Self> {
        Self::load_with(bytes, defaults, get_config_opt)
    }

    /// Like [`NetworkConfig::load`] with an injectable environment lookup
    pub fn load_with<F>(bytes: &[u8], defaults: &DefaultPaths, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut conf: NetworkConfig = serde_json::from_slice(bytes).map_err(Error::ConfigParse)?;
        conf.validate()?;
        conf.resolve_paths(defaults, lookup)?;
        debug!(
            network = %conf.name,
            subnet_file = %conf.subnet_file,
            data_dir = %conf.data_dir,
            "Loaded network configuration"
        );
        Ok(conf)
    }

    /// Structural checks that do not depend on the environment
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("'name' field is required"));
        }

        if self.delegate.is_some() && self.plugins.is_some() {
            return Err(Error::config(
                "'delegate' and 'plugins' are mutually exclusive",
            ));
        }

        if let Some(delegate) = &self.delegate {
            delegate.get_str("type").map_err(|_| {
                Error::config("'delegate' dictionary, if present, must have (string) 'type' field")
            })?;
        }

        if let Some(plugins) = &self.plugins {
            let mut self_steps = 0;
            for (index, plugin) in plugins.iter().enumerate() {
                let plugin_type = match plugin.get_str("type") {
                    Ok(Some(t)) if !t.is_empty() => t,
                    _ => {
                        return Err(Error::config(format!(
                            "plugins[{}] must have a non-empty (string) 'type' field",
                            index
                        )))
                    }
                };
                if is_self_step(plugin_type, plugin) {
                    self_steps += 1;
                }
            }
            if self_steps > 1 {
                return Err(Error::config(
                    "plugins chain may contain at most one headcni step",
                ));
            }
        }

        Ok(())
    }

    /// Resolve the subnet file and data directory
    pub fn resolve_paths<F>(&mut self, defaults: &DefaultPaths, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.subnet_file = resolve_one(
            lookup(SUBNET_FILE_ENV),
            &self.subnet_file,
            &defaults.subnet_file,
        )
        .ok_or(Error::MissingPath("subnet file", SUBNET_FILE_ENV))?;

        self.data_dir = resolve_one(lookup(DATA_DIR_ENV), &self.data_dir, &defaults.data_dir)
            .ok_or(Error::MissingPath("data directory", DATA_DIR_ENV))?;

        Ok(())
    }

    /// Whether this configuration runs a plugin chain
    pub fn is_chain(&self) -> bool {
        self.plugins.is_some()
    }
}

fn resolve_one(env: Option<String>, configured: &str, default: &std::path::Path) -> Option<String> {
    env.filter(|v| !v.is_empty())
        .or_else(|| Some(configured.to_string()).filter(|v| !v.is_empty()))
        .or_else(|| {
            let default = default.to_string_lossy();
            (!default.is_empty()).then(|| default.into_owned())
        })
}

/// A chain step is handled by headcni itself when its type says so or it
/// carries a nested `delegate` block.
pub fn is_self_step(plugin_type: &str, step: &Document) -> bool {
    SELF_STEP_TYPES.contains(&plugin_type) || step.contains("delegate")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DefaultPaths {
        DefaultPaths {
            subnet_file: PathBuf::from("/var/lib/headcni/env.yaml"),
            data_dir: PathBuf::from("/var/lib/cni/headcni"),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_single_delegate() {
        let conf = NetworkConfig::load_with(
            br#"{"name":"pods","cniVersion":"1.0.0","delegate":{"type":"bridge"}}"#,
            &defaults(),
            no_env,
        )
        .unwrap();
        assert!(!conf.is_chain());
        assert_eq!(conf.subnet_file, "/var/lib/headcni/env.yaml");
        assert_eq!(conf.data_dir, "/var/lib/cni/headcni");
    }

    #[test]
    fn test_path_precedence() {
        let bytes = br#"{"name":"pods","subnetFile":"/etc/custom.yaml","dataDir":"/data"}"#;

        let conf = NetworkConfig::load_with(bytes, &defaults(), no_env).unwrap();
        assert_eq!(conf.subnet_file, "/etc/custom.yaml");
        assert_eq!(conf.data_dir, "/data");

        let conf = NetworkConfig::load_with(bytes, &defaults(), |key| match key {
            SUBNET_FILE_ENV => Some("/run/override.yaml".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(conf.subnet_file, "/run/override.yaml");
        assert_eq!(conf.data_dir, "/data");
    }

    #[test]
    fn test_empty_paths_are_fatal() {
        let empty = DefaultPaths {
            subnet_file: PathBuf::new(),
            data_dir: PathBuf::new(),
        };
        let err = NetworkConfig::load_with(br#"{"name":"pods"}"#, &empty, no_env).unwrap_err();
        assert!(matches!(err, Error::MissingPath("subnet file", _)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_delegate_and_plugins_are_exclusive() {
        let err = NetworkConfig::load_with(
            br#"{"name":"pods","delegate":{},"plugins":[{"type":"bridge"}]}"#,
            &defaults(),
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_chain_entries_need_type() {
        let err = NetworkConfig::load_with(
            br#"{"name":"pods","plugins":[{"type":"self"},{"mtu":1400}]}"#,
            &defaults(),
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("plugins[1]"));

        let err = NetworkConfig::load_with(
            br#"{"name":"pods","plugins":[{"type":""}]}"#,
            &defaults(),
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("plugins[0]"));
    }

    #[test]
    fn test_single_self_step_per_chain() {
        let err = NetworkConfig::load_with(
            br#"{"name":"pods","plugins":[{"type":"self"},{"type":"portmap","delegate":{}}]}"#,
            &defaults(),
            no_env,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_malformed_json() {
        let err = NetworkConfig::load_with(b"{not json", &defaults(), no_env).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_delegate_type_must_be_string() {
        let err = NetworkConfig::load_with(
            br#"{"name":"pods","delegate":{"type":7}}"#,
            &defaults(),
            no_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("(string) 'type'"));
    }
}
