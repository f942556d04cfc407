//! CNI protocol handshake
//!
//! Reads the `CNI_*` variables and the network configuration from stdin,
//! dispatches the command and renders either the result or a CNI error
//! object on stdout.

use headcni_core::Error;
use headcni_network::{CURRENT_CNI_VERSION, SUPPORTED_VERSIONS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, error};

use crate::commands;

// Well-known CNI error codes
pub const ERR_INCOMPATIBLE_CNI_VERSION: u32 = 1;
pub const ERR_INVALID_ENVIRONMENT_VARIABLES: u32 = 4;
pub const ERR_IO_FAILURE: u32 = 5;
pub const ERR_DECODING_FAILURE: u32 = 6;
pub const ERR_INVALID_NETWORK_CONFIG: u32 = 7;
pub const ERR_INTERNAL: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for Command {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Command::Add),
            "DEL" => Ok(Command::Del),
            "CHECK" => Ok(Command::Check),
            "VERSION" => Ok(Command::Version),
            "" => Err(PluginError::new(
                ERR_INVALID_ENVIRONMENT_VARIABLES,
                "required env variables [CNI_COMMAND] missing",
            )),
            other => Err(PluginError::new(
                ERR_INVALID_ENVIRONMENT_VARIABLES,
                format!("unknown CNI_COMMAND: {}", other),
            )),
        }
    }
}

/// Everything the runtime hands a plugin invocation
#[derive(Debug, Clone)]
pub struct CmdArgs {
    pub container_id: String,
    pub netns: String,
    pub if_name: String,
    pub args: String,
    pub path: String,
    pub stdin_data: Vec<u8>,
}

impl CmdArgs {
    /// Directories listed in `CNI_PATH`
    pub fn search_path(&self) -> Vec<PathBuf> {
        std::env::split_paths(&self.path).collect()
    }
}

/// Error object printed on stdout when a command fails
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginError {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl PluginError {
    pub fn new(code: u32, msg: impl Into<String>) -> Self {
        Self {
            cni_version: CURRENT_CNI_VERSION.to_string(),
            code,
            msg: msg.into(),
            details: String::new(),
        }
    }

    fn with_version(mut self, cni_version: &str) -> Self {
        if !cni_version.is_empty() {
            self.cni_version = cni_version.to_string();
        }
        self
    }
}

impl From<&Error> for PluginError {
    fn from(err: &Error) -> Self {
        let code = match err.root() {
            Error::ConfigParse(_) | Error::EnvParse { .. } | Error::Serialization(_) => {
                ERR_DECODING_FAILURE
            }
            Error::EnvFileNotFound(_) | Error::EnvFileRead { .. } | Error::Io(_) | Error::State(_) => {
                ERR_IO_FAILURE
            }
            Error::InvalidContainerId(_) => ERR_INVALID_ENVIRONMENT_VARIABLES,
            root if root.is_configuration() || root.is_environment() => ERR_INVALID_NETWORK_CONFIG,
            _ => ERR_INTERNAL,
        };

        let mut plugin_error = PluginError::new(code, err.to_string());
        if let Error::ChainStep { source, .. } = err {
            plugin_error.details = source.root().to_string();
        }
        plugin_error
    }
}

/// Only the version is read before dispatch; the full document is parsed
/// by the command itself.
#[derive(Debug, Default, Deserialize)]
struct VersionProbe {
    #[serde(default, rename = "cniVersion")]
    cni_version: String,
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

/// Gather the invocation from the process environment and stdin
fn read_invocation(command: Command) -> Result<CmdArgs, PluginError> {
    let args = CmdArgs {
        container_id: env_var("CNI_CONTAINERID"),
        netns: env_var("CNI_NETNS"),
        if_name: env_var("CNI_IFNAME"),
        args: env_var("CNI_ARGS"),
        path: env_var("CNI_PATH"),
        stdin_data: Vec::new(),
    };

    let mut missing = Vec::new();
    if args.container_id.is_empty() {
        missing.push("CNI_CONTAINERID");
    }
    if command != Command::Del && args.netns.is_empty() {
        missing.push("CNI_NETNS");
    }
    if args.if_name.is_empty() {
        missing.push("CNI_IFNAME");
    }
    if args.path.is_empty() {
        missing.push("CNI_PATH");
    }
    if !missing.is_empty() {
        return Err(PluginError::new(
            ERR_INVALID_ENVIRONMENT_VARIABLES,
            format!("required env variables [{}] missing", missing.join(",")),
        ));
    }

    let mut stdin_data = Vec::new();
    std::io::stdin()
        .read_to_end(&mut stdin_data)
        .map_err(|e| PluginError::new(ERR_IO_FAILURE, format!("error reading from stdin: {}", e)))?;

    Ok(CmdArgs { stdin_data, ..args })
}

pub fn version_info() -> Value {
    json!({
        "cniVersion": CURRENT_CNI_VERSION,
        "supportedVersions": SUPPORTED_VERSIONS,
    })
}

/// Run one CNI invocation; returns the process exit code
pub async fn run() -> i32 {
    match dispatch().await {
        Ok(None) => 0,
        Ok(Some(output)) => match serde_json::to_string(&output) {
            Ok(rendered) => {
                println!("{}", rendered);
                0
            }
            Err(e) => emit_error(PluginError::new(ERR_INTERNAL, format!("failed to render result: {}", e))),
        },
        Err(e) => emit_error(e),
    }
}

fn emit_error(err: PluginError) -> i32 {
    error!(code = err.code, msg = %err.msg, "headcni command failed");
    match serde_json::to_string(&err) {
        Ok(rendered) => println!("{}", rendered),
        Err(_) => println!("{{\"code\":{},\"msg\":{:?}}}", err.code, err.msg),
    }
    1
}

/// DEL and CHECK print nothing on success
async fn dispatch() -> Result<Option<Value>, PluginError> {
    let command: Command = env_var("CNI_COMMAND").parse()?;
    if command == Command::Version {
        return Ok(Some(version_info()));
    }

    let args = read_invocation(command)?;
    let probe: VersionProbe = serde_json::from_slice(&args.stdin_data).map_err(|e| {
        PluginError::new(ERR_DECODING_FAILURE, format!("failed to decode network configuration: {}", e))
    })?;
    if !probe.cni_version.is_empty() && !SUPPORTED_VERSIONS.contains(&probe.cni_version.as_str()) {
        return Err(PluginError::new(
            ERR_INCOMPATIBLE_CNI_VERSION,
            format!("incompatible CNI versions: config is {:?}", probe.cni_version),
        )
        .with_version(&probe.cni_version));
    }

    debug!(
        command = ?command,
        container_id = %args.container_id,
        netns = %args.netns,
        if_name = %args.if_name,
        cni_args = %args.args,
        "Dispatching CNI command"
    );

    let platform = headcni_network::host_platform();
    let outcome = match command {
        Command::Add => commands::cmd_add(&args, platform).await.map(Some),
        Command::Del => commands::cmd_del(&args, platform).await.map(|()| None),
        Command::Check => commands::cmd_check(&args, platform).await.map(|()| None),
        Command::Version => Ok(Some(version_info())),
    };

    outcome.map_err(|e| PluginError::from(&e).with_version(&probe.cni_version))
}
