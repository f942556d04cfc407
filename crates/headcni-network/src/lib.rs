//! headcni-network: node addressing and host platform rules
//!
//! This crate provides:
//! - The subnet environment written by the headcni daemon
//! - CIDR arithmetic (gateway selection, de-duplication)
//! - CNI result types and version normalization
//! - Platform adapters for Linux and Windows hosts

pub mod addr;
pub mod platform;
pub mod subnet_env;
pub mod types;

pub use addr::{first_usable_address, parse_cidr, parse_networks};
pub use platform::{
    host_platform, platform_for, LinuxAdapter, PlatformAdapter, TargetOs, WindowsAdapter,
};
pub use subnet_env::{EnvMetadata, SubnetEnvironment};
pub use types::{CniResult, Dns, IpConfig, Route, CURRENT_CNI_VERSION, SUPPORTED_VERSIONS};
