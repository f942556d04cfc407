//! Subnet environment loader
//!
//! The headcni daemon writes the node's addressing plan to a YAML file
//! (`/var/lib/headcni/env.yaml` by default):
//!
//! ```yaml
//! network: 10.244.0.0/16,10.245.0.0/16
//! subnet: 10.244.3.0/24
//! ipv6_network: fd00:10:244::/56
//! ipv6_subnet: fd00:10:244:3::/64
//! mtu: 1450
//! ipmasq: true
//! routes:
//!   - dst: 172.16.0.0/12
//!     gw: 10.244.3.1
//! dns:
//!   nameservers: [10.96.0.10]
//! ```
//!
//! `mtu` and `ipmasq` are accepted both natively and as strings, since the
//! generator is not guaranteed to emit one encoding.

use headcni_core::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

use crate::addr::{parse_cidr, parse_networks};
use crate::types::{Dns, Route};

/// Informational block written by the daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvMetadata {
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub cluster_cidr: Option<String>,
    #[serde(default)]
    pub service_cidr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    dst: String,
    #[serde(default)]
    gw: Option<String>,
}

/// On-disk layout, before validation
#[derive(Debug, Default, Deserialize)]
struct SubnetDocument {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    subnet: Option<String>,
    #[serde(default)]
    ipv6_network: Option<String>,
    #[serde(default)]
    ipv6_subnet: Option<String>,
    #[serde(default)]
    mtu: Option<YamlValue>,
    #[serde(default)]
    ipmasq: Option<YamlValue>,
    #[serde(default)]
    metadata: Option<EnvMetadata>,
    #[serde(default)]
    routes: Vec<RouteEntry>,
    #[serde(default)]
    dns: Option<Dns>,
    /// Consumed by the daemon, not by the plugin
    #[serde(default)]
    #[allow(dead_code)]
    policies: Option<YamlValue>,
}

/// Validated addressing plan for this node
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetEnvironment {
    pub ipv4_networks: Vec<IpNet>,
    pub ipv4_subnet: Option<IpNet>,
    pub ipv6_networks: Vec<IpNet>,
    pub ipv6_subnet: Option<IpNet>,
    pub mtu: u32,
    pub ipmasq: bool,
    pub routes: Vec<Route>,
    pub dns: Option<Dns>,
    pub metadata: Option<EnvMetadata>,
}

impl SubnetEnvironment {
    /// Read and validate the subnet environment file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::EnvFileNotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(Error::EnvFileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let env = Self::parse(&contents, path)?;
        debug!(
            path = %path.display(),
            networks = env.ipv4_networks.len() + env.ipv6_networks.len(),
            mtu = env.mtu,
            ipmasq = env.ipmasq,
            node = ?env.metadata.as_ref().and_then(|m| m.node_name.as_deref()),
            "Loaded subnet environment"
        );
        Ok(env)
    }

    /// Parse a subnet environment document; `path` is only used in errors
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let doc: SubnetDocument = if contents.trim().is_empty() {
            SubnetDocument::default()
        } else {
            serde_yaml::from_str(contents).map_err(|source| Error::EnvParse {
                path: path.to_path_buf(),
                source,
            })?
        };

        let ipv4_networks = match non_empty(&doc.network) {
            Some(v) => parse_networks("network", v)?,
            None => Vec::new(),
        };
        let ipv4_subnet = non_empty(&doc.subnet)
            .map(|v| parse_cidr("subnet", v))
            .transpose()?;
        let ipv6_networks = match non_empty(&doc.ipv6_network) {
            Some(v) => parse_networks("ipv6_network", v)?,
            None => Vec::new(),
        };
        let ipv6_subnet = non_empty(&doc.ipv6_subnet)
            .map(|v| parse_cidr("ipv6_subnet", v))
            .transpose()?;

        let mtu = doc.mtu.as_ref().map(parse_mtu).transpose()?;
        let ipmasq = doc.ipmasq.as_ref().map(parse_ipmasq).transpose()?;

        let routes = doc
            .routes
            .iter()
            .map(parse_route)
            .collect::<Result<Vec<_>>>()?;

        let mut missing = Vec::new();
        if ipv4_networks.is_empty() && ipv6_networks.is_empty() {
            missing.push("network/ipv6_network".to_string());
        }
        if ipv4_subnet.is_none() && ipv6_subnet.is_none() {
            missing.push("subnet/ipv6_subnet".to_string());
        }
        if mtu.is_none() {
            missing.push("mtu".to_string());
        }
        if ipmasq.is_none() {
            missing.push("ipmasq".to_string());
        }

        match (mtu, ipmasq) {
            (Some(mtu), Some(ipmasq)) if missing.is_empty() => Ok(Self {
                ipv4_networks,
                ipv4_subnet,
                ipv6_networks,
                ipv6_subnet,
                mtu,
                ipmasq,
                routes,
                dns: doc.dns.filter(|d| !d.is_empty()),
                metadata: doc.metadata,
            }),
            _ => Err(Error::MissingFields {
                path: path.to_path_buf(),
                fields: missing,
            }),
        }
    }

    /// All cluster networks, IPv4 first
    pub fn networks(&self) -> impl Iterator<Item = &IpNet> {
        self.ipv4_networks.iter().chain(self.ipv6_networks.iter())
    }

    /// The node's pod subnets, IPv4 first
    pub fn subnets(&self) -> impl Iterator<Item = &IpNet> {
        self.ipv4_subnet.iter().chain(self.ipv6_subnet.iter())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn describe(value: &YamlValue) -> String {
    match value {
        YamlValue::String(s) => s.clone(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Bool(b) => b.to_string(),
        other => format!("{:?}", other),
    }
}

fn parse_mtu(value: &YamlValue) -> Result<u32> {
    let mtu = match value {
        YamlValue::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        YamlValue::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    mtu.filter(|m| *m > 0)
        .ok_or_else(|| Error::InvalidMtu(describe(value)))
}

fn parse_ipmasq(value: &YamlValue) -> Result<bool> {
    match value {
        YamlValue::Bool(b) => Ok(*b),
        YamlValue::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        YamlValue::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(Error::InvalidIpMasq(describe(other))),
    }
}

fn parse_route(entry: &RouteEntry) -> Result<Route> {
    let dst = parse_cidr("route destination", &entry.dst)?;
    let mut route = Route::new(dst.to_string());
    if let Some(gw) = entry.gw.as_deref().map(str::trim).filter(|gw| !gw.is_empty()) {
        let gw: IpAddr = gw
            .parse()
            .map_err(|_| Error::InvalidGateway(gw.to_string()))?;
        route = route.with_gateway(gw.to_string());
    }
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(yaml: &str) -> Result<SubnetEnvironment> {
        SubnetEnvironment::parse(yaml, Path::new("/run/headcni/env.yaml"))
    }

    #[test]
    fn test_parse_full_document() {
        let env = parse(
            r#"
network: 10.244.0.0/16,10.245.0.0/16,10.244.0.0/16
subnet: 10.244.3.0/24
ipv6_network: fd00:10:244::/56
ipv6_subnet: fd00:10:244:3::/64
mtu: 1450
ipmasq: true
metadata:
  node_name: worker-1
routes:
  - dst: 172.16.0.0/12
    gw: 10.244.3.1
dns:
  nameservers: [10.96.0.10]
  search: [cluster.local]
policies:
  egress: deny
"#,
        )
        .unwrap();
        assert_eq!(env.ipv4_networks.len(), 2);
        assert_eq!(env.ipv4_subnet.unwrap().to_string(), "10.244.3.0/24");
        assert_eq!(env.ipv6_subnet.unwrap().to_string(), "fd00:10:244:3::/64");
        assert_eq!(env.mtu, 1450);
        assert!(env.ipmasq);
        assert_eq!(env.routes[0].gw.as_deref(), Some("10.244.3.1"));
        assert_eq!(env.dns.as_ref().unwrap().nameservers, vec!["10.96.0.10"]);
        assert_eq!(
            env.metadata.as_ref().unwrap().node_name.as_deref(),
            Some("worker-1")
        );
        assert_eq!(env.networks().count(), 3);
    }

    #[test]
    fn test_string_encoded_mtu_and_ipmasq() {
        let env = parse(
            r#"
network: 10.1.0.0/16
subnet: 10.1.2.0/24
mtu: "1400"
ipmasq: "true"
"#,
        )
        .unwrap();
        assert_eq!(env.mtu, 1400);
        assert!(env.ipmasq);

        let env = parse("network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: 1400\nipmasq: \"False\"\n").unwrap();
        assert!(!env.ipmasq);
    }

    #[test]
    fn test_missing_subnets_aggregated() {
        let err = parse("network: 10.1.0.0/16\n").unwrap_err();
        match err {
            Error::MissingFields { fields, .. } => {
                assert_eq!(fields, vec!["subnet/ipv6_subnet", "mtu", "ipmasq"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_document_reports_everything() {
        let err = parse("").unwrap_err();
        assert_eq!(
            err.to_string(),
            "/run/headcni/env.yaml is missing network/ipv6_network, subnet/ipv6_subnet, mtu, ipmasq"
        );
    }

    #[test]
    fn test_ipv6_only() {
        let env = parse("ipv6_network: fd00::/48\nipv6_subnet: fd00:0:0:1::/64\nmtu: 1500\nipmasq: false\n").unwrap();
        assert!(env.ipv4_subnet.is_none());
        assert_eq!(env.subnets().count(), 1);
    }

    #[test]
    fn test_distinct_errors() {
        let bad_cidr = parse("network: 10.1.0.0/33\nsubnet: 10.1.2.0/24\nmtu: 1450\nipmasq: true\n").unwrap_err();
        assert!(matches!(bad_cidr, Error::InvalidCidr { ref field, .. } if field == "network"));

        let bad_mtu = parse("network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: \"jumbo\"\nipmasq: true\n").unwrap_err();
        assert!(matches!(bad_mtu, Error::InvalidMtu(ref v) if v == "jumbo"));

        let bad_masq = parse("network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: 1450\nipmasq: \"yes\"\n").unwrap_err();
        assert!(matches!(bad_masq, Error::InvalidIpMasq(_)));

        let bad_gw = parse("network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: 1450\nipmasq: true\nroutes:\n  - dst: 10.0.0.0/8\n    gw: nope\n").unwrap_err();
        assert!(matches!(bad_gw, Error::InvalidGateway(_)));

        let bad_yaml = parse("network: [unclosed\n").unwrap_err();
        assert!(matches!(bad_yaml, Error::EnvParse { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network: 10.1.0.0/16\nsubnet: 10.1.2.0/24\nmtu: 1450\nipmasq: true").unwrap();
        let env = SubnetEnvironment::load(file.path()).await.unwrap();
        assert_eq!(env.mtu, 1450);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = SubnetEnvironment::load(dir.path().join("env.yaml")).await.unwrap_err();
        assert!(matches!(err, Error::EnvFileNotFound(_)));
    }
}
