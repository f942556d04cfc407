//! CNI result types
//!
//! Delegates may answer in any supported CNI version. Everything headcni
//! hands onward is normalized to the current result shape (`ips`, `routes`,
//! `interfaces`, `dns`), converting the legacy `ip4`/`ip6` layout when
//! needed.

use headcni_core::Result;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// CNI version of normalized results
pub const CURRENT_CNI_VERSION: &str = "1.0.0";

/// Versions answered on `VERSION`
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub dst: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,

    /// mtu, advmss, priority and friends pass through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Route {
    pub fn new(dst: impl Into<String>) -> Self {
        Self {
            dst: dst.into(),
            gw: None,
            extra: Map::new(),
        }
    }

    pub fn with_gateway(mut self, gw: impl Into<String>) -> Self {
        self.gw = Some(gw.into());
        self
    }

    /// Destination in canonical CIDR form when it parses, verbatim otherwise
    pub fn canonical_dst(&self) -> String {
        self.dst
            .parse::<IpNet>()
            .map(|net| net.trunc().to_string())
            .unwrap_or_else(|_| self.dst.clone())
    }

    fn gateway_addr(&self) -> Option<IpAddr> {
        self.gw.as_deref().and_then(|gw| gw.parse().ok())
    }

    /// Same destination and same (or equally absent) gateway
    pub fn same_route(&self, other: &Route) -> bool {
        self.canonical_dst() == other.canonical_dst() && self.gateway_addr() == other.gateway_addr()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpConfig {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
            && self.domain.is_none()
            && self.search.is_empty()
            && self.options.is_empty()
    }
}

/// A CNI result in the current shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    #[serde(default)]
    pub cni_version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

/// `ip4` / `ip6` block of a 0.1.0 / 0.2.0 result
#[derive(Debug, Deserialize)]
struct LegacyIpConfig {
    ip: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct LegacyResult {
    #[serde(default)]
    ip4: Option<LegacyIpConfig>,
    #[serde(default)]
    ip6: Option<LegacyIpConfig>,
    #[serde(default)]
    dns: Option<Dns>,
}

impl CniResult {
    /// Normalize whatever a delegate printed into the current result shape
    pub fn normalize(value: Value) -> Result<Self> {
        let is_legacy = value.get("ip4").is_some() || value.get("ip6").is_some();

        let mut result = if is_legacy {
            let legacy: LegacyResult = serde_json::from_value(value)?;
            let mut result = CniResult {
                dns: legacy.dns,
                ..Default::default()
            };
            for ip in [legacy.ip4, legacy.ip6].into_iter().flatten() {
                result.ips.push(IpConfig {
                    address: ip.ip,
                    gateway: ip.gateway,
                    interface: None,
                    extra: Map::new(),
                });
                result.routes.extend(ip.routes);
            }
            result
        } else {
            let mut result: CniResult = serde_json::from_value(value)?;
            // 0.3.x / 0.4.0 tag every address with its family
            for ip in &mut result.ips {
                ip.extra.remove("version");
            }
            result
        };

        if result.dns.as_ref().is_some_and(Dns::is_empty) {
            result.dns = None;
        }
        result.cni_version = CURRENT_CNI_VERSION.to_string();
        Ok(result)
    }

    pub fn has_route_to(&self, dst: &str) -> bool {
        self.routes.iter().any(|r| r.dst == dst)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_current_result() {
        let raw = json!({
            "cniVersion": "0.4.0",
            "interfaces": [{"name": "cni0", "mac": "aa:bb:cc:dd:ee:ff"}],
            "ips": [{"version": "4", "address": "10.1.2.5/24", "gateway": "10.1.2.1", "interface": 0}],
            "routes": [{"dst": "0.0.0.0/0", "mtu": 1400}]
        });
        let result = CniResult::normalize(raw).unwrap();
        assert_eq!(result.cni_version, CURRENT_CNI_VERSION);
        assert_eq!(result.ips[0].address, "10.1.2.5/24");
        assert!(!result.ips[0].extra.contains_key("version"));
        assert_eq!(result.routes[0].extra["mtu"], json!(1400));
        assert_eq!(result.interfaces.len(), 1);
    }

    #[test]
    fn test_normalize_legacy_result() {
        let raw = json!({
            "cniVersion": "0.2.0",
            "ip4": {"ip": "10.1.2.5/24", "gateway": "10.1.2.1", "routes": [{"dst": "0.0.0.0/0"}]},
            "ip6": {"ip": "fd00::5/64"},
            "dns": {}
        });
        let result = CniResult::normalize(raw).unwrap();
        assert_eq!(result.ips.len(), 2);
        assert_eq!(result.ips[1].address, "fd00::5/64");
        assert!(result.has_route_to("0.0.0.0/0"));
        assert!(result.dns.is_none());
    }

    #[test]
    fn test_same_route_compares_gateway() {
        let a = Route::new("10.0.0.0/8");
        let b = Route::new("10.0.0.1/8");
        assert!(a.same_route(&b));
        assert!(!a.same_route(&Route::new("10.0.0.0/8").with_gateway("10.1.2.1")));
        assert!(Route::new("10.0.0.0/8")
            .with_gateway("10.1.2.1")
            .same_route(&Route::new("10.0.0.0/8").with_gateway("10.1.2.1")));
    }
}
