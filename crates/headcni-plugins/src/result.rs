//! Result enhancement

use headcni_core::Result;
use headcni_network::{CniResult, Route, SubnetEnvironment};
use serde_json::Value;

/// Add a route for every cluster network the result does not already
/// route. Returns the number of routes added; applying it again adds none.
pub fn enhance_result(result: &mut CniResult, env: &SubnetEnvironment) -> usize {
    let mut added = 0;
    for network in env.networks() {
        let dst = network.to_string();
        if !result.has_route_to(&dst) {
            result.routes.push(Route::new(dst));
            added += 1;
        }
    }
    added
}

/// Normalize a raw delegate result and add the node's network routes
pub fn normalize_and_enhance(raw: Value, env: &SubnetEnvironment) -> Result<CniResult> {
    let mut result = CniResult::normalize(raw)?;
    enhance_result(&mut result, env);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn env() -> SubnetEnvironment {
        SubnetEnvironment::parse(
            "network: 10.1.0.0/16,10.2.0.0/16\nsubnet: 10.1.2.0/24\nipv6_network: fd00::/48\nmtu: 1450\nipmasq: true\n",
            Path::new("env.yaml"),
        )
        .unwrap()
    }

    #[test]
    fn test_adds_missing_routes_only() {
        let raw = json!({
            "cniVersion": "1.0.0",
            "ips": [{"address": "10.1.2.5/24", "gateway": "10.1.2.1"}],
            "routes": [{"dst": "10.2.0.0/16", "gw": "10.1.2.1"}]
        });
        let result = normalize_and_enhance(raw, &env()).unwrap();
        let dsts: Vec<&str> = result.routes.iter().map(|r| r.dst.as_str()).collect();
        assert_eq!(dsts, vec!["10.2.0.0/16", "10.1.0.0/16", "fd00::/48"]);
        // existing route keeps its gateway
        assert_eq!(result.routes[0].gw.as_deref(), Some("10.1.2.1"));
    }

    #[test]
    fn test_enhancement_is_idempotent() {
        let env = env();
        let mut result = CniResult::normalize(json!({"cniVersion": "0.4.0"})).unwrap();
        assert_eq!(enhance_result(&mut result, &env), 3);
        assert_eq!(enhance_result(&mut result, &env), 0);
        assert_eq!(result.routes.len(), 3);
    }
}
