use crate::manager::{AccessType, SecuredAccessManager};
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{
    labels, owner_references, Endpoint, ObjectMeta, ResourceExt, Route, RoutePort, RouteSpec,
    RouteTargetReference, SecuredAccess, SecuredAccessPort, SecuredAccessUrl, TlsConfig,
    STATUS_OK,
};

/// Exposes each port through an OpenShift edge route with TLS passthrough.
/// One route per port, named `{saName}-{portName}`; the port name doubles as
/// the route's target port and as the correlation key when a route
/// notification has to be mapped back to its owner.
pub(crate) struct RouteAccess;

#[async_trait]
impl AccessType for RouteAccess {
    async fn realise(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        let namespace = sa.namespace().unwrap_or_default();
        let desired: Vec<Route> = sa.spec.ports.iter().map(|p| desired_route(sa, p)).collect();
        let mut failures = Vec::new();
        for route in desired {
            let name = route.name_unchecked();
            if let Err(error) = manager.ensure_route(&namespace, route).await {
                tracing::warn!(%namespace, %name, %error, "error ensuring route");
                failures.push(format!("{name}: {error}"));
            }
        }
        if failures.is_empty() {
            sa.set_status_message(STATUS_OK)
        } else {
            sa.set_status_message(&failures.join(", "))
        }
    }

    async fn resolve(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        let namespace = sa.namespace().unwrap_or_default();
        let name = sa.name_unchecked();
        let mut endpoints = Vec::new();
        let mut urls = Vec::new();
        for port in &sa.spec.ports {
            let key = format!("{namespace}/{}", route_name(&name, &port.name));
            let Some(host) = manager.routes.get(&key).and_then(Route::resolved_host) else {
                continue;
            };
            endpoints.push(Endpoint {
                name: port.name.clone(),
                host: host.to_string(),
                port: "443".to_string(),
            });
            urls.push(SecuredAccessUrl {
                name: port.name.clone(),
                url: format!("{host}:443"),
            });
        }
        if endpoints.is_empty() {
            return false;
        }
        let mut changed = sa.set_endpoints(endpoints);
        changed |= sa.set_urls(urls);
        changed
    }
}

pub(crate) fn route_name(sa_name: &str, port_name: &str) -> String {
    format!("{sa_name}-{port_name}")
}

fn desired_route(sa: &SecuredAccess, port: &SecuredAccessPort) -> Route {
    let name = route_name(&sa.name_unchecked(), &port.name);
    let host = sa
        .spec
        .options
        .get("domain")
        .map(|domain| format!("{name}.{domain}"))
        .unwrap_or_default();
    Route {
        metadata: ObjectMeta {
            name: Some(name),
            owner_references: Some(owner_references(sa)),
            labels: Some(labels::controlled_labels()),
            annotations: Some(labels::controlled_annotations()),
            ..Default::default()
        },
        spec: RouteSpec {
            host,
            port: Some(RoutePort {
                target_port: port.name.clone(),
            }),
            to: Some(RouteTargetReference {
                kind: "Service".to_string(),
                name: sa.name_unchecked(),
            }),
            tls: Some(TlsConfig {
                termination: "passthrough".to_string(),
                insecure_edge_termination_policy: "None".to_string(),
            }),
        },
        status: None,
    }
}

/// Applies the desired route spec onto the observed one, returning true if
/// anything differed. A host assigned by the router is kept unless a host
/// was explicitly desired.
pub(crate) fn update_route(existing: &mut Route, desired: &Route) -> bool {
    let mut changed = false;
    if !desired.spec.host.is_empty() && existing.spec.host != desired.spec.host {
        existing.spec.host = desired.spec.host.clone();
        changed = true;
    }
    if existing.spec.port != desired.spec.port {
        existing.spec.port = desired.spec.port.clone();
        changed = true;
    }
    if existing.spec.to != desired.spec.to {
        existing.spec.to = desired.spec.to.clone();
        changed = true;
    }
    if existing.spec.tls != desired.spec.tls {
        existing.spec.tls = desired.spec.tls.clone();
        changed = true;
    }
    changed
}

/// Recovers the owning SecuredAccess key from a route key by stripping the
/// route's target-port suffix. Returns `None` for names that do not follow
/// the `{saName}-{portName}` scheme.
pub(crate) fn strip_port_suffix(key: &str, port_name: &str) -> Option<String> {
    if port_name.is_empty() {
        return None;
    }
    key.strip_suffix(&format!("-{port_name}"))
        .filter(|prefix| !prefix.is_empty() && !prefix.ends_with('/'))
        .map(Into::into)
}

/// All `(saKey, portName)` pairs a port-qualified key could decompose into.
/// Used when the target port is not known (e.g. a bare deletion key); both
/// halves may themselves contain the separator, so every split is a
/// candidate.
pub(crate) fn possible_key_port_name_pairs(qualified_key: &str) -> Vec<(String, String)> {
    let Some((namespace, name)) = qualified_key.split_once('/') else {
        return Vec::new();
    };
    name.match_indices('-')
        .map(|(i, _)| {
            (
                format!("{namespace}/{}", &name[..i]),
                name[i + 1..].to_string(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_name_round_trip() {
        for (sa_name, port_name) in [
            ("skupper-router", "inter-router"),
            ("1.2.3.4", "8080"),
            ("site", "edge"),
        ] {
            let key = format!("test/{}", route_name(sa_name, port_name));
            assert_eq!(
                strip_port_suffix(&key, port_name).as_deref(),
                Some(format!("test/{sa_name}").as_str())
            );
            assert!(possible_key_port_name_pairs(&key)
                .contains(&(format!("test/{sa_name}"), port_name.to_string())));
        }
    }

    #[test]
    fn strip_port_suffix_rejects_malformed_keys() {
        assert_eq!(strip_port_suffix("test", "8080"), None);
        assert_eq!(strip_port_suffix("test/8080", "8080"), None);
        assert_eq!(strip_port_suffix("test/svc-9090", "8080"), None);
        assert_eq!(strip_port_suffix("test/svc-8080", ""), None);
    }

    #[test]
    fn key_pairs_cover_every_split() {
        assert_eq!(
            possible_key_port_name_pairs("ns/a-b-c"),
            vec![
                ("ns/a".to_string(), "b-c".to_string()),
                ("ns/a-b".to_string(), "c".to_string()),
            ]
        );
        assert!(possible_key_port_name_pairs("no-namespace").is_empty());
        assert!(possible_key_port_name_pairs("ns/nodash").is_empty());
    }
}
