use crate::config::{ACCESS_TYPE_LOADBALANCER, ACCESS_TYPE_NODEPORT};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use skupper_access_controller_k8s_api::{SecuredAccessPort, ServicePort, ServiceSpec};
use std::collections::BTreeMap;

/// Diffs the service selector against the desired one, applying the desired
/// value and returning true if it differed.
pub(crate) fn update_selector(spec: &mut ServiceSpec, desired: &BTreeMap<String, String>) -> bool {
    if spec.selector.as_ref() == Some(desired) {
        return false;
    }
    spec.selector = Some(desired.clone());
    true
}

/// Diffs the service type against the one derived from the access type.
pub(crate) fn update_type(spec: &mut ServiceSpec, access_type: &str) -> bool {
    let desired = service_type(access_type);
    if normalized_type(spec.type_.as_deref()) == normalized_type(desired) {
        return false;
    }
    spec.type_ = Some(normalized_type(desired).to_string());
    true
}

/// Merges the desired ports into the observed service ports. Ports are
/// correlated by name, not position: observed entries keep their slot when
/// the named port is still desired (preserving any assigned node port),
/// entries whose name is no longer desired are dropped, and newly desired
/// names are appended.
pub(crate) fn update_ports(spec: &mut ServiceSpec, desired: &[SecuredAccessPort]) -> bool {
    let mut changed = false;
    let mut matched = Vec::new();
    let mut ports = Vec::new();
    for actual in spec.ports.take().unwrap_or_default() {
        let name = actual.name.clone().unwrap_or_default();
        match desired.iter().find(|p| p.name == name) {
            Some(port) => {
                let mut expected = to_service_port(port);
                if equivalent_ports(&expected, &actual) {
                    ports.push(actual);
                } else {
                    expected.node_port = actual.node_port;
                    ports.push(expected);
                    changed = true;
                }
                matched.push(name);
            }
            None => {
                changed = true;
            }
        }
    }
    for port in desired {
        if !matched.contains(&port.name) {
            ports.push(to_service_port(port));
            changed = true;
        }
    }
    spec.ports = Some(ports);
    changed
}

pub(crate) fn to_service_port(port: &SecuredAccessPort) -> ServicePort {
    ServicePort {
        name: Some(port.name.clone()),
        port: port.port,
        target_port: Some(IntOrString::Int(port.target_port)),
        protocol: Some(port.protocol.clone()).filter(|p| !p.is_empty()),
        ..Default::default()
    }
}

pub(crate) fn service_type(access_type: &str) -> Option<&'static str> {
    match access_type {
        ACCESS_TYPE_LOADBALANCER => Some("LoadBalancer"),
        ACCESS_TYPE_NODEPORT => Some("NodePort"),
        _ => None,
    }
}

fn normalized_type(type_: Option<&str>) -> &str {
    match type_ {
        None | Some("") => "ClusterIP",
        Some(t) => t,
    }
}

fn equivalent_ports(desired: &ServicePort, actual: &ServicePort) -> bool {
    desired.name == actual.name
        && desired.port == actual.port
        && equivalent_target_ports(desired, actual)
        && equivalent_protocols(desired.protocol.as_deref(), actual.protocol.as_deref())
}

// An unset target port defaults to the port itself.
fn equivalent_target_ports(desired: &ServicePort, actual: &ServicePort) -> bool {
    match (&desired.target_port, &actual.target_port) {
        (desired_target, actual_target) if desired_target == actual_target => true,
        (Some(IntOrString::Int(0)) | None, Some(IntOrString::Int(actual_target))) => {
            *actual_target == desired.port
        }
        (Some(IntOrString::Int(0)), None) => true,
        _ => false,
    }
}

fn equivalent_protocols(desired: Option<&str>, actual: Option<&str>) -> bool {
    normalized_protocol(desired) == normalized_protocol(actual)
}

fn normalized_protocol(protocol: Option<&str>) -> &str {
    match protocol {
        None | Some("") => "TCP",
        Some(p) => p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, port: i32, target_port: i32) -> SecuredAccessPort {
        SecuredAccessPort {
            name: name.to_string(),
            port,
            target_port,
            protocol: "TCP".to_string(),
        }
    }

    fn names(spec: &ServiceSpec) -> Vec<String> {
        spec.ports
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| p.name.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn update_ports_creates_all_ports_when_none_observed() {
        let mut spec = ServiceSpec::default();
        let desired = vec![port("a", 8080, 8081), port("b", 9090, 9091)];

        assert!(update_ports(&mut spec, &desired));
        assert_eq!(names(&spec), vec!["a", "b"]);

        // A second pass over the merged result is a no-op.
        assert!(!update_ports(&mut spec, &desired));
    }

    #[test]
    fn update_ports_is_order_insensitive() {
        let mut spec = ServiceSpec::default();
        assert!(update_ports(
            &mut spec,
            &[port("a", 8080, 8081), port("b", 9090, 9091)]
        ));
        assert!(!update_ports(
            &mut spec,
            &[port("b", 9090, 9091), port("a", 8080, 8081)]
        ));
    }

    #[test]
    fn update_ports_replaces_changed_and_drops_undesired() {
        let mut spec = ServiceSpec::default();
        assert!(update_ports(
            &mut spec,
            &[port("a", 8080, 8081), port("b", 9090, 9091)]
        ));

        let desired = vec![port("a", 8080, 8082), port("c", 7070, 7071)];
        assert!(update_ports(&mut spec, &desired));
        assert_eq!(names(&spec), vec!["a", "c"]);
        assert_eq!(
            spec.ports.as_deref().unwrap_or_default()[0].target_port,
            Some(IntOrString::Int(8082))
        );
    }

    #[test]
    fn update_ports_preserves_assigned_node_port() {
        let mut spec = ServiceSpec::default();
        assert!(update_ports(&mut spec, &[port("a", 8080, 8081)]));
        if let Some(ports) = spec.ports.as_mut() {
            ports[0].node_port = Some(32001);
        }

        assert!(update_ports(&mut spec, &[port("a", 8080, 8082)]));
        assert_eq!(
            spec.ports.as_deref().unwrap_or_default()[0].node_port,
            Some(32001)
        );
    }

    #[test]
    fn update_type_tracks_access_type() {
        let mut spec = ServiceSpec::default();
        assert!(!update_type(&mut spec, "local"));
        assert!(update_type(&mut spec, ACCESS_TYPE_LOADBALANCER));
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert!(update_type(&mut spec, "local"));
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(update_type(&mut spec, ACCESS_TYPE_NODEPORT));
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    }

    #[test]
    fn update_selector_compares_structurally() {
        let mut spec = ServiceSpec::default();
        let mut desired = BTreeMap::new();
        desired.insert("app".to_string(), "router".to_string());
        assert!(update_selector(&mut spec, &desired));
        assert!(!update_selector(&mut spec, &desired));
        desired.insert("component".to_string(), "site".to_string());
        assert!(update_selector(&mut spec, &desired));
    }
}
