use crate::manager::{AccessType, SecuredAccessManager};
use anyhow::Result;
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{
    labels, owner_references, Endpoint, HTTPIngressPath, HTTPIngressRuleValue, Ingress,
    IngressBackend, IngressRule, IngressServiceBackend, IngressSpec, ObjectMeta, ResourceExt,
    SecuredAccess, ServiceBackendPort, STATUS_OK,
};

/// Exposes all ports through a single ingress, one rule per port with host
/// `{portName}.{domain}`. When no domain is configured one is inferred from
/// the ingress controller's load-balancer address once that is assigned;
/// until then no endpoints are reported.
pub(crate) struct IngressAccess {
    pub(crate) nginx: bool,
    pub(crate) domain: String,
}

#[async_trait]
impl AccessType for IngressAccess {
    async fn realise(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        let namespace = sa.namespace().unwrap_or_default();
        let mut desired = to_ingress(&self.domain, sa);
        if self.nginx {
            desired.spec.get_or_insert_with(Default::default).ingress_class_name =
                Some("nginx".to_string());
            if let Some(annotations) = desired.metadata.annotations.as_mut() {
                annotations.insert(
                    "nginx.ingress.kubernetes.io/ssl-passthrough".to_string(),
                    "true".to_string(),
                );
                annotations.insert(
                    "nginx.ingress.kubernetes.io/ssl-redirect".to_string(),
                    "true".to_string(),
                );
            }
        }
        match self.ensure_ingress(manager, &namespace, desired).await {
            Ok(()) => sa.set_status_message(STATUS_OK),
            Err(error) => {
                tracing::warn!(%namespace, %error, "error ensuring ingress");
                sa.set_status_message(&error.to_string())
            }
        }
    }

    async fn resolve(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        let Some(ingress) = manager.ingresses.get(&sa.key()) else {
            return false;
        };
        let domain = if self.domain.is_empty() {
            deduce_domain(ingress)
        } else {
            self.domain.clone()
        };
        if domain.is_empty() {
            // Not ready: no address assigned yet from which to infer hosts.
            return false;
        }
        let endpoints: Vec<Endpoint> = ingress
            .spec
            .iter()
            .flat_map(|spec| spec.rules.iter().flatten())
            .filter_map(|rule| rule.host.clone())
            .filter(|host| !host.is_empty())
            .map(|host| Endpoint {
                name: prefix(&host).to_string(),
                host,
                port: "443".to_string(),
            })
            .collect();
        if endpoints.is_empty() {
            return false;
        }
        sa.set_endpoints(endpoints)
    }
}

impl IngressAccess {
    async fn ensure_ingress(
        &self,
        manager: &mut SecuredAccessManager,
        namespace: &str,
        mut desired: Ingress,
    ) -> Result<()> {
        let key = format!("{namespace}/{}", desired.name_unchecked());
        let Some(existing) = manager.ingresses.get(&key) else {
            let created = manager.clients.create_ingress(namespace, &desired).await?;
            manager.ingresses.insert(key, created);
            return Ok(());
        };
        if self.domain.is_empty() {
            let domain = deduce_domain(existing);
            if domain.is_empty() {
                tracing::info!(%key, "no domain can be inferred for ingress yet");
            } else if qualify_hosts(&domain, &mut desired) {
                tracing::info!(%key, %domain, "qualified ingress hosts with inferred domain");
            }
        }
        if existing.spec == desired.spec {
            return Ok(());
        }
        let mut updated = existing.clone();
        updated.spec = desired.spec;
        let stored = manager.clients.update_ingress(namespace, &updated).await?;
        manager.ingresses.insert(key, stored);
        Ok(())
    }
}

fn to_ingress(domain: &str, sa: &SecuredAccess) -> Ingress {
    let rules = sa
        .spec
        .ports
        .iter()
        .map(|port| IngressRule {
            host: Some(qualify(&port.name, domain)),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: sa.name_unchecked(),
                            port: Some(ServiceBackendPort {
                                number: Some(port.port),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        })
        .collect();
    Ingress {
        metadata: ObjectMeta {
            name: Some(sa.name_unchecked()),
            owner_references: Some(owner_references(sa)),
            labels: Some(labels::controlled_labels()),
            annotations: Some(labels::controlled_annotations()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(rules),
            ..Default::default()
        }),
        status: None,
    }
}

/// Infers a routing domain from the ingress's assigned load-balancer
/// address: the hostname when there is one, else `{ip}.nip.io`. Empty means
/// nothing has been assigned yet.
fn deduce_domain(ingress: &Ingress) -> String {
    let Some(address) = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|addresses| addresses.first())
    else {
        return String::new();
    };
    if let Some(hostname) = address.hostname.as_deref().filter(|h| !h.is_empty()) {
        hostname.to_string()
    } else if let Some(ip) = address.ip.as_deref().filter(|ip| !ip.is_empty()) {
        format!("{ip}.nip.io")
    } else {
        String::new()
    }
}

fn qualify_hosts(domain: &str, ingress: &mut Ingress) -> bool {
    let mut changed = false;
    for rule in ingress
        .spec
        .iter_mut()
        .flat_map(|spec| spec.rules.iter_mut().flatten())
    {
        if let Some(host) = rule.host.as_mut() {
            if !host.ends_with(domain) {
                *host = qualify(host, domain);
                changed = true;
            }
        }
    }
    changed
}

fn prefix(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

fn qualify(hostname: &str, domain: &str) -> String {
    if domain.is_empty() {
        hostname.to_string()
    } else {
        format!("{hostname}.{domain}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skupper_access_controller_k8s_api::{
        LoadBalancerIngress, LoadBalancerStatus, SecuredAccessPort, SecuredAccessSpec,
    };
    use k8s_openapi::api::networking::v1::IngressStatus;

    fn secured_access(name: &str, ports: &[(&str, i32)]) -> SecuredAccess {
        let mut sa = SecuredAccess::new(
            name,
            SecuredAccessSpec {
                access_type: "ingress-nginx".to_string(),
                ports: ports
                    .iter()
                    .map(|(name, port)| SecuredAccessPort {
                        name: name.to_string(),
                        port: *port,
                        target_port: *port,
                        protocol: "TCP".to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
        );
        sa.metadata.namespace = Some("test".to_string());
        sa
    }

    fn with_load_balancer_ip(mut ingress: Ingress, ip: &str) -> Ingress {
        ingress.status = Some(IngressStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
        });
        ingress
    }

    #[test]
    fn builds_one_rule_per_port() {
        let sa = secured_access("combined", &[("a", 8080), ("b", 9090)]);
        let ingress = to_ingress("apps.example.com", &sa);
        let hosts: Vec<_> = ingress
            .spec
            .iter()
            .flat_map(|spec| spec.rules.iter().flatten())
            .filter_map(|rule| rule.host.clone())
            .collect();
        assert_eq!(hosts, vec!["a.apps.example.com", "b.apps.example.com"]);
    }

    #[test]
    fn hosts_unqualified_without_domain() {
        let sa = secured_access("combined", &[("a", 8080)]);
        let ingress = to_ingress("", &sa);
        let rule_host = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.rules.as_ref())
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.host.clone());
        assert_eq!(rule_host.as_deref(), Some("a"));
    }

    #[test]
    fn deduces_domain_from_load_balancer() {
        let sa = secured_access("combined", &[("a", 8080)]);
        let ingress = to_ingress("", &sa);
        assert_eq!(deduce_domain(&ingress), "");
        let ingress = with_load_balancer_ip(ingress, "10.1.1.1");
        assert_eq!(deduce_domain(&ingress), "10.1.1.1.nip.io");
    }

    #[test]
    fn qualifying_hosts_is_idempotent() {
        let sa = secured_access("combined", &[("a", 8080), ("b", 9090)]);
        let mut ingress = to_ingress("", &sa);
        assert!(qualify_hosts("10.1.1.1.nip.io", &mut ingress));
        assert!(!qualify_hosts("10.1.1.1.nip.io", &mut ingress));
        let hosts: Vec<_> = ingress
            .spec
            .iter()
            .flat_map(|spec| spec.rules.iter().flatten())
            .filter_map(|rule| rule.host.clone())
            .collect();
        assert_eq!(hosts, vec!["a.10.1.1.1.nip.io", "b.10.1.1.1.nip.io"]);
    }
}
