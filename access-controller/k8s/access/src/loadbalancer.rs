use crate::manager::{AccessType, SecuredAccessManager};
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{Endpoint, SecuredAccess};

/// The derived service already carries the LoadBalancer type, so there is
/// nothing to realise; endpoints appear once the cloud provider assigns an
/// address to the service.
pub(crate) struct LoadbalancerAccess;

#[async_trait]
impl AccessType for LoadbalancerAccess {
    async fn realise(&self, _manager: &mut SecuredAccessManager, _sa: &mut SecuredAccess) -> bool {
        false
    }

    async fn resolve(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        let Some(service) = manager.services.get(&sa.key()) else {
            return false;
        };
        let addresses = service
            .status
            .iter()
            .filter_map(|status| status.load_balancer.as_ref())
            .flat_map(|lb| lb.ingress.iter().flatten());
        let mut endpoints = Vec::new();
        for address in addresses {
            // Entries with neither a hostname nor an IP are not yet usable.
            let host = match (address.hostname.as_deref(), address.ip.as_deref()) {
                (Some(hostname), _) if !hostname.is_empty() => hostname,
                (_, Some(ip)) if !ip.is_empty() => ip,
                _ => continue,
            };
            for port in service.spec.iter().flat_map(|spec| spec.ports.iter().flatten()) {
                endpoints.push(Endpoint {
                    name: port.name.clone().unwrap_or_default(),
                    host: host.to_string(),
                    port: port.port.to_string(),
                });
            }
        }
        if endpoints.is_empty() {
            return false;
        }
        sa.set_endpoints(endpoints)
    }
}
