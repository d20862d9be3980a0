use crate::manager::{AccessType, SecuredAccessManager};
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{Endpoint, SecuredAccess};

/// Node-port access: endpoints combine the configured cluster host with the
/// node port the API server assigned to each service port.
pub(crate) struct NodeportAccess {
    pub(crate) cluster_host: String,
}

#[async_trait]
impl AccessType for NodeportAccess {
    async fn realise(&self, _manager: &mut SecuredAccessManager, _sa: &mut SecuredAccess) -> bool {
        false
    }

    async fn resolve(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        if self.cluster_host.is_empty() {
            return false;
        }
        let Some(service) = manager.services.get(&sa.key()) else {
            return false;
        };
        let endpoints: Vec<Endpoint> = service
            .spec
            .iter()
            .flat_map(|spec| spec.ports.iter().flatten())
            .filter_map(|port| {
                port.node_port.map(|node_port| Endpoint {
                    name: port.name.clone().unwrap_or_default(),
                    host: self.cluster_host.clone(),
                    port: node_port.to_string(),
                })
            })
            .collect();
        if endpoints.is_empty() {
            return false;
        }
        sa.set_endpoints(endpoints)
    }
}
