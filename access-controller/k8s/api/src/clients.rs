use crate::{Route, SecuredAccess};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::{core::v1::Service, networking::v1::Ingress};
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    ResourceExt,
};

/// Typed access to the cluster resources the controller writes. The
/// manager only ever goes through this trait, so tests can substitute an
/// in-memory implementation and observe every write.
///
/// Updates are plain replacements carrying the cached resource version;
/// a concurrent modification surfaces as an error and is retried on the
/// next notification rather than here.
#[async_trait]
pub trait Clients: Send + Sync {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route>;
    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route>;
    async fn delete_route(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress>;
    async fn update_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_tls_route(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_secured_access(&self, namespace: &str, name: &str) -> Result<SecuredAccess>;
    async fn create_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess>;
    async fn update_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess>;
    async fn delete_secured_access(&self, namespace: &str, name: &str) -> Result<()>;
    async fn update_secured_access_status(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess>;
}

/// [`Clients`] backed by a real cluster connection.
#[derive(Clone)]
pub struct KubeClients {
    client: kube::Client,
    http_proxy: Option<ApiResource>,
    tls_route: Option<ApiResource>,
}

impl KubeClients {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            http_proxy: None,
            tls_route: None,
        }
    }

    /// Enables HTTPProxy deletion; only called when the Contour API was
    /// discovered on the cluster.
    pub fn with_http_proxy(mut self) -> Self {
        self.http_proxy = Some(Self::http_proxy_resource());
        self
    }

    /// Enables TLSRoute deletion; only called when the Gateway API was
    /// discovered on the cluster.
    pub fn with_tls_route(mut self) -> Self {
        self.tls_route = Some(Self::tls_route_resource());
        self
    }

    pub fn http_proxy_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("projectcontour.io", "v1", "HTTPProxy"))
    }

    pub fn tls_route_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "gateway.networking.k8s.io",
            "v1alpha2",
            "TLSRoute",
        ))
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn routes(&self, namespace: &str) -> Api<Route> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secured_accesses(&self, namespace: &str) -> Api<SecuredAccess> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl Clients for KubeClients {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        Ok(self
            .services(namespace)
            .create(&PostParams::default(), service)
            .await?)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        Ok(self
            .services(namespace)
            .replace(&service.name_unchecked(), &PostParams::default(), service)
            .await?)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route> {
        Ok(self
            .routes(namespace)
            .create(&PostParams::default(), route)
            .await?)
    }

    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route> {
        Ok(self
            .routes(namespace)
            .replace(&route.name_unchecked(), &PostParams::default(), route)
            .await?)
    }

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<()> {
        self.routes(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        Ok(self
            .ingresses(namespace)
            .create(&PostParams::default(), ingress)
            .await?)
    }

    async fn update_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        Ok(self
            .ingresses(namespace)
            .replace(&ingress.name_unchecked(), &PostParams::default(), ingress)
            .await?)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<()> {
        self.ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<()> {
        let resource = self
            .http_proxy
            .as_ref()
            .ok_or_else(|| anyhow!("HTTPProxy API is not available on this cluster"))?;
        self.dynamic(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_tls_route(&self, namespace: &str, name: &str) -> Result<()> {
        let resource = self
            .tls_route
            .as_ref()
            .ok_or_else(|| anyhow!("TLSRoute API is not available on this cluster"))?;
        self.dynamic(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_secured_access(&self, namespace: &str, name: &str) -> Result<SecuredAccess> {
        Ok(self.secured_accesses(namespace).get(name).await?)
    }

    async fn create_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        Ok(self
            .secured_accesses(namespace)
            .create(&PostParams::default(), sa)
            .await?)
    }

    async fn update_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        Ok(self
            .secured_accesses(namespace)
            .replace(&sa.name_unchecked(), &PostParams::default(), sa)
            .await?)
    }

    async fn delete_secured_access(&self, namespace: &str, name: &str) -> Result<()> {
        self.secured_accesses(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn update_secured_access_status(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        let data = serde_json::to_vec(sa)?;
        Ok(self
            .secured_accesses(namespace)
            .replace_status(&sa.name_unchecked(), &PostParams::default(), data)
            .await?)
    }
}

/// True when the create failed only because the object already exists, e.g.
/// on controller restart racing its own earlier write.
pub fn is_already_exists(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(response)) if response.reason == "AlreadyExists"
    )
}
