use crate::{
    certificates::CertificateManager,
    config::{
        Config, ACCESS_TYPE_CONTOUR_HTTP_PROXY, ACCESS_TYPE_GATEWAY, ACCESS_TYPE_INGRESS,
        ACCESS_TYPE_INGRESS_NGINX, ACCESS_TYPE_LOADBALANCER, ACCESS_TYPE_LOCAL,
        ACCESS_TYPE_NODEPORT, ACCESS_TYPE_ROUTE,
    },
    ingress::IngressAccess,
    loadbalancer::LoadbalancerAccess,
    local::LocalAccess,
    nodeport::NodeportAccess,
    route::{self, RouteAccess},
    service::{self, service_type},
    unsupported::UnsupportedAccess,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{
    is_already_exists, labels, owner_references, Clients, DynamicObject, Ingress, ObjectMeta,
    OwnerReference, ResourceExt, Route, SecuredAccess, SecuredAccessSpec, Service, ServiceSpec,
};
use std::{collections::BTreeMap, sync::Arc};

/// One exposure mechanism. `realise` brings the type-specific derived
/// resources to their desired state; `resolve` computes the externally
/// reachable endpoints from whatever derived-resource state has been
/// observed so far. The split matters because addresses (load-balancer IPs,
/// router-assigned hosts) only become known asynchronously, so `resolve` is
/// re-entered on every derived-resource notification independently of
/// whether anything was just created.
///
/// Both phases return true iff they mutated the SecuredAccess status.
#[async_trait]
pub(crate) trait AccessType: Send + Sync {
    async fn realise(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool;
    async fn resolve(&self, manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool;
}

/// Reconciles SecuredAccess definitions against the cluster. Owns an
/// in-memory shadow of every tracked resource, keyed by `namespace/name`;
/// drift is detected against these shadows rather than by re-reading the
/// cluster on every pass. The caller must deliver notifications serially —
/// the runtime funnels all of them through a single dispatch task.
pub struct SecuredAccessManager {
    pub(crate) definitions: HashMap<String, SecuredAccess>,
    pub(crate) services: HashMap<String, Service>,
    pub(crate) routes: HashMap<String, Route>,
    pub(crate) ingresses: HashMap<String, Ingress>,
    pub(crate) http_proxies: HashMap<String, DynamicObject>,
    pub(crate) tls_routes: HashMap<String, DynamicObject>,
    pub(crate) clients: Arc<dyn Clients>,
    certificates: Arc<dyn CertificateManager>,
    pub(crate) config: Config,
}

impl SecuredAccessManager {
    pub fn new(
        clients: Arc<dyn Clients>,
        certificates: Arc<dyn CertificateManager>,
        config: Config,
    ) -> Self {
        Self {
            definitions: HashMap::new(),
            services: HashMap::new(),
            routes: HashMap::new(),
            ingresses: HashMap::new(),
            http_proxies: HashMap::new(),
            tls_routes: HashMap::new(),
            clients,
            certificates,
            config,
        }
    }

    /// Upserts the desired SecuredAccess definition. No write is issued when
    /// an existing definition already carries the requested spec and
    /// annotations; the status is never touched from here.
    pub async fn ensure(
        &mut self,
        namespace: &str,
        name: &str,
        spec: SecuredAccessSpec,
        annotations: BTreeMap<String, String>,
        refs: Vec<OwnerReference>,
    ) -> Result<()> {
        let key = format!("{namespace}/{name}");
        if let Some(current) = self.definitions.get(&key) {
            let mut updated = current.clone();
            let mut update = false;
            if updated.spec != spec {
                updated.spec = spec;
                update = true;
            }
            let existing = updated.metadata.annotations.get_or_insert_with(Default::default);
            for (k, v) in &annotations {
                if existing.get(k) != Some(v) {
                    existing.insert(k.clone(), v.clone());
                    update = true;
                }
            }
            if !update {
                return Ok(());
            }
            let stored = self.clients.update_secured_access(namespace, &updated).await?;
            self.definitions.insert(key, stored);
            return Ok(());
        }

        let mut annotations = annotations;
        annotations.append(&mut labels::controlled_annotations());
        let sa = SecuredAccess {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                owner_references: Some(refs),
                ..Default::default()
            },
            spec,
            status: None,
        };
        match self.clients.create_secured_access(namespace, &sa).await {
            Ok(created) => {
                self.definitions.insert(key, created);
                Ok(())
            }
            // On controller restart the create may race an object written
            // before the restart; adopt the latest rather than failing.
            Err(error) if is_already_exists(&error) => {
                tracing::info!(%key, "SecuredAccess already exists, loading latest");
                let latest = self.clients.get_secured_access(namespace, name).await?;
                self.definitions.insert(key, latest);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%key, %error, "error creating SecuredAccess");
                Err(error)
            }
        }
    }

    /// Deletes a definition previously written through [`Self::ensure`].
    /// Derived resources follow through their owner references.
    pub async fn delete(&mut self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{namespace}/{name}");
        if self.definitions.contains_key(&key) {
            self.clients.delete_secured_access(namespace, name).await?;
            self.definitions.remove(&key);
        }
        Ok(())
    }

    /// Handles a create/update notification for a SecuredAccess.
    pub async fn secured_access_changed(&mut self, key: &str, current: SecuredAccess) -> Result<()> {
        if let Some(previous) = self.definitions.get(key) {
            let old = self.actual_access_type(previous).to_string();
            let new = self.actual_access_type(&current).to_string();
            if old != new {
                // TODO: delete the resources realised for the previous
                // access type instead of leaving them behind.
                tracing::warn!(
                    %key,
                    %old,
                    %new,
                    "access type changed; resources realised for the previous type are not removed"
                );
            }
        }
        self.definitions.insert(key.to_string(), current.clone());
        self.reconcile(current).await
    }

    /// Handles a delete notification for a SecuredAccess. Derived resources
    /// are garbage-collected through their owner references, so only the
    /// shadow state is dropped here.
    pub fn secured_access_deleted(&mut self, key: &str) -> Result<()> {
        self.definitions.remove(key);
        self.services.remove(key);
        Ok(())
    }

    /// Handles a notification for a derived Service; `None` means it was
    /// deleted, in which case it is recreated if its owner still exists.
    pub async fn check_service(&mut self, key: &str, service: Option<Service>) -> Result<()> {
        let Some(service) = service else {
            self.services.remove(key);
            if let Some(sa) = self.definitions.get(key).cloned() {
                return self.create_service(&sa).await;
            }
            return Ok(());
        };
        let Some(sa) = self.definitions.get(key).cloned() else {
            tracing::info!(%key, "deleting redundant service, no matching SecuredAccess found");
            let namespace = service.namespace().unwrap_or_default();
            return self
                .clients
                .delete_service(&namespace, &service.name_unchecked())
                .await;
        };
        self.services.insert(key.to_string(), service);
        self.reconcile(sa).await
    }

    /// Handles a notification for a derived route. The owning SecuredAccess
    /// is recovered from the route name by stripping the target-port suffix;
    /// a name that does not match the scheme is logged and ignored.
    pub async fn check_route(&mut self, key: &str, route: Option<Route>) -> Result<()> {
        let Some(route) = route else {
            self.routes.remove(key);
            let Some(sa) = self.definition_for_port_qualified_key(key, ACCESS_TYPE_ROUTE) else {
                return Ok(());
            };
            return self.reconcile(sa).await;
        };

        self.routes.insert(key.to_string(), route.clone());
        let target_port = route
            .spec
            .port
            .as_ref()
            .map(|p| p.target_port.as_str())
            .unwrap_or_default();
        let Some(sa_key) = route::strip_port_suffix(key, target_port) else {
            tracing::info!(%key, %target_port, "ignoring route whose name does not match the expected scheme");
            return Ok(());
        };
        let sa = self
            .definitions
            .get(&sa_key)
            .filter(|sa| {
                sa.has_port(target_port) && self.actual_access_type(sa) == ACCESS_TYPE_ROUTE
            })
            .cloned();
        let Some(sa) = sa else {
            tracing::info!(%key, "deleting redundant route, no matching SecuredAccess found");
            let namespace = route
                .namespace()
                .unwrap_or_else(|| namespace_of(key).to_string());
            return self
                .clients
                .delete_route(&namespace, &route.name_unchecked())
                .await;
        };
        self.reconcile(sa).await
    }

    /// Handles a notification for a derived ingress; keyed by the owning
    /// SecuredAccess (one ingress per definition, same name).
    pub async fn check_ingress(&mut self, key: &str, ingress: Option<Ingress>) -> Result<()> {
        let sa = self
            .definitions
            .get(key)
            .filter(|sa| {
                let access_type = self.actual_access_type(sa);
                access_type == ACCESS_TYPE_INGRESS || access_type == ACCESS_TYPE_INGRESS_NGINX
            })
            .cloned();
        match ingress {
            None => {
                self.ingresses.remove(key);
                match sa {
                    Some(sa) => self.reconcile(sa).await,
                    None => Ok(()),
                }
            }
            Some(ingress) => {
                self.ingresses.insert(key.to_string(), ingress.clone());
                match sa {
                    Some(sa) => self.reconcile(sa).await,
                    None => {
                        tracing::info!(%key, "deleting redundant ingress, no matching SecuredAccess found");
                        let namespace = ingress.namespace().unwrap_or_default();
                        self.clients
                            .delete_ingress(&namespace, &ingress.name_unchecked())
                            .await
                    }
                }
            }
        }
    }

    /// Handles a notification for a Contour HTTPProxy. No strategy realises
    /// these, so the only live concern is dropping orphans.
    pub async fn check_http_proxy(&mut self, key: &str, proxy: Option<DynamicObject>) -> Result<()> {
        let sa = self.definition_for_port_qualified_key(key, ACCESS_TYPE_CONTOUR_HTTP_PROXY);
        let Some(proxy) = proxy else {
            self.http_proxies.remove(key);
            match sa {
                Some(sa) => return self.reconcile(sa).await,
                None => return Ok(()),
            }
        };
        self.http_proxies.insert(key.to_string(), proxy.clone());
        match sa {
            Some(sa) => self.reconcile(sa).await,
            None => {
                tracing::info!(%key, "deleting redundant HTTPProxy, no matching SecuredAccess found");
                let namespace = proxy
                    .namespace()
                    .unwrap_or_else(|| namespace_of(key).to_string());
                self.clients
                    .delete_http_proxy(&namespace, &proxy.name_unchecked())
                    .await
            }
        }
    }

    /// Handles a notification for a Gateway API TLSRoute; as with
    /// HTTPProxies, only orphan deletion applies.
    pub async fn check_tls_route(&mut self, key: &str, route: Option<DynamicObject>) -> Result<()> {
        let sa = self.definition_for_port_qualified_key(key, ACCESS_TYPE_GATEWAY);
        let Some(route) = route else {
            self.tls_routes.remove(key);
            match sa {
                Some(sa) => return self.reconcile(sa).await,
                None => return Ok(()),
            }
        };
        self.tls_routes.insert(key.to_string(), route.clone());
        match sa {
            Some(sa) => self.reconcile(sa).await,
            None => {
                tracing::info!(%key, "deleting redundant TLSRoute, no matching SecuredAccess found");
                let namespace = route
                    .namespace()
                    .unwrap_or_else(|| namespace_of(key).to_string());
                self.clients
                    .delete_tls_route(&namespace, &route.name_unchecked())
                    .await
            }
        }
    }

    // Startup replay: populate the shadow caches from list snapshots before
    // any definition is reconciled, so existing derived resources are not
    // recreated just because their watch has not delivered them yet.

    pub fn recover_service(&mut self, service: Service) {
        self.services.insert(object_key(&service), service);
    }

    pub fn recover_route(&mut self, route: Route) {
        self.routes.insert(object_key(&route), route);
    }

    pub fn recover_ingress(&mut self, ingress: Ingress) {
        self.ingresses.insert(object_key(&ingress), ingress);
    }

    pub fn recover_http_proxy(&mut self, proxy: DynamicObject) {
        self.http_proxies.insert(object_key(&proxy), proxy);
    }

    pub fn recover_tls_route(&mut self, route: DynamicObject) {
        self.tls_routes.insert(object_key(&route), route);
    }

    pub(crate) fn actual_access_type<'a>(&'a self, sa: &'a SecuredAccess) -> &'a str {
        if sa.spec.access_type.is_empty() {
            &self.config.default_access_type
        } else {
            &sa.spec.access_type
        }
    }

    fn strategy(&self, sa: &SecuredAccess) -> Box<dyn AccessType> {
        let access_type = self.actual_access_type(sa);
        if !self.config.is_enabled(access_type) {
            return Box::new(UnsupportedAccess);
        }
        match access_type {
            ACCESS_TYPE_LOCAL => Box::new(LocalAccess),
            ACCESS_TYPE_ROUTE => Box::new(RouteAccess),
            ACCESS_TYPE_LOADBALANCER => Box::new(LoadbalancerAccess),
            ACCESS_TYPE_NODEPORT => Box::new(NodeportAccess {
                cluster_host: self.config.cluster_host.clone(),
            }),
            ACCESS_TYPE_INGRESS => Box::new(IngressAccess {
                nginx: false,
                domain: self.config.ingress_domain.clone(),
            }),
            ACCESS_TYPE_INGRESS_NGINX => Box::new(IngressAccess {
                nginx: true,
                domain: self.config.ingress_domain.clone(),
            }),
            _ => Box::new(UnsupportedAccess),
        }
    }

    /// Converges one definition: derived service first, then the strategy's
    /// two phases, then the certificate, and finally the status update when
    /// either phase reported a change. Re-running with no external drift
    /// performs no writes.
    async fn reconcile(&mut self, mut sa: SecuredAccess) -> Result<()> {
        self.ensure_service(&sa).await?;
        let strategy = self.strategy(&sa);
        let realised = strategy.realise(self, &mut sa).await;
        let resolved = strategy.resolve(self, &mut sa).await;
        self.check_certificate(&sa).await?;
        if realised || resolved {
            self.update_status(sa).await?;
        }
        Ok(())
    }

    async fn update_status(&mut self, sa: SecuredAccess) -> Result<()> {
        let namespace = sa.namespace().unwrap_or_default();
        let latest = self
            .clients
            .update_secured_access_status(&namespace, &sa)
            .await?;
        self.definitions.insert(latest.key(), latest);
        Ok(())
    }

    async fn check_certificate(&self, sa: &SecuredAccess) -> Result<()> {
        if sa.spec.ca.is_empty() {
            return Ok(());
        }
        let name = if sa.spec.certificate.is_empty() {
            sa.name_unchecked()
        } else {
            sa.spec.certificate.clone()
        };
        let namespace = sa.namespace().unwrap_or_default();
        self.certificates
            .ensure(
                &namespace,
                &name,
                &sa.spec.issuer,
                &sa.name_unchecked(),
                &certificate_hosts(sa),
                false,
                true,
                owner_references(sa),
            )
            .await
    }

    async fn ensure_service(&mut self, sa: &SecuredAccess) -> Result<()> {
        let key = sa.key();
        let Some(existing) = self.services.get(&key) else {
            return self.create_service(sa).await;
        };
        let mut service = existing.clone();
        let spec = service.spec.get_or_insert_with(Default::default);
        let mut update = service::update_selector(spec, &sa.spec.selector);
        update |= service::update_ports(spec, &sa.spec.ports);
        update |= service::update_type(spec, self.actual_access_type(sa));
        if !update {
            return Ok(());
        }
        let namespace = sa.namespace().unwrap_or_default();
        let updated = self.clients.update_service(&namespace, &service).await?;
        self.services.insert(key, updated);
        Ok(())
    }

    async fn create_service(&mut self, sa: &SecuredAccess) -> Result<()> {
        let mut spec = ServiceSpec {
            selector: Some(sa.spec.selector.clone()),
            type_: service_type(self.actual_access_type(sa)).map(Into::into),
            ..Default::default()
        };
        service::update_ports(&mut spec, &sa.spec.ports);
        let service = Service {
            metadata: ObjectMeta {
                name: Some(sa.name_unchecked()),
                owner_references: Some(owner_references(sa)),
                labels: Some(labels::controlled_labels()),
                annotations: Some(labels::controlled_annotations()),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        };
        let namespace = sa.namespace().unwrap_or_default();
        let created = self.clients.create_service(&namespace, &service).await?;
        self.services.insert(sa.key(), created);
        Ok(())
    }

    /// Creates or updates one derived route, refreshing the shadow entry
    /// with the stored result.
    pub(crate) async fn ensure_route(&mut self, namespace: &str, desired: Route) -> Result<()> {
        let key = format!("{namespace}/{}", desired.name_unchecked());
        let Some(existing) = self.routes.get(&key) else {
            let created = self.clients.create_route(namespace, &desired).await?;
            self.routes.insert(key, created);
            return Ok(());
        };
        let mut updated = existing.clone();
        if !route::update_route(&mut updated, &desired) {
            return Ok(());
        }
        let stored = self.clients.update_route(namespace, &updated).await?;
        self.routes.insert(key, stored);
        Ok(())
    }

    /// Finds the definition owning a per-port resource whose key embeds the
    /// port name (`{namespace}/{saName}-{portName}`). Both the name and the
    /// port may contain the separator, so every split is tried and the first
    /// candidate with a matching definition, port and access type wins.
    fn definition_for_port_qualified_key(
        &self,
        qualified_key: &str,
        expected_access_type: &str,
    ) -> Option<SecuredAccess> {
        for (key, port_name) in route::possible_key_port_name_pairs(qualified_key) {
            if let Some(sa) = self.definitions.get(&key) {
                if sa.has_port(&port_name)
                    && self.actual_access_type(sa) == expected_access_type
                {
                    return Some(sa.clone());
                }
            }
        }
        None
    }
}

fn object_key<K: ResourceExt>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_unchecked()
    )
}

fn namespace_of(key: &str) -> &str {
    key.split_once('/').map(|(ns, _)| ns).unwrap_or_default()
}

/// Hosts the certificate must cover: every resolved endpoint host plus the
/// in-cluster service names.
fn certificate_hosts(sa: &SecuredAccess) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for endpoint in sa.endpoints() {
        if !endpoint.host.is_empty() && !hosts.contains(&endpoint.host) {
            hosts.push(endpoint.host.clone());
        }
    }
    let name = sa.name_unchecked();
    let qualified = format!("{name}.{}", sa.namespace().unwrap_or_default());
    for host in [name, qualified] {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }
    hosts
}
