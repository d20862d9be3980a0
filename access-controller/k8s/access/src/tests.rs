use crate::{
    certificates::CertificateManager,
    config::{ACCESS_TYPE_LOADBALANCER, ACCESS_TYPE_LOCAL, ACCESS_TYPE_ROUTE},
    manager::SecuredAccessManager,
    Config,
};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceStatus;
use skupper_access_controller_k8s_api::{
    Clients, Endpoint, Ingress, LoadBalancerIngress, LoadBalancerStatus, ObjectMeta,
    OwnerReference, ResourceExt, Route, RoutePort, RouteSpec, SecuredAccess, SecuredAccessPort,
    SecuredAccessSpec, SecuredAccessUrl, Service, STATUS_OK,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// In-memory cluster recording every write the manager issues.
#[derive(Default)]
struct RecordingClients {
    ops: Mutex<Vec<String>>,
}

impl RecordingClients {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Clients for RecordingClients {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        self.record(format!("create_service {namespace}/{}", service.name_unchecked()));
        Ok(service.clone())
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        self.record(format!("update_service {namespace}/{}", service.name_unchecked()));
        Ok(service.clone())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_service {namespace}/{name}"));
        Ok(())
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route> {
        self.record(format!("create_route {namespace}/{}", route.name_unchecked()));
        Ok(route.clone())
    }

    async fn update_route(&self, namespace: &str, route: &Route) -> Result<Route> {
        self.record(format!("update_route {namespace}/{}", route.name_unchecked()));
        Ok(route.clone())
    }

    async fn delete_route(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_route {namespace}/{name}"));
        Ok(())
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        self.record(format!("create_ingress {namespace}/{}", ingress.name_unchecked()));
        Ok(ingress.clone())
    }

    async fn update_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<Ingress> {
        self.record(format!("update_ingress {namespace}/{}", ingress.name_unchecked()));
        Ok(ingress.clone())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_ingress {namespace}/{name}"));
        Ok(())
    }

    async fn delete_http_proxy(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_http_proxy {namespace}/{name}"));
        Ok(())
    }

    async fn delete_tls_route(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_tls_route {namespace}/{name}"));
        Ok(())
    }

    async fn get_secured_access(&self, namespace: &str, name: &str) -> Result<SecuredAccess> {
        anyhow::bail!("no such SecuredAccess: {namespace}/{name}")
    }

    async fn create_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        self.record(format!("create_secured_access {namespace}/{}", sa.name_unchecked()));
        Ok(sa.clone())
    }

    async fn update_secured_access(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        self.record(format!("update_secured_access {namespace}/{}", sa.name_unchecked()));
        Ok(sa.clone())
    }

    async fn delete_secured_access(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_secured_access {namespace}/{name}"));
        Ok(())
    }

    async fn update_secured_access_status(
        &self,
        namespace: &str,
        sa: &SecuredAccess,
    ) -> Result<SecuredAccess> {
        self.record(format!("update_status {namespace}/{}", sa.name_unchecked()));
        Ok(sa.clone())
    }
}

#[derive(Default)]
struct RecordingCertificates {
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl CertificateManager for RecordingCertificates {
    async fn ensure(
        &self,
        namespace: &str,
        name: &str,
        issuer: &str,
        subject: &str,
        hosts: &[String],
        _client_auth: bool,
        _server_auth: bool,
        _owner_refs: Vec<OwnerReference>,
    ) -> Result<()> {
        self.requests.lock().unwrap().push(format!(
            "{namespace}/{name} issuer={issuer} subject={subject} hosts={}",
            hosts.join(",")
        ));
        Ok(())
    }
}

fn manager(clients: Arc<RecordingClients>, config: Config) -> SecuredAccessManager {
    SecuredAccessManager::new(clients, Arc::new(RecordingCertificates::default()), config)
}

fn spec(access_type: &str, ports: &[(&str, i32, i32)]) -> SecuredAccessSpec {
    SecuredAccessSpec {
        access_type: access_type.to_string(),
        selector: BTreeMap::from([("skupper.io/component".to_string(), "router".to_string())]),
        ports: ports
            .iter()
            .map(|(name, port, target_port)| SecuredAccessPort {
                name: name.to_string(),
                port: *port,
                target_port: *target_port,
                protocol: "TCP".to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

fn with_load_balancer_ip(mut service: Service, ip: &str) -> Service {
    service.status = Some(ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                ip: Some(ip.to_string()),
                ..Default::default()
            }]),
        }),
        ..Default::default()
    });
    service
}

fn route(namespace: &str, name: &str, target_port: &str, host: &str) -> Route {
    Route {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: RouteSpec {
            host: host.to_string(),
            port: Some(RoutePort {
                target_port: target_port.to_string(),
            }),
            ..Default::default()
        },
        status: None,
    }
}

async fn ensure_and_reconcile(
    manager: &mut SecuredAccessManager,
    namespace: &str,
    name: &str,
    spec: SecuredAccessSpec,
) {
    manager
        .ensure(namespace, name, spec, BTreeMap::new(), Vec::new())
        .await
        .unwrap();
    let key = format!("{namespace}/{name}");
    let sa = manager.definitions.get(&key).cloned().unwrap();
    manager.secured_access_changed(&key, sa).await.unwrap();
}

#[tokio::test]
async fn ensure_is_idempotent() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    let spec = spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]);
    manager
        .ensure("test", "svc", spec.clone(), BTreeMap::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(clients.ops(), vec!["create_secured_access test/svc"]);

    // Same spec again: no write.
    manager
        .ensure("test", "svc", spec.clone(), BTreeMap::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(clients.ops().len(), 1);

    // Changed spec: one update.
    let changed = crate::tests::spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 9999)]);
    manager
        .ensure("test", "svc", changed, BTreeMap::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(
        clients.ops(),
        vec![
            "create_secured_access test/svc",
            "update_secured_access test/svc"
        ]
    );
}

#[tokio::test]
async fn loadbalancer_endpoints_resolve_once_address_is_assigned() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]),
    )
    .await;
    assert!(clients.ops().contains(&"create_service test/svc".to_string()));

    // No address assigned yet: no endpoints, no status write.
    let sa = manager.definitions.get("test/svc").unwrap();
    assert!(sa.endpoints().is_empty());
    assert!(!clients.ops().iter().any(|op| op.starts_with("update_status")));

    // The load balancer address arrives through a service notification.
    let observed = with_load_balancer_ip(
        manager.services.get("test/svc").cloned().unwrap(),
        "1.2.3.4",
    );
    manager.check_service("test/svc", Some(observed)).await.unwrap();

    let sa = manager.definitions.get("test/svc").unwrap();
    assert_eq!(
        sa.endpoints(),
        &[Endpoint {
            name: "p1".to_string(),
            host: "1.2.3.4".to_string(),
            port: "8080".to_string(),
        }]
    );

    // Re-delivering the same state performs no further writes.
    let ops = clients.ops();
    let observed = with_load_balancer_ip(
        manager.services.get("test/svc").cloned().unwrap(),
        "1.2.3.4",
    );
    manager.check_service("test/svc", Some(observed)).await.unwrap();
    assert_eq!(clients.ops(), ops);
}

#[tokio::test]
async fn route_strategy_realises_per_port_and_resolves_assigned_hosts() {
    let clients = Arc::new(RecordingClients::default());
    let config = Config {
        default_access_type: ACCESS_TYPE_ROUTE.to_string(),
        ..Config::default()
    };
    let mut manager = manager(clients.clone(), config);

    ensure_and_reconcile(
        &mut manager,
        "test",
        "sa1",
        spec(ACCESS_TYPE_ROUTE, &[("p1", 8080, 8081), ("p2", 9090, 9091)]),
    )
    .await;
    assert!(clients.ops().contains(&"create_route test/sa1-p1".to_string()));
    assert!(clients.ops().contains(&"create_route test/sa1-p2".to_string()));

    // Both routes exist but carry no host yet: status is OK, endpoints empty.
    let sa = manager.definitions.get("test/sa1").unwrap();
    assert_eq!(
        sa.status.as_ref().map(|s| s.status_message.as_str()),
        Some(STATUS_OK)
    );
    assert!(sa.endpoints().is_empty());

    // The router assigns a host to one of the routes.
    let mut assigned = manager.routes.get("test/sa1-p1").cloned().unwrap();
    assigned.spec.host = "sa1-p1.apps.example.com".to_string();
    manager
        .check_route("test/sa1-p1", Some(assigned))
        .await
        .unwrap();

    let sa = manager.definitions.get("test/sa1").unwrap();
    assert_eq!(
        sa.endpoints(),
        &[Endpoint {
            name: "p1".to_string(),
            host: "sa1-p1.apps.example.com".to_string(),
            port: "443".to_string(),
        }]
    );
    assert_eq!(
        sa.status.as_ref().map(|s| s.urls.clone()).unwrap_or_default(),
        vec![SecuredAccessUrl {
            name: "p1".to_string(),
            url: "sa1-p1.apps.example.com:443".to_string(),
        }]
    );
}

#[tokio::test]
async fn malformed_route_key_is_ignored_but_cached() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    manager
        .check_route("test", Some(route("test", "route", "8080", "1.2.3.4-8080.test.host")))
        .await
        .unwrap();

    assert_eq!(manager.routes.len(), 1);
    assert!(clients.ops().is_empty());
}

#[tokio::test]
async fn orphaned_route_is_deleted() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    manager
        .check_route(
            "test/1.2.3.4-8080",
            Some(route("test", "1.2.3.4-8080", "8080", "")),
        )
        .await
        .unwrap();

    assert_eq!(clients.ops(), vec!["delete_route test/1.2.3.4-8080"]);
}

#[tokio::test]
async fn access_type_transition_keeps_single_definition_and_service() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]),
    )
    .await;
    let observed = with_load_balancer_ip(
        manager.services.get("test/svc").cloned().unwrap(),
        "1.2.3.4",
    );
    manager.check_service("test/svc", Some(observed)).await.unwrap();
    assert!(!manager.definitions.get("test/svc").unwrap().endpoints().is_empty());

    // The declarer switches the access type to local.
    let mut updated = manager.definitions.get("test/svc").cloned().unwrap();
    updated.spec.access_type = ACCESS_TYPE_LOCAL.to_string();
    manager.secured_access_changed("test/svc", updated).await.unwrap();

    assert_eq!(manager.definitions.len(), 1);
    assert_eq!(manager.services.len(), 1);
    assert!(clients.ops().contains(&"update_service test/svc".to_string()));

    // Further service notifications no longer produce load-balancer
    // endpoints: resolution under the new type is a no-op.
    let ops = clients.ops();
    let observed = manager.services.get("test/svc").cloned().unwrap();
    manager.check_service("test/svc", Some(observed)).await.unwrap();
    assert_eq!(clients.ops(), ops);
}

#[tokio::test]
async fn recovered_service_is_not_recreated() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    // First pass in a previous process lifetime created the service.
    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]),
    )
    .await;
    let existing = manager.services.get("test/svc").cloned().unwrap();
    let definition = manager.definitions.get("test/svc").cloned().unwrap();

    // Restart: replay the derived-resource snapshot before the definitions.
    let clients = Arc::new(RecordingClients::default());
    let mut restarted = crate::tests::manager(clients.clone(), Config::default());
    restarted.recover_service(existing);
    restarted
        .secured_access_changed("test/svc", definition)
        .await
        .unwrap();

    assert!(!clients.ops().iter().any(|op| op.starts_with("create_service")));
}

#[tokio::test]
async fn deleted_service_is_recreated_while_definition_exists() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]),
    )
    .await;

    manager.check_service("test/svc", None).await.unwrap();
    assert_eq!(
        clients
            .ops()
            .iter()
            .filter(|op| op.starts_with("create_service"))
            .count(),
        2
    );
    assert!(manager.services.contains_key("test/svc"));
}

#[tokio::test]
async fn orphaned_service_is_deleted() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    let service = Service {
        metadata: ObjectMeta {
            name: Some("stray".to_string()),
            namespace: Some("test".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    manager.check_service("test/stray", Some(service)).await.unwrap();

    assert_eq!(clients.ops(), vec!["delete_service test/stray"]);
    assert!(!manager.services.contains_key("test/stray"));
}

#[tokio::test]
async fn unsupported_access_type_is_reported_not_failed() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec("carrier-pigeon", &[("p1", 8080, 8081)]),
    )
    .await;

    let sa = manager.definitions.get("test/svc").unwrap();
    assert_eq!(
        sa.status.as_ref().map(|s| s.status_message.as_str()),
        Some("unsupported access type")
    );
    assert!(sa.endpoints().is_empty());
}

#[tokio::test]
async fn secured_access_deletion_drops_tracked_state() {
    let clients = Arc::new(RecordingClients::default());
    let mut manager = manager(clients.clone(), Config::default());

    ensure_and_reconcile(
        &mut manager,
        "test",
        "svc",
        spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]),
    )
    .await;
    manager.secured_access_deleted("test/svc").unwrap();

    assert!(manager.definitions.is_empty());
    assert!(manager.services.is_empty());

    // A later deletion notification for the owned service is a no-op.
    let ops = clients.ops();
    manager.check_service("test/svc", None).await.unwrap();
    assert_eq!(clients.ops(), ops);
}

#[tokio::test]
async fn certificate_requested_when_ca_is_set() {
    let clients = Arc::new(RecordingClients::default());
    let certificates = Arc::new(RecordingCertificates::default());
    let mut manager = SecuredAccessManager::new(
        clients.clone(),
        certificates.clone(),
        Config::default(),
    );

    let mut spec = spec(ACCESS_TYPE_LOADBALANCER, &[("p1", 8080, 8081)]);
    spec.issuer = "site-ca".to_string();
    spec.ca = "site-ca".to_string();
    ensure_and_reconcile(&mut manager, "test", "svc", spec).await;

    let requests = certificates.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec!["test/svc issuer=site-ca subject=svc hosts=svc,svc.test"]
    );
}
