use crate::{
    certificates::CertManagerCertificates,
    watch::{self, ResourceEvent},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::{
    api::{Api, ListParams},
    core::DynamicObject,
    runtime::watcher,
    Client, Resource,
};
use skupper_access_controller_k8s_access::{
    Config, SecuredAccessManager, ACCESS_TYPE_LOADBALANCER, ACCESS_TYPE_ROUTE,
};
use skupper_access_controller_k8s_api::{
    labels, Ingress, KubeClients, Route, SecuredAccess, Service,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "access", about = "Secured-access controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "info",
        env = "SKUPPER_ACCESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Access types that SecuredAccess definitions may request; anything
    /// else is reported as unsupported.
    #[clap(long, default_value = "local,loadbalancer,nodeport,ingress-nginx,route")]
    enabled_access_types: AccessTypes,

    /// Access type assumed when a definition does not specify one. When
    /// unset, `route` is used if the OpenShift route API is available and
    /// `loadbalancer` otherwise.
    #[clap(long, default_value = "")]
    default_access_type: String,

    /// Host through which node ports are reachable; required for the
    /// nodeport access type to resolve endpoints.
    #[clap(long, default_value = "")]
    cluster_host: String,

    /// Domain for ingress rule hosts. When unset, a domain is inferred from
    /// the ingress controller's load-balancer address.
    #[clap(long, default_value = "")]
    ingress_domain: String,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            enabled_access_types,
            default_access_type,
            cluster_host,
            ingress_domain,
        } = self;

        let mut admin = admin.into_builder();
        admin.with_default_prometheus();

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();

        let routes_available = api_resource_exists::<Route>(&client).await;
        let http_proxies_available =
            api_group_has_kind(&client, "projectcontour.io/v1", "HTTPProxy").await;
        let tls_routes_available =
            api_group_has_kind(&client, "gateway.networking.k8s.io/v1alpha2", "TLSRoute").await;

        let default_access_type = if default_access_type.is_empty() {
            if routes_available {
                ACCESS_TYPE_ROUTE
            } else {
                ACCESS_TYPE_LOADBALANCER
            }
            .to_string()
        } else {
            default_access_type
        };
        let config = Config {
            enabled_access_types: enabled_access_types.0,
            default_access_type,
            cluster_host,
            ingress_domain,
        };
        tracing::info!(
            default_access_type = %config.default_access_type,
            enabled_access_types = ?config.enabled_access_types,
            "starting secured-access controller"
        );

        let mut clients = KubeClients::new(client.clone());
        if http_proxies_available {
            clients = clients.with_http_proxy();
        }
        if tls_routes_available {
            clients = clients.with_tls_route();
        }
        let mut manager = SecuredAccessManager::new(
            Arc::new(clients),
            Arc::new(CertManagerCertificates::new(client.clone())),
            config,
        );

        // Replay list snapshots of every derived kind into the shadow caches
        // before the first definition is reconciled; otherwise existing
        // derived resources would be recreated merely because their watch
        // has not delivered them yet.
        let selector = labels::selector();
        let params = ListParams::default().labels(&selector);
        for service in Api::<Service>::all(client.clone()).list(&params).await?.items {
            manager.recover_service(service);
        }
        if routes_available {
            for route in Api::<Route>::all(client.clone()).list(&params).await?.items {
                manager.recover_route(route);
            }
        }
        for ingress in Api::<Ingress>::all(client.clone()).list(&params).await?.items {
            manager.recover_ingress(ingress);
        }
        if http_proxies_available {
            let api =
                Api::<DynamicObject>::all_with(client.clone(), &KubeClients::http_proxy_resource());
            for proxy in api.list(&params).await?.items {
                manager.recover_http_proxy(proxy);
            }
        }
        if tls_routes_available {
            let api =
                Api::<DynamicObject>::all_with(client.clone(), &KubeClients::tls_route_resource());
            for route in api.list(&params).await?.items {
                manager.recover_tls_route(route);
            }
        }
        for sa in Api::<SecuredAccess>::all(client.clone())
            .list(&ListParams::default())
            .await?
            .items
        {
            let key = watch::object_key(&sa);
            if let Err(error) = manager.secured_access_changed(&key, sa).await {
                tracing::warn!(%key, %error, "error reconciling recovered SecuredAccess");
            }
        }

        // All notifications drain through one queue consumed by a single
        // task, which is what makes the manager's single-writer assumption
        // hold.
        let (tx, rx) = mpsc::unbounded_channel();

        let secured_accesses = runtime.watch_all::<SecuredAccess>(watcher::Config::default());
        tokio::spawn(
            watch::forward(secured_accesses, tx.clone(), ResourceEvent::SecuredAccess)
                .instrument(info_span!("securedaccesses")),
        );

        let services =
            runtime.watch_all::<Service>(watcher::Config::default().labels(&selector));
        tokio::spawn(
            watch::forward(services, tx.clone(), ResourceEvent::Service)
                .instrument(info_span!("services")),
        );

        if routes_available {
            let routes = runtime.watch_all::<Route>(watcher::Config::default().labels(&selector));
            tokio::spawn(
                watch::forward(routes, tx.clone(), ResourceEvent::Route)
                    .instrument(info_span!("routes")),
            );
        } else {
            tracing::info!("route.openshift.io resources not found, skipping route watch");
        }

        let ingresses =
            runtime.watch_all::<Ingress>(watcher::Config::default().labels(&selector));
        tokio::spawn(
            watch::forward(ingresses, tx.clone(), ResourceEvent::Ingress)
                .instrument(info_span!("ingresses")),
        );

        if http_proxies_available {
            let api =
                Api::<DynamicObject>::all_with(client.clone(), &KubeClients::http_proxy_resource());
            let events = watcher(api, watcher::Config::default().labels(&selector));
            tokio::spawn(
                watch::forward_dynamic(events, tx.clone(), ResourceEvent::HttpProxy)
                    .instrument(info_span!("httpproxies")),
            );
        }
        if tls_routes_available {
            let api =
                Api::<DynamicObject>::all_with(client.clone(), &KubeClients::tls_route_resource());
            let events = watcher(api, watcher::Config::default().labels(&selector));
            tokio::spawn(
                watch::forward_dynamic(events, tx.clone(), ResourceEvent::TlsRoute)
                    .instrument(info_span!("tlsroutes")),
            );
        }

        tokio::spawn(watch::dispatch(manager, rx).instrument(info_span!("dispatch")));

        if runtime.run().await.is_err() {
            bail!("aborted");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct AccessTypes(Vec<String>);

impl std::str::FromStr for AccessTypes {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        ))
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}

async fn api_group_has_kind(client: &Client, api_version: &str, kind: &str) -> bool {
    client
        .list_api_group_resources(api_version)
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == kind)
}
