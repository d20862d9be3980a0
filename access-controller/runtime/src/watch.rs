use futures::prelude::*;
use kube::runtime::watcher;
use skupper_access_controller_k8s_access::SecuredAccessManager;
use skupper_access_controller_k8s_api::{DynamicObject, Ingress, ResourceExt, Route, SecuredAccess, Service};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// One observed change, already keyed; `None` marks a deletion. All watches
/// funnel into a single queue so that manager state is only ever touched
/// from one task.
pub(crate) enum ResourceEvent {
    SecuredAccess(String, Option<SecuredAccess>),
    Service(String, Option<Service>),
    Route(String, Option<Route>),
    Ingress(String, Option<Ingress>),
    HttpProxy(String, Option<DynamicObject>),
    TlsRoute(String, Option<DynamicObject>),
}

pub(crate) fn object_key<K: ResourceExt>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_unchecked()
    )
}

/// Forwards a typed watch into the dispatch queue. Watch restarts re-deliver
/// the current state as updates; the manager's entry points are idempotent,
/// so that only costs a reconcile pass.
pub(crate) async fn forward<T>(
    events: impl Stream<Item = watcher::Event<T>>,
    tx: UnboundedSender<ResourceEvent>,
    wrap: fn(String, Option<T>) -> ResourceEvent,
) where
    T: ResourceExt,
{
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        let forwarded = match event {
            watcher::Event::Applied(obj) => {
                let key = object_key(&obj);
                tx.send(wrap(key, Some(obj)))
            }
            watcher::Event::Deleted(obj) => tx.send(wrap(object_key(&obj), None)),
            watcher::Event::Restarted(objs) => {
                let mut result = Ok(());
                for obj in objs {
                    let key = object_key(&obj);
                    result = tx.send(wrap(key, Some(obj)));
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
        };
        if forwarded.is_err() {
            // Dispatch task is gone; the runtime is shutting down.
            return;
        }
    }
}

/// Forwards an unwrapped watcher stream (used for dynamically-typed kinds),
/// logging and skipping watch errors — the watcher re-establishes itself.
pub(crate) async fn forward_dynamic(
    events: impl Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>>,
    tx: UnboundedSender<ResourceEvent>,
    wrap: fn(String, Option<DynamicObject>) -> ResourceEvent,
) {
    let events = events.filter_map(|event| async move {
        match event {
            Ok(event) => Some(event),
            Err(error) => {
                tracing::warn!(%error, "watch error");
                None
            }
        }
    });
    forward(events, tx, wrap).await
}

/// Applies queued notifications to the manager, one at a time. A failed
/// reconciliation is only logged: the next notification for the same
/// resource (or a watch restart) re-drives convergence.
pub(crate) async fn dispatch(
    mut manager: SecuredAccessManager,
    mut rx: UnboundedReceiver<ResourceEvent>,
) {
    while let Some(event) = rx.recv().await {
        let result = match event {
            ResourceEvent::SecuredAccess(key, Some(sa)) => {
                manager.secured_access_changed(&key, sa).await
            }
            ResourceEvent::SecuredAccess(key, None) => manager.secured_access_deleted(&key),
            ResourceEvent::Service(key, service) => manager.check_service(&key, service).await,
            ResourceEvent::Route(key, route) => manager.check_route(&key, route).await,
            ResourceEvent::Ingress(key, ingress) => manager.check_ingress(&key, ingress).await,
            ResourceEvent::HttpProxy(key, proxy) => manager.check_http_proxy(&key, proxy).await,
            ResourceEvent::TlsRoute(key, route) => manager.check_tls_route(&key, route).await,
        };
        if let Err(error) = result {
            tracing::warn!(%error, "reconciliation failed");
        }
    }
}
