#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod certificate;
mod clients;
pub mod labels;
mod route;
mod secured_access;

pub use self::{
    certificate::{Certificate, CertificateSpec, IssuerReference},
    clients::{is_already_exists, Clients, KubeClients},
    route::{Route, RouteIngress, RoutePort, RouteSpec, RouteStatus, RouteTargetReference, TlsConfig},
    secured_access::{
        owner_references, Endpoint, SecuredAccess, SecuredAccessPort, SecuredAccessSpec,
        SecuredAccessStatus, SecuredAccessUrl, API_VERSION, STATUS_OK,
    },
};
pub use k8s_openapi::api::{
    core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service, ServicePort, ServiceSpec},
    networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
        IngressServiceBackend, IngressSpec, ServiceBackendPort,
    },
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    core::DynamicObject,
};
