#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod certificates;
mod config;
mod ingress;
mod loadbalancer;
mod local;
mod manager;
mod nodeport;
mod route;
mod service;
mod unsupported;

#[cfg(test)]
mod tests;

pub use self::{
    certificates::CertificateManager,
    config::{
        Config, ACCESS_TYPE_CONTOUR_HTTP_PROXY, ACCESS_TYPE_GATEWAY, ACCESS_TYPE_INGRESS,
        ACCESS_TYPE_INGRESS_NGINX, ACCESS_TYPE_LOADBALANCER, ACCESS_TYPE_LOCAL,
        ACCESS_TYPE_NODEPORT, ACCESS_TYPE_ROUTE,
    },
    manager::SecuredAccessManager,
};
