use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const API_VERSION: &str = "skupper.io/v1alpha1";

/// Status message reported once a SecuredAccess has been realised without
/// errors.
pub const STATUS_OK: &str = "OK";

/// Declarative request to expose a selector-matched workload under a chosen
/// access mechanism. The controller derives a Service (and, depending on the
/// access type, Routes or an Ingress) from this and reports the externally
/// reachable endpoints back through the status.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "skupper.io",
    version = "v1alpha1",
    kind = "SecuredAccess",
    status = "SecuredAccessStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessSpec {
    /// One of `local`, `route`, `loadbalancer`, `nodeport`, `ingress` or
    /// `ingress-nginx`. Empty means the controller's default; anything
    /// unrecognized is treated as unsupported rather than rejected.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_type: String,

    /// Label selector for the pods backing the derived Service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Ports to expose. Names are unique within the set and are the join key
    /// correlating ports with per-port derived resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<SecuredAccessPort>,

    /// Name of the certificate to issue; defaults to the SecuredAccess name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate: String,

    /// Issuer to request the certificate from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    /// CA for the issued certificate; no certificate is requested unless
    /// this is set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,

    /// Access-type specific options, e.g. the routing `domain` used by the
    /// route strategy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessPort {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub target_port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<SecuredAccessUrl>,
    #[serde(default, rename = "status", skip_serializing_if = "String::is_empty")]
    pub status_message: String,
}

/// An externally reachable address for one named port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuredAccessUrl {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

// === impl SecuredAccess ===

impl SecuredAccess {
    /// The `namespace/name` key under which this resource is tracked.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_unchecked()
        )
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.spec.ports.iter().any(|p| p.name == name)
    }

    /// Sets the status message, returning true iff it changed.
    pub fn set_status_message(&mut self, message: &str) -> bool {
        let status = self.status.get_or_insert_with(Default::default);
        if status.status_message == message {
            return false;
        }
        status.status_message = message.to_string();
        true
    }

    /// Replaces the resolved endpoints, returning true iff they changed.
    pub fn set_endpoints(&mut self, endpoints: Vec<Endpoint>) -> bool {
        let status = self.status.get_or_insert_with(Default::default);
        if status.endpoints == endpoints {
            return false;
        }
        status.endpoints = endpoints;
        true
    }

    /// Replaces the resolved urls, returning true iff they changed.
    pub fn set_urls(&mut self, urls: Vec<SecuredAccessUrl>) -> bool {
        let status = self.status.get_or_insert_with(Default::default);
        if status.urls == urls {
            return false;
        }
        status.urls = urls;
        true
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        self.status
            .as_ref()
            .map(|s| s.endpoints.as_slice())
            .unwrap_or_default()
    }
}

/// Owner reference attached to every resource derived from a SecuredAccess,
/// so that deleting the SecuredAccess garbage-collects what it owns.
pub fn owner_references(sa: &SecuredAccess) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: "SecuredAccess".to_string(),
        name: sa.name_unchecked(),
        uid: sa.uid().unwrap_or_default(),
        ..Default::default()
    }]
}
