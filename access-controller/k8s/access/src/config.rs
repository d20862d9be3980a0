pub const ACCESS_TYPE_LOCAL: &str = "local";
pub const ACCESS_TYPE_ROUTE: &str = "route";
pub const ACCESS_TYPE_LOADBALANCER: &str = "loadbalancer";
pub const ACCESS_TYPE_NODEPORT: &str = "nodeport";
pub const ACCESS_TYPE_INGRESS: &str = "ingress";
pub const ACCESS_TYPE_INGRESS_NGINX: &str = "ingress-nginx";

// Recognized for derived-resource correlation only; no strategy is
// registered for these, so a SecuredAccess requesting them is reported as
// unsupported.
pub const ACCESS_TYPE_CONTOUR_HTTP_PROXY: &str = "contour-http-proxy";
pub const ACCESS_TYPE_GATEWAY: &str = "gateway";

/// Controller-level settings for the secured-access manager.
#[derive(Clone, Debug)]
pub struct Config {
    /// Access types requests may use; anything else dispatches to the
    /// unsupported strategy.
    pub enabled_access_types: Vec<String>,

    /// Access type assumed when a SecuredAccess does not specify one.
    pub default_access_type: String,

    /// Host through which node ports are reachable; required for the
    /// nodeport strategy to resolve endpoints.
    pub cluster_host: String,

    /// Statically configured ingress domain. When empty, the ingress
    /// strategies attempt to infer a domain from the ingress controller's
    /// load-balancer address.
    pub ingress_domain: String,
}

impl Config {
    pub fn is_enabled(&self, access_type: &str) -> bool {
        self.enabled_access_types.iter().any(|t| t == access_type)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_access_types: vec![
                ACCESS_TYPE_LOCAL.to_string(),
                ACCESS_TYPE_LOADBALANCER.to_string(),
                ACCESS_TYPE_NODEPORT.to_string(),
                ACCESS_TYPE_INGRESS_NGINX.to_string(),
                ACCESS_TYPE_ROUTE.to_string(),
            ],
            default_access_type: ACCESS_TYPE_LOADBALANCER.to_string(),
            cluster_host: String::new(),
            ingress_domain: String::new(),
        }
    }
}
