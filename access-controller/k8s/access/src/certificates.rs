use anyhow::Result;
use async_trait::async_trait;
use skupper_access_controller_k8s_api::OwnerReference;

/// Certificate issuance, delegated to an external issuer (the runtime wires
/// this to cert-manager). The manager only requests; materialization is
/// asynchronous and out of scope here.
#[async_trait]
pub trait CertificateManager: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn ensure(
        &self,
        namespace: &str,
        name: &str,
        issuer: &str,
        subject: &str,
        hosts: &[String],
        client_auth: bool,
        server_auth: bool,
        owner_refs: Vec<OwnerReference>,
    ) -> Result<()>;
}
