use anyhow::Result;
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use skupper_access_controller_k8s_access::CertificateManager;
use skupper_access_controller_k8s_api::{
    labels, Certificate, CertificateSpec, IssuerReference, ObjectMeta, OwnerReference,
};

/// Realises certificate requests as cert-manager.io/v1 Certificate objects;
/// cert-manager materializes the signed secret asynchronously.
pub(crate) struct CertManagerCertificates {
    client: kube::Client,
}

impl CertManagerCertificates {
    pub(crate) fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertificateManager for CertManagerCertificates {
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
    ) -> Result<()> {
        let mut usages = Vec::new();
        if client_auth {
            usages.push("client auth".to_string());
        }
        if server_auth {
            usages.push("server auth".to_string());
        }
        let spec = CertificateSpec {
            secret_name: name.to_string(),
            common_name: Some(subject.to_string()),
            dns_names: hosts.to_vec(),
            issuer_ref: IssuerReference {
                name: issuer.to_string(),
                kind: Some("Issuer".to_string()),
                group: None,
            },
            usages,
        };

        let api: Api<Certificate> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(mut existing) => {
                if existing.spec == spec {
                    return Ok(());
                }
                existing.spec = spec;
                api.replace(name, &PostParams::default(), &existing).await?;
                Ok(())
            }
            None => {
                let certificate = Certificate {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        labels: Some(labels::controlled_labels()),
                        annotations: Some(labels::controlled_annotations()),
                        owner_references: Some(owner_refs),
                        ..Default::default()
                    },
                    spec,
                };
                api.create(&PostParams::default(), &certificate).await?;
                Ok(())
            }
        }
    }
}
