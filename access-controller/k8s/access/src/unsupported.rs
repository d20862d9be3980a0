use crate::manager::{AccessType, SecuredAccessManager};
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{ResourceExt, SecuredAccess};

/// Fallback for access types that are unrecognized or not enabled: no
/// derived resources, no endpoints. The condition is reported through the
/// status message, never as an error.
pub(crate) struct UnsupportedAccess;

#[async_trait]
impl AccessType for UnsupportedAccess {
    async fn realise(&self, _manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        tracing::info!(
            namespace = %sa.namespace().unwrap_or_default(),
            name = %sa.name_unchecked(),
            access_type = %sa.spec.access_type,
            "unsupported access type"
        );
        sa.set_status_message("unsupported access type")
    }

    async fn resolve(&self, _manager: &mut SecuredAccessManager, _sa: &mut SecuredAccess) -> bool {
        false
    }
}
