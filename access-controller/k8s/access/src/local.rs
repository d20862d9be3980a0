use crate::manager::{AccessType, SecuredAccessManager};
use async_trait::async_trait;
use skupper_access_controller_k8s_api::{SecuredAccess, STATUS_OK};

/// Intra-cluster access only: the derived service is the whole story, so
/// there are no endpoints to resolve.
pub(crate) struct LocalAccess;

#[async_trait]
impl AccessType for LocalAccess {
    async fn realise(&self, _manager: &mut SecuredAccessManager, sa: &mut SecuredAccess) -> bool {
        sa.set_status_message(STATUS_OK)
    }

    async fn resolve(&self, _manager: &mut SecuredAccessManager, _sa: &mut SecuredAccess) -> bool {
        false
    }
}
