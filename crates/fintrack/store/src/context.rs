//! Turning an authenticated principal into a tenant store handle

use fintrack_types::Principal;
use tracing::warn;

use crate::connector::Connector;
use crate::error::ResolutionError;
use crate::registry::{TenantHandle, TenantRegistry};

/// Per-request pairing of who is calling and which store they route to.
///
/// Built fresh for each request and dropped with it; nothing here is cached
/// beyond what the registry already holds.
pub struct TenantContext<C: Connector> {
    pub principal: Principal,
    pub handle: TenantHandle<C>,
}

impl<C: Connector> Clone for TenantContext<C> {
    fn clone(&self) -> Self {
        Self {
            principal: self.principal.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for TenantContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("principal", &self.principal)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Resolve the tenant store for `principal`.
///
/// A principal without a tenant id is refused outright; it is never routed
/// to a default or shared store.
pub async fn resolve_tenant_handle<C: Connector>(
    registry: &TenantRegistry<C>,
    principal: &Principal,
) -> Result<TenantHandle<C>, ResolutionError> {
    let Some(tenant) = principal.tenant_id.as_ref() else {
        warn!(account = %principal.account_id, "principal has no tenant id");
        return Err(ResolutionError::MissingTenant {
            account: principal.account_id,
        });
    };

    registry
        .resolve(tenant)
        .await
        .map_err(ResolutionError::Unavailable)
}

/// Resolve and wrap into a [`TenantContext`].
pub async fn tenant_context<C: Connector>(
    registry: &TenantRegistry<C>,
    principal: Principal,
) -> Result<TenantContext<C>, ResolutionError> {
    let handle = resolve_tenant_handle(registry, &principal).await?;
    Ok(TenantContext { principal, handle })
}
