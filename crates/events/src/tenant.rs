use stockroom_core::TenantId;

use crate::envelope::EventEnvelope;

/// Anything that carries the tenant it belongs to.
///
/// Subscribers filter on this before touching tenant-scoped state.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}
