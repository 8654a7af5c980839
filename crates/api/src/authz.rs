//! API-side authorization guard for commands.
//!
//! This enforces authorization at the command boundary (before dispatch),
//! while keeping domain aggregates and infra auth-agnostic.

use stockroom_auth::{
    authorize, AuthzError, CommandAuthorization, Permission, Principal, TenantMembership,
};
use stockroom_infra::projections::default_role_permissions;

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
///
/// This is intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Resolve grant strings for the token's roles via the shipped role catalog.
fn permissions_from_roles(roles: &[stockroom_auth::Role]) -> Vec<Permission> {
    let mut perms: Vec<Permission> = Vec::new();
    for role in roles {
        for grant in default_role_permissions(role.as_str()) {
            if !perms.iter().any(|p| p.as_str() == grant) {
                perms.push(Permission::new(grant));
            }
        }
    }
    perms
}
