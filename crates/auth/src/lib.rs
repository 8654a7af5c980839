//! `stockroom-auth` — authentication and authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage. Token
//! decoding lives behind [`JwtValidator`]; everything else is pure policy
//! plus the event-sourced [`user::User`] aggregate.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod user;

pub use authorize::{authorize, AuthzError, CommandAuthorization, Principal};
pub use claims::{
    Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims,
};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
pub use user::{
    ActivateUser, AssignRole, CreateUser, RevokeRole, RoleAssigned, RoleRevoked, SuspendUser,
    User, UserActivated, UserCommand, UserCreated, UserEvent, UserId, UserStatus, UserSuspended,
};
