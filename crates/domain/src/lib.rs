//! Domain model for multi-tenant permission resolution.

#![forbid(unsafe_code)]

mod ability;
mod permission;
mod tenancy;

pub use ability::Ability;
pub use permission::{Action, PermissionGrant, RoleScope, Subject};
pub use tenancy::{OWNER_ROLE_NAME, OwnerMutation, ensure_owner_remains};
