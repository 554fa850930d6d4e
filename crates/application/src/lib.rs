//! Application services and ports for the permission engine.

#![forbid(unsafe_code)]

mod membership_ports;
mod membership_service;
mod permission_engine;
mod permission_ports;

pub use membership_ports::MembershipRepository;
pub use membership_service::MembershipService;
pub use permission_engine::{
    OrgPermissionGroup, PermissionEngine, PermissionSnapshot, ProjectPermissionGroup,
};
pub use permission_ports::{EffectivePermissionRow, PermissionRepository, RoleCatalogEntry};
