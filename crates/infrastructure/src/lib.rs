//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_permission_store;
mod postgres_membership_repository;
mod postgres_permission_repository;

pub use in_memory_permission_store::InMemoryPermissionStore;
pub use postgres_membership_repository::PostgresMembershipRepository;
pub use postgres_permission_repository::PostgresPermissionRepository;
