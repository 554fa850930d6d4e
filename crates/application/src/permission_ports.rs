use async_trait::async_trait;
use tavola_core::{AppResult, OrganisationId, ProjectId, RoleId, UserId};
use tavola_domain::{Action, PermissionGrant, RoleScope, Subject};

/// One flat row produced by the aggregating permission query.
///
/// Rows always carry the organisation the membership belongs to; the project
/// columns are filled when the same role assignment also resolves through a
/// project membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePermissionRow {
    /// Name of the role backing the membership.
    pub role_name: String,
    /// Role description, if any.
    pub role_description: Option<String>,
    /// Organisation the membership belongs to.
    pub organisation_id: OrganisationId,
    /// Organisation display name.
    pub organisation_name: String,
    /// Project resolved through the project membership join, if any.
    pub project_id: Option<ProjectId>,
    /// Project display name, present when `project_id` is.
    pub project_name: Option<String>,
    /// Granted action.
    pub action: Action,
    /// Granted subject.
    pub subject: Subject,
    /// Optional structured conditions carried through from storage.
    pub conditions: Option<serde_json::Value>,
}

/// One role with its grants, as listed by the administrative catalog query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCatalogEntry {
    /// Stable role id.
    pub role_id: RoleId,
    /// Role name.
    pub name: String,
    /// Role description, if any.
    pub description: Option<String>,
    /// Hierarchies the role may be assigned in.
    pub scope: RoleScope,
    /// Whether the role is seeded and shared across organisations.
    pub is_system_role: bool,
    /// Owning organisation for custom roles, `None` for system roles.
    pub organisation_id: Option<OrganisationId>,
    /// Grants attached to the role.
    pub permissions: Vec<PermissionGrant>,
}

/// Repository port for permission resolution and membership lookups.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Returns every effective permission row for the user, across both
    /// membership hierarchies, in one round trip.
    async fn list_effective_permissions(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<EffectivePermissionRow>>;

    /// Returns whether the user holds an organisation membership row.
    async fn is_org_member(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> AppResult<bool>;

    /// Returns whether the user holds a project membership row.
    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> AppResult<bool>;

    /// Lists the role catalog for administrative display.
    ///
    /// Unscoped by user; with an organisation id the catalog covers system
    /// roles plus that organisation's custom roles.
    async fn list_role_catalog(
        &self,
        organisation_id: Option<OrganisationId>,
    ) -> AppResult<Vec<RoleCatalogEntry>>;
}
