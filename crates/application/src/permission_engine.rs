use std::collections::BTreeMap;
use std::sync::Arc;

use tavola_core::{AppError, AppResult, OrganisationId, ProjectId, UserIdentity};
use tavola_domain::{Ability, Action, PermissionGrant, Subject};
use tokio::sync::Mutex;

use crate::permission_ports::{EffectivePermissionRow, PermissionRepository, RoleCatalogEntry};

#[cfg(test)]
mod tests;

/// Effective permissions for one organisation the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgPermissionGroup {
    /// Role backing the organisation membership.
    pub role: String,
    /// Role description, if any.
    pub description: Option<String>,
    /// Organisation id.
    pub organisation_id: OrganisationId,
    /// Organisation display name.
    pub organisation_name: String,
    /// Grants in row order; duplicates are tolerated.
    pub permissions: Vec<PermissionGrant>,
}

/// Effective permissions for one project the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPermissionGroup {
    /// Role resolved through the project membership.
    pub role: String,
    /// Role description, if any.
    pub description: Option<String>,
    /// Project id.
    pub project_id: ProjectId,
    /// Project display name.
    pub project_name: String,
    /// Grants in row order; duplicates are tolerated.
    pub permissions: Vec<PermissionGrant>,
}

/// Resolved permissions for one request, grouped by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// Groups keyed by every organisation the user belongs to.
    pub org_permissions: Vec<OrgPermissionGroup>,
    /// Groups keyed by every project the user belongs to.
    pub project_permissions: Vec<ProjectPermissionGroup>,
}

impl PermissionSnapshot {
    fn org_group(&self, organisation_id: OrganisationId) -> Option<&OrgPermissionGroup> {
        self.org_permissions
            .iter()
            .find(|group| group.organisation_id == organisation_id)
    }

    fn project_group(&self, project_id: ProjectId) -> Option<&ProjectPermissionGroup> {
        self.project_permissions
            .iter()
            .find(|group| group.project_id == project_id)
    }
}

enum ResolutionState {
    Pending,
    Resolved(Arc<PermissionSnapshot>),
    Failed(AppError),
}

/// Request-scoped permission engine.
///
/// One instance is built per inbound request. The first permission question
/// triggers the single aggregating query; every later question on the same
/// instance reuses the memoised snapshot. Membership existence checks go to
/// the store directly so they stay valid even before resolution has run.
pub struct PermissionEngine {
    identity: UserIdentity,
    repository: Arc<dyn PermissionRepository>,
    resolution: Mutex<ResolutionState>,
}

impl PermissionEngine {
    /// Creates an engine for the request's authenticated identity.
    ///
    /// Fails with [`AppError::Unauthorized`] when the authentication
    /// middleware attached no identity.
    pub fn for_request(
        identity: Option<UserIdentity>,
        repository: Arc<dyn PermissionRepository>,
    ) -> AppResult<Self> {
        let identity = identity.ok_or_else(|| {
            AppError::Unauthorized("no authenticated identity attached to the request".to_owned())
        })?;

        Ok(Self {
            identity,
            repository,
            resolution: Mutex::new(ResolutionState::Pending),
        })
    }

    /// Returns the identity the engine was built for.
    #[must_use]
    pub fn identity(&self) -> UserIdentity {
        self.identity
    }

    /// Returns whether the user holds a membership row in the organisation.
    pub async fn is_org_member(&self, organisation_id: OrganisationId) -> AppResult<bool> {
        self.repository
            .is_org_member(self.identity.user_id(), organisation_id)
            .await
    }

    /// Returns whether the user holds a membership row in the project.
    pub async fn is_project_member(&self, project_id: ProjectId) -> AppResult<bool> {
        self.repository
            .is_project_member(self.identity.user_id(), project_id)
            .await
    }

    /// Answers whether the user may perform the action on the subject within
    /// the organisation.
    ///
    /// Denial is the `false` value; only store failures surface as errors.
    pub async fn has_org_permission(
        &self,
        action: Action,
        subject: Subject,
        organisation_id: Option<OrganisationId>,
    ) -> AppResult<bool> {
        if self.identity.is_super_admin() {
            return Ok(true);
        }

        let Some(organisation_id) = organisation_id else {
            return Ok(false);
        };

        if !self.is_org_member(organisation_id).await? {
            return Ok(false);
        }

        let snapshot = self.snapshot().await?;
        let Some(group) = snapshot.org_group(organisation_id) else {
            return Ok(false);
        };

        Ok(Ability::from_grants(&group.permissions).allows(action, subject))
    }

    /// Answers whether the user may perform the action on the subject within
    /// the project.
    pub async fn has_project_permission(
        &self,
        action: Action,
        subject: Subject,
        project_id: Option<ProjectId>,
    ) -> AppResult<bool> {
        if self.identity.is_super_admin() {
            return Ok(true);
        }

        let Some(project_id) = project_id else {
            return Ok(false);
        };

        if !self.is_project_member(project_id).await? {
            return Ok(false);
        }

        let snapshot = self.snapshot().await?;
        let Some(group) = snapshot.project_group(project_id) else {
            return Ok(false);
        };

        Ok(Ability::from_grants(&group.permissions).allows(action, subject))
    }

    /// Returns the resolved permission group for the organisation, if the
    /// user belongs to it. Intended for display and audit, not for access
    /// decisions.
    pub async fn get_org_permissions(
        &self,
        organisation_id: OrganisationId,
    ) -> AppResult<Option<OrgPermissionGroup>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.org_group(organisation_id).cloned())
    }

    /// Returns the resolved permission group for the project, if the user
    /// belongs to it.
    pub async fn get_project_permissions(
        &self,
        project_id: ProjectId,
    ) -> AppResult<Option<ProjectPermissionGroup>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.project_group(project_id).cloned())
    }

    /// Lists the administrative role catalog.
    ///
    /// This query is not filtered by the current user and bypasses the
    /// per-request cache.
    pub async fn get_all_permissions(
        &self,
        organisation_id: Option<OrganisationId>,
    ) -> AppResult<Vec<RoleCatalogEntry>> {
        self.repository.list_role_catalog(organisation_id).await
    }

    /// Returns the memoised snapshot, resolving it on first access.
    ///
    /// The lock is held across the query so concurrent questions on the same
    /// instance still issue exactly one round trip. A failed resolution is
    /// replayed as the same error without querying again: partial results
    /// would silently weaken access decisions, so the engine fails closed.
    async fn snapshot(&self) -> AppResult<Arc<PermissionSnapshot>> {
        let mut state = self.resolution.lock().await;

        match &*state {
            ResolutionState::Resolved(snapshot) => Ok(Arc::clone(snapshot)),
            ResolutionState::Failed(error) => Err(error.clone()),
            ResolutionState::Pending => {
                match self
                    .repository
                    .list_effective_permissions(self.identity.user_id())
                    .await
                {
                    Ok(rows) => {
                        let snapshot = Arc::new(fold_effective_rows(rows));
                        *state = ResolutionState::Resolved(Arc::clone(&snapshot));
                        Ok(snapshot)
                    }
                    Err(error) => {
                        *state = ResolutionState::Failed(error.clone());
                        Err(error)
                    }
                }
            }
        }
    }
}

/// Folds flat query rows into per-organisation and per-project groups.
///
/// Grouping is keyed by id, so the output is identical for any ordering of
/// the same row multiset up to group order, which is fixed by the key.
/// Within a group, grants keep row order.
fn fold_effective_rows(rows: Vec<EffectivePermissionRow>) -> PermissionSnapshot {
    let mut org_groups: BTreeMap<OrganisationId, OrgPermissionGroup> = BTreeMap::new();
    let mut project_groups: BTreeMap<ProjectId, ProjectPermissionGroup> = BTreeMap::new();

    for row in rows {
        let grant = PermissionGrant {
            action: row.action,
            subject: row.subject,
            conditions: row.conditions,
        };

        org_groups
            .entry(row.organisation_id)
            .or_insert_with(|| OrgPermissionGroup {
                role: row.role_name.clone(),
                description: row.role_description.clone(),
                organisation_id: row.organisation_id,
                organisation_name: row.organisation_name.clone(),
                permissions: Vec::new(),
            })
            .permissions
            .push(grant.clone());

        if let (Some(project_id), Some(project_name)) = (row.project_id, row.project_name) {
            project_groups
                .entry(project_id)
                .or_insert_with(|| ProjectPermissionGroup {
                    role: row.role_name.clone(),
                    description: row.role_description.clone(),
                    project_id,
                    project_name,
                    permissions: Vec::new(),
                })
                .permissions
                .push(grant);
        }
    }

    PermissionSnapshot {
        org_permissions: org_groups.into_values().collect(),
        project_permissions: project_groups.into_values().collect(),
    }
}
