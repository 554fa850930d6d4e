use std::collections::HashMap;

use async_trait::async_trait;
use tavola_application::{
    EffectivePermissionRow, MembershipRepository, PermissionRepository, RoleCatalogEntry,
};
use tavola_core::{AppError, AppResult, OrganisationId, ProjectId, RoleId, UserId};
use tavola_domain::{OWNER_ROLE_NAME, OwnerMutation, PermissionGrant, RoleScope, ensure_owner_remains};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRole {
    name: String,
    description: Option<String>,
    scope: RoleScope,
    is_system_role: bool,
    organisation_id: Option<OrganisationId>,
    grants: Vec<PermissionGrant>,
}

#[derive(Debug, Default)]
struct StoreState {
    organisations: HashMap<OrganisationId, String>,
    projects: HashMap<ProjectId, (OrganisationId, String)>,
    roles: HashMap<RoleId, StoredRole>,
    members: HashMap<(UserId, OrganisationId), RoleId>,
    project_members: HashMap<(UserId, ProjectId), RoleId>,
}

impl StoreState {
    fn remaining_owner_count(&self, organisation_id: OrganisationId, affected: &[UserId]) -> u64 {
        self.members
            .iter()
            .filter(|((user_id, member_org), role_id)| {
                *member_org == organisation_id
                    && !affected.contains(user_id)
                    && self
                        .roles
                        .get(*role_id)
                        .is_some_and(|role| role.is_system_role && role.name == OWNER_ROLE_NAME)
            })
            .count() as u64
    }
}

/// In-memory permission store for tests and local development.
///
/// Implements both the resolution port and the guarded membership port over
/// the same state, so the owner invariant behaves like the transactional
/// Postgres adapter: the count check and the mutation see one snapshot.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    state: RwLock<StoreState>,
}

impl InMemoryPermissionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Adds an organisation.
    pub async fn add_organisation(&self, organisation_id: OrganisationId, name: &str) {
        let mut state = self.state.write().await;
        state.organisations.insert(organisation_id, name.to_owned());
    }

    /// Adds a project inside an organisation.
    pub async fn add_project(
        &self,
        project_id: ProjectId,
        organisation_id: OrganisationId,
        name: &str,
    ) {
        let mut state = self.state.write().await;
        state
            .projects
            .insert(project_id, (organisation_id, name.to_owned()));
    }

    /// Adds a role with its grants.
    pub async fn add_role(
        &self,
        role_id: RoleId,
        name: &str,
        scope: RoleScope,
        is_system_role: bool,
        organisation_id: Option<OrganisationId>,
        grants: Vec<PermissionGrant>,
    ) {
        let mut state = self.state.write().await;
        state.roles.insert(
            role_id,
            StoredRole {
                name: name.to_owned(),
                description: None,
                scope,
                is_system_role,
                organisation_id,
                grants,
            },
        );
    }

    /// Adds an organisation membership row.
    pub async fn add_member(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
        role_id: RoleId,
    ) {
        let mut state = self.state.write().await;
        state.members.insert((user_id, organisation_id), role_id);
    }

    /// Adds a project membership row.
    pub async fn add_project_member(&self, user_id: UserId, project_id: ProjectId, role_id: RoleId) {
        let mut state = self.state.write().await;
        state.project_members.insert((user_id, project_id), role_id);
    }
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionStore {
    async fn list_effective_permissions(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<EffectivePermissionRow>> {
        let state = self.state.read().await;

        let mut memberships: Vec<(OrganisationId, RoleId)> = state
            .members
            .iter()
            .filter_map(|((member_user, organisation_id), role_id)| {
                (*member_user == user_id).then_some((*organisation_id, *role_id))
            })
            .collect();
        memberships.sort();

        let mut rows = Vec::new();
        for (organisation_id, role_id) in memberships {
            let Some(role) = state.roles.get(&role_id) else {
                continue;
            };
            let Some(organisation_name) = state.organisations.get(&organisation_id) else {
                continue;
            };

            // Mirrors the SQL left join: the same role assignment resolved
            // through a project membership contributes project rows too.
            let mut joined_projects: Vec<(ProjectId, String)> = state
                .project_members
                .iter()
                .filter(|((member_user, _), project_role_id)| {
                    *member_user == user_id && **project_role_id == role_id
                })
                .filter_map(|((_, project_id), _)| {
                    state
                        .projects
                        .get(project_id)
                        .map(|(_, name)| (*project_id, name.clone()))
                })
                .collect();
            joined_projects.sort();

            for grant in &role.grants {
                rows.push(EffectivePermissionRow {
                    role_name: role.name.clone(),
                    role_description: role.description.clone(),
                    organisation_id,
                    organisation_name: organisation_name.clone(),
                    project_id: None,
                    project_name: None,
                    action: grant.action,
                    subject: grant.subject,
                    conditions: grant.conditions.clone(),
                });

                for (project_id, project_name) in &joined_projects {
                    rows.push(EffectivePermissionRow {
                        role_name: role.name.clone(),
                        role_description: role.description.clone(),
                        organisation_id,
                        organisation_name: organisation_name.clone(),
                        project_id: Some(*project_id),
                        project_name: Some(project_name.clone()),
                        action: grant.action,
                        subject: grant.subject,
                        conditions: grant.conditions.clone(),
                    });
                }
            }
        }

        Ok(rows)
    }

    async fn is_org_member(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> AppResult<bool> {
        let state = self.state.read().await;
        Ok(state.members.contains_key(&(user_id, organisation_id)))
    }

    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> AppResult<bool> {
        let state = self.state.read().await;
        Ok(state.project_members.contains_key(&(user_id, project_id)))
    }

    async fn list_role_catalog(
        &self,
        organisation_id: Option<OrganisationId>,
    ) -> AppResult<Vec<RoleCatalogEntry>> {
        let state = self.state.read().await;

        let mut entries: Vec<RoleCatalogEntry> = state
            .roles
            .iter()
            .filter(|(_, role)| match organisation_id {
                Some(organisation_id) => {
                    role.is_system_role || role.organisation_id == Some(organisation_id)
                }
                None => true,
            })
            .map(|(role_id, role)| RoleCatalogEntry {
                role_id: *role_id,
                name: role.name.clone(),
                description: role.description.clone(),
                scope: role.scope,
                is_system_role: role.is_system_role,
                organisation_id: role.organisation_id,
                permissions: role.grants.clone(),
            })
            .collect();
        entries.sort_by(|left, right| left.name.cmp(&right.name));

        Ok(entries)
    }
}

#[async_trait]
impl MembershipRepository for InMemoryPermissionStore {
    async fn remove_members(
        &self,
        organisation_id: OrganisationId,
        user_ids: &[UserId],
    ) -> AppResult<()> {
        let mut state = self.state.write().await;

        ensure_owner_remains(
            OwnerMutation::Remove,
            organisation_id,
            state.remaining_owner_count(organisation_id, user_ids),
        )?;

        for user_id in user_ids {
            state.members.remove(&(*user_id, organisation_id));
        }

        let StoreState {
            projects,
            project_members,
            ..
        } = &mut *state;
        project_members.retain(|(user_id, project_id), _| {
            let in_organisation = projects
                .get(project_id)
                .is_some_and(|(project_org, _)| *project_org == organisation_id);
            !(user_ids.contains(user_id) && in_organisation)
        });

        Ok(())
    }

    async fn change_member_role(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;

        let role = state.roles.get(&role_id).ok_or_else(|| {
            AppError::NotFound(format!("role '{role_id}' was not found"))
        })?;
        if !role.scope.covers_organisation() {
            return Err(AppError::Validation(format!(
                "role '{}' is not assignable through organisation membership",
                role.name
            )));
        }

        if !state.members.contains_key(&(user_id, organisation_id)) {
            return Err(AppError::NotFound(format!(
                "user '{user_id}' is not a member of organisation '{organisation_id}'"
            )));
        }

        if !(role.is_system_role && role.name == OWNER_ROLE_NAME) {
            ensure_owner_remains(
                OwnerMutation::Update,
                organisation_id,
                state.remaining_owner_count(organisation_id, &[user_id]),
            )?;
        }

        state.members.insert((user_id, organisation_id), role_id);
        Ok(())
    }
}
