use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tavola_application::{
    EffectivePermissionRow, PermissionRepository, RoleCatalogEntry,
};
use tavola_core::{AppError, AppResult, OrganisationId, ProjectId, RoleId, UserId};
use tavola_domain::{Action, PermissionGrant, RoleScope, Subject};
use uuid::Uuid;


/// PostgreSQL-backed repository for permission resolution and membership
/// lookups.
#[derive(Clone)]
pub struct PostgresPermissionRepository {
    pool: PgPool,
}

impl PostgresPermissionRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EffectiveRow {
    role_name: String,
    role_description: Option<String>,
    organisation_id: Uuid,
    organisation_name: String,
    project_id: Option<Uuid>,
    project_name: Option<String>,
    action: String,
    resource_type: String,
    conditions: Option<String>,
}

impl EffectiveRow {
    fn into_port_row(self, user_id: UserId) -> AppResult<EffectivePermissionRow> {
        let action = Action::from_str(self.action.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode action '{}' for user '{user_id}': {error}",
                self.action
            ))
        })?;
        let subject = Subject::from_str(self.resource_type.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode resource type '{}' for user '{user_id}': {error}",
                self.resource_type
            ))
        })?;
        let conditions = decode_conditions(self.conditions.as_deref())?;

        Ok(EffectivePermissionRow {
            role_name: self.role_name,
            role_description: self.role_description,
            organisation_id: OrganisationId::from_uuid(self.organisation_id),
            organisation_name: self.organisation_name,
            project_id: self.project_id.map(ProjectId::from_uuid),
            project_name: self.project_name,
            action,
            subject,
            conditions,
        })
    }
}

#[derive(Debug, FromRow)]
struct CatalogRow {
    role_id: Uuid,
    role_name: String,
    role_description: Option<String>,
    scope: String,
    is_system_role: bool,
    organisation_id: Option<Uuid>,
    action: Option<String>,
    resource_type: Option<String>,
    conditions: Option<String>,
}

fn decode_conditions(stored: Option<&str>) -> AppResult<Option<serde_json::Value>> {
    match stored {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(|error| {
            AppError::Internal(format!("failed to decode grant conditions: {error}"))
        }),
    }
}

#[async_trait]
impl PermissionRepository for PostgresPermissionRepository {
    async fn list_effective_permissions(
        &self,
        user_id: UserId,
    ) -> AppResult<Vec<EffectivePermissionRow>> {
        let rows = sqlx::query_as::<_, EffectiveRow>(
            r#"
            SELECT
                roles.name AS role_name,
                roles.description AS role_description,
                members.organisation_id,
                organisations.name AS organisation_name,
                project_members.project_id,
                projects.name AS project_name,
                permissions.action,
                permissions.resource_type,
                permissions.conditions::text AS conditions
            FROM members
            INNER JOIN roles
                ON roles.id = members.role_id
            INNER JOIN organisations
                ON organisations.id = members.organisation_id
            INNER JOIN role_permissions
                ON role_permissions.role_id = roles.id
            INNER JOIN permissions
                ON permissions.id = role_permissions.permission_id
            LEFT JOIN project_members
                ON project_members.user_id = members.user_id
                AND project_members.role_id = roles.id
            LEFT JOIN projects
                ON projects.id = project_members.project_id
            WHERE members.user_id = $1
            ORDER BY members.organisation_id, project_members.project_id, permissions.action, permissions.resource_type
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load effective permissions: {error}"))
        })?;

        tracing::debug!(
            user_id = %user_id,
            row_count = rows.len(),
            "resolved effective permissions"
        );

        rows.into_iter()
            .map(|row| row.into_port_row(user_id))
            .collect()
    }

    async fn is_org_member(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM members
                WHERE user_id = $1 AND organisation_id = $2
            )
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(organisation_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to resolve organisation membership: {error}"))
        })
    }

    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM project_members
                WHERE user_id = $1 AND project_id = $2
            )
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(project_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to resolve project membership: {error}"))
        })
    }

    async fn list_role_catalog(
        &self,
        organisation_id: Option<OrganisationId>,
    ) -> AppResult<Vec<RoleCatalogEntry>> {
        let rows = sqlx::query_as::<_, CatalogRow>(
            r#"
            SELECT
                roles.id AS role_id,
                roles.name AS role_name,
                roles.description AS role_description,
                roles.scope,
                roles.is_system_role,
                roles.organisation_id,
                permissions.action,
                permissions.resource_type,
                permissions.conditions::text AS conditions
            FROM roles
            LEFT JOIN role_permissions
                ON role_permissions.role_id = roles.id
            LEFT JOIN permissions
                ON permissions.id = role_permissions.permission_id
            WHERE roles.is_system_role
                OR ($1::uuid IS NULL OR roles.organisation_id = $1)
            ORDER BY roles.name, permissions.action, permissions.resource_type
            "#,
        )
        .bind(organisation_id.map(|value| value.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list role catalog: {error}")))?;

        aggregate_catalog_rows(rows)
    }
}

fn aggregate_catalog_rows(rows: Vec<CatalogRow>) -> AppResult<Vec<RoleCatalogEntry>> {
    let mut entries: BTreeMap<(String, Uuid), RoleCatalogEntry> = BTreeMap::new();

    for row in rows {
        let scope = RoleScope::from_str(row.scope.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode scope for role '{}': {error}",
                row.role_name
            ))
        })?;

        let entry = entries
            .entry((row.role_name.clone(), row.role_id))
            .or_insert_with(|| RoleCatalogEntry {
                role_id: RoleId::from_uuid(row.role_id),
                name: row.role_name.clone(),
                description: row.role_description.clone(),
                scope,
                is_system_role: row.is_system_role,
                organisation_id: row.organisation_id.map(OrganisationId::from_uuid),
                permissions: Vec::new(),
            });

        if let (Some(action), Some(resource_type)) = (row.action, row.resource_type) {
            let action = Action::from_str(action.as_str()).map_err(|error| {
                AppError::Internal(format!(
                    "failed to decode action '{action}' in role catalog: {error}"
                ))
            })?;
            let subject = Subject::from_str(resource_type.as_str()).map_err(|error| {
                AppError::Internal(format!(
                    "failed to decode resource type '{resource_type}' in role catalog: {error}"
                ))
            })?;

            entry.permissions.push(PermissionGrant {
                action,
                subject,
                conditions: decode_conditions(row.conditions.as_deref())?,
            });
        }
    }

    Ok(entries.into_values().collect())
}
