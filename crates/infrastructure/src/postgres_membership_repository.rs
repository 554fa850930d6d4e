use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tavola_application::MembershipRepository;
use tavola_core::{AppError, AppResult, OrganisationId, RoleId, UserId};
use tavola_domain::{OWNER_ROLE_NAME, OwnerMutation, RoleScope, ensure_owner_remains};
use uuid::Uuid;


/// PostgreSQL-backed repository for guarded membership mutations.
///
/// The owner-retention check runs inside the mutation's own transaction with
/// the organisation's owner membership rows locked, so concurrent removals or
/// demotions serialise on those rows instead of racing past the count.
#[derive(Clone)]
pub struct PostgresMembershipRepository {
    pool: PgPool,
}

impl PostgresMembershipRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    name: String,
    scope: String,
    is_system_role: bool,
}

/// Locks the organisation's owner membership rows and returns how many
/// owners remain once the affected users are excluded.
async fn remaining_owner_count(
    transaction: &mut Transaction<'_, Postgres>,
    organisation_id: OrganisationId,
    affected: &[UserId],
) -> AppResult<u64> {
    let owner_ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT members.user_id
        FROM members
        INNER JOIN roles
            ON roles.id = members.role_id
        WHERE members.organisation_id = $1
            AND roles.name = $2
            AND roles.is_system_role
        FOR UPDATE OF members
        "#,
    )
    .bind(organisation_id.as_uuid())
    .bind(OWNER_ROLE_NAME)
    .fetch_all(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to count owners: {error}")))?;

    let affected: HashSet<Uuid> = affected.iter().map(UserId::as_uuid).collect();
    Ok(owner_ids
        .iter()
        .filter(|user_id| !affected.contains(user_id))
        .count() as u64)
}

fn refuse_with_warning(error: AppError, organisation_id: OrganisationId) -> AppError {
    if matches!(error, AppError::PreconditionFailed(_)) {
        tracing::warn!(
            organisation_id = %organisation_id,
            "owner invariant refused a membership mutation"
        );
    }
    error
}

#[async_trait]
impl MembershipRepository for PostgresMembershipRepository {
    async fn remove_members(
        &self,
        organisation_id: OrganisationId,
        user_ids: &[UserId],
    ) -> AppResult<()> {
        let mut transaction =
            self.pool.begin().await.map_err(|error| {
                AppError::Internal(format!("failed to begin transaction: {error}"))
            })?;

        let remaining = remaining_owner_count(&mut transaction, organisation_id, user_ids).await?;
        ensure_owner_remains(OwnerMutation::Remove, organisation_id, remaining)
            .map_err(|error| refuse_with_warning(error, organisation_id))?;

        let affected: Vec<Uuid> = user_ids.iter().map(UserId::as_uuid).collect();

        sqlx::query(
            r#"
            DELETE FROM project_members
            USING projects
            WHERE project_members.project_id = projects.id
                AND projects.organisation_id = $1
                AND project_members.user_id = ANY($2)
            "#,
        )
        .bind(organisation_id.as_uuid())
        .bind(affected.as_slice())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to remove project memberships: {error}"))
        })?;

        sqlx::query(
            r#"
            DELETE FROM members
            WHERE organisation_id = $1
                AND user_id = ANY($2)
            "#,
        )
        .bind(organisation_id.as_uuid())
        .bind(affected.as_slice())
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to remove members: {error}")))?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }

    async fn change_member_role(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> AppResult<()> {
        let mut transaction =
            self.pool.begin().await.map_err(|error| {
                AppError::Internal(format!("failed to begin transaction: {error}"))
            })?;

        let role = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT name, scope, is_system_role
            FROM roles
            WHERE id = $1
                AND (organisation_id IS NULL OR organisation_id = $2)
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(organisation_id.as_uuid())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to resolve role: {error}")))?
        .ok_or_else(|| AppError::NotFound(format!("role '{role_id}' was not found")))?;

        let scope = RoleScope::from_str(role.scope.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode scope for role '{}': {error}",
                role.name
            ))
        })?;
        if !scope.covers_organisation() {
            return Err(AppError::Validation(format!(
                "role '{}' is not assignable through organisation membership",
                role.name
            )));
        }

        // Only the system owner role keeps the invariant satisfied; a custom
        // role that happens to share the name does not.
        if !(role.is_system_role && role.name == OWNER_ROLE_NAME) {
            let remaining =
                remaining_owner_count(&mut transaction, organisation_id, &[user_id]).await?;
            ensure_owner_remains(OwnerMutation::Update, organisation_id, remaining)
                .map_err(|error| refuse_with_warning(error, organisation_id))?;
        }

        let rows_affected = sqlx::query(
            r#"
            UPDATE members
            SET role_id = $1
            WHERE organisation_id = $2
                AND user_id = $3
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(organisation_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update member role: {error}")))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound(format!(
                "user '{user_id}' is not a member of organisation '{organisation_id}'"
            )));
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }
}
