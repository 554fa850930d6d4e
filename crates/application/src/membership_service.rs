use std::sync::Arc;

use tavola_core::{AppError, AppResult, OrganisationId, RoleId, UserId};
use tavola_domain::{Action, Subject};

use crate::membership_ports::MembershipRepository;
use crate::permission_engine::PermissionEngine;

/// Application service for guarded organisation membership mutations.
///
/// Permission gating uses the caller's request-scoped engine; the owner
/// invariant itself is enforced transactionally by the repository.
#[derive(Clone)]
pub struct MembershipService {
    repository: Arc<dyn MembershipRepository>,
}

impl MembershipService {
    /// Creates a membership service from a repository implementation.
    #[must_use]
    pub fn new(repository: Arc<dyn MembershipRepository>) -> Self {
        Self { repository }
    }

    /// Removes members from an organisation.
    ///
    /// Refused with [`AppError::PreconditionFailed`] when the removal would
    /// leave the organisation without an owner, even if the actor holds the
    /// required permission.
    pub async fn remove_members(
        &self,
        actor: &PermissionEngine,
        organisation_id: OrganisationId,
        user_ids: &[UserId],
    ) -> AppResult<()> {
        if user_ids.is_empty() {
            return Err(AppError::Validation(
                "at least one member must be selected for removal".to_owned(),
            ));
        }

        self.require_org_permission(actor, Action::Delete, organisation_id)
            .await?;

        self.repository
            .remove_members(organisation_id, user_ids)
            .await
    }

    /// Changes one member's organisation role.
    ///
    /// Refused with [`AppError::PreconditionFailed`] when the change would
    /// demote the organisation's last owner.
    pub async fn change_member_role(
        &self,
        actor: &PermissionEngine,
        organisation_id: OrganisationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> AppResult<()> {
        self.require_org_permission(actor, Action::Update, organisation_id)
            .await?;

        self.repository
            .change_member_role(organisation_id, user_id, role_id)
            .await
    }

    async fn require_org_permission(
        &self,
        actor: &PermissionEngine,
        action: Action,
        organisation_id: OrganisationId,
    ) -> AppResult<()> {
        if actor
            .has_org_permission(action, Subject::Member, Some(organisation_id))
            .await?
        {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "user '{}' is missing permission '{} Member' in organisation '{organisation_id}'",
            actor.identity().user_id(),
            action.as_str()
        )))
    }
}
