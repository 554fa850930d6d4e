use async_trait::async_trait;
use tavola_core::{AppResult, OrganisationId, RoleId, UserId};

/// Repository port for guarded membership mutations.
///
/// Implementations must run the owner-retention check inside the same
/// transaction as the mutation itself, with the organisation's owner rows
/// locked for the duration, and refuse with
/// [`tavola_core::AppError::PreconditionFailed`] when the organisation would
/// be left without an owner.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Removes the given members from the organisation.
    async fn remove_members(
        &self,
        organisation_id: OrganisationId,
        user_ids: &[UserId],
    ) -> AppResult<()>;

    /// Changes one member's organisation role.
    ///
    /// The new role's scope must cover the organisation hierarchy.
    async fn change_member_role(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
        role_id: RoleId,
    ) -> AppResult<()>;
}
