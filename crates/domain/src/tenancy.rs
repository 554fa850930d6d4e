use tavola_core::{AppError, AppResult, OrganisationId};

/// Name of the distinguished system role every organisation must retain.
pub const OWNER_ROLE_NAME: &str = "owner";

/// Destructive membership operation checked by the owner-retention rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerMutation {
    /// Members are about to be removed from the organisation.
    Remove,
    /// A member's role is about to change away from owner.
    Update,
}

impl OwnerMutation {
    fn describe(&self) -> &'static str {
        match self {
            Self::Remove => "removing these members",
            Self::Update => "changing this member's role",
        }
    }
}

/// Refuses a mutation that would leave the organisation without an owner.
///
/// `remaining_owner_count` is the number of members still holding the owner
/// role once the affected user set is excluded. Callers must compute it
/// inside the same transaction as the mutation itself, otherwise two
/// concurrent demotions can each see the other owner and both pass.
pub fn ensure_owner_remains(
    mutation: OwnerMutation,
    organisation_id: OrganisationId,
    remaining_owner_count: u64,
) -> AppResult<()> {
    if remaining_owner_count == 0 {
        return Err(AppError::PreconditionFailed(format!(
            "{} would leave organisation '{organisation_id}' without an owner",
            mutation.describe()
        )));
    }

    Ok(())
}
