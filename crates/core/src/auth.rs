use serde::{Deserialize, Serialize};

use crate::UserId;

/// User information attached to the request by the authentication middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    user_id: UserId,
    is_super_admin: bool,
}

impl UserIdentity {
    /// Creates a user identity from authentication data.
    #[must_use]
    pub fn new(user_id: UserId, is_super_admin: bool) -> Self {
        Self {
            user_id,
            is_super_admin,
        }
    }

    /// Returns the stable user identifier.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns whether the user bypasses every permission check.
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.is_super_admin
    }
}
