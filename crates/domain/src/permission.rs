use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tavola_core::AppError;

/// Canonical actions enforced by application policy checks.
///
/// `Manage` is the wildcard action: a stored `Manage` grant satisfies any
/// requested action on a matching subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Matches every other action when stored in a grant.
    Manage,
    /// Allows creating a resource.
    Create,
    /// Allows reading a resource.
    Read,
    /// Allows updating a resource.
    Update,
    /// Allows deleting a resource.
    Delete,
}

impl Action {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manage => "manage",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns all known actions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Action] = &[
            Action::Manage,
            Action::Create,
            Action::Read,
            Action::Update,
            Action::Delete,
        ];

        ALL
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manage" => Ok(Self::Manage),
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(AppError::Validation(format!(
                "unknown action value '{value}'"
            ))),
        }
    }
}

/// Resource types gated by permission checks.
///
/// `All` is the wildcard subject: a stored `All` grant matches any requested
/// subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Matches every subject when stored in a grant.
    All,
    /// An organisation tenant.
    Organisation,
    /// A project inside an organisation.
    Project,
    /// An organisation or project membership.
    Member,
    /// A role definition.
    Role,
    /// A task on a project board.
    Task,
    /// A comment on a task.
    Comment,
    /// A feature flag toggle.
    FeatureFlag,
}

impl Subject {
    /// Returns a stable storage value for this subject.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Organisation => "Organisation",
            Self::Project => "Project",
            Self::Member => "Member",
            Self::Role => "Role",
            Self::Task => "Task",
            Self::Comment => "Comment",
            Self::FeatureFlag => "FeatureFlag",
        }
    }
}

impl FromStr for Subject {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Self::All),
            "Organisation" => Ok(Self::Organisation),
            "Project" => Ok(Self::Project),
            "Member" => Ok(Self::Member),
            "Role" => Ok(Self::Role),
            "Task" => Ok(Self::Task),
            "Comment" => Ok(Self::Comment),
            "FeatureFlag" => Ok(Self::FeatureFlag),
            _ => Err(AppError::Validation(format!(
                "unknown subject value '{value}'"
            ))),
        }
    }
}

/// Membership hierarchies a role may be assigned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    /// Assignable through organisation membership only.
    Organization,
    /// Assignable through project membership only.
    Project,
    /// Assignable through either hierarchy.
    Both,
}

impl RoleScope {
    /// Returns a stable storage value for this scope.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Project => "project",
            Self::Both => "both",
        }
    }

    /// Returns whether a role with this scope may back an organisation membership.
    #[must_use]
    pub fn covers_organisation(&self) -> bool {
        matches!(self, Self::Organization | Self::Both)
    }

    /// Returns whether a role with this scope may back a project membership.
    #[must_use]
    pub fn covers_project(&self) -> bool {
        matches!(self, Self::Project | Self::Both)
    }
}

impl FromStr for RoleScope {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "organization" => Ok(Self::Organization),
            "project" => Ok(Self::Project),
            "both" => Ok(Self::Both),
            _ => Err(AppError::Validation(format!(
                "unknown role scope value '{value}'"
            ))),
        }
    }
}

/// One (action, subject) pair granted by a role.
///
/// The `conditions` payload is stored and surfaced verbatim; no current call
/// site evaluates it against a concrete resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Granted action, possibly the `manage` wildcard.
    pub action: Action,
    /// Granted subject, possibly the `all` wildcard.
    pub subject: Subject,
    /// Optional structured conditions carried through from storage.
    pub conditions: Option<serde_json::Value>,
}

impl PermissionGrant {
    /// Creates an unconditional grant.
    #[must_use]
    pub fn new(action: Action, subject: Subject) -> Self {
        Self {
            action,
            subject,
            conditions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{Action, RoleScope, Subject};

    #[test]
    fn action_round_trips_storage_value() {
        for action in Action::all() {
            assert_eq!(Action::from_str(action.as_str()).ok(), Some(*action));
        }
    }

    #[test]
    fn unknown_subject_is_rejected() {
        assert!(Subject::from_str("Widget").is_err());
    }

    #[test]
    fn subject_storage_values_keep_original_casing() {
        assert_eq!(Subject::Organisation.as_str(), "Organisation");
        assert_eq!(Subject::All.as_str(), "all");
    }

    #[test]
    fn scope_covers_matching_hierarchies() {
        assert!(RoleScope::Both.covers_organisation());
        assert!(RoleScope::Both.covers_project());
        assert!(RoleScope::Organization.covers_organisation());
        assert!(!RoleScope::Organization.covers_project());
        assert!(!RoleScope::Project.covers_organisation());
    }
}
