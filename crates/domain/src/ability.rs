use crate::{Action, PermissionGrant, Subject};

/// Checkable policy object built from one permission group.
///
/// An ability answers resource-*type* questions only; grant conditions are
/// kept on the rules but not matched against instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ability {
    rules: Vec<PermissionGrant>,
}

impl Ability {
    /// Builds an ability from a group's grant list.
    ///
    /// Duplicate grants are harmless; evaluation treats the list as a set.
    #[must_use]
    pub fn from_grants(grants: &[PermissionGrant]) -> Self {
        Self {
            rules: grants.to_vec(),
        }
    }

    /// Returns whether the requested (action, subject) pair is granted.
    ///
    /// A stored `manage` action matches any requested action and a stored
    /// `all` subject matches any requested subject. Absence of a matching
    /// rule denies the request.
    #[must_use]
    pub fn allows(&self, action: Action, subject: Subject) -> bool {
        self.rules.iter().any(|rule| {
            let action_matches = rule.action == action || rule.action == Action::Manage;
            let subject_matches = rule.subject == subject || rule.subject == Subject::All;
            action_matches && subject_matches
        })
    }

    /// Returns the rules backing this ability.
    #[must_use]
    pub fn rules(&self) -> &[PermissionGrant] {
        self.rules.as_slice()
    }
}
