use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tavola_core::{
    AppError, AppResult, OrganisationId, ProjectId, RoleId, UserId, UserIdentity,
};
use tavola_domain::{Action, PermissionGrant, RoleScope, Subject};

use crate::permission_ports::{EffectivePermissionRow, PermissionRepository, RoleCatalogEntry};

use super::PermissionEngine;

#[derive(Default)]
struct FakePermissionRepository {
    rows: Vec<EffectivePermissionRow>,
    org_memberships: HashSet<(UserId, OrganisationId)>,
    project_memberships: HashSet<(UserId, ProjectId)>,
    catalog: Vec<RoleCatalogEntry>,
    resolve_calls: AtomicUsize,
    fail_resolution: bool,
}

impl FakePermissionRepository {
    fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRepository for FakePermissionRepository {
    async fn list_effective_permissions(
        &self,
        _user_id: UserId,
    ) -> AppResult<Vec<EffectivePermissionRow>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_resolution {
            return Err(AppError::Internal(
                "permission store is unavailable".to_owned(),
            ));
        }

        Ok(self.rows.clone())
    }

    async fn is_org_member(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> AppResult<bool> {
        Ok(self.org_memberships.contains(&(user_id, organisation_id)))
    }

    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> AppResult<bool> {
        Ok(self.project_memberships.contains(&(user_id, project_id)))
    }

    async fn list_role_catalog(
        &self,
        _organisation_id: Option<OrganisationId>,
    ) -> AppResult<Vec<RoleCatalogEntry>> {
        Ok(self.catalog.clone())
    }
}

fn org_row(
    role: &str,
    organisation_id: OrganisationId,
    action: Action,
    subject: Subject,
) -> EffectivePermissionRow {
    EffectivePermissionRow {
        role_name: role.to_owned(),
        role_description: None,
        organisation_id,
        organisation_name: "Acme".to_owned(),
        project_id: None,
        project_name: None,
        action,
        subject,
        conditions: None,
    }
}

fn project_row(
    role: &str,
    organisation_id: OrganisationId,
    project_id: ProjectId,
    action: Action,
    subject: Subject,
) -> EffectivePermissionRow {
    EffectivePermissionRow {
        project_id: Some(project_id),
        project_name: Some("Launch Board".to_owned()),
        ..org_row(role, organisation_id, action, subject)
    }
}

fn engine_for(
    identity: UserIdentity,
    repository: Arc<FakePermissionRepository>,
) -> PermissionEngine {
    match PermissionEngine::for_request(Some(identity), repository) {
        Ok(engine) => engine,
        Err(error) => panic!("engine construction failed: {error}"),
    }
}

#[tokio::test]
async fn engine_requires_an_authenticated_identity() {
    let repository = Arc::new(FakePermissionRepository::default());
    let result = PermissionEngine::for_request(None, repository);
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn non_member_is_denied_every_pair() {
    let identity = UserIdentity::new(UserId::new(), false);
    let organisation_id = OrganisationId::new();
    let repository = Arc::new(FakePermissionRepository::default());
    let engine = engine_for(identity, repository);

    for action in Action::all() {
        let allowed = engine
            .has_org_permission(*action, Subject::Project, Some(organisation_id))
            .await;
        assert_eq!(allowed.ok(), Some(false));
    }
}

#[tokio::test]
async fn super_admin_bypasses_membership_and_grants() {
    let identity = UserIdentity::new(UserId::new(), true);
    let repository = Arc::new(FakePermissionRepository::default());
    let engine = engine_for(identity, Arc::clone(&repository));

    let allowed = engine
        .has_org_permission(
            Action::Delete,
            Subject::Organisation,
            Some(OrganisationId::new()),
        )
        .await;
    assert_eq!(allowed.ok(), Some(true));

    let allowed = engine
        .has_project_permission(Action::Manage, Subject::Task, Some(ProjectId::new()))
        .await;
    assert_eq!(allowed.ok(), Some(true));

    // The bypass never touches the store.
    assert_eq!(repository.resolve_calls(), 0);
}

#[tokio::test]
async fn missing_scope_id_is_denied() {
    let identity = UserIdentity::new(UserId::new(), false);
    let repository = Arc::new(FakePermissionRepository::default());
    let engine = engine_for(identity, repository);

    let allowed = engine
        .has_org_permission(Action::Read, Subject::Project, None)
        .await;
    assert_eq!(allowed.ok(), Some(false));

    let allowed = engine
        .has_project_permission(Action::Read, Subject::Task, None)
        .await;
    assert_eq!(allowed.ok(), Some(false));
}

#[tokio::test]
async fn editor_grants_apply_only_in_their_organisation() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let first_org = OrganisationId::new();
    let second_org = OrganisationId::new();

    let repository = Arc::new(FakePermissionRepository {
        rows: vec![
            org_row("editor", first_org, Action::Read, Subject::Project),
            org_row("editor", first_org, Action::Update, Subject::Project),
        ],
        org_memberships: HashSet::from([(user_id, first_org)]),
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, repository);

    let allowed = engine
        .has_org_permission(Action::Read, Subject::Project, Some(first_org))
        .await;
    assert_eq!(allowed.ok(), Some(true));

    let allowed = engine
        .has_org_permission(Action::Delete, Subject::Project, Some(first_org))
        .await;
    assert_eq!(allowed.ok(), Some(false));

    let allowed = engine
        .has_org_permission(Action::Read, Subject::Project, Some(second_org))
        .await;
    assert_eq!(allowed.ok(), Some(false));
}

#[tokio::test]
async fn project_grants_resolve_through_the_project_group() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let organisation_id = OrganisationId::new();
    let project_id = ProjectId::new();

    let repository = Arc::new(FakePermissionRepository {
        rows: vec![project_row(
            "contributor",
            organisation_id,
            project_id,
            Action::Update,
            Subject::Task,
        )],
        org_memberships: HashSet::from([(user_id, organisation_id)]),
        project_memberships: HashSet::from([(user_id, project_id)]),
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, repository);

    let allowed = engine
        .has_project_permission(Action::Update, Subject::Task, Some(project_id))
        .await;
    assert_eq!(allowed.ok(), Some(true));

    let allowed = engine
        .has_project_permission(Action::Delete, Subject::Task, Some(project_id))
        .await;
    assert_eq!(allowed.ok(), Some(false));
}

#[tokio::test]
async fn member_without_a_resolved_group_is_denied() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let organisation_id = OrganisationId::new();

    // Membership row exists but the role carries no grants, so the
    // aggregating query produced no rows for the organisation.
    let repository = Arc::new(FakePermissionRepository {
        org_memberships: HashSet::from([(user_id, organisation_id)]),
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, repository);

    let allowed = engine
        .has_org_permission(Action::Read, Subject::Project, Some(organisation_id))
        .await;
    assert_eq!(allowed.ok(), Some(false));
}

#[tokio::test]
async fn repeated_questions_issue_one_aggregating_query() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let organisation_id = OrganisationId::new();

    let repository = Arc::new(FakePermissionRepository {
        rows: vec![org_row(
            "editor",
            organisation_id,
            Action::Read,
            Subject::Project,
        )],
        org_memberships: HashSet::from([(user_id, organisation_id)]),
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, Arc::clone(&repository));

    for action in [Action::Read, Action::Update, Action::Delete, Action::Create] {
        let _ = engine
            .has_org_permission(action, Subject::Project, Some(organisation_id))
            .await;
    }
    let _ = engine.get_org_permissions(organisation_id).await;

    assert_eq!(repository.resolve_calls(), 1);
}

#[tokio::test]
async fn failed_resolution_replays_without_requerying() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let organisation_id = OrganisationId::new();

    let repository = Arc::new(FakePermissionRepository {
        org_memberships: HashSet::from([(user_id, organisation_id)]),
        fail_resolution: true,
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, Arc::clone(&repository));

    let first = engine
        .has_org_permission(Action::Read, Subject::Project, Some(organisation_id))
        .await;
    assert!(matches!(first, Err(AppError::Internal(_))));

    let second = engine
        .has_org_permission(Action::Read, Subject::Project, Some(organisation_id))
        .await;
    assert!(matches!(second, Err(AppError::Internal(_))));

    assert_eq!(repository.resolve_calls(), 1);
}

#[tokio::test]
async fn grouping_is_deterministic_for_the_same_row_set() {
    let first_org = OrganisationId::new();
    let second_org = OrganisationId::new();

    let rows = vec![
        org_row("editor", first_org, Action::Read, Subject::Project),
        org_row("editor", first_org, Action::Update, Subject::Project),
        org_row("viewer", second_org, Action::Read, Subject::Task),
    ];

    let first = super::fold_effective_rows(rows.clone());
    let second = super::fold_effective_rows(rows.clone());
    assert_eq!(first, second);

    // Group order is fixed by the grouping key, not by row arrival order.
    let mut reversed = rows;
    reversed.reverse();
    let folded = super::fold_effective_rows(reversed);
    let group_ids: Vec<OrganisationId> = folded
        .org_permissions
        .iter()
        .map(|group| group.organisation_id)
        .collect();
    let expected_ids: Vec<OrganisationId> = first
        .org_permissions
        .iter()
        .map(|group| group.organisation_id)
        .collect();
    assert_eq!(group_ids, expected_ids);
}

#[tokio::test]
async fn snapshot_groups_are_exposed_for_display() {
    let user_id = UserId::new();
    let identity = UserIdentity::new(user_id, false);
    let organisation_id = OrganisationId::new();
    let project_id = ProjectId::new();

    let repository = Arc::new(FakePermissionRepository {
        rows: vec![project_row(
            "maintainer",
            organisation_id,
            project_id,
            Action::Manage,
            Subject::Task,
        )],
        org_memberships: HashSet::from([(user_id, organisation_id)]),
        project_memberships: HashSet::from([(user_id, project_id)]),
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, repository);

    let org_group = engine.get_org_permissions(organisation_id).await;
    match org_group {
        Ok(Some(group)) => {
            assert_eq!(group.role, "maintainer");
            assert_eq!(group.permissions.len(), 1);
        }
        other => panic!("expected an organisation group, got {other:?}"),
    }

    let missing = engine.get_org_permissions(OrganisationId::new()).await;
    assert_eq!(missing.ok(), Some(None));

    let project_group = engine.get_project_permissions(project_id).await;
    match project_group {
        Ok(Some(group)) => assert_eq!(group.project_name, "Launch Board"),
        other => panic!("expected a project group, got {other:?}"),
    }
}

#[tokio::test]
async fn role_catalog_bypasses_the_request_cache() {
    let identity = UserIdentity::new(UserId::new(), false);
    let repository = Arc::new(FakePermissionRepository {
        catalog: vec![RoleCatalogEntry {
            role_id: RoleId::new(),
            name: "owner".to_owned(),
            description: Some("Full organisation control".to_owned()),
            scope: RoleScope::Organization,
            is_system_role: true,
            organisation_id: None,
            permissions: vec![PermissionGrant::new(Action::Manage, Subject::All)],
        }],
        ..FakePermissionRepository::default()
    });
    let engine = engine_for(identity, Arc::clone(&repository));

    let catalog = engine.get_all_permissions(None).await;
    match catalog {
        Ok(entries) => assert_eq!(entries.len(), 1),
        Err(error) => panic!("catalog listing failed: {error}"),
    }

    // Listing the catalog must not trigger per-user resolution.
    assert_eq!(repository.resolve_calls(), 0);
}
