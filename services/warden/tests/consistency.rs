mod common;

use common::{FlakyIndex, FlakyStore, Harness, catalog_seed, perm, res, role, test_config};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use warden::AuthzEngine;
use warden::RbacError;
use warden::rbac::grants::GrantUpdate;
use warden::store::{GrantCell, GrantStore, PrincipalDirectory};
use warden_authz::{AuthzError, PrincipalId, Registration};

#[tokio::test]
async fn index_failure_is_an_error_not_a_denial() {
    let harness = Harness::new().await;
    let user = harness.principal(1, &["reader"]).await;
    harness.index.faults.lookups.store(true, Ordering::SeqCst);

    let err = harness
        .engine
        .allowed(user, "content.story", &["view"])
        .await
        .expect_err("lookup failure");
    assert!(matches!(err, RbacError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn role_lookup_failure_is_an_error() {
    let harness = Harness::new().await;
    let user = harness.principal(2, &["reader"]).await;
    harness.store.fail_role_reads.store(true, Ordering::SeqCst);

    let err = harness
        .engine
        .allowed_on_instance(user, "content.story", "1", "edit")
        .await
        .expect_err("role read failure");
    assert!(matches!(err, RbacError::StoreUnavailable(_)));
}

#[tokio::test]
async fn failed_push_denies_until_rebuild_restores_durable_state() {
    let harness = Harness::new().await;
    let editor = harness.principal(3, &["editor"]).await;
    harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("editor"),
            res("content.story"),
            [perm("view")],
        )])
        .await
        .expect("seed");

    harness.index.faults.grants.store(true, Ordering::SeqCst);
    let err = harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("editor"),
            res("content.story"),
            [perm("delete")],
        )])
        .await
        .expect_err("push failure");
    assert!(matches!(err, RbacError::PartialFailure { operation: "reconcile", .. }));

    // Durable table keeps the previous cell; the index is never ahead of it.
    let grants = harness.engine.role_grants("editor").await.expect("grants");
    assert_eq!(
        grants.get(&res("content.story")),
        Some(&BTreeSet::from([perm("view")]))
    );
    for permission in ["view", "delete"] {
        assert!(
            !harness
                .engine
                .allowed(editor, "content.story", &[permission])
                .await
                .expect("lookup")
        );
    }

    harness.index.faults.grants.store(false, Ordering::SeqCst);
    harness.engine.rebuild_all().await.expect("rebuild");
    assert!(
        harness
            .engine
            .allowed(editor, "content.story", &["view"])
            .await
            .expect("view restored")
    );
}

#[tokio::test]
async fn failed_persist_is_repaired_by_rebuild() {
    let harness = Harness::new().await;
    let editor = harness.principal(4, &["editor"]).await;
    harness.store.fail_grant_writes.store(true, Ordering::SeqCst);

    let err = harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("editor"),
            res("content.story"),
            [perm("delete")],
        )])
        .await
        .expect_err("persist failure");
    match err {
        RbacError::PartialFailure { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("persist editor on content.story"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The pushed cell stays in the index ahead of the table until a rebuild.
    assert!(
        harness
            .engine
            .allowed(editor, "content.story", &["delete"])
            .await
            .expect("lookup")
    );
    assert!(harness.engine.role_grants("editor").await.expect("grants").is_empty());

    harness.store.fail_grant_writes.store(false, Ordering::SeqCst);
    harness.engine.rebuild_all().await.expect("rebuild");
    assert!(
        !harness
            .engine
            .allowed(editor, "content.story", &["delete"])
            .await
            .expect("lookup")
    );
}

#[tokio::test]
async fn assignment_leg_failure_is_reported_and_recoverable() {
    let harness = Harness::new().await;
    harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("author"),
            res("content.story"),
            [perm("create")],
        )])
        .await
        .expect("reconcile");
    let user = PrincipalId::new(5);
    harness.store.inner.insert_principal(user, []).await;

    harness.store.fail_role_writes.store(true, Ordering::SeqCst);
    let err = harness
        .engine
        .assign_roles(user, &["author"])
        .await
        .expect_err("durable leg failure");
    assert!(matches!(err, RbacError::PartialFailure { operation: "assign", .. }));
    assert!(
        harness
            .engine
            .allowed(user, "content.story", &["create"])
            .await
            .expect("index leg applied")
    );

    harness.store.fail_role_writes.store(false, Ordering::SeqCst);
    harness.engine.rebuild_all().await.expect("rebuild");
    assert!(
        !harness
            .engine
            .allowed(user, "content.story", &["create"])
            .await
            .expect("durable list wins")
    );
}

#[tokio::test]
async fn rebuild_during_unassign_does_not_restore_the_role() {
    let harness = Harness::new().await;
    let user = harness.principal(5, &["editor"]).await;
    harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("editor"),
            res("content.story"),
            [perm("view")],
        )])
        .await
        .expect("reconcile");

    harness.store.hold_role_removals.store(true, Ordering::SeqCst);
    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.store.release_role_removals();
    };
    let (unassigned, rebuilt, ()) = tokio::join!(
        harness.engine.unassign_roles(user, &["editor"]),
        harness.engine.rebuild_all(),
        release,
    );
    unassigned.expect("unassign");
    rebuilt.expect("rebuild");

    assert!(
        harness
            .store
            .principal_roles(user)
            .await
            .expect("roles")
            .is_empty()
    );
    assert!(
        !harness
            .engine
            .allowed(user, "content.story", &["view"])
            .await
            .expect("lookup")
    );
}

#[tokio::test]
async fn rebuild_reports_principal_failures() {
    let harness = Harness::new().await;
    for id in 10..15 {
        harness.principal(id, &["reader"]).await;
    }
    harness.store.fail_role_reads.store(true, Ordering::SeqCst);
    let err = harness.engine.rebuild_all().await.expect_err("scan failure");
    assert!(matches!(err, RbacError::PartialFailure { operation: "rebuild", .. }));

    harness.store.fail_role_reads.store(false, Ordering::SeqCst);
    let report = harness.engine.rebuild_all().await.expect("rebuild");
    assert_eq!(report.principals, 6);
}

#[tokio::test]
async fn bootstrap_halts_on_unknown_stored_permission() {
    let store = FlakyStore::new();
    store
        .inner
        .set_grant(&GrantCell::new(
            role("editor"),
            res("content.story"),
            [perm("publish")],
        ))
        .await
        .expect("seed");
    let index = Arc::new(FlakyIndex::new().await);
    let result =
        AuthzEngine::bootstrap(Arc::new(store), index, &test_config(), catalog_seed()).await;
    assert!(matches!(
        result,
        Err(RbacError::Authz(AuthzError::SchemaConflict { .. }))
    ));
}

#[tokio::test]
async fn bootstrap_creates_builtin_roles() {
    let harness = Harness::new().await;
    let roles = harness.engine.list_roles().await.expect("roles");
    for builtin in ["administrator", "authenticated", "unauthenticated"] {
        assert!(roles.contains(&role(builtin)), "missing {builtin}");
    }
}

#[tokio::test]
async fn register_resource_extends_catalog_and_administrator() {
    let harness = Harness::new().await;
    let registration = harness
        .engine
        .register_resource("content.video", &["upload"])
        .await
        .expect("register");
    assert_eq!(registration, Registration::Added);

    let snapshot = harness.engine.index_snapshot().await.expect("snapshot");
    for act in ["upload", "view"] {
        assert!(snapshot.grants.contains(&(
            "role:administrator".to_string(),
            "content.video".to_string(),
            act.to_string()
        )));
    }

    let user = harness.principal(20, &["uploader"]).await;
    harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("uploader"),
            res("content.video"),
            [perm("upload")],
        )])
        .await
        .expect("grant on new kind");
    assert!(
        harness
            .engine
            .allowed(user, "content.video", &["upload"])
            .await
            .expect("allowed")
    );
    assert_eq!(
        harness
            .engine
            .register_resource("content.video", &["UPLOAD"])
            .await
            .expect("again"),
        Registration::Unchanged
    );
}

#[tokio::test]
async fn register_template_reaches_every_kind() {
    let harness = Harness::new().await;
    harness
        .engine
        .register_resource("content.*", &["view", "report"])
        .await
        .expect("extend template");
    let snapshot = harness.engine.index_snapshot().await.expect("snapshot");
    for kind in ["content.story", "content.recipe"] {
        assert!(snapshot.grants.contains(&(
            "role:administrator".to_string(),
            kind.to_string(),
            "report".to_string()
        )));
    }
}

#[tokio::test]
async fn shrinking_a_referenced_entry_is_a_schema_conflict() {
    let harness = Harness::new().await;
    harness
        .engine
        .reconcile(vec![GrantUpdate::new(
            role("editor"),
            res("content.story"),
            [perm("create")],
        )])
        .await
        .expect("reconcile");

    let err = harness
        .engine
        .register_resource("content.story", &["delete"])
        .await
        .expect_err("conflict");
    assert!(matches!(
        err,
        RbacError::Authz(AuthzError::SchemaConflict { ref permissions, .. })
            if permissions.contains(&perm("create"))
    ));

    let registration = harness
        .engine
        .register_resource("content.story", &["create", "edit any content", "edit own content"])
        .await
        .expect("drop unreferenced delete");
    assert_eq!(registration, Registration::Redefined);
    let snapshot = harness.engine.index_snapshot().await.expect("snapshot");
    assert!(!snapshot.grants.contains(&(
        "role:administrator".to_string(),
        "content.story".to_string(),
        "delete".to_string()
    )));
}

#[tokio::test]
async fn catalog_extensions_survive_restart() {
    let harness = Harness::new().await;
    harness
        .engine
        .register_resource("media.image", &["upload"])
        .await
        .expect("register");
    let entries = harness.store.catalog_entries().await.expect("entries");
    assert!(entries.iter().any(|(resource, _)| *resource == res("media.image")));

    let restarted = AuthzEngine::bootstrap(
        harness.store.clone(),
        Arc::new(FlakyIndex::new().await),
        &test_config(),
        catalog_seed(),
    )
    .await
    .expect("restart");
    assert!(restarted.catalog().await.contains(&res("media.image")));
}
