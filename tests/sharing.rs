mod common;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use uuid::Uuid;

use docvault::authz::{Action, Target};
use docvault::events::ActivityKind;
use docvault::models::permission::{DocumentPermission, ObjectRef, PermissionKind};
use docvault::models::share::ShareLevel;
use docvault::models::user::Role;
use docvault::permission_store::{PermissionStore, SqlitePermissionStore};

use common::setup;

fn doc_kinds(kinds: &[DocumentPermission]) -> std::collections::BTreeSet<PermissionKind> {
    kinds.iter().map(|k| PermissionKind::Document(*k)).collect()
}

#[tokio::test]
async fn share_levels_are_exclusive() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "report", None).await?;
    let store = SqlitePermissionStore::new(env.pool.clone());
    let object = ObjectRef::document(doc.id);

    env.vault.share(editor, doc.id, reader, ShareLevel::Download, None, None).await?;
    assert_eq!(store.list_grants(reader, object).await?, doc_kinds(&[DocumentPermission::Download]));

    let share = env.vault.share(editor, doc.id, reader, ShareLevel::Comment, None, None).await?;
    assert_eq!(share.level, ShareLevel::Comment);
    assert_eq!(store.list_grants(reader, object).await?, doc_kinds(&[DocumentPermission::Comment]));

    let engine = &env.vault.engine;
    assert!(engine.can(Some(reader), Action::Comment, Target::Document(doc.id)).await);
    assert!(engine.can(Some(reader), Action::View, Target::Document(doc.id)).await);
    assert!(!engine.can(Some(reader), Action::Download, Target::Document(doc.id)).await);

    let rows = env
        .count("SELECT COUNT(*) FROM document_shares WHERE document_id = ?", doc.id)
        .await?;
    assert_eq!(rows, 1);
    Ok(())
}

#[tokio::test]
async fn share_replaces_admin_granted_kinds() -> Result<()> {
    let env = setup().await?;
    let admin = env.user("admin@example.com", Some(Role::Admin)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(admin, "ledger", None).await?;
    let store = SqlitePermissionStore::new(env.pool.clone());

    env.vault
        .sharing
        .admin_grant(admin, reader, doc.id, &[DocumentPermission::Delete, DocumentPermission::Change], None)
        .await?;
    env.vault.share(admin, doc.id, reader, ShareLevel::Browse, None, None).await?;

    assert_eq!(
        store.list_grants(reader, ObjectRef::document(doc.id)).await?,
        doc_kinds(&[DocumentPermission::Browse])
    );
    Ok(())
}

#[tokio::test]
async fn invalid_shares_are_rejected_without_changes() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "draft", None).await?;

    let err = env
        .vault
        .share(editor, doc.id, editor, ShareLevel::Browse, None, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = env
        .vault
        .share(editor, doc.id, reader, ShareLevel::Browse, Some(Utc::now() - Duration::minutes(1)), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = env
        .vault
        .share(editor, doc.id, Uuid::new_v4(), ShareLevel::Browse, None, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = env
        .vault
        .share(editor, Uuid::new_v4(), reader, ShareLevel::Browse, None, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(env.count("SELECT COUNT(*) FROM document_shares WHERE document_id = ?", doc.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn readers_cannot_share() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let other = env.user("other@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "plan", None).await?;

    env.vault.share(editor, doc.id, reader, ShareLevel::Change, None, None).await?;
    let err = env
        .vault
        .share(reader, doc.id, other, ShareLevel::Browse, None, None)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    assert!(env.vault.sharing.get_share(doc.id, other).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn denied_share_keeps_the_recipients_access() -> Result<()> {
    let env = setup().await?;
    let admin = env.user("admin@example.com", Some(Role::Admin)).await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(admin, "budget", None).await?;
    let store = SqlitePermissionStore::new(env.pool.clone());
    let object = ObjectRef::document(doc.id);

    env.vault.share(admin, doc.id, reader, ShareLevel::Download, None, None).await?;
    let sharing = &env.vault.sharing;
    sharing.admin_grant(admin, editor, doc.id, &[DocumentPermission::Share], None).await?;
    sharing.admin_revoke(admin, editor, doc.id, Some(&[DocumentPermission::Share]), None).await?;

    // The recipient's grants are cleared first inside the same transaction
    let err = env
        .vault
        .share(editor, doc.id, reader, ShareLevel::Browse, None, None)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    let err = env.vault.revoke_share(editor, doc.id, reader, None).await.unwrap_err();
    assert!(err.is_forbidden());

    assert_eq!(store.list_grants(reader, object).await?, doc_kinds(&[DocumentPermission::Download]));
    let share = sharing.get_share(doc.id, reader).await?.context("share row kept")?;
    assert_eq!(share.level, ShareLevel::Download);
    assert!(share.active);
    Ok(())
}

#[tokio::test]
async fn sharer_can_drop_their_own_access() -> Result<()> {
    let env = setup().await?;
    let admin = env.user("admin@example.com", Some(Role::Admin)).await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(admin, "budget", None).await?;

    env.vault
        .sharing
        .admin_grant(admin, editor, doc.id, &[DocumentPermission::Share, DocumentPermission::Change], None)
        .await?;
    assert_eq!(env.vault.revoke_share(editor, doc.id, editor, None).await?, 2);
    assert!(!env.vault.engine.can(Some(editor), Action::Share, Target::Document(doc.id)).await);
    Ok(())
}

#[tokio::test]
async fn revoke_all_clears_grants_and_deactivates_share() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "minutes", None).await?;

    env.vault.share(editor, doc.id, reader, ShareLevel::Download, None, None).await?;
    let revoked = env.vault.revoke_share(editor, doc.id, reader, None).await?;
    assert_eq!(revoked, 1);

    let share = env.vault.sharing.get_share(doc.id, reader).await?.context("share row kept")?;
    assert!(!share.active);
    assert!(!env.vault.engine.can(Some(reader), Action::View, Target::Document(doc.id)).await);

    // Nothing left to revoke
    assert_eq!(env.vault.revoke_share(editor, doc.id, reader, None).await?, 0);
    Ok(())
}

#[tokio::test]
async fn admin_grant_and_revoke() -> Result<()> {
    let env = setup().await?;
    let admin = env.user("admin@example.com", Some(Role::Admin)).await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "handbook", None).await?;
    let store = SqlitePermissionStore::new(env.pool.clone());
    let object = ObjectRef::document(doc.id);
    let sharing = &env.vault.sharing;

    let granted = sharing.admin_grant(admin, reader, doc.id, &[], None).await?;
    assert_eq!(granted, vec![DocumentPermission::Browse]);
    sharing
        .admin_grant(admin, reader, doc.id, &[DocumentPermission::Download, DocumentPermission::Share], None)
        .await?;
    assert_eq!(
        store.list_grants(reader, object).await?,
        doc_kinds(&[DocumentPermission::Browse, DocumentPermission::Download, DocumentPermission::Share])
    );

    sharing
        .admin_revoke(admin, reader, doc.id, Some(&[DocumentPermission::Share]), None)
        .await?;
    assert!(!store.has(reader, object, DocumentPermission::Share.into()).await?);
    sharing.admin_revoke(admin, reader, doc.id, None, None).await?;
    assert!(store.list_grants(reader, object).await?.is_empty());

    let err = sharing
        .admin_grant(editor, reader, doc.id, &[DocumentPermission::Change], None)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    Ok(())
}

#[tokio::test]
async fn sharing_records_activity() -> Result<()> {
    let mut env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "notes", None).await?;
    env.drain_events();

    env.vault.share(editor, doc.id, reader, ShareLevel::Browse, None, None).await?;
    env.vault.revoke_share(editor, doc.id, reader, None).await?;

    let events = env.drain_events();
    let kinds: Vec<ActivityKind> = events.iter().map(|e| e.action).collect();
    assert_eq!(kinds, vec![ActivityKind::Share, ActivityKind::PermissionChange]);
    assert!(events.iter().all(|e| e.actor_id == Some(editor) && e.object_id == Some(doc.id)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shares_leave_one_level() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "contested", None).await?;

    let mut handles = Vec::new();
    for level in ShareLevel::ALL {
        let vault = env.vault.clone();
        handles.push(tokio::spawn(async move {
            vault.share(editor, doc.id, reader, level, None, None).await
        }));
    }
    let mut succeeded = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            succeeded += 1;
        }
    }
    assert!(succeeded >= 1);

    let store = SqlitePermissionStore::new(env.pool.clone());
    let grants = store.list_grants(reader, ObjectRef::document(doc.id)).await?;
    assert_eq!(grants.len(), 1);

    let share = env.vault.sharing.get_share(doc.id, reader).await?.context("share exists")?;
    assert!(grants.contains(&PermissionKind::Document(share.level.permission())));
    Ok(())
}
