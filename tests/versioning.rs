mod common;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use docvault::models::document::{DocumentUpdate, NewDocument};
use docvault::models::user::Role;
use docvault::versioning::validate_upload;

use common::setup;

#[tokio::test]
async fn versions_number_from_one_on_a_bare_document() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc_id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query("INSERT INTO documents (id, name, owner_id, created_at, modified_at) VALUES (?, 'imported', ?, ?, ?)")
        .bind(doc_id.to_string())
        .bind(editor.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&env.pool)
        .await?;

    let first = env.vault.upload_version(editor, doc_id, "a.txt", b"one", "", None).await?;
    let second = env.vault.upload_version(editor, doc_id, "b.txt", b"two", "fixes", None).await?;
    assert_eq!(first.version_number, 1);
    assert_eq!(second.version_number, 2);
    assert_eq!(second.note, "fixes");
    Ok(())
}

#[tokio::test]
async fn new_version_becomes_the_current_file() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let (doc, v1) = env
        .vault
        .upload_document(
            editor,
            NewDocument { name: "Budget".into(), ..NewDocument::default() },
            "budget.xlsx",
            b"v1 bytes",
            None,
        )
        .await?;
    assert_eq!(v1.version_number, 1);
    assert_eq!(doc.file_handle.as_deref(), Some(v1.file_handle.as_str()));

    let v2 = env
        .vault
        .upload_version(editor, doc.id, "budget-final.xlsx", b"v2 bytes, longer", "final", None)
        .await?;
    assert_eq!(v2.version_number, 2);

    let current = env.vault.get_document(editor, doc.id).await?;
    assert_eq!(current.file_handle.as_deref(), Some(v2.file_handle.as_str()));
    assert_eq!(current.file_name.as_deref(), Some("budget-final.xlsx"));
    assert_eq!(current.size, Some(v2.size));
    assert_eq!(current.content_hash.as_deref(), Some(v2.content_hash.as_str()));

    let versions = env.vault.list_versions(editor, doc.id).await?;
    let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let latest = env.vault.download(editor, doc.id, None, None).await?;
    assert_eq!(latest.bytes, b"v2 bytes, longer");
    let old = env.vault.download(editor, doc.id, Some(v1.id), None).await?;
    assert_eq!(old.bytes, b"v1 bytes");
    assert_eq!(old.file_name, "budget.xlsx");
    Ok(())
}

fn stored_files(dir: &std::path::Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            count += stored_files(&path)?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

#[tokio::test]
async fn failed_version_insert_leaves_the_document_untouched() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(editor, "ledger", None).await?;
    let before = env.vault.get_document(editor, doc.id).await?;
    let files_root = env.dir.path().join("files");
    let files_before = stored_files(&files_root)?;

    sqlx::query(
        "CREATE TRIGGER reject_versions BEFORE INSERT ON document_versions BEGIN SELECT RAISE(ABORT, 'versions frozen'); END",
    )
    .execute(&env.pool)
    .await?;

    let result = env
        .vault
        .upload_version(editor, doc.id, "ledger-v2.csv", b"a,b,c", "second", None)
        .await;
    assert!(result.is_err());

    let after = env.vault.get_document(editor, doc.id).await?;
    assert_eq!(after.file_handle, before.file_handle);
    assert_eq!(after.file_name, before.file_name);
    assert_eq!(after.size, before.size);
    assert_eq!(after.content_hash, before.content_hash);
    assert_eq!(after.modified_at, before.modified_at);
    assert_eq!(env.vault.list_versions(editor, doc.id).await?.len(), 1);
    // The stored upload is discarded with the rollback
    assert_eq!(stored_files(&files_root)?, files_before);

    sqlx::query("DROP TRIGGER reject_versions").execute(&env.pool).await?;
    let v2 = env
        .vault
        .upload_version(editor, doc.id, "ledger-v2.csv", b"a,b,c", "second", None)
        .await?;
    assert_eq!(v2.version_number, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_versions_stay_gapless() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(editor, "busy", None).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let vault = env.vault.clone();
        handles.push(tokio::spawn(async move {
            let body = format!("revision {i}");
            vault
                .upload_version(editor, doc.id, &format!("busy-{i}.txt"), body.as_bytes(), "", None)
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let versions = env.vault.list_versions(editor, doc.id).await?;
    let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, (1..=9).collect::<Vec<i64>>());

    let latest = versions.last().map(|v| v.file_handle.clone());
    let current = env.vault.get_document(editor, doc.id).await?;
    assert_eq!(current.file_handle, latest);

    let download = env.vault.download(editor, doc.id, None, None).await?;
    let newest = versions.last().map(|v| v.file_name.clone());
    assert_eq!(Some(download.file_name), newest);
    Ok(())
}

#[tokio::test]
async fn versioning_a_missing_document_is_not_found() -> Result<()> {
    let env = setup().await?;
    let root = env.superuser("root@example.com").await?;
    let err = env
        .vault
        .upload_version(root, Uuid::new_v4(), "x.txt", b"x", "", None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn upload_rules() -> Result<()> {
    assert!(validate_upload("report.pdf", 10, 100).is_ok());
    assert!(validate_upload("REPORT.PDF", 10, 100).is_ok());
    assert!(validate_upload("script.exe", 10, 100).unwrap_err().is_validation());
    assert!(validate_upload("noextension", 10, 100).unwrap_err().is_validation());
    assert!(validate_upload("big.txt", 101, 100).unwrap_err().is_validation());
    assert!(validate_upload("a|b.txt", 1, 100).unwrap_err().is_validation());

    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let err = env
        .vault
        .upload_document(editor, NewDocument::default(), "virus.exe", b"MZ", None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(env.count("SELECT COUNT(*) FROM documents WHERE owner_id = ?", editor).await?, 0);
    Ok(())
}

#[tokio::test]
async fn name_falls_back_to_file_name() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let (doc, _) = env
        .vault
        .upload_document(editor, NewDocument::default(), "scan.png", b"\x89PNG", None)
        .await?;
    assert_eq!(doc.name, "scan.png");
    assert_eq!(doc.content_type.as_deref(), Some("image/png"));
    Ok(())
}

#[tokio::test]
async fn readers_cannot_upload_or_version() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let reader = env.user("reader@example.com", Some(Role::Reader)).await?;
    let doc = env.upload(editor, "locked", None).await?;

    let err = env
        .vault
        .upload_document(reader, NewDocument::default(), "mine.txt", b"hi", None)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    let err = env
        .vault
        .upload_version(reader, doc.id, "v2.txt", b"hi", "", None)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    assert_eq!(env.vault.list_versions(editor, doc.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn soft_delete_hides_from_listings_only() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(editor, "obsolete", None).await?;

    env.vault.delete_document(editor, doc.id, None).await?;
    let listing = env.vault.browse(editor, None).await?;
    assert!(listing.documents.iter().all(|d| d.id != doc.id));

    let fetched = env.vault.get_document(editor, doc.id).await?;
    assert!(fetched.deleted);
    Ok(())
}

#[tokio::test]
async fn purge_removes_rows_and_files() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(editor, "temp", None).await?;
    let v2 = env.vault.upload_version(editor, doc.id, "temp2.txt", b"second", "", None).await?;
    env.vault.comment(editor, doc.id, Some(v2.id), "looks fine", None).await?;

    let files = env.dir.path().join("files");
    let handles: Vec<String> = env
        .vault
        .documents
        .list_versions(doc.id)
        .await?
        .into_iter()
        .map(|v| v.file_handle)
        .collect();
    assert_eq!(handles.len(), 2);
    assert!(handles.iter().all(|h| files.join(h).exists()));

    env.vault.purge_document(editor, doc.id, None).await?;

    assert!(handles.iter().all(|h| !files.join(h).exists()));
    assert!(env.vault.documents.get_document(doc.id).await.unwrap_err().is_not_found());
    assert_eq!(env.count("SELECT COUNT(*) FROM document_versions WHERE document_id = ?", doc.id).await?, 0);
    assert_eq!(env.count("SELECT COUNT(*) FROM comments WHERE document_id = ?", doc.id).await?, 0);
    assert_eq!(env.count("SELECT COUNT(*) FROM permission_grants WHERE object_id = ?", doc.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn update_moves_and_renames() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let folder = env.folder(editor, "Archive", None).await?;
    let doc = env.upload(editor, "loose", None).await?;

    let updated = env
        .vault
        .update_document(
            editor,
            doc.id,
            DocumentUpdate {
                name: Some("  filed  ".into()),
                folder_id: Some(Some(folder.id)),
                ..DocumentUpdate::default()
            },
            None,
        )
        .await?;
    assert_eq!(updated.name, "filed");
    assert_eq!(updated.folder_id, Some(folder.id));

    let err = env
        .vault
        .update_document(
            editor,
            doc.id,
            DocumentUpdate { folder_id: Some(Some(Uuid::new_v4())), ..DocumentUpdate::default() },
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    Ok(())
}

#[tokio::test]
async fn comments_need_a_matching_version() -> Result<()> {
    let env = setup().await?;
    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let first = env.upload(editor, "first", None).await?;
    let second = env.upload(editor, "second", None).await?;
    let other_version = env.vault.documents.latest_version(second.id).await?;
    let other_version = other_version.map(|v| v.id);

    let err = env
        .vault
        .comment(editor, first.id, other_version, "wrong document", None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = env.vault.comment(editor, first.id, None, "no", None).await.unwrap_err();
    assert!(err.is_validation());

    env.vault.comment(editor, first.id, None, "  general remark  ", None).await?;
    let comments = env.vault.list_comments(editor, first.id).await?;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].body, "general remark");
    Ok(())
}
