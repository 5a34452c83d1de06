mod common;

use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use docvault::events::{persist_event, start_activity_listener, verify_chain, ActivityEvent, ActivityKind, RequestContext};
use docvault::models::user::Role;

use common::setup;

async fn log_rows(env: &common::TestEnv) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_log").fetch_one(&env.pool).await?;
    Ok(n)
}

#[tokio::test]
async fn persisted_events_form_a_verifiable_chain() -> Result<()> {
    let env = setup().await?;
    let actor = Uuid::new_v4();

    for i in 0..3 {
        let event = ActivityEvent::new(Some(actor), ActivityKind::Edit, format!("edit {i}"))
            .with_context(Some(RequestContext::new().with_ip("10.0.0.7")));
        persist_event(&env.pool, &event).await?;
    }
    assert_eq!(log_rows(&env).await?, 3);
    assert_eq!(verify_chain(&env.pool).await?, None);

    let ip: Option<String> = sqlx::query_scalar("SELECT ip FROM activity_log ORDER BY seq LIMIT 1")
        .fetch_one(&env.pool)
        .await?;
    assert_eq!(ip.as_deref(), Some("10.0.0.7"));
    Ok(())
}

#[tokio::test]
async fn tampering_breaks_the_chain() -> Result<()> {
    let env = setup().await?;
    let mut ids = Vec::new();
    for kind in [ActivityKind::Create, ActivityKind::Download, ActivityKind::Delete] {
        let event = ActivityEvent::new(None, kind, kind.as_str());
        ids.push(event.id);
        persist_event(&env.pool, &event).await?;
    }

    sqlx::query("UPDATE activity_log SET payload = replace(payload, 'download', 'comment') WHERE id = ?")
        .bind(ids[1].to_string())
        .execute(&env.pool)
        .await?;
    assert_eq!(verify_chain(&env.pool).await?, Some(ids[1]));
    Ok(())
}

#[tokio::test]
async fn corrupt_row_id_is_reported_as_an_error() -> Result<()> {
    let env = setup().await?;
    let event = ActivityEvent::new(None, ActivityKind::Edit, "edit");
    persist_event(&env.pool, &event).await?;

    sqlx::query("UPDATE activity_log SET id = 'not-a-uuid', payload = payload || ' ' WHERE id = ?")
        .bind(event.id.to_string())
        .execute(&env.pool)
        .await?;
    assert!(verify_chain(&env.pool).await.is_err());
    Ok(())
}

#[tokio::test]
async fn listener_persists_vault_activity() -> Result<()> {
    let env = setup().await?;
    let listener = tokio::spawn(start_activity_listener(env.events.resubscribe(), env.pool.clone()));

    let editor = env.user("ed@example.com", Some(Role::Editor)).await?;
    let doc = env.upload(editor, "tracked", None).await?;
    env.vault.download(editor, doc.id, None, None).await?;

    let mut persisted = 0;
    for _ in 0..50 {
        persisted = log_rows(&env).await?;
        if persisted >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(persisted, 2);

    let actions: Vec<String> = sqlx::query_scalar("SELECT action FROM activity_log ORDER BY seq")
        .fetch_all(&env.pool)
        .await?;
    assert_eq!(actions, vec!["create", "download"]);
    assert_eq!(verify_chain(&env.pool).await?, None);

    listener.abort();
    Ok(())
}
