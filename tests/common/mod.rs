#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;
use uuid::Uuid;

use docvault::config::Config;
use docvault::db;
use docvault::events::{init_event_bus, ActivityEvent};
use docvault::models::document::{Document, NewDocument};
use docvault::models::folder::{Folder, NewFolder};
use docvault::models::user::{NewUser, Role};
use docvault::storage::LocalFileStore;
use docvault::Vault;

pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub vault: Vault,
    pub events: broadcast::Receiver<ActivityEvent>,
}

pub async fn setup() -> Result<TestEnv> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let config = Config::for_database(format!("sqlite://{}", db_path.display()), dir.path().join("files"));

    let pool = db::init(&config).await?;
    let files = LocalFileStore::new(&config.storage_root).await?;
    let (bus, events) = init_event_bus(256);
    let vault = Vault::new(pool.clone(), Arc::new(files), Arc::new(bus), config.max_upload_bytes);

    Ok(TestEnv { dir, pool, vault, events })
}

impl TestEnv {
    /// Creates a user and sets their role (`None` clears the default reader role).
    pub async fn user(&self, email: &str, role: Option<Role>) -> Result<Uuid> {
        let user = self
            .vault
            .users
            .create_user(NewUser {
                email: email.to_string(),
                name: email.split('@').next().unwrap_or(email).to_string(),
                is_superuser: false,
            })
            .await?;
        if role != Some(Role::Reader) {
            self.vault.users.set_role(user.id, role).await?;
        }
        Ok(user.id)
    }

    pub async fn superuser(&self, email: &str) -> Result<Uuid> {
        let user = self
            .vault
            .users
            .create_user(NewUser {
                email: email.to_string(),
                name: "Root".to_string(),
                is_superuser: true,
            })
            .await?;
        Ok(user.id)
    }

    pub async fn folder(&self, actor: Uuid, name: &str, parent: Option<Uuid>) -> Result<Folder> {
        let folder = self
            .vault
            .create_folder(
                actor,
                NewFolder {
                    name: name.to_string(),
                    description: String::new(),
                    parent_id: parent,
                },
                None,
            )
            .await?;
        Ok(folder)
    }

    pub async fn upload(&self, actor: Uuid, name: &str, folder: Option<Uuid>) -> Result<Document> {
        let (document, _) = self
            .vault
            .upload_document(
                actor,
                NewDocument {
                    name: name.to_string(),
                    folder_id: folder,
                    ..NewDocument::default()
                },
                &format!("{name}.txt"),
                format!("contents of {name}").as_bytes(),
                None,
            )
            .await?;
        Ok(document)
    }

    /// Drains buffered activity events.
    pub fn drain_events(&mut self) -> Vec<ActivityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn count(&self, sql: &str, id: Uuid) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(sql).bind(id.to_string()).fetch_one(&self.pool).await?;
        Ok(n)
    }
}
