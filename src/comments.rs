use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::row_parsers::comment_from_row;
use crate::errors::{AppError, AppResult};
use crate::models::comment::Comment;
use crate::utils::utc_now;
use crate::versioning::fetch_document;

pub const MIN_COMMENT_CHARS: usize = 3;
pub const MAX_COMMENT_CHARS: usize = 1000;

const COMMENT_COLUMNS: &str = "id, document_id, version_id, author_id, body, active, created_at";

pub fn validate_body(body: &str) -> AppResult<String> {
    let body = body.trim();
    let len = body.chars().count();
    if len < MIN_COMMENT_CHARS {
        return Err(AppError::validation(format!(
            "comment must be at least {MIN_COMMENT_CHARS} characters"
        )));
    }
    if len > MAX_COMMENT_CHARS {
        return Err(AppError::validation(format!(
            "comment must be at most {MAX_COMMENT_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}

/// Comment threads on documents and their versions.
#[derive(Debug, Clone)]
pub struct CommentBoard {
    pool: SqlitePool,
}

impl CommentBoard {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        document_id: Uuid,
        version_id: Option<Uuid>,
        author_id: Uuid,
        body: &str,
    ) -> AppResult<Comment> {
        let body = validate_body(body)?;

        let mut tx = self.pool.begin().await?;
        fetch_document(&mut tx, document_id).await?;

        if let Some(version_id) = version_id {
            let owner: Option<String> = sqlx::query_scalar("SELECT document_id FROM document_versions WHERE id = ?")
                .bind(version_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            match owner {
                None => return Err(AppError::not_found(format!("version {version_id}"))),
                Some(owner) if owner != document_id.to_string() => {
                    return Err(AppError::validation("version belongs to a different document"));
                }
                Some(_) => {}
            }
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            document_id,
            version_id,
            author_id,
            body,
            active: true,
            created_at: utc_now(),
        };

        let sql = format!("INSERT INTO comments ({COMMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(comment.id.to_string())
            .bind(comment.document_id.to_string())
            .bind(comment.version_id.map(|id| id.to_string()))
            .bind(comment.author_id.to_string())
            .bind(&comment.body)
            .bind(comment.active)
            .bind(comment.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(comment)
    }

    /// Active comments on the document (all versions included), oldest first.
    pub async fn list(&self, document_id: Uuid) -> AppResult<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE document_id = ? AND active = 1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(comment_from_row).collect()
    }

    /// Active comments attached to one version.
    pub async fn list_for_version(&self, version_id: Uuid) -> AppResult<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE version_id = ? AND active = 1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(version_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(comment_from_row).collect()
    }

    pub async fn deactivate(&self, comment_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE comments SET active = 0 WHERE id = ?")
            .bind(comment_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("comment {comment_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_length_is_counted_after_trimming() {
        assert!(validate_body("  ok  ").is_err());
        assert_eq!(validate_body("  fine  ").unwrap(), "fine");
        assert!(validate_body(&"x".repeat(MAX_COMMENT_CHARS + 1)).is_err());
        assert!(validate_body(&"ż".repeat(MAX_COMMENT_CHARS)).is_ok());
    }
}
