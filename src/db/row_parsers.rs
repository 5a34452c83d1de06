use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::comment::Comment;
use crate::models::document::{Document, DocumentStatus, DocumentVersion};
use crate::models::folder::Folder;
use crate::models::share::DocumentShare;
use crate::models::user::{Profile, Role, User};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 is what we write
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP format
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    s.as_deref().map(parse_uuid).transpose()
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

pub fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    let id: String = get(row, "id")?;
    let created_at: String = get(row, "created_at")?;

    Ok(User {
        id: parse_uuid(&id)?,
        email: get(row, "email")?,
        name: get(row, "name")?,
        is_superuser: get(row, "is_superuser")?,
        created_at: parse_datetime(&created_at)?,
    })
}

/// Parses `user_id`, `role` and `active` columns; a NULL `user_id` (from a
/// LEFT JOIN) means the profile row is missing.
pub fn profile_from_row(row: &SqliteRow) -> Result<Option<Profile>, AppError> {
    let user_id: Option<String> = get(row, "profile_user_id")?;
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    let role: Option<String> = get(row, "role")?;
    let role = role.map(|r| r.parse::<Role>()).transpose()?;
    let active: Option<bool> = get(row, "active")?;

    Ok(Some(Profile {
        user_id: parse_uuid(&user_id)?,
        role,
        active: active.unwrap_or(true),
    }))
}

pub fn folder_from_row(row: &SqliteRow) -> Result<Folder, AppError> {
    let id: String = get(row, "id")?;
    let owner_id: String = get(row, "owner_id")?;
    let parent_id: Option<String> = get(row, "parent_id")?;
    let created_at: String = get(row, "created_at")?;

    Ok(Folder {
        id: parse_uuid(&id)?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        owner_id: parse_uuid(&owner_id)?,
        parent_id: parse_opt_uuid(parent_id)?,
        created_at: parse_datetime(&created_at)?,
    })
}

pub fn document_from_row(row: &SqliteRow) -> Result<Document, AppError> {
    let id: String = get(row, "id")?;
    let folder_id: Option<String> = get(row, "folder_id")?;
    let owner_id: String = get(row, "owner_id")?;
    let status: String = get(row, "status")?;
    let created_at: String = get(row, "created_at")?;
    let modified_at: String = get(row, "modified_at")?;

    Ok(Document {
        id: parse_uuid(&id)?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        folder_id: parse_opt_uuid(folder_id)?,
        owner_id: parse_uuid(&owner_id)?,
        file_handle: get(row, "file_handle")?,
        file_name: get(row, "file_name")?,
        content_type: get(row, "content_type")?,
        size: get(row, "size")?,
        content_hash: get(row, "content_hash")?,
        status: status.parse::<DocumentStatus>()?,
        deleted: get(row, "deleted")?,
        created_at: parse_datetime(&created_at)?,
        modified_at: parse_datetime(&modified_at)?,
    })
}

pub fn version_from_row(row: &SqliteRow) -> Result<DocumentVersion, AppError> {
    let id: String = get(row, "id")?;
    let document_id: String = get(row, "document_id")?;
    let created_by: String = get(row, "created_by")?;
    let created_at: String = get(row, "created_at")?;

    Ok(DocumentVersion {
        id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        version_number: get(row, "version_number")?,
        file_handle: get(row, "file_handle")?,
        file_name: get(row, "file_name")?,
        size: get(row, "size")?,
        content_hash: get(row, "content_hash")?,
        note: get(row, "note")?,
        created_by: parse_uuid(&created_by)?,
        created_at: parse_datetime(&created_at)?,
    })
}

pub fn share_from_row(row: &SqliteRow) -> Result<DocumentShare, AppError> {
    let id: String = get(row, "id")?;
    let document_id: String = get(row, "document_id")?;
    let granted_by: String = get(row, "granted_by")?;
    let granted_to: String = get(row, "granted_to")?;
    let permission: String = get(row, "permission")?;
    let granted_at: String = get(row, "granted_at")?;
    let expires_at: Option<String> = get(row, "expires_at")?;

    Ok(DocumentShare {
        id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        granted_by: parse_uuid(&granted_by)?,
        granted_to: parse_uuid(&granted_to)?,
        level: permission.parse()?,
        granted_at: parse_datetime(&granted_at)?,
        expires_at: parse_opt_datetime(expires_at)?,
        active: get(row, "active")?,
    })
}

pub fn comment_from_row(row: &SqliteRow) -> Result<Comment, AppError> {
    let id: String = get(row, "id")?;
    let document_id: String = get(row, "document_id")?;
    let version_id: Option<String> = get(row, "version_id")?;
    let author_id: String = get(row, "author_id")?;
    let created_at: String = get(row, "created_at")?;

    Ok(Comment {
        id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        version_id: parse_opt_uuid(version_id)?,
        author_id: parse_uuid(&author_id)?,
        body: get(row, "body")?,
        active: get(row, "active")?,
        created_at: parse_datetime(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let a = parse_datetime("2025-03-01T10:00:00Z").unwrap();
        let b = parse_datetime("2025-03-01 10:00:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn date_only_is_midnight() {
        let dt = parse_datetime("2025-03-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-03-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("yesterday").is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
    }
}
