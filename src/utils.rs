use chrono::{DateTime, Utc};

use crate::errors::AppError;

const MAX_NAME_LENGTH: usize = 255;
const FORBIDDEN_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Trims `name` and rejects empty, over-long or path-like names.
pub fn validate_name(name: &str, what: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation(format!("{what} must not be empty")));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::validation(format!(
            "{what} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(AppError::validation(format!("{what} contains forbidden character '{c}'")));
    }
    Ok(name.to_string())
}

/// Lowercased extension of `file_name`, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  Report  ", "name").unwrap(), "Report");
    }

    #[test]
    fn path_characters_are_rejected() {
        assert!(validate_name("a/b", "name").is_err());
        assert!(validate_name("what?", "name").is_err());
        assert!(validate_name("   ", "name").is_err());
        assert!(validate_name(&"x".repeat(256), "name").is_err());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Scan.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension(".bashrc"), None);
        assert_eq!(file_extension("README"), None);
    }
}
