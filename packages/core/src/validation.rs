// ABOUTME: Identifier validation for application and component ids
// ABOUTME: Keeps runtime key namespaces disjoint and repository paths inside the definition root

use thiserror::Error;

/// Maximum length for application and component identifiers
pub const MAX_ID_LENGTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} exceeds maximum length of {max} characters (got {len})")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },

    #[error("{field} contains invalid characters: {value}")]
    InvalidCharacters { field: &'static str, value: String },

    #[error("Path escapes the application repository: {0}")]
    PathEscape(String),
}

/// Validate an application id.
///
/// Allowed characters are ASCII letters, digits, `.`, `_` and `-`. The ids `.`
/// and `..` are rejected. Because `:` is never allowed, the runtime key
/// `{app_id}:{key}` always splits unambiguously at its first colon.
pub fn validate_app_id(app_id: &str) -> Result<(), ValidationError> {
    validate_identifier("appId", app_id)
}

/// Validate a component id using the same character rules as app ids
pub fn validate_component_id(component_id: &str) -> Result<(), ValidationError> {
    validate_identifier("componentId", component_id)
}

fn validate_identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing { field });
    }

    if value.len() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ID_LENGTH,
            len: value.len(),
        });
    }

    if value == "." || value == ".." {
        return Err(ValidationError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }

    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(ValidationError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// Normalize a repository-relative path, rejecting anything that could escape the root.
///
/// Empty segments and `.` are dropped; `..`, absolute paths, backslashes and NUL
/// bytes are rejected. An empty result means the repository root.
pub fn normalize_repo_path(path: &str) -> Result<String, ValidationError> {
    if path.contains('\0') || path.contains('\\') || path.starts_with('/') {
        return Err(ValidationError::PathEscape(path.to_string()));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ValidationError::PathEscape(path.to_string())),
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}
