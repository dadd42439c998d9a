//! Input validation for commands

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlugValidationError {
    #[error("Slug is required and cannot be empty")]
    Required,

    #[error("Slug must be between 1 and {max_length} characters")]
    TooLong { max_length: usize },

    #[error("Slug can only contain lowercase letters, numbers, hyphens and underscores")]
    InvalidFormat,

    #[error("Slug cannot start or end with a hyphen")]
    InvalidHyphenPlacement,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameValidationError {
    #[error("Name is required and cannot be empty")]
    Required,

    #[error("Name must be between 1 and {max_length} characters")]
    TooLong { max_length: usize },
}

/// Validate a URL-safe identifier such as a job slug
pub fn validate_slug(slug: &str, max_length: usize) -> Result<(), SlugValidationError> {
    if slug.is_empty() {
        return Err(SlugValidationError::Required);
    }
    if slug.len() > max_length {
        return Err(SlugValidationError::TooLong { max_length });
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(SlugValidationError::InvalidFormat);
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(SlugValidationError::InvalidHyphenPlacement);
    }
    Ok(())
}

pub fn validate_name(name: &str, max_length: usize) -> Result<(), NameValidationError> {
    if name.trim().is_empty() {
        return Err(NameValidationError::Required);
    }
    if name.len() > max_length {
        return Err(NameValidationError::TooLong { max_length });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        assert!(validate_slug("legal-units_2024", 64).is_ok());
        assert_eq!(validate_slug("", 64), Err(SlugValidationError::Required));
        assert_eq!(validate_slug("Upper", 64), Err(SlugValidationError::InvalidFormat));
        assert_eq!(
            validate_slug("-lead", 64),
            Err(SlugValidationError::InvalidHyphenPlacement)
        );
        assert_eq!(
            validate_slug("abcdef", 5),
            Err(SlugValidationError::TooLong { max_length: 5 })
        );
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Tax office", 10).is_ok());
        assert_eq!(validate_name("   ", 10), Err(NameValidationError::Required));
    }
}
