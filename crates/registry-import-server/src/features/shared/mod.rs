//! Helpers shared by the feature slices

pub mod pagination;
pub mod validation;

pub use pagination::{Paginated, PaginationMetadata, PaginationParams};
pub use validation::{validate_name, validate_slug, NameValidationError, SlugValidationError};
