pub mod create;

pub use create::{CreateImportJobCommand, CreateImportJobError};
