pub mod create;

pub use create::{CreateDataSourceCommand, CreateDataSourceError};
