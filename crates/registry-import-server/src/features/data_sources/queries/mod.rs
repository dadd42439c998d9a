pub mod get;
pub mod list;

pub use get::{GetDataSourceError, GetDataSourceQuery};
pub use list::{ListDataSourcesError, ListDataSourcesQuery};
