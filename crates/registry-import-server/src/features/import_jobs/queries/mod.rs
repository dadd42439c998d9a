pub mod get;
pub mod logs;

pub use get::{GetImportJobError, GetImportJobQuery};
pub use logs::{ListUploadLogsError, ListUploadLogsQuery};
