pub mod snapshot;

pub use snapshot::{JobSnapshotError, JobSnapshotQuery};
