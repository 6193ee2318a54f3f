pub mod entities;
pub mod repositories;

#[allow(unused_imports)]
pub use entities::{BuildConfiguration, BuildRecord, BuildRecordUpdater, BuildStatus};
#[allow(unused_imports)]
pub use repositories::{BuildConfigurationApi, BuildRecordApi, IdArgs, RecordQuery};
