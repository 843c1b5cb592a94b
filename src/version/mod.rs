pub mod table;
#[allow(clippy::module_inception)]
pub mod version;
pub mod version_edit;
pub mod version_set;

pub use table::Table;
pub use version::Version;
pub use version_edit::{FileMetaData, NUM_LEVELS, SHARED_LEVELS_START, VersionEdit};
pub use version_set::{VersionRef, VersionSet};
