mod efos;
#[allow(clippy::module_inception)]
mod snapshot;
mod snapshot_list;

pub(crate) use efos::EfosInner;
pub use efos::EventuallyFileOnlySnapshot;
pub use snapshot::Snapshot;
pub(crate) use snapshot_list::{SnapshotLink, SnapshotList};
