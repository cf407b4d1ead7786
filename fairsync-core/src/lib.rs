mod drive;
mod portal;
mod record;

pub use drive::{
    DriveClient, DriveError, DriveErrorClass, NodeInfo, NodeKind, NodePage, UploadSlot,
};
pub use portal::{DetailRow, PortalClient, PortalError};
pub use record::{FileSlot, ProjectRecord, RecordMap, RemoteRef};
