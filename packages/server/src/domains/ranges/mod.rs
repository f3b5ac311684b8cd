pub mod access;
pub mod data;
pub mod models;

pub use models::{HostBinding, Range, RangeMetadata, RangeResource, RangeStatus, RoomInstance};
