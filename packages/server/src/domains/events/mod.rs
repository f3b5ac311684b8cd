pub mod data;
pub mod models;

pub use data::PgEventStore;
pub use models::{Event, EventLevel};
