pub mod env;
pub mod store;
pub mod worker;

pub use store::{NewResource, PgProvisionerStore, ProvisionerStore, RangeLease};
pub use worker::Worker;
