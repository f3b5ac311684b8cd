pub mod data;
pub mod models;

pub use models::{
    normalize_network, Definition, Port, RoomOptions, Service, Template, ALLOWED_NETWORKS,
};
