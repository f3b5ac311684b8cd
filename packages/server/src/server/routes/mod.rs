mod events;
mod health;
mod ranges;
mod rooms;
mod templates;

pub use events::stream_range_events;
pub use health::{healthz, me};
pub use ranges::{create_range, destroy_range, get_range, list_ranges, reset_range};
pub use rooms::{
    get_room_settings, list_rooms, recreate_room, restart_room, start_room, stop_room,
    update_room_settings,
};
pub use templates::{create_template, get_template, list_templates};
