pub mod live_message;
pub mod models;
pub mod presentation;
pub mod view_state;
