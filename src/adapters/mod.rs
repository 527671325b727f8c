pub mod api;
pub mod backend;
pub mod live_channel;
