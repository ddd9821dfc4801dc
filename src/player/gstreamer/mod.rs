mod bus_handler;
mod engine;
mod stream_manager;

pub use bus_handler::{GlibPump, convert_message};
pub use engine::GstEngine;
