mod handler;

pub use handler::realtime_handler;
