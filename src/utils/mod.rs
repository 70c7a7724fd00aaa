//! Utility modules shared across the server

pub mod net;
pub mod throttle;

pub use net::bind_tcp_listener;
pub use throttle::LogThrottler;
