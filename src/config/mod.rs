//! Application configuration

mod schema;
mod store;

pub use schema::{AppConfig, StreamConfig, WebConfig, WebRtcConfig};
pub use store::ConfigStore;
