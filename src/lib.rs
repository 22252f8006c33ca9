pub mod alerts;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod groups;
pub mod ja3;
pub mod packet;
pub mod utils;

pub use error::{Result, SensorError};
