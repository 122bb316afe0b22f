pub mod bus;
pub mod client;

pub use bus::Subscription;
pub use client::{AgentClient, ClientConfig, ConnectionState};
