pub mod client;
pub mod hub;

pub use client::serve_ws;
pub use hub::{Hub, HubHandle};
