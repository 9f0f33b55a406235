pub mod document;
pub mod error;
pub mod health;
pub mod message;

pub use document::*;
pub use error::*;
pub use health::*;
pub use message::*;
