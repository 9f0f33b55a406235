pub mod comments;
pub mod documents;
pub mod health;

pub use comments::*;
pub use documents::*;
pub use health::*;
