//! Request handlers.

pub mod detect;
pub mod health;
pub mod training;

pub use detect::*;
pub use health::*;
pub use training::*;
