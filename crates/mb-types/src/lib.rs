pub mod config;
pub mod context;
pub mod errors;

pub use config::*;
pub use context::*;
pub use errors::*;
