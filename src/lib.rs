pub mod components;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod message;
pub mod metrics;
pub mod panic_handler;
pub mod pipeline;
pub mod program;
pub mod registry;

pub use config::Config;
pub use error::{Result, StreamError};
