#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod process;
pub mod prompt;
pub mod stream;
pub mod translate;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
