pub mod config;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod sanitize;
pub mod trace;

pub use error::{Error, Result};
