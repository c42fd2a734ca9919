//! Shared helpers: the crate error type and filesystem utilities.

pub mod error;
pub mod fs;

pub use error::{AppError, AppResult};
