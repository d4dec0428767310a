//! HTTP surface

pub mod assessment;
pub mod error;
pub mod health;
pub mod openapi;

pub use error::ApiError;
