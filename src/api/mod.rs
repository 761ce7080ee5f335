//! API route definitions
//!
//! Download endpoints live under /api; health probes sit at the root.

pub mod downloads;
pub mod error;
pub mod health;

pub use error::ApiError;
