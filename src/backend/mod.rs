//! Bucle backend adapter
//!
//! ## Responsibilities
//!
//! - Authentication and registration calls
//! - Scan submission with bearer authorization
//! - Review listing/update (consumed by admin tooling, not the engine)
//!
//! The engine treats every call as `Ok(value) | Err(kind)`; transport and
//! wire format are owned by the backend.

mod client;
mod types;

pub use client::{BackendApi, HttpBackendClient};
pub use types::*;
