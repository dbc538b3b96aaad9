//! Secret handling utilities.
//!
//! Re-exports the secrecy types config values are wrapped in.

pub use secrecy::{ExposeSecret, SecretString};
