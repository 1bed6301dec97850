//! Core business logic for kaiwa.

pub mod services;

pub use services::*;
