//! The `utils` module provides definitions shared across `popsub-messenger`:
//! the error types and the logging bootstrap.

pub mod error;
pub mod logging;
