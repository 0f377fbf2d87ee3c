//! Shared error definitions and small utilities used across every meshhub crate.

pub mod canonical;
pub mod error;
pub mod time;

pub use error::{Error, FromMessage, MeshhubError, Result};
