//! # Thesis Common Library
//!
//! Shared code for the thesis generation services:
//! - Error type and result alias
//! - Bootstrap configuration (TOML file, root folder resolution)
//! - Pipeline event types and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
