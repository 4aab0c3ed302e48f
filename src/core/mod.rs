//! Core types shared across vellum.
//!
//! - [`VellumError`] - failures of the rendering pipeline, site driver and configuration
//! - [`ErrorContext`] - user-facing wrapper with details and suggestions
//! - [`user_friendly_error`] - convert any error for display in the CLI

pub mod error;

pub use error::{ErrorContext, VellumError, user_friendly_error};
