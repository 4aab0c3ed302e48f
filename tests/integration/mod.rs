//! Integration test suite for vellum
//!
//! End-to-end tests of the template environment, the rendering pipeline,
//! the site driver and the command-line binary.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! - **templates**: compilation, caching, escaping and error locations
//! - **rendering**: render order, generators, layouts, engines and on-demand pages
//! - **site**: directory builds written to disk
//! - **cli**: the `vellum` binary

mod cli;
mod rendering;
mod site;
mod templates;

use serde_json::Value;
use vellum::template::Data;

fn data(value: Value) -> Data {
    value.as_object().cloned().unwrap_or_default()
}
