//! vellum - template compiler and page-rendering pipeline
//!
//! vellum compiles text templates into executable procedures and drives them
//! through a concurrent pipeline that renders the pages of a static site.
//!
//! # Architecture Overview
//!
//! - Templates are tokenized, compiled into a small IR and cached per path by
//!   an [`template::Environment`]. Tags and filters are pluggable.
//! - The [`renderer::Renderer`] groups pages by render order, expands
//!   generator pages, renders page content through the engines of each
//!   format and applies nested layouts.
//! - The [`site::Site`] driver scans a directory, feeds the renderer and
//!   writes the output.
//!
//! # Core Modules
//!
//! - [`template`] - tokenizer, compiler, runtime, tags, filters and loaders
//! - [`renderer`] - pages, formats, engines and the rendering pipeline
//! - [`site`] - directory scanning and output writing
//! - [`config`] - `vellum.toml` site configuration
//! - [`core`] - error types and user-facing error formatting
//! - [`markdown`] - frontmatter parsing and markdown to HTML
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum::template::{Environment, MemoryLoader};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let env = Environment::new(Arc::new(MemoryLoader::new()));
//! let mut data = serde_json::Map::new();
//! data.insert("name".into(), "world".into());
//! let result = env.run_string("Hello {{ name |> upper }}", data, None).await?;
//! assert_eq!(result.content, "Hello WORLD");
//! # Ok(())
//! # }
//! ```

// Core functionality modules
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

// Rendering
pub mod markdown;
pub mod renderer;
pub mod site;
pub mod template;

// Supporting modules
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
