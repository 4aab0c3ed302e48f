//! Template compilation engine.
//!
//! Sources are tokenized, compiled into an IR of [`Node`]s by the registered
//! tag handlers and filters, cached per resolved path and executed by an async
//! interpreter. Failures are reported with the template path, line, column and
//! the offending source line.
//!
//! ```text
//! source ──tokenize──▶ tokens ──compile_tokens──▶ nodes ──render──▶ TemplateResult
//!                         ▲                          │
//!                  preprocessors               Arc<CompiledTemplate>
//!                                              cached by path
//! ```

pub mod environment;
pub mod error;
pub mod expr;
pub mod filters;
pub mod ir;
pub mod loader;
mod runtime;
pub mod tags;
pub mod token;
pub mod tokenizer;
pub mod value;

pub use environment::{
    CompiledTemplate, Environment, EnvironmentOptions, TemplateResult, TokenPreprocessor,
};
pub use error::{SourceError, TemplateError, create_error};
pub use filters::{Filter, FilterContext, FnFilter};
pub use ir::{Expr, Node};
pub use loader::{FileLoader, LoadedSource, Loader, MemoryLoader};
pub use tags::TagHandler;
pub use token::{Token, TokenKind, TokenStream};
pub use value::Data;
