//! The template environment: compilation pipeline, cache and entry points.
//!
//! An [`Environment`] owns the tag handlers, the filter table, the token
//! preprocessors, the [`Loader`] and the compiled-template cache. Templates
//! are compiled once per resolved path and shared as
//! `Arc<CompiledTemplate>` by every task that renders them.
//!
//! # Example
//!
//! ```rust,no_run
//! use vellum::template::{Environment, MemoryLoader};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let loader = MemoryLoader::new();
//! loader.insert("/_includes/hello.vto", "Hello {{ name |> upper }}!");
//! let env = Environment::new(Arc::new(loader));
//!
//! let data = json!({ "name": "world" }).as_object().cloned().unwrap_or_default();
//! let result = env.run("hello.vto", data, None).await?;
//! assert_eq!(result.content, "Hello WORLD!");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;

use super::error::{TemplateError, create_error};
use super::expr::{parse_arguments, parse_expression};
use super::filters::{Filter, FilterContext, FilterInvocation, FnFilter, builtin_filters};
use super::ir::{Expr, FilterCall, Node};
use super::loader::{LoadedSource, Loader};
use super::runtime::Runtime;
use super::tags::{TagHandler, builtin_tags};
use super::token::{Token, TokenKind, TokenStream};
use super::tokenizer;
use super::value::Data;

/// Rewrites the token stream before compilation.
///
/// Returning `Ok(None)` leaves the stream unchanged.
pub trait TokenPreprocessor: Send + Sync {
    fn process(
        &self,
        env: &Environment,
        tokens: &[Token],
        path: Option<&str>,
    ) -> Result<Option<Vec<Token>>>;
}

impl<F> TokenPreprocessor for F
where
    F: Fn(&Environment, &[Token], Option<&str>) -> Result<Option<Vec<Token>>> + Send + Sync,
{
    fn process(
        &self,
        env: &Environment,
        tokens: &[Token],
        path: Option<&str>,
    ) -> Result<Option<Vec<Token>>> {
        self(env, tokens, path)
    }
}

/// Behaviour switches of an [`Environment`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentOptions {
    /// Escape every printed expression unless it is marked `safe`.
    pub autoescape: bool,
    /// Name under which the whole data context is reachable.
    pub data_var: String,
    /// Resolve free identifiers against the data context.
    pub auto_data_vars: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            autoescape: false,
            data_var: "it".to_string(),
            auto_data_vars: true,
        }
    }
}

/// Output of rendering a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateResult {
    pub content: String,
    /// Variables declared with `export`.
    pub exports: Data,
}

/// An immutable, executable template.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub(crate) source: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) path: Option<String>,
    pub(crate) defaults: Data,
    pub(crate) is_async: bool,
    /// Compiled from the loader (source and frontmatter) rather than a string.
    pub(crate) loaded: bool,
}

impl CompiledTemplate {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Frontmatter data merged under the render data.
    pub fn defaults(&self) -> &Data {
        &self.defaults
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Pretty-printed IR, kept for diagnostics.
    pub fn code(&self) -> String {
        format!("{:#?}", self.nodes)
    }

    /// Execute the template with `data` layered over its defaults.
    pub async fn render(&self, env: &Environment, data: Data) -> Result<TemplateResult> {
        self.render_at_depth(env, data, 0).await
    }

    /// Execute a template that was compiled without async features.
    pub fn render_sync(&self, env: &Environment, data: Data) -> Result<TemplateResult> {
        if self.is_async {
            return Err(TemplateError::AsyncInSync {
                path: self.path.clone().unwrap_or_else(|| "<anonymous>".to_string()),
            }
            .into());
        }
        futures::executor::block_on(self.render_at_depth(env, data, 0))
    }

    pub(crate) fn render_at_depth<'a>(
        &'a self,
        env: &'a Environment,
        data: Data,
        depth: usize,
    ) -> BoxFuture<'a, Result<TemplateResult>> {
        Box::pin(async move {
            let mut context = self.defaults.clone();
            context.extend(data);

            let mut runtime = Runtime::new(env, self, context, depth);
            let mut content = String::new();
            match runtime.run_nodes(&self.nodes, &mut content).await {
                Ok(()) => Ok(TemplateResult {
                    content,
                    exports: runtime.into_exports(),
                }),
                Err(err) => {
                    Err(create_error(self.path.as_deref(), &self.source, runtime.position(), err))
                }
            }
        })
    }
}

/// Compiles, caches and runs templates.
pub struct Environment {
    cache: DashMap<String, Arc<CompiledTemplate>>,
    tags: Vec<Arc<dyn TagHandler>>,
    filters: DashMap<String, Arc<dyn Filter>>,
    preprocessors: Vec<Arc<dyn TokenPreprocessor>>,
    loader: Arc<dyn Loader>,
    options: EnvironmentOptions,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("cached", &self.cache.len())
            .field("tags", &self.tags.len())
            .field("filters", &self.filters.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Environment {
    /// Create an environment with the built-in tags and filters.
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self::with_options(loader, EnvironmentOptions::default())
    }

    pub fn with_options(loader: Arc<dyn Loader>, options: EnvironmentOptions) -> Self {
        let filters = DashMap::new();
        for (name, filter) in builtin_filters() {
            filters.insert(name.to_string(), filter);
        }
        Self {
            cache: DashMap::new(),
            tags: builtin_tags(),
            filters,
            preprocessors: Vec::new(),
            loader,
            options,
        }
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// Register a tag handler; it is offered tags after the ones registered before it.
    pub fn add_tag(&mut self, tag: Arc<dyn TagHandler>) {
        self.tags.push(tag);
    }

    /// Register a filter, replacing any filter with the same name.
    pub fn add_filter(&self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        self.filters.insert(name.into(), filter);
    }

    /// Register a synchronous closure as a filter.
    pub fn add_filter_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&FilterContext<'_>, serde_json::Value, &[serde_json::Value]) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        self.add_filter(name, Arc::new(FnFilter(f)));
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn add_preprocessor(&mut self, preprocessor: Arc<dyn TokenPreprocessor>) {
        self.preprocessors.push(preprocessor);
    }

    /// Tokenize `source` and run the token preprocessors over the result.
    pub fn tokenize(&self, source: &str, path: Option<&str>) -> Result<TokenStream> {
        let mut tokens = tokenizer::tokenize(source).map_err(|err| {
            let cause = TemplateError::Tokenize {
                message: err.message,
                position: err.position,
            };
            create_error(path, source, err.position, cause.into())
        })?;

        for preprocessor in &self.preprocessors {
            if let Some(replaced) = preprocessor.process(self, &tokens, path)? {
                tokens = replaced;
            }
        }

        Ok(TokenStream::new(tokens))
    }

    /// Compile tokens until the stream ends or a tag in `stop_tags` is next.
    ///
    /// A stop tag matches on its whole body or on its first word, so `"else"`
    /// stops at `{{ else if x }}` too. The stop tag itself is left in the stream.
    pub fn compile_tokens(
        &self,
        tokens: &mut TokenStream,
        stop_tags: &[&str],
    ) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();

        'tokens: while let Some(next) = tokens.peek() {
            if next.is_tag() && is_stop_tag(&next.text, stop_tags) {
                break;
            }
            let Some(token) = tokens.next() else {
                break;
            };

            match token.kind {
                TokenKind::Comment => {}
                TokenKind::String => {
                    if !token.text.is_empty() {
                        nodes.push(Node::Text(token.text));
                    }
                }
                TokenKind::Filter => {
                    return Err(TemplateError::UnexpectedToken {
                        kind: "filter".to_string(),
                        text: token.text,
                        position: token.position,
                    });
                }
                TokenKind::Tag => {
                    let first = first_word(&token.text);
                    if first.starts_with('/') || first == "else" {
                        return Err(TemplateError::UnexpectedToken {
                            kind: "tag".to_string(),
                            text: token.text,
                            position: token.position,
                        });
                    }

                    nodes.push(Node::Marker(token.position));
                    for tag in &self.tags {
                        if let Some(node) = tag.compile(self, &token.text, token.position, tokens)? {
                            nodes.push(node);
                            continue 'tokens;
                        }
                    }

                    let expr = parse_expression(&token.text, token.position)?;
                    let expr = self.compile_filters(tokens, expr, self.options.autoescape)?;
                    nodes.push(Node::Output(expr));
                }
            }
        }

        Ok(nodes)
    }

    /// Apply the filter tokens that follow a tag to `expr`.
    pub fn compile_filters(
        &self,
        tokens: &mut TokenStream,
        mut expr: Expr,
        autoescape: bool,
    ) -> Result<Expr, TemplateError> {
        let mut safe = false;

        while let Some(token) = tokens.next_if(|token| token.kind == TokenKind::Filter) {
            let invocation =
                FilterInvocation::parse(&token.text).ok_or_else(|| TemplateError::InvalidFilter {
                    text: token.text.clone(),
                    position: token.position,
                })?;

            if invocation.name == "safe" {
                safe = true;
                continue;
            }

            let filter = self.resolve_filter(&invocation.name, token.position)?;
            let args = match &invocation.args {
                Some(args) => parse_arguments(args, token.position)?,
                None => Vec::new(),
            };
            expr = Expr::Filter(FilterCall {
                is_async: invocation.is_async || filter.is_async(),
                name: invocation.name,
                filter,
                input: Box::new(expr),
                args,
            });
        }

        if autoescape && !safe {
            let position = tokens.position().unwrap_or_default();
            expr = Expr::Filter(FilterCall {
                name: "escape".to_string(),
                filter: self.resolve_filter("escape", position)?,
                input: Box::new(expr),
                args: Vec::new(),
                is_async: false,
            });
        }

        Ok(expr)
    }

    fn resolve_filter(&self, name: &str, position: usize) -> Result<Arc<dyn Filter>, TemplateError> {
        if let Some(filter) = self.filters.get(name) {
            return Ok(Arc::clone(filter.value()));
        }

        let suggestion = self
            .filters
            .iter()
            .map(|entry| entry.key().clone())
            .map(|candidate| (strsim::levenshtein(name, &candidate), candidate))
            .filter(|(distance, _)| *distance <= 2)
            .min()
            .map(|(_, candidate)| candidate);

        Err(TemplateError::UnknownFilter {
            name: name.to_string(),
            suggestion,
            position,
        })
    }

    /// Compile `source` into an executable template.
    ///
    /// With `sync` set, templates that use async features are rejected. The
    /// result is not cached; see [`Environment::load`] and
    /// [`Environment::run_string`].
    pub fn compile(
        &self,
        source: &str,
        path: Option<&str>,
        defaults: Option<Data>,
        sync: bool,
    ) -> Result<Arc<CompiledTemplate>> {
        self.build(source, path, defaults, sync).map(Arc::new)
    }

    fn build(
        &self,
        source: &str,
        path: Option<&str>,
        defaults: Option<Data>,
        sync: bool,
    ) -> Result<CompiledTemplate> {
        let mut tokens = self.tokenize(source, path)?;
        let nodes = self.compile_tokens(&mut tokens, &[]).map_err(|err| match err.position() {
            Some(position) => create_error(path, source, position, err.into()),
            None => err.into(),
        })?;

        let is_async = nodes.iter().any(Node::is_async);
        if sync && is_async {
            return Err(TemplateError::AsyncInSync {
                path: path.unwrap_or("<anonymous>").to_string(),
            }
            .into());
        }

        Ok(CompiledTemplate {
            source: source.to_string(),
            nodes,
            path: path.map(str::to_string),
            defaults: defaults.unwrap_or_default(),
            is_async,
            loaded: false,
        })
    }

    /// Load a template through the loader, compiling it on first use.
    ///
    /// `file` is resolved against `from` (the path of the requesting template).
    /// Query strings and fragments are ignored when looking up the cache. An
    /// entry compiled from a string under the same path (see
    /// [`Environment::run_string`]) lacks the file's frontmatter and is
    /// replaced.
    pub async fn load(&self, file: &str, from: Option<&str>) -> Result<Arc<CompiledTemplate>> {
        let resolved = self.loader.resolve(from.unwrap_or_default(), file);
        let path = strip_suffixes(&resolved);

        if let Some(cached) = self.cached(path).filter(|template| template.loaded) {
            debug!("Template cache hit: {}", path);
            return Ok(cached);
        }

        debug!("Template cache miss: {}", path);
        let LoadedSource {
            source,
            data,
        } = self.loader.load(path).await?;
        let mut template = self.build(&source, Some(path), Some(data), false)?;
        template.loaded = true;
        let template = Arc::new(template);

        let mut entry = self.cache.entry(path.to_string()).or_insert_with(|| Arc::clone(&template));
        if !entry.loaded {
            *entry = template;
        }
        Ok(Arc::clone(entry.value()))
    }

    /// Load and render `file`.
    pub async fn run(&self, file: &str, data: Data, from: Option<&str>) -> Result<TemplateResult> {
        let template = self.load(file, from).await?;
        template.render(self, data).await
    }

    /// Compile and render `source`.
    ///
    /// With a `file`, the compiled template is cached under that path and
    /// reused as long as the source does not change.
    pub async fn run_string(
        &self,
        source: &str,
        data: Data,
        file: Option<&str>,
    ) -> Result<TemplateResult> {
        let template = self.compile_cached(source, file)?;
        template.render(self, data).await
    }

    /// Compile and render `source` synchronously; async features are an error.
    pub fn run_string_sync(&self, source: &str, data: Data) -> Result<TemplateResult> {
        let template = self.compile(source, None, None, true)?;
        template.render_sync(self, data)
    }

    fn compile_cached(&self, source: &str, file: Option<&str>) -> Result<Arc<CompiledTemplate>> {
        let Some(file) = file else {
            return self.compile(source, None, None, false);
        };

        if let Some(cached) = self.cached(file).filter(|template| template.source == source) {
            debug!("Template cache hit: {}", file);
            return Ok(cached);
        }

        let template = self.compile(source, Some(file), None, false)?;
        self.cache.insert(file.to_string(), Arc::clone(&template));
        Ok(template)
    }

    /// The cached template for `path`, if any.
    pub fn cached(&self, path: &str) -> Option<Arc<CompiledTemplate>> {
        self.cache.get(path).map(|entry| Arc::clone(entry.value()))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Forget the compiled template for `file`.
    pub fn delete_cache(&self, file: &str) {
        self.cache.remove(strip_suffixes(file));
    }
}

fn is_stop_tag(text: &str, stop_tags: &[&str]) -> bool {
    let first = first_word(text);
    stop_tags.iter().any(|stop| text == *stop || first == *stop)
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}

fn strip_suffixes(path: &str) -> &str {
    match path.find(['?', '#']) {
        Some(index) => &path[..index],
        None => path,
    }
}
