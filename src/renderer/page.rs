//! Pages and their data.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::template::Data;

/// Lazy stream of records produced by a generator page.
pub type RecordStream = BoxStream<'static, anyhow::Result<Data>>;

/// A page whose content expands into several pages.
///
/// The producer is called once with the page data (minus its content) and
/// yields one record per page to create.
#[derive(Clone)]
pub struct Generator(Arc<dyn Fn(Data) -> RecordStream + Send + Sync>);

impl Generator {
    pub fn from_stream<F>(producer: F) -> Self
    where
        F: Fn(Data) -> RecordStream + Send + Sync + 'static,
    {
        Self(Arc::new(producer))
    }

    /// Wrap a synchronous producer of records.
    pub fn from_iter<F, I>(producer: F) -> Self
    where
        F: Fn(Data) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Data>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(move |data| stream::iter(producer(data).into_iter().map(Ok)).boxed())
    }

    pub fn generate(&self, data: Data) -> RecordStream {
        (self.0)(data)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Generator")
    }
}

/// Declared content of a page before rendering.
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
    Generator(Generator),
}

impl Content {
    pub fn is_generator(&self) -> bool {
        matches!(self, Content::Generator(_))
    }

    /// Content carried by a generated record's `content` field.
    pub fn from_record(value: Option<Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(Content::Text(text)),
            Some(other) => Some(Content::Text(other.to_string())),
        }
    }
}

/// Output of rendering a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl RenderedContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RenderedContent::Text(text) => Some(text),
            RenderedContent::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderedContent::Text(text) => text.as_bytes(),
            RenderedContent::Bytes(bytes) => bytes,
        }
    }
}

/// Where a page comes from.
#[derive(Debug, Clone, Default)]
pub struct PageSrc {
    /// Virtual source path, extension included (`/posts/hello.md`).
    pub path: String,
    /// The format extension the page was matched with (`.md`).
    pub ext: String,
    pub created: Option<DateTime<Utc>>,
}

/// Page data: the declared content plus every other field.
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub content: Option<Content>,
    pub fields: Data,
}

impl PageData {
    pub fn new(content: Option<Content>, fields: Data) -> Self {
        Self {
            content,
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get_str("url")
    }

    pub fn layout(&self) -> Option<&str> {
        self.get_str("layout").filter(|layout| !layout.is_empty())
    }

    pub fn is_on_demand(&self) -> bool {
        self.get("ondemand").is_some_and(crate::template::value::is_truthy)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub src: PageSrc,
    pub data: PageData,
    pub content: Option<RenderedContent>,
    /// Virtual output path (`/about/index.html`).
    pub output_path: Option<String>,
    /// Position among the pages generated from the same source.
    pub index: usize,
}

impl Page {
    pub fn new(src: PageSrc, data: PageData) -> Self {
        Self {
            src,
            data,
            content: None,
            output_path: None,
            index: 0,
        }
    }

    pub fn source_path(&self) -> &str {
        &self.src.path
    }

    pub fn is_generator(&self) -> bool {
        self.data.content.as_ref().is_some_and(Content::is_generator)
    }

    /// A copy of this page with new data, as produced by a generator.
    ///
    /// A `content` field in `data` becomes the copy's declared content.
    pub fn duplicate(&self, index: usize, mut data: Data) -> Page {
        let content = Content::from_record(data.remove("content"));
        Page {
            src: self.src.clone(),
            data: PageData::new(content, data),
            content: None,
            output_path: None,
            index,
        }
    }

    /// Set the page URL and derive the output path from it.
    pub fn set_url(&mut self, url: &str) {
        self.data.fields.insert("url".to_string(), Value::String(url.to_string()));
        self.output_path = Some(output_path_for(url));
    }
}

/// `/about/` → `/about/index.html`; other URLs map to themselves.
pub fn output_path_for(url: &str) -> String {
    if url.ends_with('/') { format!("{url}index.html") } else { url.to_string() }
}

/// Normalize a `date` value to RFC 3339.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD` dates and millisecond timestamps;
/// anything else falls back to `created`.
pub fn normalize_date(value: Option<&Value>, created: Option<DateTime<Utc>>) -> Option<String> {
    let parsed = match value {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|date| date.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|date| date.and_utc())
            }),
        Some(Value::Number(millis)) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed.or(created).map(|date| date.to_rfc3339())
}
