//! Markdown support: frontmatter extraction and CommonMark rendering.

pub mod frontmatter;

use pulldown_cmark::{Options, Parser, html};

/// Render CommonMark `source` to HTML.
///
/// Tables, footnotes, strikethrough and task lists are enabled.
pub fn to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options);
    let mut output = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut output, parser);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_html() {
        assert_eq!(to_html("# Title\n\nSome *text*."), "<h1>Title</h1>\n<p>Some <em>text</em>.</p>\n");
    }
}
