//! Markdown rendering for lesson content
//!
//! Lesson bodies are written by instructors in Markdown and stored alongside
//! their rendered HTML. Raw HTML in the source is escaped rather than passed
//! through, so lesson pages cannot inject markup.

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Markdown to HTML renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);

        let parser = Parser::new_ext(markdown, options);
        let events = self.process_events(parser);

        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());
        output
    }

    fn process_events<'a>(&self, parser: Parser<'a>) -> Vec<Event<'a>> {
        let mut events = Vec::new();
        let mut code: Option<(Option<String>, String)> = None;

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                        _ => None,
                    };
                    code = Some((lang, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, body)) = code.take() {
                        events.push(Event::Html(code_block(lang.as_deref(), &body).into()));
                    }
                }
                Event::Text(text) if code.is_some() => {
                    if let Some((_, body)) = code.as_mut() {
                        body.push_str(&text);
                    }
                }
                Event::Html(raw) | Event::InlineHtml(raw) => {
                    events.push(Event::Text(CowStr::from(raw.to_string())));
                }
                other => events.push(other),
            }
        }

        events
    }
}

fn code_block(lang: Option<&str>, code: &str) -> String {
    match lang {
        Some(lang) => format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape(lang),
            html_escape(code)
        ),
        None => format!("<pre><code>{}</code></pre>\n", html_escape(code)),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Rough reading time at 200 words per minute, at least one minute
pub fn estimate_reading_minutes(markdown: &str) -> i64 {
    let words = markdown.split_whitespace().count() as i64;
    ((words + 199) / 200).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic_markdown() {
        let html = MarkdownRenderer::new().render("# Ownership\n\nThis is **bold**.");
        assert!(html.contains("<h1>Ownership</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn test_render_table_and_tasklist() {
        let renderer = MarkdownRenderer::new();
        let table = renderer.render("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(table.contains("<table>"));

        let tasks = renderer.render("- [x] done\n- [ ] todo");
        assert!(tasks.contains("checkbox"));
    }

    #[test]
    fn test_code_block_language_class_and_escaping() {
        let html = MarkdownRenderer::new().render("```rust\nlet v: Vec<u8> = vec![];\n```");
        assert!(html.contains("class=\"language-rust\""));
        assert!(html.contains("Vec&lt;u8&gt;"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let html = MarkdownRenderer::new().render("<script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(MarkdownRenderer::new().render(""), "");
    }

    #[test]
    fn test_estimate_reading_minutes() {
        assert_eq!(estimate_reading_minutes(""), 1);
        assert_eq!(estimate_reading_minutes(&"word ".repeat(200)), 1);
        assert_eq!(estimate_reading_minutes(&"word ".repeat(201)), 2);
    }
}
