use lazy_static::lazy_static;
use pulldown_cmark::{html, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd};
use regex::Regex;

use crate::dom::{parse_html, HtmlNode};
use crate::options::{EmphasisTags, HtmlOptions};
use crate::sanitize::{sanitize_html, sanitize_nodes};

lazy_static! {
    static ref BARE_URL: Regex = Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+").unwrap();
}

pub(crate) fn gfm_options() -> Options {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TASKLISTS);
    opts.insert(Options::ENABLE_FOOTNOTES);
    opts
}

fn trim_url(raw: &str) -> &str {
    let mut url = raw;
    loop {
        let Some(last) = url.chars().last() else {
            return url;
        };
        let strip = match last {
            '?' | '!' | '.' | ',' | ':' | ';' | '*' | '_' | '~' | '\'' | '"' => true,
            ')' => url.matches(')').count() > url.matches('(').count(),
            _ => false,
        };
        if !strip {
            return url;
        }
        url = &url[..url.len() - last.len_utf8()];
    }
}

fn push_autolinked<'a>(text: CowStr<'a>, out: &mut Vec<Event<'a>>) {
    let s: &str = &text;
    if !BARE_URL.is_match(s) {
        out.push(Event::Text(text));
        return;
    }
    let mut last = 0;
    for m in BARE_URL.find_iter(s) {
        let url = trim_url(m.as_str());
        // "www." alone or "http://" alone is not a link
        if url.len() <= 4 || url.ends_with("://") || m.start() < last {
            continue;
        }
        if m.start() > last {
            out.push(Event::Text(CowStr::from(s[last..m.start()].to_string())));
        }
        let dest = if url[..4].eq_ignore_ascii_case("www.") {
            format!("http://{url}")
        } else {
            url.to_string()
        };
        out.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: CowStr::from(dest),
            title: CowStr::from(""),
            id: CowStr::from(""),
        }));
        out.push(Event::Text(CowStr::from(url.to_string())));
        out.push(Event::End(TagEnd::Link));
        last = m.start() + url.len();
    }
    if last < s.len() {
        out.push(Event::Text(CowStr::from(s[last..].to_string())));
    }
}

/// Parser events with GFM autolinks, raw-HTML policy and emphasis tags applied.
fn render_events<'a>(md: &'a str, opts: &HtmlOptions) -> Vec<Event<'a>> {
    // pulldown-cmark may split one run of text into several events
    let mut merged: Vec<Event<'a>> = Vec::new();
    for ev in Parser::new_ext(md, gfm_options()) {
        if let Event::Text(t) = &ev {
            if let Some(Event::Text(prev)) = merged.last_mut() {
                let joined = format!("{}{}", &**prev, &**t);
                *prev = CowStr::from(joined);
                continue;
            }
        }
        merged.push(ev);
    }

    let legacy = opts.emphasis == EmphasisTags::Legacy;
    let mut out = Vec::with_capacity(merged.len());
    let mut link_depth = 0usize;
    let mut in_code_block = false;

    for ev in merged {
        match ev {
            Event::Start(tag @ (Tag::Link { .. } | Tag::Image { .. })) => {
                link_depth += 1;
                out.push(Event::Start(tag));
            }
            Event::End(end @ (TagEnd::Link | TagEnd::Image)) => {
                link_depth = link_depth.saturating_sub(1);
                out.push(Event::End(end));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                out.push(Event::Start(Tag::CodeBlock(kind)));
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push(Event::End(TagEnd::CodeBlock));
            }
            Event::Text(t) if link_depth == 0 && !in_code_block => push_autolinked(t, &mut out),

            Event::Start(Tag::HtmlBlock) if !opts.allow_dangerous_html => {
                out.push(Event::Start(Tag::Paragraph));
            }
            Event::End(TagEnd::HtmlBlock) if !opts.allow_dangerous_html => {
                out.push(Event::End(TagEnd::Paragraph));
            }
            Event::Html(raw) | Event::InlineHtml(raw) if !opts.allow_dangerous_html => {
                out.push(Event::Text(raw));
            }

            Event::Start(Tag::Emphasis) if legacy => out.push(Event::InlineHtml("<i>".into())),
            Event::End(TagEnd::Emphasis) if legacy => out.push(Event::InlineHtml("</i>".into())),
            Event::Start(Tag::Strikethrough) if legacy => {
                out.push(Event::InlineHtml("<s>".into()))
            }
            Event::End(TagEnd::Strikethrough) if legacy => {
                out.push(Event::InlineHtml("</s>".into()))
            }
            other => out.push(other),
        }
    }
    out
}

fn render_unsanitized(md: &str, opts: &HtmlOptions) -> String {
    let mut out = String::with_capacity(md.len() * 3 / 2);
    html::push_html(&mut out, render_events(md, opts).into_iter());
    out
}

/// Renders GitHub-flavored Markdown to an HTML fragment.
pub fn markdown_to_html(md: &str, opts: &HtmlOptions) -> String {
    let out = render_unsanitized(md, opts);
    if opts.sanitize {
        sanitize_html(&out)
    } else {
        out
    }
}

/// Like [`markdown_to_html`] but returns the parsed tree.
pub fn markdown_to_html_nodes(md: &str, opts: &HtmlOptions) -> Vec<HtmlNode> {
    let nodes = parse_html(&render_unsanitized(md, opts));
    if opts.sanitize {
        sanitize_nodes(nodes)
    } else {
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(md: &str) -> String {
        markdown_to_html(md, &HtmlOptions::default())
    }

    #[test]
    fn basic_blocks() {
        let out = render("# Hello World\n\n**Bold** and *italic*\n");
        assert!(out.contains("<h1>Hello World</h1>"));
        assert!(out.contains("<strong>Bold</strong>"));
        assert!(out.contains("<em>italic</em>"));
    }

    #[test]
    fn raw_html_is_escaped_by_default() {
        let out = render("<script>alert('x')</script>\n\nTest <b>bold</b>\n");
        assert!(!out.contains("<script"));
        assert!(!out.contains("<b>"));
        assert!(out.contains("&lt;b&gt;bold&lt;/b&gt;"));
    }

    #[test]
    fn dangerous_html_without_sanitizing_passes_through() {
        let opts = HtmlOptions::new()
            .with_dangerous_html(true)
            .with_sanitize(false);
        let out = markdown_to_html("<script>alert(1)</script>\n\nTest <b>bold</b>\n", &opts);
        assert!(out.contains("<script>alert(1)</script>"));
        assert!(out.contains("<b>bold</b>"));
    }

    #[test]
    fn dangerous_html_is_still_sanitized() {
        let opts = HtmlOptions::new().with_dangerous_html(true);
        let out = markdown_to_html(
            "<div onclick=\"x()\">hi</div>\n\n<script>alert(1)</script>\n\nTest <b>bold</b>\n",
            &opts,
        );
        assert!(!out.contains("script"));
        assert!(!out.contains("onclick"));
        assert!(out.contains("<b>bold</b>"));
        assert!(out.contains("<div>hi</div>"));
    }

    #[test]
    fn legacy_tags() {
        let opts = HtmlOptions::new().with_emphasis(EmphasisTags::Legacy);
        let out = markdown_to_html("*a* **b** ~~c~~", &opts);
        assert!(out.contains("<i>a</i>"));
        assert!(out.contains("<strong>b</strong>"));
        assert!(out.contains("<s>c</s>"));
        assert!(!out.contains("<em>"));
    }

    #[test]
    fn bare_urls_become_links() {
        let out = render("see https://example.com/a_b. and www.rust-lang.org");
        assert!(out.contains(r#"<a href="https://example.com/a_b">https://example.com/a_b</a>."#));
        assert!(out.contains(r#"<a href="http://www.rust-lang.org">www.rust-lang.org</a>"#));
    }

    #[test]
    fn urls_in_code_are_left_alone() {
        let out = render("`https://example.com`\n\n```\nhttps://example.com\n```\n");
        assert!(!out.contains("<a "));
    }

    #[test]
    fn explicit_links_are_not_nested() {
        let out = render("[https://a.io](https://b.io)");
        assert_eq!(out.matches("<a ").count(), 1);
    }

    #[test]
    fn tables_and_task_lists() {
        let out = render("| a | b |\n|---|:-:|\n| 1 | 2 |\n\n- [x] done\n- [ ] todo\n");
        assert!(out.contains("<th>a</th>"));
        assert!(out.contains("text-align: center"));
        assert!(out.contains("checked"));
        assert_eq!(out.matches("type=\"checkbox\"").count(), 2);
    }

    #[test]
    fn nodes_entry_point_matches_string() {
        let nodes = markdown_to_html_nodes("# T\n", &HtmlOptions::default());
        assert!(nodes.iter().any(|n| n.is_tag("h1")));
    }
}
