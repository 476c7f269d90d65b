//! HTML → Markdown, GFM flavour.
//!
//! The HTML tree is first mapped onto [`crate::mdast`] and then serialized by
//! [`crate::writer`], so escaping and list layout live in one place.

use crate::dom::{parse_html, serialize_html, HtmlNode};
use crate::mdast::{Align, Block, Cell, Document, Inline, List, ListItem, Table};
use crate::options::MarkdownStyle;
use crate::writer::write_markdown;

fn is_skipped(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "head" | "title" | "meta" | "link" | "noscript" | "template"
    )
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "header"
            | "footer"
            | "nav"
            | "aside"
            | "figure"
            | "figcaption"
            | "address"
            | "center"
            | "blockquote"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "pre"
            | "hr"
            | "table"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "details"
            | "summary"
            | "body"
            | "html"
    )
}

fn contains_block(node: &HtmlNode) -> bool {
    node.children()
        .iter()
        .any(|c| c.tag().is_some_and(|t| is_block_tag(t) || contains_block(c)))
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if c.is_ascii_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

fn trim_trailing_space(v: &mut Vec<Inline>) {
    if let Some(Inline::Text(t)) = v.last_mut() {
        let keep = t.trim_end_matches(' ').len();
        t.truncate(keep);
        if t.is_empty() {
            v.pop();
        }
    }
}

/// Collapses whitespace across node boundaries and drops empty wrappers.
fn tidy(inlines: Vec<Inline>, prev_space: &mut bool) -> Vec<Inline> {
    let mut out: Vec<Inline> = Vec::new();
    for i in inlines {
        match i {
            Inline::Text(t) => {
                let mut t = collapse_ws(&t);
                if *prev_space && t.starts_with(' ') {
                    t.remove(0);
                }
                if t.is_empty() {
                    continue;
                }
                *prev_space = t.ends_with(' ');
                if let Some(Inline::Text(prev)) = out.last_mut() {
                    prev.push_str(&t);
                } else {
                    out.push(Inline::Text(t));
                }
            }
            Inline::HardBreak => {
                trim_trailing_space(&mut out);
                out.push(Inline::HardBreak);
                *prev_space = true;
            }
            Inline::Emphasis(c) => {
                let c = tidy(c, prev_space);
                if !c.is_empty() {
                    out.push(Inline::Emphasis(c));
                }
            }
            Inline::Strong(c) => {
                let c = tidy(c, prev_space);
                if !c.is_empty() {
                    out.push(Inline::Strong(c));
                }
            }
            Inline::Strike(c) => {
                let c = tidy(c, prev_space);
                if !c.is_empty() {
                    out.push(Inline::Strike(c));
                }
            }
            Inline::Link {
                url,
                title,
                content,
            } => {
                let content = tidy(content, prev_space);
                if !content.is_empty() {
                    out.push(Inline::Link {
                        url,
                        title,
                        content,
                    });
                }
            }
            other => {
                *prev_space = false;
                out.push(other);
            }
        }
    }
    out
}

fn tidy_block(inlines: Vec<Inline>) -> Vec<Inline> {
    let mut prev_space = true;
    let mut v = tidy(inlines, &mut prev_space);
    loop {
        trim_trailing_space(&mut v);
        if matches!(v.last(), Some(Inline::HardBreak)) {
            v.pop();
        } else {
            break;
        }
    }
    while matches!(v.first(), Some(Inline::HardBreak)) {
        v.remove(0);
    }
    v
}

fn replace_breaks(inlines: Vec<Inline>, with: &Inline) -> Vec<Inline> {
    inlines
        .into_iter()
        .map(|i| if i == Inline::HardBreak { with.clone() } else { i })
        .collect()
}

fn inline_children(children: &[HtmlNode]) -> Vec<Inline> {
    let mut out = Vec::new();
    for c in children {
        push_inline(c, &mut out);
    }
    out
}

fn push_inline(node: &HtmlNode, out: &mut Vec<Inline>) {
    let HtmlNode::Element { tag, children, .. } = node else {
        if let HtmlNode::Text(t) = node {
            out.push(Inline::Text(t.clone()));
        }
        return;
    };
    match tag.as_str() {
        t if is_skipped(t) => {}
        "strong" | "b" => out.push(Inline::Strong(inline_children(children))),
        "em" | "i" | "cite" | "dfn" | "var" => out.push(Inline::Emphasis(inline_children(children))),
        "del" | "s" | "strike" => out.push(Inline::Strike(inline_children(children))),
        "code" | "kbd" | "samp" | "tt" => {
            let text = node.text_content().replace(['\n', '\r'], " ");
            if !text.is_empty() {
                out.push(Inline::Code(text));
            }
        }
        "a" => match node.attr("href").map(str::trim).filter(|h| !h.is_empty()) {
            Some(href) => out.push(Inline::Link {
                url: href.to_string(),
                title: node.attr("title").map(str::to_string),
                content: inline_children(children),
            }),
            None => out.extend(inline_children(children)),
        },
        "img" => {
            if let Some(src) = node.attr("src").filter(|s| !s.is_empty()) {
                out.push(Inline::Image {
                    url: src.to_string(),
                    title: node.attr("title").map(str::to_string),
                    alt: node.attr("alt").unwrap_or("").to_string(),
                });
            }
        }
        "br" => out.push(Inline::HardBreak),
        "input" => {}
        t if is_block_tag(t) => {
            out.push(Inline::Text(" ".to_string()));
            out.extend(inline_children(children));
            out.push(Inline::Text(" ".to_string()));
        }
        _ => out.extend(inline_children(children)),
    }
}

fn code_block(pre: &HtmlNode) -> Block {
    let lang_of = |n: &HtmlNode| {
        n.attr("class").and_then(|c| {
            c.split_whitespace()
                .find_map(|x| x.strip_prefix("language-").or_else(|| x.strip_prefix("lang-")))
                .map(str::to_string)
        })
    };
    let code = pre.children().iter().find(|c| c.is_tag("code"));
    let lang = code.and_then(lang_of).or_else(|| lang_of(pre));
    let mut text = pre.text_content();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Block::Code { lang, text }
}

fn is_checkbox(n: &HtmlNode) -> bool {
    n.is_tag("input")
        && n
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("checkbox"))
}

/// Finds a checkbox that opens a list item, looking through a leading `<p>`.
fn leading_checkbox(children: &[HtmlNode]) -> Option<bool> {
    for c in children {
        match c {
            HtmlNode::Text(t) if t.trim().is_empty() => continue,
            HtmlNode::Comment(_) => continue,
            n if is_checkbox(n) => return Some(n.attr("checked").is_some()),
            n if n.is_tag("p") => return leading_checkbox(n.children()),
            _ => return None,
        }
    }
    None
}

/// Item text that starts with a ballot box glyph is treated as a task item.
fn strip_ballot_box(blocks: &mut [Block]) -> Option<bool> {
    let Some(Block::Paragraph(inlines)) = blocks.first_mut() else {
        return None;
    };
    let Some(Inline::Text(t)) = inlines.first_mut() else {
        return None;
    };
    let checked = match t.chars().next() {
        Some('☐') => false,
        Some('☒') | Some('☑') => true,
        _ => return None,
    };
    let rest = t.chars().skip(1).collect::<String>();
    *t = rest.trim_start().to_string();
    if t.is_empty() {
        inlines.remove(0);
    }
    Some(checked)
}

fn list_block(node: &HtmlNode) -> List {
    let start = if node.is_tag("ol") {
        Some(
            node.attr("start")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(1),
        )
    } else {
        None
    };
    let mut items: Vec<ListItem> = Vec::new();
    let mut tight = true;
    for c in node.children() {
        match c.tag() {
            Some("li") => {
                if c.children().iter().any(|n| n.is_tag("p")) {
                    tight = false;
                }
                let mut checked = leading_checkbox(c.children());
                let mut blocks = blocks_of(c.children());
                if checked.is_none() {
                    checked = strip_ballot_box(&mut blocks);
                }
                items.push(ListItem { checked, blocks });
            }
            // a list nested directly in a list belongs to the previous item
            Some("ul") | Some("ol") => {
                let nested = Block::List(list_block(c));
                match items.last_mut() {
                    Some(prev) => prev.blocks.push(nested),
                    None => items.push(ListItem {
                        checked: None,
                        blocks: vec![nested],
                    }),
                }
            }
            _ => {}
        }
    }
    List { start, tight, items }
}

fn table_rows(node: &HtmlNode, rows: &mut Vec<HtmlNode>) {
    for c in node.children() {
        match c.tag() {
            Some("tr") => rows.push(c.clone()),
            Some("thead") | Some("tbody") | Some("tfoot") => table_rows(c, rows),
            _ => {}
        }
    }
}

fn cell_align(cell: &HtmlNode) -> Align {
    let from_style = cell.attr("style").and_then(|s| {
        s.split(';').find_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case("text-align")
                .then(|| v.trim().to_ascii_lowercase())
        })
    });
    match from_style
        .or_else(|| cell.attr("align").map(|a| a.to_ascii_lowercase()))
        .as_deref()
    {
        Some("left") => Align::Left,
        Some("center") => Align::Center,
        Some("right") => Align::Right,
        _ => Align::None,
    }
}

fn has_span(cell: &HtmlNode) -> bool {
    ["colspan", "rowspan"].iter().any(|k| {
        cell.attr(k)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .is_some_and(|n| n > 1)
    })
}

fn has_nested_table(node: &HtmlNode) -> bool {
    node.children()
        .iter()
        .any(|c| c.is_tag("table") || has_nested_table(c))
}

fn cell_inlines(cell: &HtmlNode) -> Cell {
    let br = Inline::Html("<br>".to_string());
    replace_breaks(tidy_block(inline_children(cell.children())), &br)
}

/// GFM table when the first row is a header row; raw HTML otherwise.
fn table_block(node: &HtmlNode) -> Block {
    let mut rows = Vec::new();
    table_rows(node, &mut rows);
    let cells_of = |r: &HtmlNode| -> Vec<HtmlNode> {
        r.children()
            .iter()
            .filter(|c| c.is_tag("td") || c.is_tag("th"))
            .cloned()
            .collect()
    };

    let header_ok = rows.first().is_some_and(|r| {
        let cells = cells_of(r);
        !cells.is_empty() && cells.iter().all(|c| c.is_tag("th"))
    });
    let representable = rows
        .iter()
        .flat_map(|r| cells_of(r))
        .all(|c| !has_span(&c) && !has_nested_table(&c));
    if !header_ok || !representable {
        return Block::Html(serialize_html(std::slice::from_ref(node)));
    }

    let head = cells_of(&rows[0]);
    let table = Table {
        align: head.iter().map(cell_align).collect(),
        header: head.iter().map(cell_inlines).collect(),
        rows: rows[1..]
            .iter()
            .map(|r| cells_of(r).iter().map(cell_inlines).collect())
            .collect(),
    };
    Block::Table(table)
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<Block>,
    pending: Vec<Inline>,
}

impl BlockCollector {
    fn flush(&mut self) {
        let inlines = tidy_block(std::mem::take(&mut self.pending));
        if !inlines.is_empty() {
            self.blocks.push(Block::Paragraph(inlines));
        }
    }

    fn push_block(&mut self, block: Block) {
        self.flush();
        self.blocks.push(block);
    }

    fn visit(&mut self, node: &HtmlNode) {
        let HtmlNode::Element { tag, children, .. } = node else {
            push_inline(node, &mut self.pending);
            return;
        };
        match tag.as_str() {
            t if is_skipped(t) => {}
            t if heading_level(t).is_some() => {
                let level = heading_level(t).unwrap_or(1);
                let content = tidy_block(replace_breaks(
                    inline_children(children),
                    &Inline::Text(" ".to_string()),
                ));
                if content.is_empty() {
                    self.flush();
                } else {
                    self.push_block(Block::Heading { level, content });
                }
            }
            "p" => {
                self.flush();
                self.pending = inline_children(children);
                self.flush();
            }
            "blockquote" => {
                let inner = blocks_of(children);
                if inner.is_empty() {
                    self.flush();
                } else {
                    self.push_block(Block::Quote(inner));
                }
            }
            "ul" | "ol" => {
                let list = list_block(node);
                if list.items.is_empty() {
                    self.flush();
                } else {
                    self.push_block(Block::List(list));
                }
            }
            "pre" => self.push_block(code_block(node)),
            "hr" => self.push_block(Block::Rule),
            "table" => self.push_block(table_block(node)),
            t if is_block_tag(t) => {
                self.flush();
                for c in children {
                    self.visit(c);
                }
                self.flush();
            }
            _ if contains_block(node) => {
                for c in children {
                    self.visit(c);
                }
            }
            _ => push_inline(node, &mut self.pending),
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

fn blocks_of(nodes: &[HtmlNode]) -> Vec<Block> {
    let mut collector = BlockCollector::default();
    for n in nodes {
        collector.visit(n);
    }
    collector.finish()
}

pub fn html_nodes_to_document(nodes: &[HtmlNode]) -> Document {
    Document {
        blocks: blocks_of(nodes),
    }
}

/// Converts an HTML fragment to trimmed Markdown.
pub fn html_to_markdown(html: &str, style: &MarkdownStyle) -> String {
    let doc = html_nodes_to_document(&parse_html(html));
    write_markdown(&doc, style).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BulletMarker;

    fn md(html: &str) -> String {
        html_to_markdown(html, &MarkdownStyle::default())
    }

    #[test]
    fn headings_and_inline_styles() {
        assert_eq!(
            md("<h1>Title</h1><p>Some <strong>bold</strong>, <em>it</em> and <b><i>both</i></b>.</p>"),
            "# Title\n\nSome **bold**, _it_ and **_both_**."
        );
    }

    #[test]
    fn strike_and_code() {
        assert_eq!(
            md("<p><s>gone</s> <del>old</del> <code>x = 1</code></p>"),
            "~~gone~~ ~~old~~ `x = 1`"
        );
    }

    #[test]
    fn whitespace_is_collapsed_outside_pre() {
        assert_eq!(
            md("<p>  a\n   b <strong> c </strong>d</p><pre><code>  keep\n    this</code></pre>"),
            "a b **c** d\n\n```\n  keep\n    this\n```"
        );
    }

    #[test]
    fn code_language_is_kept() {
        assert_eq!(
            md(r#"<pre><code class="language-rust">fn main() {}</code></pre>"#),
            "```rust\nfn main() {}\n```"
        );
    }

    #[test]
    fn nested_lists() {
        let html = "<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul>";
        assert_eq!(md(html), "- a\n  - b\n- c");
        let star = MarkdownStyle::default().with_bullet(BulletMarker::Star);
        assert_eq!(html_to_markdown(html, &star), "* a\n  * b\n* c");
    }

    #[test]
    fn ordered_list_honours_start() {
        assert_eq!(
            md(r#"<ol start="4"><li>x</li><li>y</li></ol>"#),
            "4. x\n5. y"
        );
    }

    #[test]
    fn task_items_from_checkboxes() {
        let html = r#"<ul><li><input type="checkbox" checked disabled> done</li><li><input type="checkbox"> todo</li></ul>"#;
        assert_eq!(md(html), "- [x] done\n- [ ] todo");
    }

    #[test]
    fn task_items_from_ballot_boxes() {
        assert_eq!(
            md("<ul><li>☒ shipped</li><li>☐ pending</li></ul>"),
            "- [x] shipped\n- [ ] pending"
        );
    }

    #[test]
    fn header_tables_become_gfm() {
        let html = r#"<table><tr><th>a</th><th style="text-align: right">b</th></tr><tr><td>1</td><td>x|y</td></tr></table>"#;
        assert_eq!(md(html), "| a | b |\n| --- | ---: |\n| 1 | x\\|y |");
    }

    #[test]
    fn headerless_tables_stay_html() {
        let out = md("<table><tr><td>a</td></tr></table>");
        assert!(out.starts_with("<table>"));
        assert!(out.contains("<td>a</td>"));
    }

    #[test]
    fn links_images_and_breaks() {
        assert_eq!(
            md(r#"<p><a href="https://e.com/x" title="T">site</a><br><img src="a.png" alt="pic"></p>"#),
            "[site](https://e.com/x \"T\")\\\n![pic](a.png)"
        );
    }

    #[test]
    fn markdown_characters_are_escaped() {
        assert_eq!(md("<p>2 * 3 = 6_a [b]</p>"), "2 \\* 3 = 6\\_a \\[b\\]");
    }

    #[test]
    fn unknown_wrappers_are_unwrapped() {
        assert_eq!(
            md("<section><span>a</span><x-box><p>b</p></x-box></section><script>x</script>"),
            "a\n\nb"
        );
    }

    #[test]
    fn blockquote_and_rule() {
        assert_eq!(md("<blockquote><p>q</p></blockquote><hr>"), "> q\n\n---");
    }

    #[test]
    fn output_is_trimmed() {
        assert_eq!(md("\n\n<p>x</p>\n\n"), "x");
    }
}
