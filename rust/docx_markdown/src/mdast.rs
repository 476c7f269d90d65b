//! Typed Markdown tree, built either from pulldown-cmark events or from HTML.

use pulldown_cmark::{Alignment, CodeBlockKind, Event, Parser, Tag};

use crate::markdown::gfm_options;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph(Vec<Inline>),
    List(List),
    Table(Table),
    Code { lang: Option<String>, text: String },
    Quote(Vec<Block>),
    Rule,
    /// Raw HTML kept verbatim.
    Html(String),
    FootnoteDefinition { label: String, blocks: Vec<Block> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List {
    /// `Some(n)` for ordered lists starting at `n`.
    pub start: Option<u64>,
    pub tight: bool,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListItem {
    /// `Some` for task list items.
    pub checked: Option<bool>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    None,
    Left,
    Center,
    Right,
}

pub type Cell = Vec<Inline>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub align: Vec<Align>,
    pub header: Vec<Cell>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn columns(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Emphasis(Vec<Inline>),
    Strong(Vec<Inline>),
    Strike(Vec<Inline>),
    Code(String),
    Link {
        url: String,
        title: Option<String>,
        content: Vec<Inline>,
    },
    Image {
        url: String,
        title: Option<String>,
        alt: String,
    },
    HardBreak,
    SoftBreak,
    Html(String),
    FootnoteRef(String),
}

/// Plain text of an inline run, markup removed.
pub fn plain_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for i in inlines {
        match i {
            Inline::Text(t) | Inline::Code(t) => out.push_str(t),
            Inline::Emphasis(c) | Inline::Strong(c) | Inline::Strike(c) => {
                out.push_str(&plain_text(c))
            }
            Inline::Link { content, .. } => out.push_str(&plain_text(content)),
            Inline::Image { alt, .. } => out.push_str(alt),
            Inline::HardBreak | Inline::SoftBreak => out.push(' '),
            Inline::Html(_) | Inline::FootnoteRef(_) => {}
        }
    }
    out
}

fn is_block_tag(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Paragraph
            | Tag::Heading { .. }
            | Tag::BlockQuote(_)
            | Tag::CodeBlock(_)
            | Tag::HtmlBlock
            | Tag::List(_)
            | Tag::FootnoteDefinition(_)
            | Tag::Table(_)
            | Tag::MetadataBlock(_)
    )
}

struct TreeBuilder<I> {
    events: I,
    /// Task marker seen since the current list item started.
    task: Option<bool>,
}

impl<'a, I> TreeBuilder<I>
where
    I: Iterator<Item = Event<'a>>,
{
    /// Blocks up to the next unmatched end tag. The flag reports whether any
    /// explicit paragraph was present, which is how loose list items show up.
    fn blocks_with_flag(&mut self) -> (Vec<Block>, bool) {
        let mut blocks = Vec::new();
        let mut loose: Vec<Inline> = Vec::new();
        let mut explicit_paragraph = false;

        while let Some(ev) = self.events.next() {
            match ev {
                Event::End(_) => break,
                Event::Start(tag) if is_block_tag(&tag) => {
                    flush_loose(&mut loose, &mut blocks);
                    if matches!(tag, Tag::Paragraph) {
                        explicit_paragraph = true;
                    }
                    if let Some(b) = self.block(tag) {
                        blocks.push(b);
                    }
                }
                Event::Rule => {
                    flush_loose(&mut loose, &mut blocks);
                    blocks.push(Block::Rule);
                }
                other => self.inline(other, &mut loose),
            }
        }
        flush_loose(&mut loose, &mut blocks);
        (blocks, explicit_paragraph)
    }

    fn blocks(&mut self) -> Vec<Block> {
        self.blocks_with_flag().0
    }

    fn block(&mut self, tag: Tag<'a>) -> Option<Block> {
        match tag {
            Tag::Paragraph => Some(Block::Paragraph(self.inlines())),
            Tag::Heading { level, .. } => Some(Block::Heading {
                level: level as u8,
                content: self.inlines(),
            }),
            Tag::BlockQuote(_) => Some(Block::Quote(self.blocks())),
            Tag::CodeBlock(kind) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                Some(Block::Code {
                    lang,
                    text: self.raw_text(),
                })
            }
            Tag::HtmlBlock => Some(Block::Html(self.raw_text())),
            Tag::List(start) => Some(Block::List(self.list(start))),
            Tag::FootnoteDefinition(label) => Some(Block::FootnoteDefinition {
                label: label.to_string(),
                blocks: self.blocks(),
            }),
            Tag::Table(aligns) => Some(Block::Table(self.table(aligns))),
            _ => {
                self.raw_text();
                None
            }
        }
    }

    fn raw_text(&mut self) -> String {
        let mut out = String::new();
        for ev in self.events.by_ref() {
            match ev {
                Event::End(_) => break,
                Event::Text(t) | Event::Html(t) | Event::InlineHtml(t) | Event::Code(t) => {
                    out.push_str(&t)
                }
                _ => {}
            }
        }
        out
    }

    fn list(&mut self, start: Option<u64>) -> List {
        let mut items = Vec::new();
        let mut tight = true;
        while let Some(ev) = self.events.next() {
            match ev {
                Event::Start(Tag::Item) => {
                    let outer = self.task.take();
                    let (blocks, explicit_paragraph) = self.blocks_with_flag();
                    if explicit_paragraph {
                        tight = false;
                    }
                    let checked = self.task.take();
                    self.task = outer;
                    items.push(ListItem { checked, blocks });
                }
                Event::End(_) => break,
                _ => {}
            }
        }
        List { start, tight, items }
    }

    fn table(&mut self, aligns: Vec<Alignment>) -> Table {
        let align = aligns
            .into_iter()
            .map(|a| match a {
                Alignment::None => Align::None,
                Alignment::Left => Align::Left,
                Alignment::Center => Align::Center,
                Alignment::Right => Align::Right,
            })
            .collect();
        let mut table = Table {
            align,
            ..Table::default()
        };
        while let Some(ev) = self.events.next() {
            match ev {
                Event::Start(Tag::TableHead) => table.header = self.row(),
                Event::Start(Tag::TableRow) => {
                    let row = self.row();
                    table.rows.push(row);
                }
                Event::End(_) => break,
                _ => {}
            }
        }
        table
    }

    fn row(&mut self) -> Vec<Cell> {
        let mut cells = Vec::new();
        while let Some(ev) = self.events.next() {
            match ev {
                Event::Start(Tag::TableCell) => {
                    let cell = self.inlines();
                    cells.push(cell);
                }
                Event::End(_) => break,
                _ => {}
            }
        }
        cells
    }

    fn inlines(&mut self) -> Vec<Inline> {
        let mut out = Vec::new();
        while let Some(ev) = self.events.next() {
            if matches!(ev, Event::End(_)) {
                break;
            }
            self.inline(ev, &mut out);
        }
        out
    }

    fn inline(&mut self, ev: Event<'a>, out: &mut Vec<Inline>) {
        match ev {
            Event::Text(t) => push_text(out, &t),
            Event::Code(c) => out.push(Inline::Code(c.to_string())),
            Event::Html(h) | Event::InlineHtml(h) => out.push(Inline::Html(h.to_string())),
            Event::SoftBreak => out.push(Inline::SoftBreak),
            Event::HardBreak => out.push(Inline::HardBreak),
            Event::FootnoteReference(label) => out.push(Inline::FootnoteRef(label.to_string())),
            Event::TaskListMarker(checked) => self.task = Some(checked),
            Event::Start(Tag::Emphasis) => out.push(Inline::Emphasis(self.inlines())),
            Event::Start(Tag::Strong) => out.push(Inline::Strong(self.inlines())),
            Event::Start(Tag::Strikethrough) => out.push(Inline::Strike(self.inlines())),
            Event::Start(Tag::Link {
                dest_url, title, ..
            }) => {
                let content = self.inlines();
                out.push(Inline::Link {
                    url: dest_url.to_string(),
                    title: non_empty(&title),
                    content,
                });
            }
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                let alt = plain_text(&self.inlines());
                out.push(Inline::Image {
                    url: dest_url.to_string(),
                    title: non_empty(&title),
                    alt,
                });
            }
            Event::Start(_) => {
                let inner = self.inlines();
                out.extend(inner);
            }
            _ => {}
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn push_text(out: &mut Vec<Inline>, t: &str) {
    if let Some(Inline::Text(prev)) = out.last_mut() {
        prev.push_str(t);
    } else {
        out.push(Inline::Text(t.to_string()));
    }
}

fn flush_loose(loose: &mut Vec<Inline>, blocks: &mut Vec<Block>) {
    if !loose.is_empty() {
        blocks.push(Block::Paragraph(std::mem::take(loose)));
    }
}

/// Parses GFM text into a [`Document`].
pub fn parse_markdown(md: &str) -> Document {
    let mut builder = TreeBuilder {
        events: Parser::new_ext(md, gfm_options()),
        task: None,
    };
    Document {
        blocks: builder.blocks(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn headings_and_paragraphs() {
        let doc = parse_markdown("# Title\n\nSome *em* and **strong**.\n");
        assert_eq!(
            doc.blocks[0],
            Block::Heading {
                level: 1,
                content: vec![text("Title")]
            }
        );
        assert_eq!(
            doc.blocks[1],
            Block::Paragraph(vec![
                text("Some "),
                Inline::Emphasis(vec![text("em")]),
                text(" and "),
                Inline::Strong(vec![text("strong")]),
                text("."),
            ])
        );
    }

    #[test]
    fn tight_and_loose_lists() {
        let doc = parse_markdown("- a\n- b\n\n1. x\n\n2. y\n");
        let Block::List(tight) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert!(tight.tight);
        assert_eq!(tight.start, None);
        assert_eq!(tight.items.len(), 2);
        assert_eq!(tight.items[0].blocks, vec![Block::Paragraph(vec![text("a")])]);

        let Block::List(loose) = &doc.blocks[1] else {
            panic!("expected list");
        };
        assert!(!loose.tight);
        assert_eq!(loose.start, Some(1));
    }

    #[test]
    fn nested_list_stays_inside_item() {
        let doc = parse_markdown("- a\n  - b\n- c\n");
        let Block::List(list) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert_eq!(list.items.len(), 2);
        assert!(matches!(list.items[0].blocks[1], Block::List(_)));
    }

    #[test]
    fn task_items() {
        let doc = parse_markdown("- [x] done\n- [ ] todo\n- plain\n");
        let Block::List(list) = &doc.blocks[0] else {
            panic!("expected list");
        };
        let checks: Vec<_> = list.items.iter().map(|i| i.checked).collect();
        assert_eq!(checks, vec![Some(true), Some(false), None]);
    }

    #[test]
    fn tables_keep_alignment() {
        let doc = parse_markdown("| a | b |\n|:--|--:|\n| 1 | 2 |\n");
        let Block::Table(t) = &doc.blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(t.align, vec![Align::Left, Align::Right]);
        assert_eq!(t.header, vec![vec![text("a")], vec![text("b")]]);
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.columns(), 2);
    }

    #[test]
    fn code_blocks_and_quotes() {
        let doc = parse_markdown("```rust\nfn main() {}\n```\n\n> quoted\n\n---\n");
        assert_eq!(
            doc.blocks[0],
            Block::Code {
                lang: Some("rust".into()),
                text: "fn main() {}\n".into()
            }
        );
        assert_eq!(
            doc.blocks[1],
            Block::Quote(vec![Block::Paragraph(vec![text("quoted")])])
        );
        assert_eq!(doc.blocks[2], Block::Rule);
    }

    #[test]
    fn links_and_images() {
        let doc = parse_markdown("[a](/x \"t\") ![pic](p.png)");
        let Block::Paragraph(inl) = &doc.blocks[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(
            inl[0],
            Inline::Link {
                url: "/x".into(),
                title: Some("t".into()),
                content: vec![text("a")]
            }
        );
        assert_eq!(
            inl[2],
            Inline::Image {
                url: "p.png".into(),
                title: None,
                alt: "pic".into()
            }
        );
    }
}
