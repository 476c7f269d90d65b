//! Markdown serializer for [`crate::mdast`] trees.

use crate::mdast::{Align, Block, Document, Inline, List, Table};
use crate::options::{CodeBlockStyle, MarkdownStyle};

fn escape_char(c: char) -> Option<&'static str> {
    match c {
        '\\' => Some(r"\\"),
        '*' => Some(r"\*"),
        '_' => Some(r"\_"),
        '[' => Some(r"\["),
        ']' => Some(r"\]"),
        '<' => Some(r"\<"),
        '>' => Some(r"\>"),
        '`' => Some(r"\`"),
        _ => None,
    }
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match escape_char(c) {
            Some(e) => out.push_str(e),
            None => out.push(c),
        }
    }
    out
}

/// Escapes a line start that would otherwise be read as block syntax.
fn escape_line_start(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    let first = trimmed.chars().next();
    match first {
        Some('#') | Some('>') | Some('=') => format!("{indent}\\{trimmed}"),
        Some('-') | Some('+')
            if trimmed.len() == 1
                || trimmed[1..].starts_with(' ')
                || trimmed.chars().all(|c| c == '-' || c == ' ') =>
        {
            format!("{indent}\\{trimmed}")
        }
        Some(c) if c.is_ascii_digit() => {
            let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
            let rest = &trimmed[digits..];
            if (rest.starts_with(". ") || rest.starts_with(") ") || rest == "." || rest == ")")
                && digits <= 9
            {
                format!("{indent}{}\\{}", &trimmed[..digits], rest)
            } else {
                line.to_string()
            }
        }
        _ => line.to_string(),
    }
}

fn indent_lines(s: &str, indent: &str) -> String {
    s.lines()
        .map(|l| {
            if l.is_empty() {
                String::new()
            } else {
                format!("{indent}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn longest_run(s: &str, ch: char) -> usize {
    let mut best = 0;
    let mut cur = 0;
    for c in s.chars() {
        if c == ch {
            cur += 1;
            best = best.max(cur);
        } else {
            cur = 0;
        }
    }
    best
}

fn format_destination(url: &str) -> String {
    if url.is_empty() || url.chars().any(|c| c.is_whitespace() || c == '(' || c == ')') {
        format!("<{}>", url.replace('<', "%3C").replace('>', "%3E"))
    } else {
        url.to_string()
    }
}

fn format_title(title: &Option<String>) -> String {
    match title {
        Some(t) => format!(" \"{}\"", t.replace('"', "\\\"")),
        None => String::new(),
    }
}

/// Writes Markdown with a fixed [`MarkdownStyle`]. Headings are ATX.
pub struct MarkdownWriter<'s> {
    style: &'s MarkdownStyle,
}

impl<'s> MarkdownWriter<'s> {
    pub fn new(style: &'s MarkdownStyle) -> Self {
        Self { style }
    }

    pub fn write_document(&self, doc: &Document) -> String {
        self.write_blocks(&doc.blocks, false)
    }

    fn write_blocks(&self, blocks: &[Block], tight: bool) -> String {
        let sep = if tight { "\n" } else { "\n\n" };
        let mut parts: Vec<String> = Vec::with_capacity(blocks.len());
        let mut prev_list_marker: Option<bool> = None;
        for b in blocks {
            let rendered = self.write_block(b);
            if rendered.is_empty() {
                continue;
            }
            // two adjacent lists of the same kind would merge on re-parse
            let this_marker = match b {
                Block::List(l) => Some(l.start.is_some()),
                _ => None,
            };
            if this_marker.is_some() && this_marker == prev_list_marker {
                parts.push("<!-- -->".to_string());
            }
            prev_list_marker = this_marker;
            parts.push(rendered);
        }
        parts.join(sep)
    }

    fn write_block(&self, block: &Block) -> String {
        match block {
            Block::Heading { level, content } => {
                let text = self.write_inlines(content).replace('\n', " ");
                let hashes = "#".repeat(usize::from((*level).clamp(1, 6)));
                let text = text.trim();
                if text.is_empty() {
                    hashes
                } else {
                    format!("{hashes} {text}")
                }
            }
            Block::Paragraph(inlines) => {
                let text = self.write_inlines(inlines);
                text.trim()
                    .lines()
                    .map(escape_line_start)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Block::List(list) => self.write_list(list),
            Block::Table(table) => self.write_table(table),
            Block::Code { lang, text } => self.write_code(lang.as_deref(), text),
            Block::Quote(blocks) => {
                let inner = self.write_blocks(blocks, false);
                inner
                    .lines()
                    .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {l}") })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Block::Rule => "---".to_string(),
            Block::Html(raw) => raw.trim_end().to_string(),
            Block::FootnoteDefinition { label, blocks } => {
                let inner = self.write_blocks(blocks, false);
                let body = indent_lines(&inner, "    ");
                format!("[^{label}]: {}", body.trim_start())
            }
        }
    }

    fn write_list(&self, list: &List) -> String {
        let bullet = self.style.bullet_list_marker.as_char().to_string();
        let mut items = Vec::with_capacity(list.items.len());
        for (i, item) in list.items.iter().enumerate() {
            let marker = match list.start {
                Some(start) => format!("{}.", start + i as u64),
                None => bullet.clone(),
            };
            let pad = " ".repeat(marker.len() + 1);
            let mut body = self.write_blocks(&item.blocks, list.tight);
            if let Some(checked) = item.checked {
                let boxed = if checked { "[x]" } else { "[ ]" };
                body = if body.is_empty() {
                    boxed.to_string()
                } else {
                    format!("{boxed} {body}")
                };
            }
            if body.is_empty() {
                items.push(marker);
                continue;
            }
            let indented = indent_lines(&body, &pad);
            let first = indented.strip_prefix(pad.as_str()).unwrap_or(&indented);
            items.push(format!("{marker} {first}"));
        }
        items.join(if list.tight { "\n" } else { "\n\n" })
    }

    fn write_code(&self, lang: Option<&str>, text: &str) -> String {
        let body = text.strip_suffix('\n').unwrap_or(text);
        if self.style.code_block_style == CodeBlockStyle::Indented
            && lang.is_none()
            && !body.trim().is_empty()
        {
            return body
                .lines()
                .map(|l| format!("    {l}"))
                .collect::<Vec<_>>()
                .join("\n");
        }
        let fence = self.style.fence.as_str();
        let fence_char = fence.chars().next().unwrap_or('`');
        let width = (longest_run(body, fence_char) + 1).max(3);
        let fence = fence_char.to_string().repeat(width);
        format!("{fence}{}\n{body}\n{fence}", lang.unwrap_or(""))
    }

    fn write_table(&self, table: &Table) -> String {
        let cols = table.columns();
        if cols == 0 {
            return String::new();
        }
        let cell = |c: Option<&Vec<Inline>>| -> String {
            c.map(|inl| {
                self.write_inlines(inl)
                    .replace('\n', " ")
                    .replace('|', "\\|")
                    .trim()
                    .to_string()
            })
            .unwrap_or_default()
        };
        let row = |cells: &[Vec<Inline>]| -> String {
            let parts: Vec<String> = (0..cols).map(|i| cell(cells.get(i))).collect();
            format!("| {} |", parts.join(" | "))
        };

        let mut lines = vec![row(&table.header)];
        let delims: Vec<&str> = (0..cols)
            .map(|i| match table.align.get(i).copied().unwrap_or_default() {
                Align::None => "---",
                Align::Left => ":---",
                Align::Center => ":---:",
                Align::Right => "---:",
            })
            .collect();
        lines.push(format!("| {} |", delims.join(" | ")));
        for r in &table.rows {
            lines.push(row(r));
        }
        lines.join("\n")
    }

    pub fn write_inlines(&self, inlines: &[Inline]) -> String {
        let mut out = String::new();
        for i in inlines {
            self.write_inline(i, &mut out);
        }
        out
    }

    fn write_delimited(&self, content: &[Inline], delim: &str, out: &mut String) {
        let inner = self.write_inlines(content);
        let trimmed = inner.trim();
        if trimmed.is_empty() {
            out.push_str(&inner);
            return;
        }
        let lead = &inner[..inner.len() - inner.trim_start().len()];
        let trail = &inner[inner.trim_end().len()..];
        out.push_str(lead);
        out.push_str(delim);
        out.push_str(trimmed);
        out.push_str(delim);
        out.push_str(trail);
    }

    fn write_inline(&self, inline: &Inline, out: &mut String) {
        match inline {
            Inline::Text(t) => out.push_str(&escape_text(t)),
            Inline::Emphasis(c) => self.write_delimited(c, self.style.em(), out),
            Inline::Strong(c) => self.write_delimited(c, self.style.strong(), out),
            Inline::Strike(c) => self.write_delimited(c, "~~", out),
            Inline::Code(code) => {
                let ticks = "`".repeat(longest_run(code, '`') + 1);
                let pad = code.starts_with('`') || code.ends_with('`');
                out.push_str(&ticks);
                if pad {
                    out.push(' ');
                }
                out.push_str(code);
                if pad {
                    out.push(' ');
                }
                out.push_str(&ticks);
            }
            Inline::Link {
                url,
                title,
                content,
            } => {
                let label = self.write_inlines(content);
                let is_autolink = title.is_none()
                    && content == &[Inline::Text(url.clone())]
                    && (url.starts_with("http://")
                        || url.starts_with("https://")
                        || url.starts_with("mailto:"))
                    && !url.contains(|c: char| c.is_whitespace() || c == '<' || c == '>');
                if is_autolink {
                    out.push('<');
                    out.push_str(url);
                    out.push('>');
                } else {
                    out.push('[');
                    out.push_str(&label);
                    out.push_str("](");
                    out.push_str(&format_destination(url));
                    out.push_str(&format_title(title));
                    out.push(')');
                }
            }
            Inline::Image { url, title, alt } => {
                out.push_str("![");
                out.push_str(&escape_text(alt));
                out.push_str("](");
                out.push_str(&format_destination(url));
                out.push_str(&format_title(title));
                out.push(')');
            }
            Inline::HardBreak => out.push_str("\\\n"),
            Inline::SoftBreak => out.push('\n'),
            Inline::Html(raw) => out.push_str(raw),
            Inline::FootnoteRef(label) => {
                out.push_str("[^");
                out.push_str(label);
                out.push(']');
            }
        }
    }
}

/// Serializes a document; the result has no trailing newline.
pub fn write_markdown(doc: &Document, style: &MarkdownStyle) -> String {
    MarkdownWriter::new(style).write_document(doc)
}
