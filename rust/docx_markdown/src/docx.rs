//! WordprocessingML package writer.
//!
//! The HTML tree coming out of the Markdown stage is flattened into a small
//! block model (paragraphs and tables), which is then serialized part by part
//! into an in-memory zip.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::dom::HtmlNode;
use crate::error::{Error, Result};
use crate::sanitize::sanitize_href;
use crate::styles::{Alignment, DocxProps, ResolvedStyle};

const MONO_FONT: &str = "Consolas";
const BULLET_NUM_ID: u32 = 1;
const DECIMAL_NUM_ID: u32 = 2;
const FIRST_LINK_RID: u32 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct RunStyle {
    bold: bool,
    italic: bool,
    strike: bool,
    code: bool,
    sup: bool,
    sub: bool,
}

#[derive(Clone, Debug)]
enum Segment {
    Text { text: String, style: RunStyle },
    LinkText { text: String, style: RunStyle, href: String },
    Break,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParagraphStyle {
    Normal,
    Heading(u8),
    CodeBlock,
    Quote,
}

impl ParagraphStyle {
    fn style_id(self) -> Option<String> {
        match self {
            ParagraphStyle::Normal => None,
            ParagraphStyle::Heading(level) => Some(format!("Heading{level}")),
            ParagraphStyle::CodeBlock => Some("CodeBlock".to_string()),
            ParagraphStyle::Quote => Some("Quote".to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ListInfo {
    num_id: u32,
    ilvl: u32,
}

/// A concrete `w:num` for one ordered list, so each list restarts its count.
#[derive(Clone, Copy, Debug)]
struct NumInstance {
    num_id: u32,
    ilvl: u32,
    start: u32,
}

#[derive(Clone, Debug)]
struct Paragraph {
    style: ParagraphStyle,
    list: Option<ListInfo>,
    rule: bool,
    segments: Vec<Segment>,
}

impl Paragraph {
    fn empty() -> Self {
        Self {
            style: ParagraphStyle::Normal,
            list: None,
            rule: false,
            segments: Vec::new(),
        }
    }

    fn has_content(&self) -> bool {
        self.rule
            || self.segments.iter().any(|s| match s {
                Segment::Text { text, .. } | Segment::LinkText { text, .. } => {
                    !text.trim().is_empty()
                }
                Segment::Break => true,
            })
    }

    fn ends_with_space(&self) -> bool {
        match self.segments.last() {
            Some(Segment::Text { text, .. }) | Some(Segment::LinkText { text, .. }) => {
                text.ends_with(' ')
            }
            Some(Segment::Break) | None => true,
        }
    }
}

#[derive(Clone, Debug)]
struct TableCell {
    paragraphs: Vec<Paragraph>,
}

#[derive(Clone, Debug)]
struct TableRow {
    header: bool,
    cells: Vec<TableCell>,
}

#[derive(Clone, Debug)]
struct Table {
    rows: Vec<TableRow>,
}

#[derive(Clone, Debug)]
enum Block {
    Paragraph(Paragraph),
    Table(Table),
}

fn xml_escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // not representable in XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() && ch != '\u{a0}' {
            if !prev_ws {
                out.push(' ');
            }
            prev_ws = true;
        } else {
            out.push(ch);
            prev_ws = false;
        }
    }
    out
}

#[derive(Default)]
struct BuildCtx {
    bold_depth: u32,
    italic_depth: u32,
    strike_depth: u32,
    code_depth: u32,
    pre_depth: u32,
    sup_depth: u32,
    sub_depth: u32,
    quote_depth: u32,
    link_stack: Vec<Option<String>>,
    list_stack: Vec<u32>,
    li_list_stack: Vec<Option<ListInfo>>,
}

impl BuildCtx {
    fn current_href(&self) -> Option<&String> {
        self.link_stack.last().and_then(|x| x.as_ref())
    }

    fn current_list(&self) -> Option<ListInfo> {
        self.li_list_stack.last().cloned().unwrap_or(None)
    }

    fn body_style(&self) -> ParagraphStyle {
        if self.quote_depth > 0 {
            ParagraphStyle::Quote
        } else {
            ParagraphStyle::Normal
        }
    }

    fn run_style(&self) -> RunStyle {
        RunStyle {
            bold: self.bold_depth > 0,
            italic: self.italic_depth > 0,
            strike: self.strike_depth > 0,
            code: self.code_depth > 0 || self.pre_depth > 0,
            sup: self.sup_depth > 0,
            sub: self.sub_depth > 0 && self.sup_depth == 0,
        }
    }
}

fn flush_paragraph(blocks: &mut Vec<Block>, current: &mut Paragraph) {
    if current.has_content() {
        blocks.push(Block::Paragraph(current.clone()));
    }
    *current = Paragraph::empty();
}

fn start_paragraph(
    blocks: &mut Vec<Block>,
    current: &mut Paragraph,
    style: ParagraphStyle,
    list: Option<ListInfo>,
) {
    flush_paragraph(blocks, current);
    current.style = style;
    current.list = list;
}

fn emit_text(current: &mut Paragraph, ctx: &BuildCtx, raw: &str) {
    if raw.is_empty() {
        return;
    }

    let preserve_space = ctx.pre_depth > 0;
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut text = if preserve_space {
        normalized
    } else {
        collapse_ws(&normalized)
    };

    if !preserve_space && current.ends_with_space() {
        text = text.trim_start().to_string();
    }

    let style = ctx.run_style();
    let push_text = |s: String, current: &mut Paragraph| {
        if let Some(href) = ctx.current_href() {
            current.segments.push(Segment::LinkText {
                text: s,
                style,
                href: href.to_string(),
            });
        } else {
            current.segments.push(Segment::Text { text: s, style });
        }
    };

    if preserve_space && text.contains('\n') {
        let mut first = true;
        for line in text.split('\n') {
            if !first {
                current.segments.push(Segment::Break);
            }
            first = false;
            if !line.is_empty() {
                push_text(line.to_string(), current);
            }
        }
        return;
    }

    if !text.is_empty() {
        push_text(text, current);
    }
}

fn collect_rows<'a>(node: &'a HtmlNode, out: &mut Vec<&'a HtmlNode>) {
    for c in node.children() {
        if c.is_tag("tr") {
            out.push(c);
        } else if !c.is_tag("table") {
            collect_rows(c, out);
        }
    }
}

fn parse_table(node: &HtmlNode, lists: &mut Vec<NumInstance>) -> Table {
    let mut trs = Vec::new();
    collect_rows(node, &mut trs);

    let mut rows: Vec<TableRow> = Vec::new();
    for tr in trs {
        let mut cells: Vec<TableCell> = Vec::new();
        let mut all_th = true;
        for c in tr.children() {
            let Some(tag) = c.tag() else { continue };
            if tag != "td" && tag != "th" {
                continue;
            }
            all_th &= tag == "th";
            let mut paras: Vec<Paragraph> = build_blocks_from_nodes(c.children(), false, lists)
                .into_iter()
                .filter_map(|b| match b {
                    Block::Paragraph(p) => Some(p),
                    Block::Table(_) => None,
                })
                .collect();
            if paras.is_empty() {
                paras.push(Paragraph::empty());
            }
            cells.push(TableCell { paragraphs: paras });
        }
        if !cells.is_empty() {
            let header = rows.is_empty() && all_th;
            rows.push(TableRow { header, cells });
        }
    }

    Table { rows }
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

fn walk(
    node: &HtmlNode,
    allow_tables: bool,
    ctx: &mut BuildCtx,
    lists: &mut Vec<NumInstance>,
    blocks: &mut Vec<Block>,
    current: &mut Paragraph,
) {
    let (tag, children) = match node {
        HtmlNode::Text(t) => {
            emit_text(current, ctx, t);
            return;
        }
        HtmlNode::Comment(_) => return,
        HtmlNode::Element { tag, children, .. } => (tag.as_str(), children),
    };

    if allow_tables && tag == "table" {
        flush_paragraph(blocks, current);
        blocks.push(Block::Table(parse_table(node, lists)));
        return;
    }

    if let Some(level) = heading_level(tag) {
        start_paragraph(blocks, current, ParagraphStyle::Heading(level), ctx.current_list());
    }
    match tag {
        "pre" => {
            ctx.pre_depth += 1;
            start_paragraph(blocks, current, ParagraphStyle::CodeBlock, ctx.current_list());
        }
        "p" | "div" => start_paragraph(blocks, current, ctx.body_style(), ctx.current_list()),
        "blockquote" => {
            ctx.quote_depth += 1;
            start_paragraph(blocks, current, ctx.body_style(), ctx.current_list());
        }
        "br" => current.segments.push(Segment::Break),
        "hr" => {
            flush_paragraph(blocks, current);
            current.rule = true;
            flush_paragraph(blocks, current);
        }
        "ul" => ctx.list_stack.push(BULLET_NUM_ID),
        "ol" => {
            let start = node
                .attr("start")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(1);
            let num_id = DECIMAL_NUM_ID + 1 + lists.len() as u32;
            lists.push(NumInstance {
                num_id,
                ilvl: ctx.list_stack.len() as u32,
                start,
            });
            ctx.list_stack.push(num_id);
        }
        "li" => {
            let num_id = ctx.list_stack.last().cloned().unwrap_or(BULLET_NUM_ID);
            let ilvl = ctx.list_stack.len().saturating_sub(1) as u32;
            ctx.li_list_stack.push(Some(ListInfo { num_id, ilvl }));
            start_paragraph(blocks, current, ctx.body_style(), ctx.current_list());
        }
        "input" => {
            if node.attr("type") == Some("checkbox") {
                let mark = if node.attr("checked").is_some() { "☒ " } else { "☐ " };
                current.segments.push(Segment::Text {
                    text: mark.to_string(),
                    style: RunStyle::default(),
                });
            }
        }
        "img" => {
            if let Some(alt) = node.attr("alt") {
                emit_text(current, ctx, alt);
            }
        }
        "a" => {
            let href = node.attr("href").and_then(sanitize_href);
            ctx.link_stack.push(href);
        }
        "code" | "kbd" | "samp" => ctx.code_depth += 1,
        "b" | "strong" => ctx.bold_depth += 1,
        "i" | "em" | "cite" => ctx.italic_depth += 1,
        "s" | "del" | "strike" => ctx.strike_depth += 1,
        "sup" => ctx.sup_depth += 1,
        "sub" => ctx.sub_depth += 1,
        _ => {}
    }

    for c in children {
        walk(c, allow_tables, ctx, lists, blocks, current);
    }

    if heading_level(tag).is_some() {
        flush_paragraph(blocks, current);
    }
    match tag {
        "p" | "div" => flush_paragraph(blocks, current),
        "blockquote" => {
            flush_paragraph(blocks, current);
            ctx.quote_depth = ctx.quote_depth.saturating_sub(1);
        }
        "pre" => {
            while matches!(current.segments.last(), Some(Segment::Break)) {
                current.segments.pop();
            }
            flush_paragraph(blocks, current);
            ctx.pre_depth = ctx.pre_depth.saturating_sub(1);
        }
        "ul" | "ol" => {
            let _ = ctx.list_stack.pop();
        }
        "li" => {
            flush_paragraph(blocks, current);
            let _ = ctx.li_list_stack.pop();
        }
        "a" => {
            let _ = ctx.link_stack.pop();
        }
        "code" | "kbd" | "samp" => ctx.code_depth = ctx.code_depth.saturating_sub(1),
        "b" | "strong" => ctx.bold_depth = ctx.bold_depth.saturating_sub(1),
        "i" | "em" | "cite" => ctx.italic_depth = ctx.italic_depth.saturating_sub(1),
        "s" | "del" | "strike" => ctx.strike_depth = ctx.strike_depth.saturating_sub(1),
        "sup" => ctx.sup_depth = ctx.sup_depth.saturating_sub(1),
        "sub" => ctx.sub_depth = ctx.sub_depth.saturating_sub(1),
        _ => {}
    }
}

fn build_blocks_from_nodes(
    nodes: &[HtmlNode],
    allow_tables: bool,
    lists: &mut Vec<NumInstance>,
) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current = Paragraph::empty();
    let mut ctx = BuildCtx::default();

    for n in nodes {
        walk(n, allow_tables, &mut ctx, lists, &mut blocks, &mut current);
    }
    flush_paragraph(&mut blocks, &mut current);
    blocks
}

fn run_props(style: RunStyle, hyperlink: bool) -> String {
    let mut out = String::new();
    if hyperlink {
        out.push_str("<w:rStyle w:val=\"Hyperlink\"/>");
    }
    if style.code {
        out.push_str(&format!(
            "<w:rFonts w:ascii=\"{MONO_FONT}\" w:hAnsi=\"{MONO_FONT}\" w:cs=\"{MONO_FONT}\"/>"
        ));
    }
    if style.bold {
        out.push_str("<w:b/>");
    }
    if style.italic {
        out.push_str("<w:i/>");
    }
    if style.strike {
        out.push_str("<w:strike/>");
    }
    if style.sup {
        out.push_str("<w:vertAlign w:val=\"superscript\"/>");
    } else if style.sub {
        out.push_str("<w:vertAlign w:val=\"subscript\"/>");
    }
    out
}

fn run_xml(text: &str, style: RunStyle, hyperlink: bool) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push_str("<w:r>");
    let props = run_props(style, hyperlink);
    if !props.is_empty() {
        out.push_str("<w:rPr>");
        out.push_str(&props);
        out.push_str("</w:rPr>");
    }
    out.push_str("<w:t xml:space=\"preserve\">");
    out.push_str(&xml_escape_text(text));
    out.push_str("</w:t></w:r>");
    out
}

fn paragraph_xml(p: &Paragraph, link_to_rid: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str("<w:p>");

    let style_id = p.style.style_id();
    if style_id.is_some() || p.list.is_some() || p.rule {
        out.push_str("<w:pPr>");
        if let Some(id) = style_id {
            out.push_str(&format!("<w:pStyle w:val=\"{id}\"/>"));
        }
        if let Some(li) = p.list {
            out.push_str("<w:numPr>");
            out.push_str(&format!("<w:ilvl w:val=\"{}\"/>", li.ilvl));
            out.push_str(&format!("<w:numId w:val=\"{}\"/>", li.num_id));
            out.push_str("</w:numPr>");
        }
        if p.rule {
            out.push_str(
                "<w:pBdr><w:bottom w:val=\"single\" w:sz=\"6\" w:space=\"1\" w:color=\"auto\"/></w:pBdr>",
            );
        }
        out.push_str("</w:pPr>");
    }

    let mut in_link: Option<(String, RunStyle, String)> = None;
    let flush_link = |out: &mut String, st: &mut Option<(String, RunStyle, String)>| {
        if let Some((buf, style, href)) = st.take() {
            if buf.is_empty() {
                return;
            }
            if let Some(rid) = link_to_rid.get(&href) {
                out.push_str(&format!("<w:hyperlink r:id=\"{rid}\" w:history=\"1\">"));
                out.push_str(&run_xml(&buf, style, true));
                out.push_str("</w:hyperlink>");
            } else {
                out.push_str(&run_xml(&buf, style, false));
            }
        }
    };

    for seg in &p.segments {
        match seg {
            Segment::Break => {
                flush_link(&mut out, &mut in_link);
                out.push_str("<w:r><w:br/></w:r>");
            }
            Segment::Text { text, style } => {
                flush_link(&mut out, &mut in_link);
                out.push_str(&run_xml(text, *style, false));
            }
            Segment::LinkText { text, style, href } => match &mut in_link {
                Some((buf, cur_style, cur_href)) if cur_href == href && *cur_style == *style => {
                    buf.push_str(text);
                }
                _ => {
                    flush_link(&mut out, &mut in_link);
                    in_link = Some((text.clone(), *style, href.clone()));
                }
            },
        }
    }
    flush_link(&mut out, &mut in_link);

    out.push_str("</w:p>");
    out
}

fn table_xml(t: &Table, link_to_rid: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str("<w:tbl>");
    out.push_str("<w:tblPr>");
    out.push_str("<w:tblW w:w=\"0\" w:type=\"auto\"/>");
    out.push_str(
        r#"<w:tblBorders>
<w:top w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
<w:left w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
<w:bottom w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
<w:right w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
<w:insideH w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
<w:insideV w:val="single" w:sz="4" w:space="0" w:color="D9D9D9"/>
</w:tblBorders>"#,
    );
    out.push_str("</w:tblPr>");

    for row in &t.rows {
        out.push_str("<w:tr>");
        if row.header {
            out.push_str("<w:trPr><w:tblHeader/></w:trPr>");
        }
        for cell in &row.cells {
            out.push_str("<w:tc>");
            out.push_str("<w:tcPr><w:tcW w:w=\"0\" w:type=\"auto\"/></w:tcPr>");
            for p in &cell.paragraphs {
                out.push_str(&paragraph_xml(p, link_to_rid));
            }
            out.push_str("</w:tc>");
        }
        out.push_str("</w:tr>");
    }

    out.push_str("</w:tbl>");
    out
}

fn document_xml(
    blocks: &[Block],
    link_to_rid: &BTreeMap<String, String>,
    props: &DocxProps,
) -> String {
    let mut body = String::new();
    for b in blocks {
        match b {
            Block::Paragraph(p) => body.push_str(&paragraph_xml(p, link_to_rid)),
            Block::Table(t) => body.push_str(&table_xml(t, link_to_rid)),
        }
    }
    let m = props.margins;

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"
 xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    {body}
    <w:sectPr>
      <w:pgSz w:w="12240" w:h="15840"/>
      <w:pgMar w:top="{top}" w:right="{right}" w:bottom="{bottom}" w:left="{left}" w:header="708" w:footer="708" w:gutter="0"/>
      <w:cols w:space="708"/>
      <w:docGrid w:linePitch="360"/>
    </w:sectPr>
  </w:body>
</w:document>"#,
        body = body,
        top = m.top,
        right = m.right,
        bottom = m.bottom,
        left = m.left,
    )
}

fn content_types_xml(has_numbering: bool) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    out.push('\n');
    out.push_str(
        r#"  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    );
    out.push('\n');
    out.push_str(r#"  <Default Extension="xml" ContentType="application/xml"/>"#);
    out.push('\n');
    out.push_str(r#"  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#);
    out.push('\n');
    out.push_str(r#"  <Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>"#);
    out.push('\n');
    if has_numbering {
        out.push_str(r#"  <Override PartName="/word/numbering.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml"/>"#);
        out.push('\n');
    }
    out.push_str(r#"  <Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#);
    out.push('\n');
    out.push_str("</Types>");
    out
}

fn rels_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
</Relationships>"#
}

fn document_rels_xml(link_to_rid: &BTreeMap<String, String>, has_numbering: bool) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    out.push('\n');
    out.push_str(r#"  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#);
    out.push('\n');
    if has_numbering {
        out.push_str(r#"  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering" Target="numbering.xml"/>"#);
        out.push('\n');
    }
    for (href, rid) in link_to_rid {
        out.push_str(&format!(
            r#"  <Relationship Id="{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="{href}" TargetMode="External"/>"#,
            rid = rid,
            href = xml_escape_text(href),
        ));
        out.push('\n');
    }
    out.push_str("</Relationships>");
    out
}

fn style_ppr(s: &ResolvedStyle, keep_next: bool, outline: Option<u8>) -> String {
    let mut out = String::from("<w:pPr>");
    if keep_next {
        out.push_str("<w:keepNext/>");
    }
    out.push_str(&format!(
        "<w:spacing w:before=\"{}\" w:after=\"{}\" w:line=\"{}\" w:lineRule=\"auto\"/>",
        s.spacing_before, s.spacing_after, s.line
    ));
    if s.alignment != Alignment::Left {
        out.push_str(&format!("<w:jc w:val=\"{}\"/>", s.alignment.as_ooxml()));
    }
    if let Some(level) = outline {
        out.push_str(&format!("<w:outlineLvl w:val=\"{}\"/>", level.saturating_sub(1)));
    }
    out.push_str("</w:pPr>");
    out
}

fn style_rpr(s: &ResolvedStyle) -> String {
    let font = xml_escape_text(&s.font);
    let mut out = String::from("<w:rPr>");
    out.push_str(&format!(
        "<w:rFonts w:ascii=\"{font}\" w:hAnsi=\"{font}\" w:eastAsia=\"{font}\" w:cs=\"{font}\"/>"
    ));
    if s.bold {
        out.push_str("<w:b/><w:bCs/>");
    }
    if s.italic {
        out.push_str("<w:i/><w:iCs/>");
    }
    out.push_str(&format!("<w:color w:val=\"{}\"/>", s.color));
    out.push_str(&format!(
        "<w:sz w:val=\"{size}\"/><w:szCs w:val=\"{size}\"/>",
        size = s.size
    ));
    out.push_str("</w:rPr>");
    out
}

fn styles_xml(props: &DocxProps) -> String {
    let body = &props.paragraph;
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#);
    out.push_str("<w:docDefaults><w:rPrDefault>");
    out.push_str(&style_rpr(body));
    out.push_str("</w:rPrDefault><w:pPrDefault>");
    out.push_str(&style_ppr(body, false, None));
    out.push_str("</w:pPrDefault></w:docDefaults>");

    out.push_str(r#"<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/>"#);
    out.push_str(&style_ppr(body, false, None));
    out.push_str(&style_rpr(body));
    out.push_str("</w:style>");

    for level in 1..=6u8 {
        let h = props.heading(level);
        out.push_str(&format!(
            r#"<w:style w:type="paragraph" w:styleId="Heading{level}"><w:name w:val="heading {level}"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:uiPriority w:val="9"/><w:qFormat/>"#
        ));
        out.push_str(&style_ppr(h, true, Some(level)));
        out.push_str(&style_rpr(h));
        out.push_str("</w:style>");
    }

    out.push_str(&format!(
        r#"<w:style w:type="paragraph" w:styleId="CodeBlock"><w:name w:val="Code Block"/><w:basedOn w:val="Normal"/><w:uiPriority w:val="99"/><w:qFormat/><w:pPr><w:shd w:val="clear" w:color="auto" w:fill="F2F2F2"/><w:spacing w:before="120" w:after="120" w:line="240" w:lineRule="auto"/></w:pPr><w:rPr><w:rFonts w:ascii="{MONO_FONT}" w:hAnsi="{MONO_FONT}" w:cs="{MONO_FONT}"/><w:sz w:val="20"/></w:rPr></w:style>"#
    ));
    out.push_str(r#"<w:style w:type="paragraph" w:styleId="Quote"><w:name w:val="Quote"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:uiPriority w:val="29"/><w:qFormat/><w:pPr><w:ind w:left="720" w:right="720"/></w:pPr><w:rPr><w:i/><w:iCs/><w:color w:val="595959"/></w:rPr></w:style>"#);
    out.push_str(r#"<w:style w:type="character" w:styleId="Hyperlink"><w:name w:val="Hyperlink"/><w:uiPriority w:val="99"/><w:unhideWhenUsed/><w:rPr><w:color w:val="0563C1"/><w:u w:val="single"/></w:rPr></w:style>"#);
    out.push_str("</w:styles>");
    out
}

fn lvl_xml(ilvl: u32, bullet: bool) -> String {
    let (fmt, text) = if bullet {
        ("bullet", "•".to_string())
    } else {
        ("decimal", format!("%{}.", ilvl + 1))
    };
    format!(
        r#"<w:lvl w:ilvl="{ilvl}"><w:start w:val="1"/><w:numFmt w:val="{fmt}"/><w:lvlText w:val="{text}"/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="{left}" w:hanging="360"/></w:pPr></w:lvl>"#,
        left = 720 * (ilvl + 1),
    )
}

fn numbering_xml(lists: &[NumInstance]) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#);
    for (abstract_id, bullet) in [(BULLET_NUM_ID, true), (DECIMAL_NUM_ID, false)] {
        out.push_str(&format!(
            r#"<w:abstractNum w:abstractNumId="{abstract_id}"><w:multiLevelType w:val="hybridMultilevel"/>"#
        ));
        for ilvl in 0..9 {
            out.push_str(&lvl_xml(ilvl, bullet));
        }
        out.push_str("</w:abstractNum>");
    }
    out.push_str(&format!(
        r#"<w:num w:numId="{BULLET_NUM_ID}"><w:abstractNumId w:val="{BULLET_NUM_ID}"/></w:num>"#
    ));
    out.push_str(&format!(
        r#"<w:num w:numId="{DECIMAL_NUM_ID}"><w:abstractNumId w:val="{DECIMAL_NUM_ID}"/></w:num>"#
    ));
    for l in lists {
        out.push_str(&format!(
            r#"<w:num w:numId="{id}"><w:abstractNumId w:val="{DECIMAL_NUM_ID}"/><w:lvlOverride w:ilvl="{ilvl}"><w:startOverride w:val="{start}"/></w:lvlOverride></w:num>"#,
            id = l.num_id,
            ilvl = l.ilvl,
            start = l.start,
        ));
    }
    out.push_str("</w:numbering>");
    out
}

fn core_xml(props: &DocxProps) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#);
    let fields = [
        ("dc:title", &props.title),
        ("dc:creator", &props.author),
        ("dc:description", &props.description),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            out.push_str(&format!("<{name}>{}</{name}>", xml_escape_text(v)));
        }
    }
    out.push_str("</cp:coreProperties>");
    out
}

fn block_paragraphs(blocks: &[Block]) -> Vec<&Paragraph> {
    let mut out = Vec::new();
    for b in blocks {
        match b {
            Block::Paragraph(p) => out.push(p),
            Block::Table(t) => {
                for cell in t.rows.iter().flat_map(|r| r.cells.iter()) {
                    out.extend(cell.paragraphs.iter());
                }
            }
        }
    }
    out
}

fn gather_hrefs(blocks: &[Block]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for p in block_paragraphs(blocks) {
        for s in &p.segments {
            if let Segment::LinkText { href, .. } = s {
                // in-document anchors have no external target
                if !href.starts_with('#') {
                    out.insert(href.to_string());
                }
            }
        }
    }
    out
}

fn blocks_need_numbering(blocks: &[Block]) -> bool {
    block_paragraphs(blocks).into_iter().any(|p| p.list.is_some())
}

fn put_part(zip: &mut ZipWriter<Cursor<&mut Vec<u8>>>, name: &str, body: &str) -> Result<()> {
    zip.start_file(name, SimpleFileOptions::default())?;
    zip.write_all(body.as_bytes())
        .map_err(|e| Error::Package(format!("{name}: {e}")))
}

fn write_docx(
    document_xml: &str,
    doc_rels_xml: &str,
    numbering: Option<String>,
    props: &DocxProps,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buf));
        put_part(&mut zip, "[Content_Types].xml", &content_types_xml(numbering.is_some()))?;
        put_part(&mut zip, "_rels/.rels", rels_xml())?;
        put_part(&mut zip, "docProps/core.xml", &core_xml(props))?;
        put_part(&mut zip, "word/document.xml", document_xml)?;
        put_part(&mut zip, "word/styles.xml", &styles_xml(props))?;
        if let Some(numbering) = &numbering {
            put_part(&mut zip, "word/numbering.xml", numbering)?;
        }
        put_part(&mut zip, "word/_rels/document.xml.rels", doc_rels_xml)?;
        zip.finish()?;
    }
    Ok(buf)
}

/// Serializes an HTML tree (as produced by the Markdown stage in legacy
/// emphasis mode) into the bytes of a `.docx` package.
pub fn html_to_docx(nodes: &[HtmlNode], props: &DocxProps) -> Result<Vec<u8>> {
    let mut lists = Vec::new();
    let blocks = build_blocks_from_nodes(nodes, true, &mut lists);

    let mut link_to_rid = BTreeMap::new();
    for (i, href) in gather_hrefs(&blocks).into_iter().enumerate() {
        link_to_rid.insert(href, format!("rId{}", FIRST_LINK_RID + i as u32));
    }

    let doc_xml = document_xml(&blocks, &link_to_rid, props);
    let has_numbering = blocks_need_numbering(&blocks);
    let doc_rels = document_rels_xml(&link_to_rid, has_numbering);
    let numbering = has_numbering.then(|| numbering_xml(&lists));

    debug!(
        blocks = blocks.len(),
        links = link_to_rid.len(),
        numbering = has_numbering,
        "writing docx package"
    );
    write_docx(&doc_xml, &doc_rels, numbering, props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::markdown_to_html_nodes;
    use crate::options::{EmphasisTags, HtmlOptions};
    use crate::styles::{build_docx_props, Margins, StyleBlock, StyleConfig};
    use std::io::Read;

    fn parts_for(md: &str, props: &DocxProps) -> BTreeMap<String, String> {
        let opts = HtmlOptions::new().with_emphasis(EmphasisTags::Legacy);
        let nodes = markdown_to_html_nodes(md, &opts);
        let bytes = html_to_docx(&nodes, props).unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut parts = BTreeMap::new();
        for i in 0..zip.len() {
            let mut f = zip.by_index(i).unwrap();
            let name = f.name().to_string();
            let mut s = String::new();
            f.read_to_string(&mut s).unwrap();
            parts.insert(name, s);
        }
        parts
    }

    fn parts(md: &str) -> BTreeMap<String, String> {
        parts_for(md, &DocxProps::default())
    }

    #[test]
    fn package_has_required_parts() {
        let p = parts("hello");
        for name in [
            "[Content_Types].xml",
            "_rels/.rels",
            "docProps/core.xml",
            "word/document.xml",
            "word/styles.xml",
            "word/_rels/document.xml.rels",
        ] {
            assert!(p.contains_key(name), "missing {name}");
        }
        assert!(!p.contains_key("word/numbering.xml"));
        assert!(!p["[Content_Types].xml"].contains("numbering"));
    }

    #[test]
    fn headings_and_inline_runs() {
        let p = parts("# Title\n\n### Third\n\n**bold** *it* ~~gone~~ `x`\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains(r#"<w:pStyle w:val="Heading1"/>"#));
        assert!(doc.contains(r#"<w:pStyle w:val="Heading3"/>"#));
        assert!(doc.contains(r#"<w:rPr><w:b/></w:rPr><w:t xml:space="preserve">bold</w:t>"#));
        assert!(doc.contains(r#"<w:rPr><w:i/></w:rPr><w:t xml:space="preserve">it</w:t>"#));
        assert!(doc.contains(r#"<w:rPr><w:strike/></w:rPr><w:t xml:space="preserve">gone</w:t>"#));
        assert!(doc.contains(r#"w:ascii="Consolas""#));
    }

    #[test]
    fn text_is_xml_escaped() {
        let p = parts("a & b < c\n");
        assert!(p["word/document.xml"].contains("a &amp; b &lt; c"));
    }

    #[test]
    fn lists_get_numbering() {
        let p = parts("- a\n  - nested\n\n1. one\n2. two\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains(r#"<w:ilvl w:val="0"/><w:numId w:val="1"/>"#));
        assert!(doc.contains(r#"<w:ilvl w:val="1"/><w:numId w:val="1"/>"#));
        assert!(doc.contains(r#"<w:ilvl w:val="0"/><w:numId w:val="3"/>"#));
        let numbering = &p["word/numbering.xml"];
        assert!(numbering.contains(r#"<w:numFmt w:val="bullet"/>"#));
        assert!(numbering.contains(r#"<w:lvlText w:val="%1."/>"#));
        assert!(numbering.contains(r#"<w:num w:numId="3">"#));
        assert!(p["word/_rels/document.xml.rels"].contains("numbering.xml"));
    }

    #[test]
    fn ordered_lists_keep_their_start() {
        let p = parts("3. three\n4. four\n");
        assert!(p["word/numbering.xml"].contains(r#"<w:startOverride w:val="3"/>"#));
    }

    #[test]
    fn task_items_render_ballot_boxes() {
        let p = parts("- [ ] todo\n- [x] done\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains("☐ "));
        assert!(doc.contains("☒ "));
        assert!(doc.contains(">todo<"));
    }

    #[test]
    fn hyperlinks_become_relationships() {
        let p = parts("[site](https://example.com/?a=1&b=2) and [again](https://example.com/?a=1&b=2)\n");
        let doc = &p["word/document.xml"];
        assert_eq!(doc.matches(r#"<w:hyperlink r:id="rId10""#).count(), 2);
        assert!(doc.contains(r#"<w:rStyle w:val="Hyperlink"/>"#));
        let rels = &p["word/_rels/document.xml.rels"];
        assert!(rels.contains(r#"Target="https://example.com/?a=1&amp;b=2" TargetMode="External""#));
        assert!(!rels.contains("rId11"));
    }

    #[test]
    fn tables_mark_header_row() {
        let p = parts("| a | b |\n|---|---|\n| 1 | 2 |\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains("<w:tbl>"));
        assert_eq!(doc.matches("<w:tblHeader/>").count(), 1);
        assert_eq!(doc.matches("<w:tc>").count(), 4);
    }

    #[test]
    fn code_blocks_keep_lines() {
        let p = parts("```\nfn a() {}\nfn b() {}\n```\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains(r#"<w:pStyle w:val="CodeBlock"/>"#));
        assert_eq!(doc.matches("<w:br/>").count(), 1);
        assert!(doc.contains("fn b() {}"));
    }

    #[test]
    fn rules_and_quotes() {
        let p = parts("> quoted\n\n---\n\nafter\n");
        let doc = &p["word/document.xml"];
        assert!(doc.contains(r#"<w:pStyle w:val="Quote"/>"#));
        assert!(doc.contains("<w:pBdr><w:bottom"));
    }

    #[test]
    fn styles_and_margins_follow_props() {
        let config = StyleConfig {
            paragraph: Some(StyleBlock {
                font: Some("Georgia".into()),
                size: Some(12.0),
                ..StyleBlock::default()
            }),
            ..StyleConfig::default()
        }
        .with_margins(Margins {
            left: Some(0.5),
            ..Margins::default()
        })
        .with_title("Report & Notes");
        let p = parts_for("x", &build_docx_props(&config));
        let styles = &p["word/styles.xml"];
        assert!(styles.contains(r#"w:ascii="Georgia""#));
        assert!(styles.contains(r#"<w:sz w:val="24"/>"#));
        assert!(styles.contains(r#"w:styleId="Heading6""#));
        assert!(styles.contains(r#"<w:color w:val="2F5496"/>"#));
        let doc = &p["word/document.xml"];
        assert!(doc.contains(r#"w:top="1440" w:right="1440" w:bottom="1440" w:left="720""#));
        assert!(p["docProps/core.xml"].contains("<dc:title>Report &amp; Notes</dc:title>"));
    }

    #[test]
    fn empty_input_still_packages() {
        let bytes = html_to_docx(&[], &DocxProps::default()).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }
}
