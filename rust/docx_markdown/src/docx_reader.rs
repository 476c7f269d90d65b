//! Reads a `.docx` package back into the owned HTML tree.
//!
//! The body is walked once with a pull parser. Paragraph styles decide the
//! block element, numbering definitions decide list kinds, and relationships
//! resolve hyperlinks and embedded images.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::dom::{serialize_html, HtmlNode};
use crate::error::{Error, Result};

const DOCUMENT_PART: &str = "word/document.xml";
const STYLES_PART: &str = "word/styles.xml";
const NUMBERING_PART: &str = "word/numbering.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";

const MONO_FONTS: &[&str] = &[
    "consolas",
    "courier",
    "courier new",
    "menlo",
    "monaco",
    "lucida console",
    "source code pro",
    "fira code",
    "cascadia code",
    "cascadia mono",
    "sf mono",
];

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `w:val="0"` and friends switch a toggle property off.
fn val_off(e: &BytesStart) -> bool {
    matches!(
        attr(e, b"w:val").as_deref(),
        Some("0") | Some("false") | Some("off") | Some("none")
    )
}

fn is_mono_font(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    lower.contains("mono") || MONO_FONTS.contains(&lower.as_str())
}

fn read_part<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match zip.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| Error::Package(format!("{name}: {e}")))?;
    Ok(Some(buf))
}

fn parse_styles(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut styles = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.name().as_ref() {
                b"w:style" => current = attr(&e, b"w:styleId"),
                b"w:name" => {
                    if let (Some(id), Some(name)) = (&current, attr(&e, b"w:val")) {
                        styles.insert(id.clone(), name);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"w:style" => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::xml(STYLES_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(styles)
}

#[derive(Debug, Default)]
struct Numbering {
    /// abstractNumId -> level -> numFmt
    formats: HashMap<String, HashMap<u32, String>>,
    /// numId -> abstractNumId
    nums: HashMap<String, String>,
}

impl Numbering {
    fn is_ordered(&self, num_id: &str, ilvl: u32) -> bool {
        self.nums
            .get(num_id)
            .and_then(|abs| self.formats.get(abs))
            .and_then(|levels| levels.get(&ilvl))
            .is_some_and(|fmt| fmt != "bullet" && fmt != "none")
    }
}

fn parse_numbering(xml: &[u8]) -> Result<Numbering> {
    let mut out = Numbering::default();
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut abstract_id: Option<String> = None;
    let mut num_id: Option<String> = None;
    let mut level: Option<u32> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = attr(&e, b"w:abstractNumId"),
                b"w:lvl" => level = attr(&e, b"w:ilvl").and_then(|v| v.parse().ok()),
                b"w:numFmt" => {
                    if let (Some(abs), Some(lvl), Some(fmt)) =
                        (&abstract_id, level, attr(&e, b"w:val"))
                    {
                        out.formats.entry(abs.clone()).or_default().insert(lvl, fmt);
                    }
                }
                b"w:num" => num_id = attr(&e, b"w:numId"),
                b"w:abstractNumId" => {
                    if let (Some(num), Some(abs)) = (&num_id, attr(&e, b"w:val")) {
                        out.nums.insert(num.clone(), abs);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = None,
                b"w:lvl" => level = None,
                b"w:num" => num_id = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::xml(NUMBERING_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[derive(Debug, Clone)]
struct Relationship {
    target: String,
    kind: String,
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, Relationship>> {
    let mut rels = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    let kind = attr(&e, b"Type").unwrap_or_default();
                    rels.insert(id, Relationship { target, kind });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::xml(RELS_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Resolves a relationship target against the `word/` directory.
fn part_path(target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut parts = vec!["word"];
    for seg in target.split('/') {
        match seg {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn image_mime(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Embeds every image relationship as a `data:` URI, keyed by relationship id.
fn load_images<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    rels: &HashMap<String, Relationship>,
) -> Result<HashMap<String, String>> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut images = HashMap::new();
    for (id, rel) in rels {
        if !rel.kind.ends_with("/image") {
            continue;
        }
        let path = part_path(&rel.target);
        let Some(mime) = image_mime(&path) else {
            warn!(part = %path, "skipping image with unknown format");
            continue;
        };
        match read_part(zip, &path)? {
            Some(bytes) => {
                images.insert(id.clone(), format!("data:{mime};base64,{}", engine.encode(bytes)));
            }
            None => warn!(part = %path, rel = %id, "image relationship points at a missing part"),
        }
    }
    Ok(images)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct RunProps {
    bold: bool,
    italic: bool,
    strike: bool,
    code: bool,
    sup: bool,
    sub: bool,
}

impl RunProps {
    fn wrap(self, text: String) -> HtmlNode {
        let mut node = HtmlNode::text(text);
        let layers = [
            (self.code, "code"),
            (self.bold, "strong"),
            (self.italic, "em"),
            (self.strike, "s"),
            (self.sup, "sup"),
            (self.sub && !self.sup, "sub"),
        ];
        for (on, tag) in layers {
            if on {
                node = HtmlNode::element(tag, Vec::new(), vec![node]);
            }
        }
        node
    }
}

/// Inline content collected at one hyperlink depth. Adjacent runs with the
/// same formatting are merged before they become nodes.
#[derive(Debug, Default)]
struct Frame {
    href: Option<String>,
    nodes: Vec<HtmlNode>,
    pending: Option<(RunProps, String)>,
}

impl Frame {
    fn flush(&mut self) {
        if let Some((props, text)) = self.pending.take() {
            if !text.is_empty() {
                self.nodes.push(props.wrap(text));
            }
        }
    }

    fn push_text(&mut self, props: RunProps, text: &str) {
        match &mut self.pending {
            Some((p, buf)) if *p == props => buf.push_str(text),
            _ => {
                self.flush();
                self.pending = Some((props, text.to_string()));
            }
        }
    }

    fn push_node(&mut self, node: HtmlNode) {
        self.flush();
        self.nodes.push(node);
    }
}

#[derive(Debug, Default)]
struct ParaBuilder {
    style_id: Option<String>,
    num_id: Option<String>,
    ilvl: u32,
    border: bool,
    root: Frame,
    links: Vec<Frame>,
}

impl ParaBuilder {
    fn frame(&mut self) -> &mut Frame {
        self.links.last_mut().unwrap_or(&mut self.root)
    }

    fn close_link(&mut self) {
        let Some(mut link) = self.links.pop() else {
            return;
        };
        link.flush();
        let parent = self.frame();
        match link.href {
            Some(href) => parent.push_node(HtmlNode::element(
                "a",
                vec![("href".to_string(), href)],
                link.nodes,
            )),
            None => {
                parent.flush();
                parent.nodes.extend(link.nodes);
            }
        }
    }

    fn into_nodes(mut self) -> Vec<HtmlNode> {
        while !self.links.is_empty() {
            self.close_link();
        }
        self.root.flush();
        self.root.nodes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParaKind {
    Heading(u8),
    Code,
    Quote,
    ListStyle { ordered: bool, level: u32 },
    Body,
}

fn list_style_level(rest: &str) -> u32 {
    rest.trim()
        .parse::<u32>()
        .map(|n| n.saturating_sub(1))
        .unwrap_or(0)
}

fn classify(style_name: &str) -> ParaKind {
    let lower = style_name.trim().to_ascii_lowercase();
    if lower == "title" {
        return ParaKind::Heading(1);
    }
    if let Some(rest) = lower.strip_prefix("heading") {
        if let Ok(n) = rest.trim().parse::<u8>() {
            return ParaKind::Heading(n.clamp(1, 6));
        }
    }
    match lower.as_str() {
        "code block" | "codeblock" | "source code" | "sourcecode" | "html preformatted"
        | "htmlpreformatted" => return ParaKind::Code,
        "quote" | "intense quote" | "intensequote" | "block text" => return ParaKind::Quote,
        _ => {}
    }
    if let Some(rest) = lower.strip_prefix("list bullet") {
        return ParaKind::ListStyle {
            ordered: false,
            level: list_style_level(rest),
        };
    }
    if let Some(rest) = lower.strip_prefix("list number") {
        return ParaKind::ListStyle {
            ordered: true,
            level: list_style_level(rest),
        };
    }
    ParaKind::Body
}

/// Text of inline nodes with line breaks kept as newlines.
fn plain_text(nodes: &[HtmlNode], out: &mut String) {
    for n in nodes {
        match n {
            HtmlNode::Text(t) => out.push_str(t),
            HtmlNode::Element { tag, .. } if tag == "br" => out.push('\n'),
            HtmlNode::Element { children, .. } => plain_text(children, out),
            HtmlNode::Comment(_) => {}
        }
    }
}

fn has_visible_content(nodes: &[HtmlNode]) -> bool {
    nodes.iter().any(|n| match n {
        HtmlNode::Text(t) => !t.trim().is_empty(),
        HtmlNode::Element { tag, children, .. } => tag == "img" || has_visible_content(children),
        HtmlNode::Comment(_) => false,
    })
}

#[derive(Debug)]
enum Item {
    Block(HtmlNode),
    Code(String),
    Quote(Vec<HtmlNode>),
    ListEntry {
        key: String,
        ordered: bool,
        level: u32,
        content: Vec<HtmlNode>,
    },
}

struct OpenList {
    key: String,
    ordered: bool,
    level: u32,
    items: Vec<HtmlNode>,
}

fn close_top(lists: &mut Vec<OpenList>, out: &mut Vec<HtmlNode>) {
    let Some(list) = lists.pop() else {
        return;
    };
    let tag = if list.ordered { "ol" } else { "ul" };
    let node = HtmlNode::element(tag, Vec::new(), list.items);
    match lists.last_mut() {
        Some(parent) => {
            if parent.items.is_empty() {
                parent.items.push(HtmlNode::element("li", Vec::new(), Vec::new()));
            }
            if let Some(children) = parent.items.last_mut().and_then(HtmlNode::children_mut) {
                children.push(node);
            }
        }
        None => out.push(node),
    }
}

impl Item {
    fn into_node(self) -> HtmlNode {
        match self {
            Item::Block(node) => node,
            Item::Code(text) => HtmlNode::element(
                "pre",
                Vec::new(),
                vec![HtmlNode::element("code", Vec::new(), vec![HtmlNode::text(text)])],
            ),
            Item::Quote(paras) => HtmlNode::element("blockquote", Vec::new(), paras),
            Item::ListEntry { content, .. } => HtmlNode::element("p", Vec::new(), content),
        }
    }
}

fn push_list_entry(
    lists: &mut Vec<OpenList>,
    out: &mut Vec<HtmlNode>,
    key: String,
    ordered: bool,
    level: u32,
    content: Vec<HtmlNode>,
) {
    while lists.last().is_some_and(|l| l.level > level) {
        close_top(lists, out);
    }
    if lists
        .last()
        .is_some_and(|l| l.level == level && (l.ordered != ordered || l.key != key))
    {
        close_top(lists, out);
    }
    if lists.last().map_or(true, |l| l.level < level) {
        lists.push(OpenList {
            key,
            ordered,
            level,
            items: Vec::new(),
        });
    }
    if let Some(top) = lists.last_mut() {
        top.items.push(HtmlNode::element("li", Vec::new(), content));
    }
}

/// Block-level content of the body or of one table cell.
#[derive(Debug, Default)]
struct Container {
    items: Vec<Item>,
}

impl Container {
    fn push(&mut self, item: Item) {
        let item = match (self.items.last_mut(), item) {
            (Some(Item::Code(prev)), Item::Code(text)) => {
                prev.push('\n');
                prev.push_str(&text);
                return;
            }
            (Some(Item::Quote(prev)), Item::Quote(paras)) => {
                prev.extend(paras);
                return;
            }
            (_, item) => item,
        };
        self.items.push(item);
    }

    /// Groups consecutive list entries into nested `ul`/`ol` elements.
    fn finish(self) -> Vec<HtmlNode> {
        let mut out = Vec::new();
        let mut lists: Vec<OpenList> = Vec::new();
        for item in self.items {
            match item {
                Item::ListEntry {
                    key,
                    ordered,
                    level,
                    content,
                } => push_list_entry(&mut lists, &mut out, key, ordered, level, content),
                other => {
                    while !lists.is_empty() {
                        close_top(&mut lists, &mut out);
                    }
                    out.push(other.into_node());
                }
            }
        }
        while !lists.is_empty() {
            close_top(&mut lists, &mut out);
        }
        out
    }
}

#[derive(Debug, Default)]
struct TableBuilder {
    rows: Vec<Vec<HtmlNode>>,
    span: u32,
}

impl TableBuilder {
    fn into_node(self) -> HtmlNode {
        let rows = self
            .rows
            .into_iter()
            .filter(|r| !r.is_empty())
            .map(|cells| HtmlNode::element("tr", Vec::new(), cells))
            .collect();
        HtmlNode::element("table", Vec::new(), rows)
    }
}

/// Cell paragraphs are flattened to inline content separated by `<br>` when
/// that is all the cell holds.
fn cell_children(blocks: Vec<HtmlNode>) -> Vec<HtmlNode> {
    if !blocks.iter().all(|b| b.is_tag("p")) {
        return blocks;
    }
    let mut out = Vec::new();
    for (i, p) in blocks.into_iter().enumerate() {
        if i > 0 {
            out.push(HtmlNode::element("br", Vec::new(), Vec::new()));
        }
        if let HtmlNode::Element { children, .. } = p {
            out.extend(children);
        }
    }
    out
}

struct BodyWalker<'a> {
    styles: &'a HashMap<String, String>,
    numbering: &'a Numbering,
    rels: &'a HashMap<String, Relationship>,
    images: &'a HashMap<String, String>,

    containers: Vec<Container>,
    tables: Vec<TableBuilder>,
    paras: Vec<ParaBuilder>,
    run: RunProps,
    image_alt: Option<String>,
    in_run: bool,
    in_text: bool,
    in_ppr: bool,
    in_pbdr: bool,
    skip_depth: u32,
    paragraphs: usize,
}

impl<'a> BodyWalker<'a> {
    fn new(
        styles: &'a HashMap<String, String>,
        numbering: &'a Numbering,
        rels: &'a HashMap<String, Relationship>,
        images: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            styles,
            numbering,
            rels,
            images,
            containers: vec![Container::default()],
            tables: Vec::new(),
            paras: Vec::new(),
            run: RunProps::default(),
            image_alt: None,
            in_run: false,
            in_text: false,
            in_ppr: false,
            in_pbdr: false,
            skip_depth: 0,
            paragraphs: 0,
        }
    }

    fn walk(&mut self, xml: &[u8]) -> Result<()> {
        let mut reader = Reader::from_reader(xml);
        // runs carry significant leading and trailing spaces
        reader.trim_text(false);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => self.open(&e),
                Ok(Event::Empty(e)) => {
                    self.open(&e);
                    self.close(e.name().as_ref());
                }
                Ok(Event::Text(e)) => {
                    if self.in_text && self.skip_depth == 0 {
                        let text = e.unescape().map_err(|err| Error::xml(DOCUMENT_PART, err))?;
                        self.push_text(&text);
                    }
                }
                Ok(Event::End(e)) => self.close(e.name().as_ref()),
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::xml(DOCUMENT_PART, e)),
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    fn style_name(&self, id: &str) -> String {
        self.styles.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn push_text(&mut self, text: &str) {
        let props = self.run;
        if let Some(p) = self.paras.last_mut() {
            p.frame().push_text(props, text);
        }
    }

    fn push_inline(&mut self, node: HtmlNode) {
        if let Some(p) = self.paras.last_mut() {
            p.frame().push_node(node);
        }
    }

    fn push_item(&mut self, item: Item) {
        if let Some(c) = self.containers.last_mut() {
            c.push(item);
        }
    }

    fn push_image(&mut self, rel_id: Option<String>, alt: Option<String>) {
        let Some(rel_id) = rel_id else { return };
        let Some(src) = self.images.get(&rel_id).cloned() else {
            warn!(rel = %rel_id, "dropping image with unresolved relationship");
            return;
        };
        let mut attrs = vec![("src".to_string(), src)];
        attrs.push(("alt".to_string(), alt.unwrap_or_default()));
        self.push_inline(HtmlNode::element("img", attrs, Vec::new()));
    }

    fn hyperlink_target(&self, e: &BytesStart) -> Option<String> {
        if let Some(id) = attr(e, b"r:id") {
            return match self.rels.get(&id) {
                Some(rel) => Some(rel.target.clone()),
                None => {
                    warn!(rel = %id, "hyperlink relationship not found");
                    None
                }
            };
        }
        attr(e, b"w:anchor").map(|a| format!("#{a}"))
    }

    fn open(&mut self, e: &BytesStart) {
        let name = e.name();
        let name = name.as_ref();
        if name == b"mc:Fallback" {
            self.skip_depth += 1;
            return;
        }
        if self.skip_depth > 0 {
            return;
        }

        match name {
            b"w:tbl" => self.tables.push(TableBuilder::default()),
            b"w:tr" => {
                if let Some(t) = self.tables.last_mut() {
                    t.rows.push(Vec::new());
                }
            }
            b"w:tc" => {
                if let Some(t) = self.tables.last_mut() {
                    t.span = 1;
                }
                self.containers.push(Container::default());
            }
            b"w:gridSpan" => {
                let span = attr(e, b"w:val").and_then(|v| v.parse().ok());
                if let (Some(t), Some(span)) = (self.tables.last_mut(), span) {
                    t.span = span;
                }
            }
            b"w:p" => self.paras.push(ParaBuilder::default()),
            b"w:pPr" => self.in_ppr = true,
            b"w:pBdr" if self.in_ppr => self.in_pbdr = true,
            b"w:bottom" if self.in_pbdr => {
                if let Some(p) = self.paras.last_mut() {
                    p.border = !val_off(e) && attr(e, b"w:val").as_deref() != Some("nil");
                }
            }
            b"w:pStyle" if self.in_ppr => {
                if let Some(p) = self.paras.last_mut() {
                    p.style_id = attr(e, b"w:val");
                }
            }
            b"w:ilvl" if self.in_ppr => {
                if let Some(p) = self.paras.last_mut() {
                    p.ilvl = attr(e, b"w:val").and_then(|v| v.parse().ok()).unwrap_or(0);
                }
            }
            b"w:numId" if self.in_ppr => {
                if let Some(p) = self.paras.last_mut() {
                    p.num_id = attr(e, b"w:val").filter(|v| v != "0");
                }
            }
            b"w:r" => {
                self.in_run = true;
                self.run = RunProps::default();
            }
            b"w:rStyle" if self.in_run => {
                if let Some(id) = attr(e, b"w:val") {
                    let lower = self.style_name(&id).to_ascii_lowercase();
                    if lower.contains("code") || lower.contains("verbatim") {
                        self.run.code = true;
                    }
                }
            }
            b"w:rFonts" if self.in_run => {
                let mono = [b"w:ascii".as_slice(), b"w:hAnsi".as_slice()]
                    .iter()
                    .filter_map(|k| attr(e, k))
                    .any(|f| is_mono_font(&f));
                if mono {
                    self.run.code = true;
                }
            }
            b"w:b" if self.in_run => self.run.bold = !val_off(e),
            b"w:i" if self.in_run => self.run.italic = !val_off(e),
            b"w:strike" | b"w:dstrike" if self.in_run => self.run.strike = !val_off(e),
            b"w:vertAlign" if self.in_run => match attr(e, b"w:val").as_deref() {
                Some("superscript") => self.run.sup = true,
                Some("subscript") => self.run.sub = true,
                _ => {}
            },
            b"w:t" if self.in_run => self.in_text = true,
            b"w:tab" if self.in_run => self.push_text("\t"),
            b"w:br" if self.in_run => match attr(e, b"w:type").as_deref() {
                None | Some("textWrapping") => {
                    self.push_inline(HtmlNode::element("br", Vec::new(), Vec::new()))
                }
                _ => {}
            },
            b"w:hyperlink" => {
                let href = self.hyperlink_target(e);
                if let Some(p) = self.paras.last_mut() {
                    p.links.push(Frame {
                        href,
                        ..Frame::default()
                    });
                }
            }
            b"w:drawing" => self.image_alt = None,
            b"wp:docPr" => self.image_alt = attr(e, b"descr").filter(|d| !d.is_empty()),
            b"a:blip" => {
                let alt = self.image_alt.clone();
                self.push_image(attr(e, b"r:embed"), alt);
            }
            b"v:imagedata" => {
                let alt = attr(e, b"o:title");
                self.push_image(attr(e, b"r:id"), alt);
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        if name == b"mc:Fallback" {
            self.skip_depth = self.skip_depth.saturating_sub(1);
            return;
        }
        if self.skip_depth > 0 {
            return;
        }

        match name {
            b"w:t" => self.in_text = false,
            b"w:r" => {
                self.in_run = false;
                self.in_text = false;
            }
            b"w:pPr" => {
                self.in_ppr = false;
                self.in_pbdr = false;
            }
            b"w:pBdr" => self.in_pbdr = false,
            b"w:hyperlink" => {
                if let Some(p) = self.paras.last_mut() {
                    p.close_link();
                }
            }
            b"w:p" => {
                if let Some(p) = self.paras.pop() {
                    self.paragraphs += 1;
                    if let Some(item) = self.finish_paragraph(p) {
                        self.push_item(item);
                    }
                }
            }
            b"w:tc" => {
                if self.containers.len() > 1 {
                    if let Some(cell) = self.containers.pop() {
                        let children = cell_children(cell.finish());
                        self.push_cell(children);
                    }
                }
            }
            b"w:tbl" => {
                if let Some(t) = self.tables.pop() {
                    self.push_item(Item::Block(t.into_node()));
                }
            }
            _ => {}
        }
    }

    fn push_cell(&mut self, children: Vec<HtmlNode>) {
        let Some(table) = self.tables.last_mut() else {
            return;
        };
        let mut attrs = Vec::new();
        if table.span > 1 {
            attrs.push(("colspan".to_string(), table.span.to_string()));
        }
        if table.rows.is_empty() {
            table.rows.push(Vec::new());
        }
        if let Some(row) = table.rows.last_mut() {
            row.push(HtmlNode::element("td", attrs, children));
        }
    }

    fn finish_paragraph(&self, p: ParaBuilder) -> Option<Item> {
        let kind = p
            .style_id
            .as_deref()
            .map(|id| classify(&self.style_name(id)))
            .unwrap_or(ParaKind::Body);
        let num_id = p.num_id.clone();
        let ilvl = p.ilvl;
        let border = p.border;
        let nodes = p.into_nodes();

        if !has_visible_content(&nodes) {
            return border.then(|| Item::Block(HtmlNode::element("hr", Vec::new(), Vec::new())));
        }

        let item = match (kind, num_id) {
            (ParaKind::Heading(level), _) => {
                Item::Block(HtmlNode::element(&format!("h{level}"), Vec::new(), nodes))
            }
            (ParaKind::Code, _) => {
                let mut text = String::new();
                plain_text(&nodes, &mut text);
                Item::Code(text)
            }
            (_, Some(num_id)) => Item::ListEntry {
                ordered: self.numbering.is_ordered(&num_id, ilvl),
                key: num_id,
                level: ilvl,
                content: nodes,
            },
            (ParaKind::ListStyle { ordered, level }, None) => Item::ListEntry {
                key: if ordered { "style:ol" } else { "style:ul" }.to_string(),
                ordered,
                level,
                content: nodes,
            },
            (ParaKind::Quote, None) => {
                Item::Quote(vec![HtmlNode::element("p", Vec::new(), nodes)])
            }
            (ParaKind::Body, None) => Item::Block(HtmlNode::element("p", Vec::new(), nodes)),
        };
        Some(item)
    }

    fn finish(mut self) -> Vec<HtmlNode> {
        // tolerate documents whose cells were never closed
        while self.containers.len() > 1 {
            if let Some(cell) = self.containers.pop() {
                let children = cell_children(cell.finish());
                self.push_cell(children);
            }
        }
        while let Some(t) = self.tables.pop() {
            self.push_item(Item::Block(t.into_node()));
        }
        match self.containers.pop() {
            Some(body) => body.finish(),
            None => Vec::new(),
        }
    }
}

/// Converts the bytes of a `.docx` package into an HTML tree.
pub fn docx_to_html_nodes(bytes: &[u8]) -> Result<Vec<HtmlNode>> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))?;
    let document = read_part(&mut zip, DOCUMENT_PART)?
        .ok_or_else(|| Error::MissingPart(DOCUMENT_PART.to_string()))?;

    let styles = match read_part(&mut zip, STYLES_PART)? {
        Some(xml) => parse_styles(&xml)?,
        None => HashMap::new(),
    };
    let numbering = match read_part(&mut zip, NUMBERING_PART)? {
        Some(xml) => parse_numbering(&xml)?,
        None => Numbering::default(),
    };
    let rels = match read_part(&mut zip, RELS_PART)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };
    let images = load_images(&mut zip, &rels)?;

    let mut walker = BodyWalker::new(&styles, &numbering, &rels, &images);
    walker.walk(&document)?;
    let paragraphs = walker.paragraphs;
    let nodes = walker.finish();
    debug!(
        paragraphs,
        blocks = nodes.len(),
        styles = styles.len(),
        images = images.len(),
        "read docx body"
    );
    Ok(nodes)
}

/// Converts the bytes of a `.docx` package into an HTML fragment.
pub fn docx_to_html(bytes: &[u8]) -> Result<String> {
    Ok(serialize_html(&docx_to_html_nodes(bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
    const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in parts {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}"><w:body>{body}</w:body></w:document>"#
        )
    }

    fn html_of(body: &str) -> String {
        docx_to_html(&package(&[(DOCUMENT_PART, &document(body))])).unwrap()
    }

    fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    #[test]
    fn rejects_non_zip_input() {
        let err = docx_to_html(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, Error::Package(_)), "{err:?}");
    }

    #[test]
    fn requires_document_part() {
        let bytes = package(&[("word/styles.xml", "<w:styles/>")]);
        let err = docx_to_html(&bytes).unwrap_err();
        assert!(matches!(err, Error::MissingPart(ref p) if p == DOCUMENT_PART), "{err:?}");
    }

    #[test]
    fn malformed_xml_is_reported() {
        let bytes = package(&[(DOCUMENT_PART, "<w:document><w:body></w:document>")]);
        let err = docx_to_html(&bytes).unwrap_err();
        assert!(matches!(err, Error::Xml { ref part, .. } if part == DOCUMENT_PART), "{err:?}");
    }

    #[test]
    fn paragraphs_and_run_formatting() {
        let body = r#"<w:p>
            <w:r><w:t xml:space="preserve">plain </w:t></w:r>
            <w:r><w:rPr><w:b/></w:rPr><w:t>bo</w:t></w:r>
            <w:r><w:rPr><w:b/></w:rPr><w:t>ld</w:t></w:r>
            <w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve"> it</w:t></w:r>
            <w:r><w:rPr><w:b w:val="0"/><w:strike/></w:rPr><w:t>gone</w:t></w:r>
            <w:r><w:rPr><w:vertAlign w:val="superscript"/></w:rPr><w:t>2</w:t></w:r>
            <w:r><w:rPr><w:rFonts w:ascii="Courier New" w:hAnsi="Courier New"/></w:rPr><w:t>x &amp; y</w:t></w:r>
        </w:p><w:p></w:p><w:p><w:r><w:t xml:space="preserve">   </w:t></w:r></w:p>"#;
        assert_eq!(
            html_of(body),
            "<p>plain <strong>bold</strong><em> it</em><s>gone</s><sup>2</sup><code>x &amp; y</code></p>"
        );
    }

    #[test]
    fn styles_map_to_block_elements() {
        let styles = format!(
            r#"<w:styles xmlns:w="{W_NS}">
                <w:style w:type="paragraph" w:styleId="H2"><w:name w:val="heading 2"/></w:style>
                <w:style w:type="paragraph" w:styleId="T"><w:name w:val="Title"/></w:style>
                <w:style w:type="paragraph" w:styleId="Src"><w:name w:val="Source Code"/></w:style>
                <w:style w:type="paragraph" w:styleId="Q"><w:name w:val="Intense Quote"/></w:style>
            </w:styles>"#
        );
        let body = r#"
            <w:p><w:pPr><w:pStyle w:val="T"/></w:pPr><w:r><w:t>Doc</w:t></w:r></w:p>
            <w:p><w:pPr><w:pStyle w:val="H2"/></w:pPr><w:r><w:t>Intro</w:t></w:r></w:p>
            <w:p><w:pPr><w:pStyle w:val="Heading3"/></w:pPr><w:r><w:t>Unmapped id</w:t></w:r></w:p>
            <w:p><w:pPr><w:pStyle w:val="Src"/></w:pPr><w:r><w:t>fn a() {}</w:t></w:r></w:p>
            <w:p><w:pPr><w:pStyle w:val="Src"/></w:pPr><w:r><w:t xml:space="preserve">  b()</w:t></w:r></w:p>
            <w:p><w:pPr><w:pStyle w:val="Q"/></w:pPr><w:r><w:t>wise</w:t></w:r></w:p>
            <w:p><w:pPr><w:pBdr><w:bottom w:val="single" w:sz="6"/></w:pBdr></w:pPr></w:p>"#;
        let bytes = package(&[(DOCUMENT_PART, &document(body)), (STYLES_PART, &styles)]);
        assert_eq!(
            docx_to_html(&bytes).unwrap(),
            "<h1>Doc</h1><h2>Intro</h2><h3>Unmapped id</h3>\
             <pre><code>fn a() {}\n  b()</code></pre>\
             <blockquote><p>wise</p></blockquote><hr />"
        );
    }

    #[test]
    fn numbered_paragraphs_become_nested_lists() {
        let numbering = format!(
            r#"<w:numbering xmlns:w="{W_NS}">
                <w:abstractNum w:abstractNumId="0">
                    <w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl>
                    <w:lvl w:ilvl="1"><w:numFmt w:val="bullet"/></w:lvl>
                </w:abstractNum>
                <w:abstractNum w:abstractNumId="1">
                    <w:lvl w:ilvl="0"><w:numFmt w:val="decimal"/></w:lvl>
                </w:abstractNum>
                <w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num>
                <w:num w:numId="2"><w:abstractNumId w:val="1"/></w:num>
            </w:numbering>"#
        );
        let item = |num: u32, lvl: u32, text: &str| {
            format!(
                r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="{lvl}"/><w:numId w:val="{num}"/></w:numPr></w:pPr><w:r><w:t>{text}</w:t></w:r></w:p>"#
            )
        };
        let body = [
            item(1, 0, "a"),
            item(1, 1, "nested"),
            item(1, 0, "b"),
            item(2, 0, "one"),
            item(2, 0, "two"),
            para("after"),
        ]
        .concat();
        let bytes = package(&[(DOCUMENT_PART, &document(&body)), (NUMBERING_PART, &numbering)]);
        assert_eq!(
            docx_to_html(&bytes).unwrap(),
            "<ul><li>a<ul><li>nested</li></ul></li><li>b</li></ul>\
             <ol><li>one</li><li>two</li></ol><p>after</p>"
        );
    }

    #[test]
    fn hyperlinks_resolve_through_relationships() {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/a?b=1&amp;c=2" TargetMode="External"/>
        </Relationships>"#;
        let body = r#"<w:p><w:r><w:t xml:space="preserve">see </w:t></w:r>
            <w:hyperlink r:id="rId5"><w:r><w:t>site</w:t></w:r></w:hyperlink>
            <w:hyperlink w:anchor="intro"><w:r><w:t>top</w:t></w:r></w:hyperlink>
            <w:hyperlink r:id="rId404"><w:r><w:t xml:space="preserve"> lost</w:t></w:r></w:hyperlink></w:p>"#;
        let bytes = package(&[(DOCUMENT_PART, &document(body)), (RELS_PART, rels)]);
        assert_eq!(
            docx_to_html(&bytes).unwrap(),
            r##"<p>see <a href="https://example.com/a?b=1&amp;c=2">site</a><a href="#intro">top</a> lost</p>"##
        );
    }

    #[test]
    fn images_are_embedded_as_data_uris() {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
        </Relationships>"#;
        let body = r#"<w:p><w:r><w:drawing><wp:inline><wp:docPr id="1" name="Picture 1" descr="chart"/>
            <a:graphic><a:graphicData><pic:pic><pic:blipFill><a:blip r:embed="rId7"/></pic:blipFill></pic:pic></a:graphicData></a:graphic>
            </wp:inline></w:drawing></w:r></w:p>"#;
        let mut bytes_buf = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut bytes_buf));
            zip.start_file(DOCUMENT_PART, SimpleFileOptions::default()).unwrap();
            zip.write_all(document(body).as_bytes()).unwrap();
            zip.start_file(RELS_PART, SimpleFileOptions::default()).unwrap();
            zip.write_all(rels.as_bytes()).unwrap();
            zip.start_file("word/media/image1.png", SimpleFileOptions::default()).unwrap();
            zip.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(
            docx_to_html(&bytes_buf).unwrap(),
            r#"<p><img src="data:image/png;base64,iVBORw==" alt="chart" /></p>"#
        );
    }

    #[test]
    fn tables_keep_their_shape() {
        let cell = |t: &str| format!("<w:tc>{}</w:tc>", para(t));
        let body = format!(
            "<w:tbl><w:tblPr/><w:tr>{}{}</w:tr><w:tr>{}<w:tc><w:tcPr><w:gridSpan w:val=\"1\"/></w:tcPr>{}{}</w:tc></w:tr></w:tbl>",
            cell("h1"),
            cell("h2"),
            cell("1"),
            para("two"),
            para("lines"),
        );
        assert_eq!(
            html_of(&body),
            "<table><tr><td>h1</td><td>h2</td></tr><tr><td>1</td><td>two<br />lines</td></tr></table>"
        );
    }

    #[test]
    fn merged_cells_carry_colspan() {
        let body = format!(
            "<w:tbl><w:tr><w:tc><w:tcPr><w:gridSpan w:val=\"2\"/></w:tcPr>{}</w:tc></w:tr></w:tbl>",
            para("wide")
        );
        assert_eq!(html_of(&body), r#"<table><tr><td colspan="2">wide</td></tr></table>"#);
    }

    #[test]
    fn fallback_content_is_skipped() {
        let body = r#"<w:p><w:r><mc:AlternateContent><mc:Choice Requires="wps"><w:t>choice</w:t></mc:Choice>
            <mc:Fallback><w:t>fallback</w:t></mc:Fallback></mc:AlternateContent></w:r></w:p>"#;
        assert_eq!(html_of(body), "<p>choice</p>");
    }

    #[test]
    fn reads_packages_from_the_writer() {
        use crate::docx::html_to_docx;
        use crate::markdown::markdown_to_html_nodes;
        use crate::options::{EmphasisTags, HtmlOptions};
        use crate::styles::DocxProps;

        let md = "# Title\n\nSome **bold** and *it*.\n\n- a\n- b\n\n1. one\n\n```\nx\ny\n```\n\n| h | k |\n|---|---|\n| 1 | 2 |\n";
        let nodes = markdown_to_html_nodes(md, &HtmlOptions::new().with_emphasis(EmphasisTags::Legacy));
        let bytes = html_to_docx(&nodes, &DocxProps::default()).unwrap();
        let html = docx_to_html(&bytes).unwrap();
        assert!(html.contains("<h1>Title</h1>"), "{html}");
        assert!(html.contains("<strong>bold</strong>"), "{html}");
        assert!(html.contains("<em>it</em>"), "{html}");
        assert!(html.contains("<ul><li>a</li><li>b</li></ul>"), "{html}");
        assert!(html.contains("<ol><li>one</li></ol>"), "{html}");
        assert!(html.contains("<pre><code>x\ny</code></pre>"), "{html}");
        assert!(html.contains("<tr><td>h</td><td>k</td></tr>"), "{html}");
    }
}
