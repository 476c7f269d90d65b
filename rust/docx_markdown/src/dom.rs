//! Owned HTML tree shared by the sanitizer, the table pass and both converters.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtmlNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<HtmlNode>,
    },
    Text(String),
    Comment(String),
}

impl HtmlNode {
    pub fn element(tag: &str, attrs: Vec<(String, String)>, children: Vec<HtmlNode>) -> Self {
        HtmlNode::Element {
            tag: tag.to_string(),
            attrs,
            children,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        HtmlNode::Text(s.into())
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            HtmlNode::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn is_tag(&self, name: &str) -> bool {
        self.tag() == Some(name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            HtmlNode::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn children(&self) -> &[HtmlNode] {
        match self {
            HtmlNode::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<HtmlNode>> {
        match self {
            HtmlNode::Element { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Concatenated text of the subtree, comments excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(node: &HtmlNode, out: &mut String) {
    match node {
        HtmlNode::Text(t) => out.push_str(t),
        HtmlNode::Comment(_) => {}
        HtmlNode::Element { children, .. } => {
            for c in children {
                collect_text(c, out);
            }
        }
    }
}

fn convert(handle: &Handle, out: &mut Vec<HtmlNode>) {
    match &handle.data {
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            // html5ever splits text around entities; keep one node per run
            if let Some(HtmlNode::Text(prev)) = out.last_mut() {
                prev.push_str(&text);
            } else {
                out.push(HtmlNode::Text(text));
            }
        }
        NodeData::Comment { contents } => out.push(HtmlNode::Comment(contents.to_string())),
        NodeData::Document => {
            for c in handle.children.borrow().iter() {
                convert(c, out);
            }
        }
        NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {}
        NodeData::Element { name, attrs, .. } => {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect();
            let mut children = Vec::new();
            for c in handle.children.borrow().iter() {
                convert(c, &mut children);
            }
            out.push(HtmlNode::Element {
                tag: name.local.to_string().to_ascii_lowercase(),
                attrs,
                children,
            });
        }
    }
}

fn find_elem(node: &Handle, name: &str) -> Option<Handle> {
    if let NodeData::Element { name: q, .. } = &node.data {
        if (*q.local).eq_ignore_ascii_case(name) {
            return Some(node.clone());
        }
    }
    for c in node.children.borrow().iter() {
        if let Some(x) = find_elem(c, name) {
            return Some(x);
        }
    }
    None
}

/// Parses an HTML fragment or document and returns the children of `<body>`.
pub fn parse_html(input: &str) -> Vec<HtmlNode> {
    let dom: RcDom = parse_document(RcDom::default(), Default::default()).one(input);
    let roots = match find_elem(&dom.document, "body") {
        Some(body) => body.children.borrow().clone(),
        None => dom.document.children.borrow().clone(),
    };
    let mut out = Vec::new();
    for r in &roots {
        convert(r, &mut out);
    }
    out
}

pub fn esc_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn esc_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area" | "br" | "col" | "hr" | "img" | "input" | "link" | "meta" | "source" | "wbr"
    )
}

fn serialize_node(out: &mut String, n: &HtmlNode) {
    match n {
        HtmlNode::Text(t) => out.push_str(&esc_text(t)),
        HtmlNode::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
        HtmlNode::Element {
            tag,
            attrs,
            children,
        } => {
            out.push('<');
            out.push_str(tag);
            for (k, v) in attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&esc_attr(v));
                out.push('"');
            }
            if is_void(tag) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            for c in children {
                serialize_node(out, c);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

pub fn serialize_html(nodes: &[HtmlNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        serialize_node(&mut out, n);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_body_children_only() {
        let nodes = parse_html("<html><head><title>x</title></head><body><p>a</p>b</body></html>");
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].is_tag("p"));
        assert_eq!(nodes[1], HtmlNode::text("b"));
    }

    #[test]
    fn entities_are_decoded_and_reescaped() {
        let nodes = parse_html("<p>a &amp; b &lt;c&gt;</p>");
        assert_eq!(nodes[0].text_content(), "a & b <c>");
        assert_eq!(serialize_html(&nodes), "<p>a &amp; b &lt;c&gt;</p>");
    }

    #[test]
    fn void_elements_self_close() {
        let nodes = parse_html(r#"<p>x<br>y<img src="a.png" alt="q&quot;"></p>"#);
        assert_eq!(
            serialize_html(&nodes),
            r#"<p>x<br />y<img src="a.png" alt="q&quot;" /></p>"#
        );
    }

    #[test]
    fn attr_lookup() {
        let nodes = parse_html(r#"<a href="/x" title="t">l</a>"#);
        assert_eq!(nodes[0].attr("href"), Some("/x"));
        assert_eq!(nodes[0].attr("rel"), None);
        assert_eq!(nodes[0].children().len(), 1);
    }
}
