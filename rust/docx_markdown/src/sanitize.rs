//! Allowlist HTML sanitizer.
//!
//! Unknown elements are unwrapped, active content is dropped with its subtree,
//! and only a small per-tag attribute set survives.

use crate::dom::{parse_html, serialize_html, HtmlNode};

fn is_keep_tag(tag: &str) -> bool {
    matches!(
        tag,
        "div"
            | "p"
            | "br"
            | "hr"
            | "b"
            | "strong"
            | "i"
            | "em"
            | "u"
            | "s"
            | "strike"
            | "del"
            | "ins"
            | "mark"
            | "small"
            | "sub"
            | "sup"
            | "abbr"
            | "cite"
            | "q"
            | "kbd"
            | "samp"
            | "var"
            | "pre"
            | "code"
            | "blockquote"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "details"
            | "summary"
            | "table"
            | "caption"
            | "thead"
            | "tbody"
            | "tfoot"
            | "tr"
            | "th"
            | "td"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "a"
            | "img"
            | "span"
            | "input"
    )
}

fn is_drop_content_tag(tag: &str) -> bool {
    matches!(
        tag,
        "script"
            | "style"
            | "noscript"
            | "template"
            | "iframe"
            | "frame"
            | "frameset"
            | "object"
            | "embed"
            | "applet"
            | "svg"
            | "math"
            | "form"
            | "textarea"
            | "select"
    )
}

fn scheme_of(url: &str) -> String {
    // browsers ignore embedded whitespace and control characters in the scheme
    url.chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .take_while(|c| *c != ':' && *c != '/' && *c != '?' && *c != '#')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn has_scheme(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect();
    let scheme_len = scheme_of(url).len();
    compact[scheme_len..].starts_with(':')
}

pub fn sanitize_href(href: &str) -> Option<String> {
    let h = href.trim();
    if h.is_empty() {
        return None;
    }
    if has_scheme(h) {
        let scheme = scheme_of(h);
        if matches!(scheme.as_str(), "javascript" | "vbscript" | "data") {
            return None;
        }
    }
    Some(h.to_string())
}

fn sanitize_src(src: &str) -> Option<String> {
    let s = src.trim();
    if has_scheme(s) && scheme_of(s) == "data" {
        let low = s.to_ascii_lowercase();
        let ok = ["data:image/png", "data:image/jpeg", "data:image/gif", "data:image/webp"]
            .iter()
            .any(|p| low.starts_with(p));
        return ok.then(|| s.to_string());
    }
    sanitize_href(s)
}

fn text_align(style: &str) -> Option<&'static str> {
    for decl in style.split(';') {
        let mut kv = decl.splitn(2, ':');
        let key = kv.next().unwrap_or("").trim();
        let value = kv.next().unwrap_or("").trim().to_ascii_lowercase();
        if key.eq_ignore_ascii_case("text-align") {
            return match value.as_str() {
                "left" => Some("left"),
                "center" => Some("center"),
                "right" => Some("right"),
                _ => None,
            };
        }
    }
    None
}

fn keep_attrs(tag: &str, attrs: &[(String, String)]) -> Vec<(String, String)> {
    let get = |k: &str| {
        attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(k))
            .map(|(_, v)| v.as_str())
    };
    let mut out: Vec<(String, String)> = Vec::new();
    let copy = |out: &mut Vec<(String, String)>, k: &str| {
        if let Some(v) = get(k) {
            out.push((k.to_string(), v.to_string()));
        }
    };
    match tag {
        "a" => {
            if let Some(h) = get("href").and_then(sanitize_href) {
                out.push(("href".to_string(), h));
            }
            copy(&mut out, "title");
            copy(&mut out, "id");
        }
        "img" => {
            if let Some(s) = get("src").and_then(sanitize_src) {
                out.push(("src".to_string(), s));
            }
            for k in ["alt", "title", "width", "height"] {
                copy(&mut out, k);
            }
        }
        "td" | "th" => {
            for k in ["colspan", "rowspan", "align"] {
                copy(&mut out, k);
            }
            if let Some(a) = get("style").and_then(text_align) {
                out.push(("style".to_string(), format!("text-align: {a}")));
            }
        }
        "ol" => copy(&mut out, "start"),
        "code" => {
            if let Some(c) = get("class") {
                let langs: Vec<&str> = c
                    .split_whitespace()
                    .filter(|x| x.starts_with("language-"))
                    .collect();
                if !langs.is_empty() {
                    out.push(("class".to_string(), langs.join(" ")));
                }
            }
        }
        "div" | "sup" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => copy(&mut out, "id"),
        "details" => copy(&mut out, "open"),
        _ => {}
    }
    out
}

fn sanitize_checkbox(attrs: &[(String, String)]) -> Option<HtmlNode> {
    let is_checkbox = attrs
        .iter()
        .any(|(k, v)| k == "type" && v.eq_ignore_ascii_case("checkbox"));
    if !is_checkbox {
        return None;
    }
    let mut kept = vec![("type".to_string(), "checkbox".to_string())];
    if attrs.iter().any(|(k, _)| k == "checked") {
        kept.push(("checked".to_string(), String::new()));
    }
    kept.push(("disabled".to_string(), String::new()));
    Some(HtmlNode::element("input", kept, Vec::new()))
}

fn sanitize_node(node: HtmlNode, out: &mut Vec<HtmlNode>) {
    match node {
        HtmlNode::Text(_) => out.push(node),
        HtmlNode::Comment(_) => {}
        HtmlNode::Element {
            tag,
            attrs,
            children,
        } => {
            if is_drop_content_tag(&tag) {
                return;
            }
            if tag == "input" {
                out.extend(sanitize_checkbox(&attrs));
                return;
            }
            let children = sanitize_nodes(children);
            if !is_keep_tag(&tag) {
                out.extend(children);
                return;
            }
            let attrs = keep_attrs(&tag, &attrs);
            out.push(HtmlNode::Element {
                tag,
                attrs,
                children,
            });
        }
    }
}

pub fn sanitize_nodes(nodes: Vec<HtmlNode>) -> Vec<HtmlNode> {
    let mut out = Vec::with_capacity(nodes.len());
    for n in nodes {
        sanitize_node(n, &mut out);
    }
    out
}

/// Parses, sanitizes and re-serializes an HTML fragment.
pub fn sanitize_html(input: &str) -> String {
    serialize_html(&sanitize_nodes(parse_html(input)))
}
