//! Header-row promotion for tables whose header was exported as plain cells.

use crate::dom::{parse_html, serialize_html, HtmlNode};

fn first_row_mut(children: &mut [HtmlNode]) -> Option<&mut HtmlNode> {
    for c in children.iter_mut() {
        let is_row = c.is_tag("tr");
        let is_table = c.is_tag("table");
        if is_row {
            return Some(c);
        }
        if is_table {
            continue;
        }
        if let Some(grand) = c.children_mut() {
            if let Some(row) = first_row_mut(grand) {
                return Some(row);
            }
        }
    }
    None
}

fn promote_first_row(table_children: &mut [HtmlNode]) {
    let Some(HtmlNode::Element { children, .. }) = first_row_mut(table_children) else {
        return;
    };
    for cell in children.iter_mut() {
        if let HtmlNode::Element { tag, .. } = cell {
            if tag == "td" {
                *tag = "th".to_string();
            }
        }
    }
}

/// Retags the cells of every table's first row as header cells. Nested tables
/// are handled independently; running it twice changes nothing.
pub fn promote_table_headers(nodes: &mut [HtmlNode]) {
    for n in nodes.iter_mut() {
        if let HtmlNode::Element { tag, children, .. } = n {
            if tag == "table" {
                promote_first_row(children);
            }
            promote_table_headers(children);
        }
    }
}

pub fn promote_table_headers_html(html: &str) -> String {
    let mut nodes = parse_html(html);
    promote_table_headers(&mut nodes);
    serialize_html(&nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_row_becomes_header() {
        let out = promote_table_headers_html(
            "<table><tr><td>a</td><td>b</td></tr><tr><td>1</td><td>2</td></tr></table>",
        );
        assert_eq!(
            out,
            "<table><tbody><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></tbody></table>"
        );
    }

    #[test]
    fn attributes_and_children_survive() {
        let out = promote_table_headers_html(
            r#"<table><tr><td colspan="2"><strong>x</strong></td></tr></table>"#,
        );
        assert!(out.contains(r#"<th colspan="2"><strong>x</strong></th>"#));
    }

    #[test]
    fn nested_tables_are_promoted_separately() {
        let html = "<table><tr><td>outer</td></tr><tr><td>\
                    <table><tr><td>inner</td></tr><tr><td>z</td></tr></table>\
                    </td></tr></table>";
        let out = promote_table_headers_html(html);
        assert!(out.contains("<th>outer</th>"));
        assert!(out.contains("<th>inner</th>"));
        assert!(out.contains("<td>z</td>"));
        // the row holding the nested table is not a header row
        assert_eq!(out.matches("<th>").count(), 2);
    }

    #[test]
    fn is_idempotent() {
        let html = "<table><thead><tr><td>h</td></tr></thead><tbody><tr><td>v</td></tr></tbody></table>";
        let once = promote_table_headers_html(html);
        let twice = promote_table_headers_html(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_tables_are_untouched() {
        let mut nodes = vec![HtmlNode::element("table", Vec::new(), Vec::new())];
        promote_table_headers(&mut nodes);
        assert_eq!(serialize_html(&nodes), "<table></table>");
    }
}
