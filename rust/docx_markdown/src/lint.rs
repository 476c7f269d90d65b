//! Baseline Markdown style checks with deterministic autofixes.
//!
//! Rules follow the markdownlint numbering. Lines inside fenced or indented
//! code blocks are never inspected or rewritten.

use std::collections::HashSet;

use lazy_static::lazy_static;
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};
use regex::Regex;
use tracing::debug;

use crate::markdown::gfm_options;
use crate::mdast::parse_markdown;
use crate::options::MarkdownStyle;
use crate::writer::write_markdown;

lazy_static! {
    static ref ATX: Regex = Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]|$)").unwrap();
    static ref ATX_NO_SPACE: Regex = Regex::new(r"^ {0,3}#{1,6}[^#\s]").unwrap();
    static ref ATX_MULTI_SPACE: Regex = Regex::new(r"^ {0,3}#{1,6}[ \t]{2,}\S").unwrap();
    static ref HASHES: Regex = Regex::new(r"^( {0,3}#{1,6})[ \t]*(.*)$").unwrap();
    static ref LIST_ITEM: Regex = Regex::new(r"^( *)([-*+]|\d{1,9}[.)])( +)\S").unwrap();
    static ref EMPTY_ITEM: Regex = Regex::new(r"^ *(?:[-*+]|\d{1,9}[.)])[ \t]*$").unwrap();
    static ref THEMATIC: Regex =
        Regex::new(r"^ {0,3}(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$").unwrap();
    static ref SETEXT: Regex = Regex::new(r"^ {0,3}(?:=+|-+)[ \t]*$").unwrap();
    static ref FENCE: Regex = Regex::new(r"^ {0,3}(`{3,}|~{3,})(.*)$").unwrap();
    static ref QUOTE: Regex = Regex::new(r"^ {0,3}>").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fix {
    Tabs,
    TrailingSpaces,
    HashSpace,
    MarkerSpace,
    ListMarker(char),
    /// Paragraph starting at the given 1-based line becomes a heading.
    Setext { level: u8, start: usize },
    DeleteLine,
    BlankBefore,
    BlankAfter,
    FinalNewline,
}

impl Fix {
    fn order(&self) -> u8 {
        match self {
            Fix::Tabs => 0,
            Fix::TrailingSpaces => 1,
            Fix::HashSpace => 2,
            Fix::MarkerSpace => 3,
            Fix::ListMarker(_) => 4,
            Fix::Setext { .. } => 5,
            Fix::DeleteLine => 6,
            Fix::BlankBefore | Fix::BlankAfter => 7,
            Fix::FinalNewline => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub rule: &'static str,
    /// 1-based.
    pub line: usize,
    pub message: String,
    pub fixable: bool,
    fix: Option<Fix>,
}

impl Finding {
    fn new(rule: &'static str, line: usize, message: impl Into<String>, fix: Option<Fix>) -> Self {
        Finding {
            rule,
            line,
            message: message.into(),
            fixable: fix.is_some(),
            fix,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Blank,
    FenceOpen,
    Code,
    Atx(u8),
    Thematic,
    ListItem,
    Quote,
    Other,
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Indices of the lines that belong to indented code blocks, as the parser
/// sees them (list context included).
fn indented_code_lines(md: &str) -> HashSet<usize> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for chunk in md.split_inclusive('\n') {
        let content = chunk.trim_end_matches(['\n', '\r']).len();
        spans.push((offset, offset + content));
        offset += chunk.len();
    }

    let mut out = HashSet::new();
    for (ev, range) in Parser::new_ext(md, gfm_options()).into_offset_iter() {
        if let Event::Start(Tag::CodeBlock(CodeBlockKind::Indented)) = ev {
            for (i, (start, end)) in spans.iter().enumerate() {
                if *start < range.end && *end > range.start {
                    out.insert(i);
                }
            }
        }
    }
    out
}

fn classify(lines: &[&str], indented_code: &HashSet<usize>) -> (Vec<Kind>, Vec<usize>) {
    let mut kinds = Vec::with_capacity(lines.len());
    let mut unlabeled_fences = Vec::new();
    let mut open: Option<(char, usize)> = None;

    for (i, line) in lines.iter().enumerate() {
        if open.is_none() && indented_code.contains(&i) {
            kinds.push(Kind::Code);
            continue;
        }
        if let Some((ch, len)) = open {
            kinds.push(Kind::Code);
            let t = line.trim();
            if indent_width(line) <= 3
                && t.chars().take_while(|c| *c == ch).count() >= len
                && t.chars().all(|c| c == ch)
            {
                open = None;
            }
            continue;
        }
        if let Some(caps) = FENCE.captures(line) {
            let fence = &caps[1];
            let info = caps[2].trim();
            let ch = fence.chars().next().unwrap_or('`');
            if !(ch == '`' && info.contains('`')) {
                open = Some((ch, fence.len()));
                if info.is_empty() {
                    unlabeled_fences.push(i);
                }
                kinds.push(Kind::FenceOpen);
                continue;
            }
        }
        let kind = if is_blank(line) {
            Kind::Blank
        } else if let Some(caps) = ATX.captures(line) {
            Kind::Atx(caps[1].len() as u8)
        } else if THEMATIC.is_match(line) {
            Kind::Thematic
        } else if LIST_ITEM.is_match(line) || EMPTY_ITEM.is_match(line) {
            Kind::ListItem
        } else if QUOTE.is_match(line) {
            Kind::Quote
        } else {
            Kind::Other
        };
        kinds.push(kind);
    }
    (kinds, unlabeled_fences)
}

/// Start of the paragraph whose last line is `last`, if the run is a plain paragraph.
fn paragraph_start(kinds: &[Kind], lines: &[&str], last: usize) -> Option<usize> {
    let mut start = last;
    loop {
        if kinds[start] != Kind::Other || (start == last && indent_width(lines[start]) >= 4) {
            return None;
        }
        if start == 0 {
            return Some(0);
        }
        match kinds[start - 1] {
            Kind::Blank | Kind::Atx(_) | Kind::Thematic | Kind::Code | Kind::FenceOpen => {
                return Some(start)
            }
            Kind::Other => start -= 1,
            Kind::ListItem | Kind::Quote => return None,
        }
    }
}

fn starts_block(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Atx(_) | Kind::Thematic | Kind::Quote | Kind::FenceOpen
    )
}

/// Runs every rule over `md`.
pub fn lint(md: &str, style: &MarkdownStyle) -> Vec<Finding> {
    let lines: Vec<&str> = md.lines().collect();
    let (kinds, unlabeled_fences) = classify(&lines, &indented_code_lines(md));
    let marker = style.bullet_list_marker.as_char();
    let mut findings = Vec::new();
    let mut headings: Vec<(usize, u8)> = Vec::new();
    let mut in_list = false;

    for (i, line) in lines.iter().enumerate() {
        let n = i + 1;
        let kind = kinds[i];
        if kind == Kind::Code {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| kinds[p]);
        let next = kinds.get(i + 1).copied();

        if kind != Kind::FenceOpen {
            if line.contains('\t') {
                findings.push(Finding::new("MD010", n, "hard tab", Some(Fix::Tabs)));
            }
            let trailing = line.len() - line.trim_end().len();
            let is_break = kind != Kind::Blank && line.ends_with("  ") && !line.ends_with("   ");
            if trailing > 0 && !is_break {
                findings.push(Finding::new(
                    "MD009",
                    n,
                    format!("{trailing} trailing space(s)"),
                    Some(Fix::TrailingSpaces),
                ));
            }
        }

        if kind == Kind::Blank && prev == Some(Kind::Blank) {
            findings.push(Finding::new(
                "MD012",
                n,
                "multiple consecutive blank lines",
                Some(Fix::DeleteLine),
            ));
        }

        if kind == Kind::Other && ATX_NO_SPACE.is_match(line) {
            findings.push(Finding::new(
                "MD018",
                n,
                "no space after hash on atx style heading",
                Some(Fix::HashSpace),
            ));
        }

        if let Kind::Atx(level) = kind {
            headings.push((i, level));
            if ATX_MULTI_SPACE.is_match(line) {
                findings.push(Finding::new(
                    "MD019",
                    n,
                    "multiple spaces after hash on atx style heading",
                    Some(Fix::HashSpace),
                ));
            }
            if prev.is_some_and(|k| k != Kind::Blank) {
                findings.push(Finding::new(
                    "MD022",
                    n,
                    "heading should be preceded by a blank line",
                    Some(Fix::BlankBefore),
                ));
            }
            if next.is_some_and(|k| k != Kind::Blank) {
                findings.push(Finding::new(
                    "MD022",
                    n,
                    "heading should be followed by a blank line",
                    Some(Fix::BlankAfter),
                ));
            }
        }

        // setext underline; "---" under a paragraph is a heading, not a rule
        if matches!(kind, Kind::Other | Kind::Thematic) && SETEXT.is_match(line) && i > 0 {
            if let Some(start) = paragraph_start(&kinds, &lines, i - 1) {
                let level = if line.trim_start().starts_with('=') { 1 } else { 2 };
                headings.push((start, level));
                findings.push(Finding::new(
                    "MD003",
                    n,
                    "setext heading; expected atx",
                    Some(Fix::Setext {
                        level,
                        start: start + 1,
                    }),
                ));
            }
        }

        if kind == Kind::ListItem {
            if let Some(caps) = LIST_ITEM.captures(line) {
                let m = &caps[2];
                let spaces = caps[3].len();
                if (2..5).contains(&spaces) {
                    findings.push(Finding::new(
                        "MD030",
                        n,
                        format!("{spaces} spaces after list marker"),
                        Some(Fix::MarkerSpace),
                    ));
                }
                if let Some(c) = m.chars().next().filter(|c| matches!(c, '-' | '*' | '+')) {
                    if c != marker {
                        findings.push(Finding::new(
                            "MD004",
                            n,
                            format!("unordered list marker {c}; expected {marker}"),
                            Some(Fix::ListMarker(marker)),
                        ));
                    }
                }
            } else if let Some(c) = line.trim_start().chars().next() {
                if matches!(c, '-' | '*' | '+') && c != marker {
                    findings.push(Finding::new(
                        "MD004",
                        n,
                        format!("unordered list marker {c}; expected {marker}"),
                        Some(Fix::ListMarker(marker)),
                    ));
                }
            }
            if !in_list && prev.is_some_and(|k| k != Kind::Blank) {
                findings.push(Finding::new(
                    "MD032",
                    n,
                    "list should be preceded by a blank line",
                    Some(Fix::BlankBefore),
                ));
            }
            in_list = true;
        } else if in_list && kind != Kind::Blank {
            let indented = indent_width(line) > 0;
            if !indented {
                if prev == Some(Kind::Blank) {
                    in_list = false;
                } else if starts_block(kind) {
                    findings.push(Finding::new(
                        "MD032",
                        n,
                        "list should be followed by a blank line",
                        Some(Fix::BlankBefore),
                    ));
                    in_list = false;
                }
            }
        }
    }

    for i in unlabeled_fences {
        findings.push(Finding::new(
            "MD040",
            i + 1,
            "fenced code block without a language",
            None,
        ));
    }

    headings.sort_unstable();
    let mut prev_level: Option<u8> = None;
    let mut seen_h1 = false;
    for (i, level) in headings {
        if let Some(p) = prev_level {
            if level > p + 1 {
                findings.push(Finding::new(
                    "MD001",
                    i + 1,
                    format!("heading level jumps from {p} to {level}"),
                    None,
                ));
            }
        }
        if level == 1 {
            if seen_h1 {
                findings.push(Finding::new(
                    "MD025",
                    i + 1,
                    "multiple top-level headings",
                    None,
                ));
            }
            seen_h1 = true;
        }
        prev_level = Some(level);
    }

    if !md.is_empty() && !md.ends_with('\n') {
        findings.push(Finding::new(
            "MD047",
            lines.len().max(1),
            "file should end with a single newline",
            Some(Fix::FinalNewline),
        ));
    }

    findings.sort_by_key(|f| f.line);
    findings
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = 4 - col % 4;
            out.extend(std::iter::repeat(' ').take(pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

fn fix_hash_space(line: &str) -> String {
    match HASHES.captures(line) {
        Some(caps) => format!("{} {}", &caps[1], &caps[2]),
        None => line.to_string(),
    }
}

fn fix_marker_space(line: &str) -> String {
    match LIST_ITEM.captures(line) {
        Some(caps) => {
            let rest = &line[caps.get(3).map_or(0, |m| m.end())..];
            format!("{}{} {}", &caps[1], &caps[2], rest)
        }
        None => line.to_string(),
    }
}

fn fix_list_marker(line: &str, marker: char) -> String {
    let indent = indent_width(line);
    let mut out = line.to_string();
    if let Some(c) = line[indent..].chars().next() {
        if matches!(c, '-' | '*' | '+') {
            out.replace_range(indent..indent + 1, &marker.to_string());
        }
    }
    out
}

/// Applies the fixable findings; everything else is left as-is.
pub fn fix(md: &str, findings: &[Finding]) -> String {
    let mut text: Vec<Option<String>> = md.lines().map(|l| Some(l.to_string())).collect();
    let n = text.len();
    let mut blank_before = vec![false; n];
    let mut blank_after = vec![false; n];
    let mut final_newline = md.ends_with('\n');

    let mut fixes: Vec<(usize, Fix)> = findings
        .iter()
        .filter_map(|f| f.fix.map(|fx| (f.line.saturating_sub(1), fx)))
        .filter(|(i, _)| *i < n.max(1))
        .collect();
    fixes.sort_by_key(|(i, f)| (f.order(), *i));

    for (i, f) in fixes {
        if f == Fix::FinalNewline {
            final_newline = true;
            continue;
        }
        let Some(line) = text.get(i).and_then(|t| t.clone()) else {
            continue;
        };
        match f {
            Fix::Tabs => text[i] = Some(expand_tabs(&line)),
            Fix::TrailingSpaces => text[i] = Some(line.trim_end().to_string()),
            Fix::HashSpace => text[i] = Some(fix_hash_space(&line)),
            Fix::MarkerSpace => text[i] = Some(fix_marker_space(&line)),
            Fix::ListMarker(m) => text[i] = Some(fix_list_marker(&line, m)),
            Fix::Setext { level, start } => {
                let start = start.saturating_sub(1);
                let joined = text[start..i]
                    .iter()
                    .flatten()
                    .map(|l| l.trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                for t in &mut text[start..=i] {
                    *t = None;
                }
                text[start] = Some(format!("{} {}", "#".repeat(usize::from(level)), joined));
            }
            Fix::DeleteLine => text[i] = None,
            Fix::BlankBefore => blank_before[i] = true,
            Fix::BlankAfter => blank_after[i] = true,
            Fix::FinalNewline => {}
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(n + 4);
    for i in 0..n {
        let Some(line) = text[i].take() else {
            continue;
        };
        if blank_before[i] && out.last().is_some_and(|l| !is_blank(l)) {
            out.push(String::new());
        }
        out.push(line);
        if blank_after[i] {
            let next_blank = text[i + 1..]
                .iter()
                .flatten()
                .next()
                .map_or(true, |l| is_blank(l));
            if !next_blank {
                out.push(String::new());
            }
        }
    }

    let mut result = out.join("\n");
    if final_newline && !result.is_empty() {
        result.push('\n');
    }
    result
}

/// lint → fix → re-parse → re-serialize, trimmed.
pub fn normalize(md: &str, style: &MarkdownStyle) -> String {
    let findings = lint(md, style);
    for f in findings.iter().filter(|f| !f.fixable) {
        debug!(rule = f.rule, line = f.line, "{}", f.message);
    }
    let fixed = fix(md, &findings);
    write_markdown(&parse_markdown(&fixed), style)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BulletMarker, CodeBlockStyle};

    fn rules(md: &str) -> Vec<&'static str> {
        lint(md, &MarkdownStyle::default())
            .into_iter()
            .map(|f| f.rule)
            .collect()
    }

    fn fixed(md: &str) -> String {
        let style = MarkdownStyle::default();
        fix(md, &lint(md, &style))
    }

    #[test]
    fn clean_document_has_no_findings() {
        assert!(rules("# Title\n\nText.\n\n- a\n- b\n\n```rust\nx\n```\n").is_empty());
    }

    #[test]
    fn mixed_bullets_become_configured_marker() {
        assert_eq!(rules("* a\n+ b\n- c\n"), vec!["MD004", "MD004"]);
        assert_eq!(fixed("* a\n+ b\n- c\n"), "- a\n- b\n- c\n");

        let star = MarkdownStyle::default().with_bullet(BulletMarker::Star);
        assert_eq!(normalize("- a\n- b\n", &star), "* a\n* b");
    }

    #[test]
    fn setext_becomes_atx() {
        assert_eq!(rules("Title\n=====\n\ntext\n"), vec!["MD003"]);
        assert_eq!(fixed("Title\n=====\n\ntext\n"), "# Title\n\ntext\n");
        assert_eq!(fixed("Two\nlines\n---\n"), "## Two lines\n");
    }

    #[test]
    fn rule_after_blank_is_not_setext() {
        assert!(rules("para\n\n---\n").is_empty());
        assert!(rules("- item\n---\n").iter().all(|r| *r != "MD003"));
    }

    #[test]
    fn hash_spacing() {
        assert_eq!(fixed("#Title\n"), "# Title\n");
        assert_eq!(fixed("##   Sub\n"), "## Sub\n");
    }

    #[test]
    fn trailing_spaces_keep_hard_breaks() {
        assert_eq!(rules("a   \nb  \nc\n"), vec!["MD009"]);
        assert_eq!(fixed("a   \nb  \nc\n"), "a\nb  \nc\n");
    }

    #[test]
    fn tabs_expand_to_tab_stops() {
        assert_eq!(fixed("a\tb\n"), "a   b\n");
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(rules("a\n\n\n\nb\n"), vec!["MD012", "MD012"]);
        assert_eq!(fixed("a\n\n\n\nb\n"), "a\n\nb\n");
    }

    #[test]
    fn headings_get_blank_lines() {
        assert_eq!(fixed("text\n# H\nmore\n"), "text\n\n# H\n\nmore\n");
    }

    #[test]
    fn lists_get_blank_lines() {
        assert_eq!(fixed("text\n- a\n- b\n"), "text\n\n- a\n- b\n");
        assert_eq!(fixed("- a\n# H\n"), "- a\n\n# H\n");
    }

    #[test]
    fn lazy_continuation_is_not_a_new_list() {
        assert!(!rules("- a\ncontinued\n- b\n").contains(&"MD032"));
    }

    #[test]
    fn marker_spacing() {
        assert_eq!(fixed("-   a\n1.  b\n"), "- a\n1. b\n");
    }

    #[test]
    fn marker_spacing_before_multibyte_text() {
        assert_eq!(fixed("-  émile\n1.   ünter\n"), "- émile\n1. ünter\n");
        assert_eq!(normalize("-  émile\n", &MarkdownStyle::default()), "- émile");
    }

    #[test]
    fn final_newline() {
        assert_eq!(rules("a"), vec!["MD047"]);
        assert_eq!(fixed("a"), "a\n");
    }

    #[test]
    fn unfixable_findings() {
        let found = lint("# a\n\n### c\n\n# d\n\n```\nx\n```\n", &MarkdownStyle::default());
        let unfixable: Vec<_> = found.iter().filter(|f| !f.fixable).map(|f| f.rule).collect();
        assert_eq!(unfixable, vec!["MD001", "MD025", "MD040"]);
        let md = "# a\n\n### c\n";
        assert_eq!(fix(md, &lint(md, &MarkdownStyle::default())), md);
    }

    #[test]
    fn fenced_code_is_untouched() {
        let md = "```text\n#x\t \n\n\n* y\n```\n";
        assert!(rules(md).is_empty());
        assert_eq!(fixed(md), md);
    }

    #[test]
    fn indented_code_is_untouched() {
        let md = "text\n\n    + y\n    *  z\t\n";
        assert!(rules(md).is_empty(), "{:?}", rules(md));
        assert_eq!(fixed(md), md);

        let indented = MarkdownStyle::default().with_code_block_style(CodeBlockStyle::Indented);
        assert_eq!(
            normalize("text\n\n    + y\n    *  z\n", &indented),
            "text\n\n    + y\n    *  z"
        );
    }

    #[test]
    fn list_items_after_indented_code_are_still_checked() {
        let md = "    code\n\n* a\n";
        assert_eq!(rules(md), vec!["MD004"]);
        assert_eq!(fixed(md), "    code\n\n- a\n");
    }

    #[test]
    fn normalize_is_idempotent() {
        let messy = "Title\n====\n*  a\n+ b\n\n\n\n##Next\ntext   \n";
        let once = normalize(messy, &MarkdownStyle::default());
        assert_eq!(once, "# Title\n\n- a\n- b\n\n## Next\n\ntext");
        assert_eq!(normalize(&once, &MarkdownStyle::default()), once);
    }
}
