//! Per-call option bags.
//!
//! Every struct deserializes from camelCase JSON with all fields optional;
//! keys this crate does not know about are ignored.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::styles::StyleConfig;

/// Which tags the Markdown renderer uses for emphasis and strikethrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmphasisTags {
    /// `<em>`, `<strong>`, `<del>`
    #[default]
    Em,
    /// `<i>`, `<strong>`, `<s>`; the DOCX generator only understands these.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HtmlOptions {
    /// Strip unsafe constructs (scripts, event handlers, `javascript:` links)
    /// from the rendered HTML.
    pub sanitize: bool,
    /// Emit raw HTML found in the Markdown source verbatim instead of escaping it.
    pub allow_dangerous_html: bool,
    pub emphasis: EmphasisTags,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            sanitize: true,
            allow_dangerous_html: false,
            emphasis: EmphasisTags::Em,
        }
    }
}

impl HtmlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn with_dangerous_html(mut self, allow: bool) -> Self {
        self.allow_dangerous_html = allow;
        self
    }

    pub fn with_emphasis(mut self, emphasis: EmphasisTags) -> Self {
        self.emphasis = emphasis;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BulletMarker {
    #[default]
    #[serde(rename = "-")]
    Dash,
    #[serde(rename = "*")]
    Star,
    #[serde(rename = "+")]
    Plus,
}

impl BulletMarker {
    pub fn as_char(self) -> char {
        match self {
            BulletMarker::Dash => '-',
            BulletMarker::Star => '*',
            BulletMarker::Plus => '+',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeBlockStyle {
    #[default]
    Fenced,
    Indented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Fence {
    #[default]
    #[serde(rename = "```")]
    Backtick,
    #[serde(rename = "~~~")]
    Tilde,
}

impl Fence {
    pub fn as_str(self) -> &'static str {
        match self {
            Fence::Backtick => "```",
            Fence::Tilde => "~~~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum EmDelimiter {
    #[default]
    #[serde(rename = "_")]
    Underscore,
    #[serde(rename = "*")]
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum StrongDelimiter {
    #[default]
    #[serde(rename = "**")]
    Stars,
    #[serde(rename = "__")]
    Underscores,
}

/// How generated Markdown is spelled. Headings are always ATX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarkdownStyle {
    pub bullet_list_marker: BulletMarker,
    pub code_block_style: CodeBlockStyle,
    pub fence: Fence,
    pub em_delimiter: EmDelimiter,
    pub strong_delimiter: StrongDelimiter,
}

impl MarkdownStyle {
    pub fn with_bullet(mut self, marker: BulletMarker) -> Self {
        self.bullet_list_marker = marker;
        self
    }

    pub fn with_code_block_style(mut self, style: CodeBlockStyle) -> Self {
        self.code_block_style = style;
        self
    }

    pub fn em(&self) -> &'static str {
        match self.em_delimiter {
            EmDelimiter::Underscore => "_",
            EmDelimiter::Star => "*",
        }
    }

    pub fn strong(&self) -> &'static str {
        match self.strong_delimiter {
            StrongDelimiter::Stars => "**",
            StrongDelimiter::Underscores => "__",
        }
    }
}

/// Options for Markdown → DOCX.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WordOptions {
    #[serde(flatten)]
    pub html: HtmlOptions,
    #[serde(flatten)]
    pub style: StyleConfig,
}

/// Options for DOCX → Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WordToMarkdownOptions {
    #[serde(flatten)]
    pub markdown: MarkdownStyle,
    /// Run the lint/normalize pass over the generated Markdown.
    pub lint: bool,
}

impl Default for WordToMarkdownOptions {
    fn default() -> Self {
        Self {
            markdown: MarkdownStyle::default(),
            lint: true,
        }
    }
}

pub fn from_json_str<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

/// Reads an option bag from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    from_json_str(&raw)
}
