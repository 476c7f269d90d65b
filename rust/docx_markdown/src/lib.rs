//! Markdown ⇄ HTML ⇄ DOCX conversion.
//!
//! Three pipelines are exposed:
//!
//! * Markdown → HTML: GitHub-flavored Markdown rendered with `pulldown-cmark`,
//!   raw HTML escaped and the output sanitized unless told otherwise.
//! * Markdown → DOCX: the same HTML (with `<i>`/`<s>` emphasis) flattened into
//!   WordprocessingML with a configurable page and paragraph style.
//! * DOCX → Markdown: the package is read back to HTML, first table rows are
//!   promoted to headers, the tree is written as Markdown and normalized by a
//!   small lint pass.
//!
//! ```no_run
//! # async fn run() -> docx_markdown::Result<()> {
//! use docx_markdown::{MarkdownToWordConverter, WordToMarkdownConverter};
//!
//! let bytes = MarkdownToWordConverter::default().convert("# Notes\n\n- one\n- two\n")?;
//! let md = WordToMarkdownConverter::default().convert(bytes).await?;
//! assert!(md.starts_with("# Notes"));
//! # Ok(())
//! # }
//! ```

pub mod docx;
pub mod docx_reader;
pub mod dom;
pub mod error;
pub mod html_to_md;
pub mod lint;
pub mod markdown;
pub mod mdast;
pub mod options;
pub mod pipeline;
pub mod sanitize;
pub mod styles;
pub mod tables;
pub mod writer;

pub use error::{Error, Result};
pub use html_to_md::html_to_markdown;
pub use lint::{lint, normalize, Finding};
pub use options::{
    BulletMarker, CodeBlockStyle, EmDelimiter, EmphasisTags, Fence, HtmlOptions, MarkdownStyle,
    StrongDelimiter, WordOptions, WordToMarkdownOptions,
};
pub use pipeline::{
    convert_markdown_to_html, convert_markdown_to_word, convert_word_bytes_to_markdown,
    convert_word_to_markdown, save_bytes_to_file, MarkdownToHtmlConverter,
    MarkdownToWordConverter, WordInput, WordToMarkdownConverter,
};
pub use styles::{build_docx_props, DocxProps, StyleConfig};
pub use tables::{promote_table_headers, promote_table_headers_html};
