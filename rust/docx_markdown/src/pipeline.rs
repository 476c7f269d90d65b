//! Public conversion entry points. Each one is a fixed linear chain of the
//! stages in this crate; only the file-system edges are async.

use std::any::Any;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::docx::html_to_docx;
use crate::docx_reader::docx_to_html_nodes;
use crate::error::{Error, Result};
use crate::html_to_md::html_nodes_to_document;
use crate::lint::normalize;
use crate::markdown::{markdown_to_html, markdown_to_html_nodes};
use crate::options::{EmphasisTags, HtmlOptions, WordOptions, WordToMarkdownOptions};
use crate::styles::build_docx_props;
use crate::tables::promote_table_headers;
use crate::writer::write_markdown;

/// Where a `.docx` comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordInput {
    Path(PathBuf),
    Buffer(Vec<u8>),
    Bytes(Box<[u8]>),
}

impl WordInput {
    /// Runtime inspection for callers that only hold a type-erased value.
    /// Strings and paths name a file; byte vectors, boxed slices and static
    /// slices are package contents. Anything else fails before any parsing.
    pub fn from_any<T: Any>(value: T) -> Result<Self> {
        let boxed: Box<dyn Any> = Box::new(value);
        let boxed = match boxed.downcast::<String>() {
            Ok(s) => return Ok(WordInput::Path(PathBuf::from(*s))),
            Err(b) => b,
        };
        let boxed = match boxed.downcast::<&'static str>() {
            Ok(s) => return Ok(WordInput::Path(PathBuf::from(*s))),
            Err(b) => b,
        };
        let boxed = match boxed.downcast::<PathBuf>() {
            Ok(p) => return Ok(WordInput::Path(*p)),
            Err(b) => b,
        };
        let boxed = match boxed.downcast::<Vec<u8>>() {
            Ok(v) => return Ok(WordInput::Buffer(*v)),
            Err(b) => b,
        };
        let boxed = match boxed.downcast::<Box<[u8]>>() {
            Ok(b) => return Ok(WordInput::Bytes(*b)),
            Err(b) => b,
        };
        if let Ok(s) = boxed.downcast::<&'static [u8]>() {
            return Ok(WordInput::Bytes((*s).into()));
        }
        Err(Error::InvalidInputType(std::any::type_name::<T>().to_string()))
    }

    async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            WordInput::Path(path) => fs::read(&path).await.map_err(|e| Error::io(path, e)),
            WordInput::Buffer(buf) => Ok(buf),
            WordInput::Bytes(bytes) => Ok(bytes.into_vec()),
        }
    }
}

impl From<PathBuf> for WordInput {
    fn from(p: PathBuf) -> Self {
        WordInput::Path(p)
    }
}

impl From<&Path> for WordInput {
    fn from(p: &Path) -> Self {
        WordInput::Path(p.to_path_buf())
    }
}

impl From<&str> for WordInput {
    fn from(p: &str) -> Self {
        WordInput::Path(PathBuf::from(p))
    }
}

impl From<String> for WordInput {
    fn from(p: String) -> Self {
        WordInput::Path(PathBuf::from(p))
    }
}

impl From<Vec<u8>> for WordInput {
    fn from(buf: Vec<u8>) -> Self {
        WordInput::Buffer(buf)
    }
}

impl From<Box<[u8]>> for WordInput {
    fn from(bytes: Box<[u8]>) -> Self {
        WordInput::Bytes(bytes)
    }
}

impl From<&[u8]> for WordInput {
    fn from(bytes: &[u8]) -> Self {
        WordInput::Bytes(bytes.into())
    }
}

pub fn convert_markdown_to_html(md: &str, opts: &HtmlOptions) -> String {
    markdown_to_html(md, opts)
}

/// Markdown → HTML (legacy emphasis tags) → `.docx` bytes.
pub fn convert_markdown_to_word(md: &str, opts: &WordOptions) -> Result<Vec<u8>> {
    let html_opts = opts.html.clone().with_emphasis(EmphasisTags::Legacy);
    let nodes = markdown_to_html_nodes(md, &html_opts);
    let props = build_docx_props(&opts.style);
    debug!(nodes = nodes.len(), "rendered markdown for docx");
    html_to_docx(&nodes, &props)
}

/// `.docx` bytes → HTML → header promotion → Markdown → optional lint pass.
pub fn convert_word_bytes_to_markdown(bytes: &[u8], opts: &WordToMarkdownOptions) -> Result<String> {
    let mut nodes = docx_to_html_nodes(bytes)?;
    promote_table_headers(&mut nodes);
    let doc = html_nodes_to_document(&nodes);
    let md = write_markdown(&doc, &opts.markdown).trim().to_string();
    debug!(blocks = doc.blocks.len(), lint = opts.lint, "converted docx to markdown");
    if opts.lint {
        Ok(normalize(&md, &opts.markdown))
    } else {
        Ok(md)
    }
}

pub async fn convert_word_to_markdown(
    input: WordInput,
    opts: &WordToMarkdownOptions,
) -> Result<String> {
    let bytes = input.into_bytes().await?;
    convert_word_bytes_to_markdown(&bytes, opts)
}

/// Writes `bytes` to `path`, creating missing parent directories.
pub async fn save_bytes_to_file(bytes: &[u8], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    let mut file = fs::File::create(path).await.map_err(|e| Error::io(path, e))?;
    file.write_all(bytes).await.map_err(|e| Error::io(path, e))?;
    file.flush().await.map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "saved file");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownToHtmlConverter {
    options: HtmlOptions,
}

impl MarkdownToHtmlConverter {
    pub fn new(options: HtmlOptions) -> Self {
        Self { options }
    }

    pub fn convert(&self, md: &str) -> String {
        convert_markdown_to_html(md, &self.options)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownToWordConverter {
    options: WordOptions,
}

impl MarkdownToWordConverter {
    pub fn new(options: WordOptions) -> Self {
        Self { options }
    }

    pub fn convert(&self, md: &str) -> Result<Vec<u8>> {
        convert_markdown_to_word(md, &self.options)
    }

    pub async fn save_to_file(&self, bytes: &[u8], path: impl AsRef<Path>) -> Result<()> {
        save_bytes_to_file(bytes, path).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct WordToMarkdownConverter {
    options: WordToMarkdownOptions,
}

impl WordToMarkdownConverter {
    pub fn new(options: WordToMarkdownOptions) -> Self {
        Self { options }
    }

    pub async fn convert(&self, input: impl Into<WordInput>) -> Result<String> {
        convert_word_to_markdown(input.into(), &self.options).await
    }

    pub fn convert_bytes(&self, bytes: &[u8]) -> Result<String> {
        convert_word_bytes_to_markdown(bytes, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BulletMarker;
    use std::time::Duration;

    const SAMPLE: &str = "# Report\n\nIntro with **bold** and *soft* text.\n\n\
                          - first\n- second\n\n\
                          | Name | Qty |\n|------|-----|\n| Apple | 3 |\n| Pear | 5 |\n";

    fn word_bytes(md: &str) -> Vec<u8> {
        MarkdownToWordConverter::default().convert(md).unwrap()
    }

    #[test]
    fn markdown_to_html_uses_options() {
        let html = MarkdownToHtmlConverter::default().convert("# Hi\n\n*x*\n");
        assert!(html.contains("<h1>Hi</h1>"));
        assert!(html.contains("<em>x</em>"));
        let legacy = MarkdownToHtmlConverter::new(HtmlOptions::new().with_emphasis(EmphasisTags::Legacy))
            .convert("*x*\n");
        assert!(legacy.contains("<i>x</i>"));
    }

    #[test]
    fn word_round_trip_keeps_structure() {
        let md = WordToMarkdownConverter::default()
            .convert_bytes(&word_bytes(SAMPLE))
            .unwrap();
        assert!(md.starts_with("# Report\n"), "{md}");
        assert!(md.contains("**bold**"), "{md}");
        assert!(md.contains("_soft_"), "{md}");
        assert!(md.contains("- first\n- second"), "{md}");
        assert!(md.contains("| Name | Qty |\n| --- | --- |\n| Apple | 3 |\n| Pear | 5 |"), "{md}");
        assert!(!md.ends_with('\n'));
    }

    #[test]
    fn round_trip_honours_bullet_style() {
        let opts = WordToMarkdownOptions {
            markdown: crate::options::MarkdownStyle::default().with_bullet(BulletMarker::Star),
            ..WordToMarkdownOptions::default()
        };
        let md = convert_word_bytes_to_markdown(&word_bytes("- a\n- b\n"), &opts).unwrap();
        assert_eq!(md, "* a\n* b");
    }

    #[test]
    fn indented_code_survives_the_lint_pass() {
        let opts = WordToMarkdownOptions {
            markdown: crate::options::MarkdownStyle::default()
                .with_code_block_style(crate::options::CodeBlockStyle::Indented),
            ..WordToMarkdownOptions::default()
        };
        let bytes = word_bytes("Intro\n\n```\n+ keep\n*  this\n```\n");
        let md = convert_word_bytes_to_markdown(&bytes, &opts).unwrap();
        assert_eq!(md, "Intro\n\n    + keep\n    *  this");
    }

    #[test]
    fn lint_pass_can_be_disabled() {
        let opts = WordToMarkdownOptions {
            lint: false,
            ..WordToMarkdownOptions::default()
        };
        let md = convert_word_bytes_to_markdown(&word_bytes("Plain.\n"), &opts).unwrap();
        assert_eq!(md, "Plain.");
    }

    #[test]
    fn non_docx_bytes_are_rejected() {
        let err = convert_word_bytes_to_markdown(b"hello", &WordToMarkdownOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Package(_)), "{err:?}");
    }

    #[test]
    fn from_any_accepts_paths_and_bytes() {
        assert_eq!(
            WordInput::from_any(String::from("a.docx")).unwrap(),
            WordInput::Path(PathBuf::from("a.docx"))
        );
        assert_eq!(
            WordInput::from_any("b.docx").unwrap(),
            WordInput::Path(PathBuf::from("b.docx"))
        );
        assert_eq!(
            WordInput::from_any(vec![1u8, 2]).unwrap(),
            WordInput::Buffer(vec![1, 2])
        );
        let fixed: &'static [u8] = &[3, 4];
        assert_eq!(
            WordInput::from_any(fixed).unwrap(),
            WordInput::Bytes(vec![3u8, 4].into_boxed_slice())
        );
    }

    #[test]
    fn from_any_rejects_other_types() {
        let err = WordInput::from_any(123i32).unwrap_err();
        assert!(matches!(err, Error::InvalidInputType(ref t) if t == "i32"), "{err:?}");
        assert!(err.to_string().starts_with("invalid input type"));
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.docx");
        let bytes = word_bytes("# Saved\n");
        MarkdownToWordConverter::default()
            .save_to_file(&bytes, &path)
            .await
            .unwrap();
        let written = tokio::fs::read(&path).await.unwrap();
        assert!(!written.is_empty());
        assert_eq!(written, bytes);
    }

    #[tokio::test]
    async fn converts_from_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.docx");
        save_bytes_to_file(&word_bytes("## Section\n\nBody.\n"), &path)
            .await
            .unwrap();
        let md = tokio::time::timeout(
            Duration::from_secs(10),
            WordToMarkdownConverter::default().convert(path.as_path()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(md, "## Section\n\nBody.");
    }

    #[tokio::test]
    async fn missing_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.docx");
        let err = convert_word_to_markdown(WordInput::Path(path.clone()), &WordToMarkdownOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Io { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
