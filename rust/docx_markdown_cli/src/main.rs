use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docx_markdown::options::load_json;
use docx_markdown::{
    HtmlOptions, MarkdownToHtmlConverter, MarkdownToWordConverter, WordOptions,
    WordToMarkdownConverter, WordToMarkdownOptions,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Log conversion steps (same as RUST_LOG=debug).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a Markdown file as HTML.
    Md2html {
        input: PathBuf,

        /// Output .html path (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,

        /// Pass raw HTML in the Markdown through instead of escaping it.
        #[arg(long)]
        allow_dangerous_html: bool,

        /// Skip the sanitizer.
        #[arg(long)]
        no_sanitize: bool,
    },
    /// Convert a Markdown file to a .docx package.
    Md2docx {
        input: PathBuf,

        /// Output .docx path.
        #[arg(long)]
        out: PathBuf,

        /// JSON file with page margins, paragraph/heading styles and metadata.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Document title metadata (overrides the config file).
        #[arg(long)]
        title: Option<String>,
    },
    /// Convert a .docx package to Markdown.
    Docx2md {
        input: PathBuf,

        /// Output .md path (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,

        /// JSON file with Markdown style options.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_markdown(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn emit_text(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, text).with_context(|| format!("write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    debug!(command = ?args.command, "starting");

    match args.command {
        Command::Md2html {
            input,
            out,
            allow_dangerous_html,
            no_sanitize,
        } => {
            let md = read_markdown(&input)?;
            let opts = HtmlOptions::new()
                .with_sanitize(!no_sanitize)
                .with_dangerous_html(allow_dangerous_html);
            let html = MarkdownToHtmlConverter::new(opts).convert(&md);
            emit_text(&html, out.as_deref())?;
        }
        Command::Md2docx {
            input,
            out,
            config,
            title,
        } => {
            let md = read_markdown(&input)?;
            let mut opts: WordOptions = match config {
                Some(path) => load_json(&path).with_context(|| format!("load config {}", path.display()))?,
                None => WordOptions::default(),
            };
            if let Some(title) = title {
                opts.style.title = Some(title);
            }
            let converter = MarkdownToWordConverter::new(opts);
            let bytes = converter.convert(&md).context("build docx")?;
            converter
                .save_to_file(&bytes, &out)
                .await
                .with_context(|| format!("write {}", out.display()))?;
            eprintln!("Wrote {}", out.display());
        }
        Command::Docx2md { input, out, config } => {
            let opts: WordToMarkdownOptions = match config {
                Some(path) => load_json(&path).with_context(|| format!("load config {}", path.display()))?,
                None => WordToMarkdownOptions::default(),
            };
            let md = WordToMarkdownConverter::new(opts)
                .convert(input.as_path())
                .await
                .with_context(|| format!("convert {}", input.display()))?;
            emit_text(&md, out.as_deref())?;
        }
    }
    Ok(())
}
