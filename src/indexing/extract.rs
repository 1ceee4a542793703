use crate::core::error::{Error, Result};
use crate::storage::documents::{file_extension, file_name};
use pulldown_cmark::{Event, Parser, TagEnd};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Turns a file into indexable text. Implementations are format specific and
/// may fail; callers treat any failure as "use the filename instead".
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Outcome of extracting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The extractor produced text (possibly empty)
    Text(String),
    /// The extractor failed; `text` is the filename
    Fallback { text: String, reason: String },
}

impl Extraction {
    pub fn text(&self) -> &str {
        match self {
            Extraction::Text(text) => text,
            Extraction::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Extraction::Text(text) => text,
            Extraction::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Extraction::Fallback { .. })
    }
}

/// Run the extractor, degrading to the filename when it fails
pub fn extract_or_filename(extractor: &dyn ContentExtractor, path: &Path) -> Extraction {
    match extractor.extract(path) {
        Ok(text) => Extraction::Text(text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Extraction failed, using filename");
            Extraction::Fallback {
                text: file_name(path),
                reason: e.to_string(),
            }
        }
    }
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "mkd", "mkdn"];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "log", "csv", "tsv", "json", "toml", "yaml", "yml", "ini", "xml", "html",
    "htm", "css", "js", "ts", "py", "java", "c", "h", "cpp", "hpp", "cc", "rs", "go", "rb",
    "sh", "sql",
];

/// Cap on bytes read from a single file
const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Extractor for plain-text and Markdown files. Other formats are reported
/// as unsupported so they fall back to their filename.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    max_bytes: u64,
}

impl TextExtractor {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl ContentExtractor for TextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let extension = file_extension(path);
        if MARKDOWN_EXTENSIONS.contains(&extension.as_str()) {
            let content = read_text(path, self.max_bytes)?;
            Ok(markdown_to_text(&content))
        } else if TEXT_EXTENSIONS.contains(&extension.as_str()) {
            read_text(path, self.max_bytes)
        } else {
            Err(Error::Parsing(format!("No extractor for .{} files", extension)))
        }
    }
}

fn read_text(path: &Path, max_bytes: u64) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut buffer = Vec::new();
    file.take(max_bytes).read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Strip YAML frontmatter delimited by `---` lines
fn strip_frontmatter(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end_pos) = rest.find("\n---\n") {
            return &rest[end_pos + 5..];
        }
    }
    content
}

/// Flatten Markdown to plain text, one line per block
pub fn markdown_to_text(content: &str) -> String {
    let mut text = String::new();

    for event in Parser::new(strip_frontmatter(content)) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => text.push('\n'),
            _ => {}
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
