//! Document loading: PDF and plain text, from disk or from uploaded bytes.
//!
//! Dispatch is by file extension. PDFs are read page by page with `lopdf`
//! so a page that fails to extract is reported by number; `.txt` and `.md`
//! files must be valid UTF-8. [`scan`] walks the document directory and
//! loads everything it supports.

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use docqa_core::models::{Document, DocumentFormat, TextUnit};
use docqa_core::{RagError, Result};

use crate::config::DocumentsConfig;

/// Load a file from disk. Its identity is the file name.
pub fn load(path: &Path) -> Result<Document> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    load_as(path, &name)
}

/// Load a file from disk under an explicit identity (e.g. a path relative
/// to the document directory).
pub fn load_as(path: &Path, source: &str) -> Result<Document> {
    let format = format_of(source)?;
    let bytes = std::fs::read(path).map_err(|e| RagError::load(source, None, e))?;
    parse(source, format, &bytes)
}

/// Load an uploaded file. `name` is both the identity and the format hint.
pub fn load_bytes(name: &str, bytes: &[u8]) -> Result<Document> {
    let format = format_of(name)?;
    parse(name, format, bytes)
}

/// Resolve the document format of `name` from its extension.
pub fn format_of(name: &str) -> Result<DocumentFormat> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(DocumentFormat::from_extension)
        .ok_or_else(|| RagError::UnsupportedFormat(name.to_string()))
}

fn parse(source: &str, format: DocumentFormat, bytes: &[u8]) -> Result<Document> {
    let units = match format {
        DocumentFormat::Pdf => pdf_pages(source, bytes)?,
        DocumentFormat::Text => vec![TextUnit {
            text: decode_text(source, bytes)?,
            page: None,
        }],
    };
    Ok(Document {
        source: source.to_string(),
        format,
        units,
        loaded_at: Utc::now(),
    })
}

fn decode_text(source: &str, bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        RagError::load(
            source,
            None,
            format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
        )
    })
}

fn pdf_pages(source: &str, bytes: &[u8]) -> Result<Vec<TextUnit>> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| RagError::load(source, None, format!("unparseable PDF: {}", e)))?;
    if doc.is_encrypted() {
        return Err(RagError::load(source, None, "encrypted PDF"));
    }

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(RagError::load(source, None, "PDF has no pages"));
    }

    let mut units = Vec::with_capacity(pages.len());
    for page in pages.keys() {
        let text = doc
            .extract_text(&[*page])
            .map_err(|e| RagError::load(source, Some(*page), e))?;
        units.push(TextUnit {
            text,
            page: Some(*page),
        });
    }
    Ok(units)
}

/// A file the scan found but could not load.
#[derive(Debug)]
pub struct ScanFailure {
    pub source: String,
    pub error: RagError,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Loaded documents, sorted by source identity.
    pub documents: Vec<Document>,
    /// Files skipped for an unsupported extension.
    pub skipped: Vec<String>,
    pub failures: Vec<ScanFailure>,
}

/// Walk `config.dir` recursively and load every supported file.
///
/// Hidden entries, `.git` and `target` are excluded along with
/// `config.exclude_globs`. Identities are paths relative to the directory,
/// with `/` separators. A missing directory is [`RagError::NoDocuments`].
pub fn scan(config: &DocumentsConfig) -> Result<ScanReport> {
    let root = &config.dir;
    if !root.is_dir() {
        return Err(RagError::NoDocuments(root.display().to_string()));
    }

    let mut excludes = vec![
        "**/.*".to_string(),
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    let mut report = ScanReport::default();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let source = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                tracing::warn!(%source, error = %e, "cannot read directory entry");
                report.failures.push(ScanFailure {
                    error: RagError::load(source.clone(), None, e),
                    source,
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (source, path) in files {
        match load_as(&path, &source) {
            Ok(doc) => report.documents.push(doc),
            Err(RagError::UnsupportedFormat(_)) => {
                tracing::warn!(%source, "skipping file with unsupported format");
                report.skipped.push(source);
            }
            Err(error) => {
                tracing::warn!(%source, %error, "failed to load document");
                report.failures.push(ScanFailure { source, error });
            }
        }
    }

    tracing::debug!(
        dir = %root.display(),
        loaded = report.documents.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "scanned document directory"
    );

    Ok(report)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RagError::InvalidConfig(format!("bad exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("bad exclude globs: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::fs;

    /// Build a PDF with one page per entry of `pages`.
    pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_format_dispatch() {
        assert_eq!(format_of("a.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(format_of("dir/notes.md").unwrap(), DocumentFormat::Text);
        assert!(matches!(
            format_of("report.docx"),
            Err(RagError::UnsupportedFormat(_))
        ));
        assert!(matches!(format_of("README"), Err(RagError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_load_text_bytes() {
        let doc = load_bytes("notes.txt", "\u{feff}Hello, wörld".as_bytes()).unwrap();
        assert_eq!(doc.format, DocumentFormat::Text);
        assert_eq!(doc.units.len(), 1);
        assert_eq!(doc.units[0].text, "Hello, wörld");
        assert_eq!(doc.units[0].page, None);
    }

    #[test]
    fn test_invalid_utf8_is_load_error() {
        let err = load_bytes("bad.txt", &[b'o', b'k', 0xFF, 0xFE]).unwrap_err();
        match err {
            RagError::LoadError { document, page, .. } => {
                assert_eq!(document, "bad.txt");
                assert_eq!(page, None);
            }
            other => panic!("expected LoadError, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_pdf_is_load_error() {
        assert!(matches!(
            load_bytes("broken.pdf", b"not a pdf at all"),
            Err(RagError::LoadError { .. })
        ));
    }

    #[test]
    fn test_pdf_pages_are_numbered() {
        let bytes = pdf_with_pages(&["Hello World!", "Second page"]);
        let doc = load_bytes("hello.pdf", &bytes).unwrap();
        assert_eq!(doc.format, DocumentFormat::Pdf);
        assert_eq!(doc.units.len(), 2);
        assert_eq!(doc.units[0].page, Some(1));
        assert!(doc.units[0].text.contains("Hello World!"));
        assert_eq!(doc.units[1].page, Some(2));
        assert!(doc.units[1].text.contains("Second page"));
    }

    #[test]
    fn test_load_from_disk_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        fs::write(&path, "# Guide\n").unwrap();
        let doc = load(&path).unwrap();
        assert_eq!(doc.source, "guide.md");
    }

    #[test]
    fn test_scan_sorts_skips_and_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("b.txt"), "bravo").unwrap();
        fs::write(root.join("sub/a.md"), "alpha").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("bad.txt"), [0xFFu8, 0xFE]).unwrap();
        fs::write(root.join(".hidden/secret.txt"), "nope").unwrap();
        fs::write(root.join("target/build.txt"), "nope").unwrap();

        let report = scan(&DocumentsConfig {
            dir: root.to_path_buf(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        })
        .unwrap();

        let sources: Vec<&str> = report.documents.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["b.txt", "sub/a.md"]);
        assert_eq!(report.skipped, vec!["image.png".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, "bad.txt");
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&DocumentsConfig {
            dir: dir.path().join("nope"),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        })
        .unwrap_err();
        assert!(matches!(err, RagError::NoDocuments(_)));
    }
}
