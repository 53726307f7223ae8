//! File discovery and reading for collection ingestion.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::IngestError;

/// SHA-256 of the content, hex encoded.
pub fn calculate_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// One readable text pulled out of a file on disk or an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedText {
    pub source_id: String,
    pub text: String,
}

/// Heuristic text detection: known extensions first, then a NUL-byte sniff.
pub fn is_text_file(path: &Path) -> bool {
    if let Some(is_text) = classify_extension(path) {
        return is_text;
    }

    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut buffer = [0u8; 512];
    match std::io::BufReader::new(file).read(&mut buffer) {
        Ok(n) => looks_like_text(&buffer[..n]),
        Err(_) => false,
    }
}

/// Read everything ingestible from `path`: plain text, the text layer of a PDF,
/// or the text and PDF entries of a ZIP archive. Other binaries yield nothing.
///
/// `max_size` bounds each file and each decompressed archive entry.
pub fn load_texts(path: &Path, max_size: u64) -> Result<Vec<LoadedText>, IngestError> {
    let source_id = path.to_string_lossy().to_string();
    match lowercase_extension(path).as_deref() {
        Some("pdf") => {
            let bytes = read_bytes(path, max_size)?;
            Ok(vec![LoadedText {
                text: extract_pdf_text(&bytes, &source_id)?,
                source_id,
            }])
        }
        Some("zip") => {
            let file = fs::File::open(path)
                .map_err(|e| IngestError::FileReadError(format!("{}: {e}", path.display())))?;
            expand_zip(file, &source_id, max_size)
        }
        _ if is_text_file(path) => {
            let text = read_file_content(path, max_size)
                .map_err(|e| IngestError::FileReadError(format!("{}: {e}", path.display())))?;
            Ok(vec![LoadedText { source_id, text }])
        }
        _ => Ok(Vec::new()),
    }
}

fn read_bytes(path: &Path, max_size: u64) -> Result<Vec<u8>, IngestError> {
    let metadata = fs::metadata(path)
        .map_err(|e| IngestError::FileReadError(format!("{}: {e}", path.display())))?;
    if metadata.len() > max_size {
        return Err(IngestError::FileReadError(format!(
            "{}: file exceeds maximum size: {} > {}",
            path.display(),
            metadata.len(),
            max_size
        )));
    }
    fs::read(path).map_err(|e| IngestError::FileReadError(format!("{}: {e}", path.display())))
}

fn extract_pdf_text(bytes: &[u8], source_id: &str) -> Result<String, IngestError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| IngestError::FileReadError(format!("{source_id}: unreadable PDF: {e}")))
}

/// Entries are named `<archive>!/<entry>`. Directories, nested archives,
/// oversized entries and binaries are skipped.
fn expand_zip<R>(reader: R, archive_id: &str, max_size: u64) -> Result<Vec<LoadedText>, IngestError>
where
    R: Read + std::io::Seek,
{
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| IngestError::FileReadError(format!("{archive_id}: invalid zip archive: {e}")))?;

    let mut texts = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| IngestError::FileReadError(format!("{archive_id}: {e}")))?;
        let name = entry.name().to_string();
        if entry.is_dir() || name.contains("..") {
            continue;
        }
        if entry.size() > max_size {
            tracing::debug!(archive = archive_id, entry = %name, size = entry.size(), "skipping oversized archive entry");
            continue;
        }

        let mut bytes = Vec::new();
        entry
            .by_ref()
            .take(max_size.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| IngestError::FileReadError(format!("{archive_id}!/{name}: {e}")))?;
        if bytes.len() as u64 > max_size {
            continue;
        }

        let source_id = format!("{archive_id}!/{name}");
        let entry_path = Path::new(&name);
        let text = match lowercase_extension(entry_path).as_deref() {
            Some("pdf") => match extract_pdf_text(&bytes, &source_id) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping archive entry");
                    continue;
                }
            },
            Some("zip") => continue,
            _ => {
                let is_text = classify_extension(entry_path)
                    .unwrap_or_else(|| looks_like_text(&bytes[..bytes.len().min(512)]));
                match String::from_utf8(bytes) {
                    Ok(text) if is_text => text,
                    _ => continue,
                }
            }
        };
        texts.push(LoadedText { source_id, text });
    }
    Ok(texts)
}

/// `Some(true)` for known text, `Some(false)` for known binary, `None` to sniff.
fn classify_extension(path: &Path) -> Option<bool> {
    let ext = lowercase_extension(path)?;
    if is_binary_extension(&ext) {
        Some(false)
    } else if is_text_extension(&ext) {
        Some(true)
    } else {
        None
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn looks_like_text(head: &[u8]) -> bool {
    !head.contains(&0)
}

/// Read a UTF-8 file, refusing anything larger than `max_size` bytes.
pub fn read_file_content(path: &Path, max_size: u64) -> std::io::Result<String> {
    let metadata = fs::metadata(path)?;

    if metadata.len() > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "file exceeds maximum size: {} > {}",
                metadata.len(),
                max_size
            ),
        ));
    }

    fs::read_to_string(path)
}

/// Expand files and directories into a sorted, de-duplicated file list.
///
/// Paths matching any glob in `exclude` are dropped. A path given directly as a
/// file is kept even when it matches.
pub fn collect_files(paths: &[PathBuf], exclude: &[String]) -> Result<Vec<PathBuf>, IngestError> {
    let patterns: Vec<glob::Pattern> = exclude
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| IngestError::FileReadError(format!("invalid pattern '{p}': {e}")))
        })
        .collect::<Result<_, _>>()?;

    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(IngestError::FileReadError(format!(
                "path does not exist: {}",
                path.display()
            )));
        }

        if path.is_file() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| IngestError::FileReadError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let entry_path = entry.path();
            let path_str = entry_path.to_string_lossy();
            if patterns.iter().any(|p| p.matches(&path_str)) {
                continue;
            }

            files.push(entry_path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();

    if files.is_empty() {
        return Err(IngestError::NoFilesFound);
    }

    Ok(files)
}

fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "exe" | "dll" | "so" | "dylib" | "a" | "o" | "obj"
            | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp"
            | "mp3" | "mp4" | "avi" | "mkv" | "mov" | "wav" | "flac"
            | "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar"
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            | "woff" | "woff2" | "ttf" | "otf"
            | "class" | "jar" | "pyc" | "db" | "sqlite" | "bin"
    )
}

fn is_text_extension(ext: &str) -> bool {
    matches!(
        ext,
        "txt" | "md" | "markdown" | "rst" | "adoc" | "org" | "csv" | "tsv"
            | "html" | "htm" | "xml" | "json" | "yaml" | "yml" | "toml"
            | "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "h" | "cpp" | "sh"
            | "sql" | "log"
    )
}
