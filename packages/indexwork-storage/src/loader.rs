//! Document sources for the CLI: directory trees and JSON-lines operation files

use crate::document::{Document, DocumentOperation};
use crate::error::{Result, StorageError};
use std::io::BufRead;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Collect every file under `root` as a document, id = path relative to `root`.
///
/// Hidden entries and `target` directories are skipped. With `extensions`
/// non-empty, only files with one of those extensions are kept. Files that
/// are not UTF-8 are skipped with a warning.
pub fn collect_documents(root: &Path, extensions: &[String]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || (!name.starts_with('.') && name != "target")
        })
    {
        let entry = entry.map_err(|e| {
            StorageError::new(crate::error::ErrorKind::IO, format!("Walk error: {}", e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !extensions.is_empty() {
            let matches = path
                .extension()
                .map(|ext| extensions.iter().any(|wanted| ext.to_string_lossy() == wanted.as_str()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(path = %path.display(), "Skipping non UTF-8 file");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        documents.push(Document::new(id, content));
    }

    Ok(documents)
}

/// Read one [`DocumentOperation`] per non-blank line.
pub fn read_operations(reader: impl BufRead) -> Result<Vec<DocumentOperation>> {
    let mut operations = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let operation = serde_json::from_str(&line).map_err(|e| {
            StorageError::serialization(format!("Line {}: {}", number + 1, e)).with_source(e)
        })?;
        operations.push(operation);
    }
    Ok(operations)
}
