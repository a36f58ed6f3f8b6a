use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::CorpusConfig;
use crate::document::Document;
use crate::error::{CorpusError, StructuralError};
use crate::scanner::{ScanOptions, scan_document};
use crate::synth::module_name;

/// A document that could not be scanned.
#[derive(Debug, Clone)]
pub struct RejectedDocument {
    pub path: String,
    /// Source text, empty when the file could not be read.
    pub source: String,
    pub error: StructuralError,
}

/// Every document under a root, scanned once.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub root: PathBuf,
    /// Scanned documents in path order.
    pub documents: Vec<Document>,
    /// Documents with structural errors, in path order.
    pub rejected: Vec<RejectedDocument>,
}

/// Narrows a run to some documents and, optionally, one block.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Substring of the document path or of its module name.
    pub document: Option<String>,
    /// 1-based runnable-fragment index.
    pub block: Option<usize>,
}

impl Selection {
    pub fn is_everything(&self) -> bool {
        self.document.is_none() && self.block.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.document {
            None => true,
            Some(filter) => {
                path.contains(filter.as_str()) || module_name(path).contains(filter.as_str())
            }
        }
    }
}

impl Corpus {
    /// Walk `root` and scan every document in it. Only an unreadable root
    /// is an error; unreadable or malformed files are recorded as rejected.
    pub fn scan(
        root: &Path,
        config: &CorpusConfig,
        options: &ScanOptions,
    ) -> Result<Corpus, CorpusError> {
        let files = discover(root, config)?;
        debug!(root = %root.display(), files = files.len(), "discovered documents");

        let scanned: Vec<Result<Document, RejectedDocument>> = files
            .par_iter()
            .map(|(rel, path)| match fs::read_to_string(path) {
                Ok(source) => scan_document(rel, &source, options).map_err(|error| {
                    RejectedDocument {
                        path: rel.clone(),
                        source,
                        error,
                    }
                }),
                Err(e) => Err(RejectedDocument {
                    path: rel.clone(),
                    source: String::new(),
                    error: StructuralError::new(rel.as_str(), format!("cannot read document: {}", e), 0, 0..0),
                }),
            })
            .collect();

        let mut documents = Vec::new();
        let mut rejected = Vec::new();
        for result in scanned {
            match result {
                Ok(doc) => documents.push(doc),
                Err(r) => {
                    warn!(document = r.path.as_str(), error = %r.error, "document rejected");
                    rejected.push(r);
                }
            }
        }

        info!(
            documents = documents.len(),
            rejected = rejected.len(),
            "scanned corpus"
        );

        Ok(Corpus {
            root: root.to_path_buf(),
            documents,
            rejected,
        })
    }

    /// Build a corpus from in-memory documents (tests, candidate text).
    pub fn from_documents(root: impl Into<PathBuf>, documents: Vec<Document>) -> Self {
        Corpus {
            root: root.into(),
            documents,
            rejected: Vec::new(),
        }
    }

    /// Documents picked by `selection`. Filtering never rescans.
    pub fn select<'c>(&'c self, selection: &'c Selection) -> impl Iterator<Item = &'c Document> + 'c {
        self.documents.iter().filter(move |d| selection.matches(&d.path))
    }

    pub fn rejected_in<'c>(
        &'c self,
        selection: &'c Selection,
    ) -> impl Iterator<Item = &'c RejectedDocument> + 'c {
        self.rejected.iter().filter(move |r| selection.matches(&r.path))
    }
}

/// Corpus-relative `/`-separated path and full path of every document,
/// sorted by relative path.
fn discover(root: &Path, config: &CorpusConfig) -> Result<Vec<(String, PathBuf)>, CorpusError> {
    let entries = fs::read_dir(root).map_err(|source| CorpusError::Root {
        path: root.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    collect_documents(entries, root, config, &mut out);
    out.sort();
    Ok(out)
}

fn collect_documents(
    entries: fs::ReadDir,
    root: &Path,
    config: &CorpusConfig,
    out: &mut Vec<(String, PathBuf)>,
) {
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");

        if path.is_dir() {
            if rel == config.output_dir.trim_matches('/') || config.exclude_dirs.iter().any(|d| d == name) {
                continue;
            }
            if let Ok(children) = fs::read_dir(&path) {
                collect_documents(children, root, config, out);
            }
        } else {
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| config.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)));
            if matches {
                out.push((rel, path));
            }
        }
    }
}
