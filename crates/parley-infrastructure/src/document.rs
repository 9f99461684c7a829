//! In-process document buffers.
//!
//! [`TextDocument`] is a plain string buffer with grouped undo and the
//! alternative version id the edit pipeline checkpoints against. The
//! providers hand out shared handles: [`MemoryDocumentProvider`] for
//! ephemeral text, [`FileDocumentProvider`] for files under a root
//! directory.

use crate::storage::atomic_file::AtomicFile;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parley_core::document::{DocumentHandle, DocumentProvider, DocumentSnapshot, Position, TextEdit};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct UndoElement {
    before_text: String,
    before_alt: u64,
}

#[derive(Debug)]
struct Buffer {
    text: String,
    version_id: u64,
    alternative_version_id: u64,
    undo_stack: Vec<UndoElement>,
    group_open: bool,
}

/// An editable text buffer.
#[derive(Debug)]
pub struct TextDocument {
    uri: String,
    buffer: Mutex<Buffer>,
}

impl TextDocument {
    pub fn new(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            buffer: Mutex::new(Buffer {
                text: text.into(),
                version_id: 1,
                alternative_version_id: 1,
                undo_stack: Vec::new(),
                group_open: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Byte offset of `position` in `text`, or `None` when it lies outside.
///
/// A character past the end of a line is rejected; the end of the last line
/// is valid.
fn offset_of(text: &str, position: Position) -> Option<usize> {
    let mut line_start = 0;
    for _ in 0..position.line {
        let newline = text[line_start..].find('\n')?;
        line_start += newline + 1;
    }
    let line_end = text[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(text.len());
    let line = &text[line_start..line_end];

    let wanted = position.character as usize;
    if wanted == 0 {
        return Some(line_start);
    }
    let mut chars = line.char_indices();
    match chars.nth(wanted) {
        Some((index, _)) => Some(line_start + index),
        None if line.chars().count() == wanted => Some(line_end),
        None => None,
    }
}

impl DocumentHandle for TextDocument {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn get_value(&self) -> String {
        self.lock().text.clone()
    }

    /// Replaces the whole text and drops undo history.
    fn set_value(&self, text: &str) {
        let mut buffer = self.lock();
        buffer.text = text.to_string();
        buffer.version_id += 1;
        buffer.alternative_version_id = buffer.version_id;
        buffer.undo_stack.clear();
        buffer.group_open = false;
    }

    fn execute_edits(&self, source: &str, edits: &[TextEdit], compute_undo: bool) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }

        let mut buffer = self.lock();

        let mut resolved = Vec::with_capacity(edits.len());
        for edit in edits {
            let start = offset_of(&buffer.text, edit.range.start)
                .ok_or_else(|| anyhow!("{}: start {:?} out of bounds", self.uri, edit.range.start))?;
            let end = offset_of(&buffer.text, edit.range.end)
                .ok_or_else(|| anyhow!("{}: end {:?} out of bounds", self.uri, edit.range.end))?;
            if end < start {
                bail!("{}: inverted range {:?}", self.uri, edit.range);
            }
            resolved.push((start, end, edit.text.as_str()));
        }

        // Apply back to front so earlier offsets stay valid.
        resolved.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        for pair in resolved.windows(2) {
            let (later, earlier) = (pair[0], pair[1]);
            if earlier.1 > later.0 {
                bail!("{}: overlapping edits", self.uri);
            }
        }

        let before_text = buffer.text.clone();
        let before_alt = buffer.alternative_version_id;
        for (start, end, text) in resolved {
            buffer.text.replace_range(start..end, text);
        }

        if compute_undo {
            if !buffer.group_open || buffer.undo_stack.is_empty() {
                buffer.undo_stack.push(UndoElement {
                    before_text,
                    before_alt,
                });
            }
            buffer.group_open = true;
        } else {
            buffer.undo_stack.clear();
            buffer.group_open = false;
        }

        buffer.version_id += 1;
        buffer.alternative_version_id = buffer.version_id;
        tracing::trace!(
            "[Document] {} edits from {} on {} (v{})",
            edits.len(),
            source,
            self.uri,
            buffer.version_id
        );
        Ok(())
    }

    fn push_undo_stop(&self) {
        self.lock().group_open = false;
    }

    fn undo(&self) -> bool {
        let mut buffer = self.lock();
        let Some(element) = buffer.undo_stack.pop() else {
            return false;
        };
        buffer.text = element.before_text;
        buffer.version_id += 1;
        buffer.alternative_version_id = element.before_alt;
        buffer.group_open = false;
        true
    }

    fn can_undo(&self) -> bool {
        !self.lock().undo_stack.is_empty()
    }

    fn alternative_version_id(&self) -> u64 {
        self.lock().alternative_version_id
    }

    fn create_snapshot(&self) -> DocumentSnapshot {
        let buffer = self.lock();
        DocumentSnapshot {
            uri: self.uri.clone(),
            text: buffer.text.clone(),
            alternative_version_id: buffer.alternative_version_id,
        }
    }
}

/// Documents that live only in memory.
///
/// Opening an unknown uri creates an empty document.
#[derive(Default)]
pub struct MemoryDocumentProvider {
    documents: RwLock<HashMap<String, Arc<TextDocument>>>,
}

impl MemoryDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, uri: impl Into<String>, text: impl Into<String>) -> Arc<TextDocument> {
        let uri = uri.into();
        let document = Arc::new(TextDocument::new(uri.clone(), text));
        self.documents.write().await.insert(uri, document.clone());
        document
    }

    pub async fn get(&self, uri: &str) -> Option<Arc<TextDocument>> {
        self.documents.read().await.get(uri).cloned()
    }
}

#[async_trait]
impl DocumentProvider for MemoryDocumentProvider {
    async fn open(&self, uri: &str) -> Result<Arc<dyn DocumentHandle>> {
        let mut documents = self.documents.write().await;
        let document = documents
            .entry(uri.to_string())
            .or_insert_with(|| {
                tracing::debug!("[Document] Creating empty document {}", uri);
                Arc::new(TextDocument::new(uri, ""))
            })
            .clone();
        Ok(document)
    }
}

/// Documents backed by files under a root directory.
///
/// A uri is a path relative to the root, optionally prefixed with
/// `file://`. Paths escaping the root are rejected. Files are read on first
/// open and written back only by [`FileDocumentProvider::save`].
pub struct FileDocumentProvider {
    root: PathBuf,
    documents: RwLock<HashMap<String, Arc<TextDocument>>>,
}

impl FileDocumentProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            documents: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let relative = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Document uri '{}' must be relative to the workspace root", uri);
        }
        Ok(self.root.join(relative))
    }

    /// Writes the open document for `uri` back to disk.
    pub async fn save(&self, uri: &str) -> Result<()> {
        let document = self
            .documents
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("Document '{}' is not open", uri))?;
        let file = AtomicFile::new(self.resolve(uri)?);
        let text = document.get_value();
        tokio::task::spawn_blocking(move || file.save(&text))
            .await
            .context("document save task panicked")?
            .with_context(|| format!("Failed to save '{}'", uri))?;
        tracing::info!("[Document] Saved {}", uri);
        Ok(())
    }

    pub async fn open_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.documents.read().await.keys().cloned().collect();
        uris.sort();
        uris
    }
}

#[async_trait]
impl DocumentProvider for FileDocumentProvider {
    async fn open(&self, uri: &str) -> Result<Arc<dyn DocumentHandle>> {
        if let Some(document) = self.documents.read().await.get(uri) {
            return Ok(document.clone());
        }

        let path = self.resolve(uri)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut documents = self.documents.write().await;
        let document = documents
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(TextDocument::new(uri, text)))
            .clone();
        Ok(document)
    }
}

#[cfg(test)]
#[path = "document_test.rs"]
mod tests;
