//! Document payloads handed to the queue and the evaluators.
//!
//! A payload is reference-counted: the queue, both comparator sides and every
//! provider upload share the same bytes.

use attest_core::{DocumentInfo, EvaluationMode, ProviderKind};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use std::path::Path;
use std::sync::Arc;

struct DocumentInner {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
    content_hash: String,
}

/// An immutable document shared by reference.
#[derive(Clone)]
pub struct DocumentPayload {
    inner: Arc<DocumentInner>,
}

impl DocumentPayload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let content_hash = sha256_hex(&bytes);
        Self {
            inner: Arc::new(DocumentInner {
                name: name.into(),
                mime_type: mime_type.into(),
                bytes,
                content_hash,
            }),
        }
    }

    /// Read a document from disk, guessing its media type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, mime_type_for(path), bytes))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// Lowercase hex SHA-256 of the bytes.
    pub fn content_hash(&self) -> &str {
        &self.inner.content_hash
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &DocumentPayload) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self, mode: EvaluationMode, providers: Vec<ProviderKind>) -> DocumentInfo {
        DocumentInfo {
            name: self.inner.name.clone(),
            size_bytes: self.inner.bytes.len() as u64,
            content_hash: self.inner.content_hash.clone(),
            mode,
            providers,
        }
    }
}

impl fmt::Debug for DocumentPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentPayload")
            .field("name", &self.inner.name)
            .field("mime_type", &self.inner.mime_type)
            .field("size_bytes", &self.inner.bytes.len())
            .field("content_hash", &self.inner.content_hash)
            .finish()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}
