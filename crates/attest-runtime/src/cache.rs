//! Upload cache for attest-runtime.
//!
//! Remembers which documents each backend already holds, keyed by
//! `(provider, content hash)`, so a document is uploaded at most once per
//! backend. Concurrent requests for the same key share one upload.

use attest_core::ProviderKind;
use moka::future::Cache;
use std::time::Duration;

use crate::document::DocumentPayload;
use crate::providers::{ProviderError, ReasoningProvider, UploadedDocument};

type UploadKey = (ProviderKind, String);

/// Backend file handles keyed by provider and document hash.
#[derive(Clone)]
pub struct UploadCache {
    cache: Cache<UploadKey, UploadedDocument>,
}

impl UploadCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Return the cached upload for `document` on `provider`, uploading on a miss.
    ///
    /// Failed uploads are not cached.
    pub async fn get_or_upload(
        &self,
        provider: &dyn ReasoningProvider,
        document: &DocumentPayload,
    ) -> Result<UploadedDocument, ProviderError> {
        let key = (provider.kind(), document.content_hash().to_string());
        self.cache
            .try_get_with(key, async {
                tracing::debug!(
                    provider = %provider.kind(),
                    document = %document.name(),
                    size_bytes = document.len(),
                    "Uploading document"
                );
                provider.upload_document(document).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn get(&self, kind: ProviderKind, content_hash: &str) -> Option<UploadedDocument> {
        self.cache.get(&(kind, content_hash.to_string())).await
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Live entries, after applying pending inserts and invalidations.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for UploadCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(24 * 3600))
    }
}

impl std::fmt::Debug for UploadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedProvider;

    #[tokio::test]
    async fn test_upload_once_per_provider() {
        let cache = UploadCache::default();
        let claude = ScriptedProvider::new(ProviderKind::Claude);
        let openai = ScriptedProvider::new(ProviderKind::OpenAi);
        let doc = DocumentPayload::new("a.pdf", "application/pdf", vec![7; 32]);

        let first = cache.get_or_upload(&claude, &doc).await.unwrap();
        let second = cache.get_or_upload(&claude, &doc).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(claude.upload_count(), 1);

        cache.get_or_upload(&openai, &doc).await.unwrap();
        assert_eq!(openai.upload_count(), 1);
        assert!(cache.get(ProviderKind::Claude, doc.content_hash()).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_upload_not_cached() {
        let cache = UploadCache::default();
        let provider = ScriptedProvider::new(ProviderKind::Gemini).failing_upload(ProviderError::Http(
            "connection reset".to_string(),
        ));
        let doc = DocumentPayload::new("a.pdf", "application/pdf", vec![1]);

        assert!(cache.get_or_upload(&provider, &doc).await.is_err());
        assert!(cache.get_or_upload(&provider, &doc).await.is_err());
        assert_eq!(provider.upload_count(), 2);
    }

    #[tokio::test]
    async fn test_same_bytes_different_name_share_upload() {
        let cache = UploadCache::default();
        let provider = ScriptedProvider::new(ProviderKind::Claude);
        let a = DocumentPayload::new("a.pdf", "application/pdf", vec![3; 8]);
        let b = DocumentPayload::new("b.pdf", "application/pdf", vec![3; 8]);

        cache.get_or_upload(&provider, &a).await.unwrap();
        cache.get_or_upload(&provider, &b).await.unwrap();
        assert_eq!(provider.upload_count(), 1);
    }
}
