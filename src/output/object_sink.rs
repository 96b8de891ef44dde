//! Artifact sink backed by `object_store`

use crate::output::traits::{ArtifactSink, SinkError, SinkResult, StoredArtifact};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as StoragePath, Attribute, Attributes, ObjectStore, PutOptions};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Content type of persisted product pages
pub const HTML_CONTENT_TYPE: &str = "text/html";

/// Generates the key for a newly fetched product page
///
/// Keys have the form `{prefix}/{timestamp}_{id}.html`, so artifacts list in
/// fetch order and never collide.
pub fn artifact_key(prefix: &str) -> String {
    format!(
        "{}/{}_{}.html",
        prefix.trim_matches('/'),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        Uuid::new_v4().simple()
    )
}

/// Sink writing artifacts to any `object_store` backend
///
/// The content type is stored as object metadata on backends that keep
/// attributes.
#[derive(Clone)]
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    attributes: bool,
}

impl ObjectStoreSink {
    /// Creates a sink over a store that keeps object attributes
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            attributes: true,
        }
    }

    /// Creates an in-memory sink for testing and dry runs
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Creates a sink writing under a local directory
    pub fn local(dir: &Path) -> SinkResult<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        let store = LocalFileSystem::new_with_prefix(dir).map_err(|e| classify("", e))?;
        // Plain files have nowhere to keep a content type
        Ok(Self {
            store: Arc::new(store),
            attributes: false,
        })
    }

    /// Reads an artifact back
    pub async fn read(&self, key: &str) -> SinkResult<String> {
        let path = StoragePath::from(key);
        let result = self.store.get(&path).await.map_err(|e| classify(key, e))?;
        let bytes = result.bytes().await.map_err(|e| classify(key, e))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| SinkError::Rejected {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ArtifactSink for ObjectStoreSink {
    async fn persist(
        &self,
        key: &str,
        content: &str,
        content_type: &str,
    ) -> SinkResult<StoredArtifact> {
        let path = StoragePath::from(key);
        let size = content.len();

        let mut options = PutOptions::default();
        if self.attributes {
            options.attributes =
                Attributes::from_iter([(Attribute::ContentType, content_type.to_string())]);
        }

        let put_result = self
            .store
            .put_opts(&path, content.as_bytes().to_vec().into(), options)
            .await
            .map_err(|e| classify(key, e))?;

        tracing::debug!(key, size, content_type, "Persisted artifact");

        Ok(StoredArtifact {
            key: key.to_string(),
            size,
            etag: put_result.e_tag,
        })
    }
}

/// Splits object store failures into rejected artifacts and unreachable backends
fn classify(key: &str, error: object_store::Error) -> SinkError {
    match error {
        object_store::Error::InvalidPath { .. }
        | object_store::Error::AlreadyExists { .. }
        | object_store::Error::Precondition { .. }
        | object_store::Error::NotSupported { .. } => SinkError::Rejected {
            key: key.to_string(),
            reason: error.to_string(),
        },
        other => SinkError::Unavailable(other.to_string()),
    }
}
