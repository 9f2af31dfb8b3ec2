//! Off-chain metadata resolution.
//!
//! Lifecycle and registry events carry a metadata URI. The node resolves
//! them before a block is reduced so the reducer itself stays synchronous
//! and deterministic. Resolution never fails a block: an unreachable
//! gateway or a malformed document yields empty metadata and a warning.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use flows_core::error::FlowsError;
use flows_core::events::EventRecord;
use flows_core::types::GrantMetadata;

/// Resolves a metadata URI to its document.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, uri: &str) -> GrantMetadata;
}

/// Leaves every URI unresolved (empty metadata).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

#[async_trait]
impl MetadataResolver for NullResolver {
    async fn resolve(&self, _uri: &str) -> GrantMetadata {
        GrantMetadata::default()
    }
}

/// Fetches metadata JSON over HTTP, mapping `ipfs://` URIs onto a gateway.
#[derive(Debug, Clone)]
pub struct HttpMetadataResolver {
    client: reqwest::Client,
    gateway: String,
}

impl HttpMetadataResolver {
    pub fn new(gateway: &str, timeout: Duration) -> Result<Self, FlowsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowsError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            gateway: gateway.trim_end_matches('/').to_string(),
        })
    }

    /// HTTP URL for a metadata URI, or `None` for schemes we cannot fetch.
    pub fn url_for(&self, uri: &str) -> Option<String> {
        let uri = uri.trim();
        if uri.is_empty() {
            return None;
        }
        if let Some(path) = uri.strip_prefix("ipfs://") {
            let path = path.strip_prefix("ipfs/").unwrap_or(path);
            return Some(format!("{}/{}", self.gateway, path));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Some(uri.to_string());
        }
        if uri.contains("://") {
            return None;
        }
        // Bare content id.
        Some(format!("{}/{}", self.gateway, uri))
    }

    async fn fetch(&self, url: &str) -> Result<GrantMetadata, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<GrantMetadata>()
            .await
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    async fn resolve(&self, uri: &str) -> GrantMetadata {
        let Some(url) = self.url_for(uri) else {
            warn!(uri, "unsupported metadata uri");
            return GrantMetadata::default();
        };
        match self.fetch(&url).await {
            Ok(metadata) => {
                debug!(uri, title = %metadata.title, "metadata resolved");
                metadata
            }
            Err(e) => {
                warn!(uri, error = %e, "metadata fetch failed");
                GrantMetadata::default()
            }
        }
    }
}

/// Fill in metadata for every record that still needs it.
///
/// Each distinct URI is fetched once. Returns the number of records updated.
pub async fn resolve_records(resolver: &dyn MetadataResolver, records: &mut [EventRecord]) -> usize {
    let mut cache: HashMap<String, GrantMetadata> = HashMap::new();
    let mut updated = 0;
    for record in records.iter_mut() {
        let Some(uri) = record.event.unresolved_metadata_uri().map(str::to_string) else {
            continue;
        };
        let metadata = match cache.get(&uri) {
            Some(hit) => hit.clone(),
            None => {
                let fetched = resolver.resolve(&uri).await;
                cache.insert(uri, fetched.clone());
                fetched
            }
        };
        record.event.set_metadata(metadata);
        updated += 1;
    }
    updated
}
