//! Document loading from various sources.
//!
//! A [`ContentSource`] fetches raw text for an identifier (file path, URL, or
//! an in-memory key). [`DocumentLoader`] parses it and memoizes the result so
//! every identifier is fetched at most once per run, even when several tasks
//! ask for it at the same time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::types::FRAGMENT_MARKER;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw content provider keyed by an opaque identifier.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the text behind `id`.
    ///
    /// Fails with `LoadError::NotFound` when nothing exists under `id`.
    async fn fetch(&self, id: &str) -> Result<String, LoadError>;
}

/// Reads identifiers as filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct FileSource;

#[async_trait]
impl ContentSource for FileSource {
    async fn fetch(&self, id: &str) -> Result<String, LoadError> {
        tokio::fs::read_to_string(id).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound { id: id.to_string() }
            } else {
                LoadError::ReadError {
                    id: id.to_string(),
                    source,
                }
            }
        })
    }
}

/// Fetches identifiers as HTTP/HTTPS URLs.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl HttpSource {
    pub fn new() -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| LoadError::NetworkError {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
#[async_trait]
impl ContentSource for HttpSource {
    async fn fetch(&self, id: &str) -> Result<String, LoadError> {
        let network = |source| LoadError::NetworkError {
            url: id.to_string(),
            source,
        };

        let response = self.client.get(id).send().await.map_err(network)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound { id: id.to_string() });
        }
        // Check for HTTP errors before reading the body
        let response = response.error_for_status().map_err(network)?;
        response.text().await.map_err(network)
    }
}

/// Routes URLs to HTTP and everything else to the filesystem.
#[derive(Debug, Clone)]
pub struct AutoSource {
    files: FileSource,
    #[cfg(feature = "remote")]
    http: Option<HttpSource>,
}

impl AutoSource {
    pub fn new() -> Self {
        Self {
            files: FileSource,
            #[cfg(feature = "remote")]
            http: HttpSource::new()
                .map_err(|e| warn!(error = %e, "HTTP client unavailable, URLs will not load"))
                .ok(),
        }
    }
}

impl Default for AutoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for AutoSource {
    async fn fetch(&self, id: &str) -> Result<String, LoadError> {
        if is_url(id) {
            #[cfg(feature = "remote")]
            {
                if let Some(http) = &self.http {
                    return http.fetch(id).await;
                }
            }
            return Err(LoadError::NotFound { id: id.to_string() });
        }
        self.files.fetch(id).await
    }
}

/// In-memory documents, counting every fetch per identifier.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, String>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document under `id`.
    pub fn with(mut self, id: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(id.into(), content.into());
        self
    }

    /// Add a JSON document under `id`.
    pub fn with_json(self, id: impl Into<String>, value: &Value) -> Self {
        self.with(id, value.to_string())
    }

    /// How many times `id` was fetched (found or not).
    pub fn fetch_count(&self, id: &str) -> usize {
        let fetches = self.fetches.lock().unwrap_or_else(|e| e.into_inner());
        fetches.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn fetch(&self, id: &str) -> Result<String, LoadError> {
        {
            let mut fetches = self.fetches.lock().unwrap_or_else(|e| e.into_inner());
            *fetches.entry(id.to_string()).or_insert(0) += 1;
        }
        // Behave like real I/O: give concurrent loaders a chance to interleave
        tokio::task::yield_now().await;
        self.files
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::NotFound { id: id.to_string() })
    }
}

/// Parses and memoizes documents by identifier.
///
/// Concurrent requests for an identifier that is not yet cached share one
/// underlying fetch. Failed loads are not cached.
pub struct DocumentLoader {
    source: Arc<dyn ContentSource>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Arc<Value>>>>>,
}

impl DocumentLoader {
    pub fn new(source: impl ContentSource + 'static) -> Self {
        Self::with_source(Arc::new(source))
    }

    pub fn with_source(source: Arc<dyn ContentSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loader over files and (with `remote`) URLs.
    pub fn auto() -> Self {
        Self::new(AutoSource::new())
    }

    /// Load and parse the document behind `id`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::NotFound` if the source has nothing under `id`,
    /// or `LoadError::ParseError` if the content isn't valid JSON.
    pub async fn load(&self, id: &str) -> Result<Arc<Value>, LoadError> {
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.entry(id.to_string()).or_default().clone()
        };

        if let Some(doc) = cell.get() {
            debug!(id, "document cache hit");
            return Ok(doc.clone());
        }

        let doc = cell
            .get_or_try_init(|| async {
                debug!(id, "fetching document");
                let content = self.source.fetch(id).await?;
                load_document_str(id, &content).map(Arc::new)
            })
            .await?;
        Ok(doc.clone())
    }

    /// The cached document for `id`, without fetching.
    pub fn cached(&self, id: &str) -> Option<Arc<Value>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(id).and_then(|cell| cell.get().cloned())
    }
}

impl std::fmt::Debug for DocumentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("DocumentLoader")
            .field("cached", &cached)
            .finish()
    }
}

/// Parse a document from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::ParseError` if the string isn't valid JSON.
pub fn load_document_str(id: &str, content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::ParseError {
        id: id.to_string(),
        source,
    })
}

/// Re-serialize a JSON document with two-space indentation and a trailing
/// newline.
pub fn format_document(id: &str, content: &str) -> Result<String, LoadError> {
    let doc = load_document_str(id, content)?;
    let mut out = serde_json::to_string_pretty(&doc).map_err(|source| LoadError::ParseError {
        id: id.to_string(),
        source,
    })?;
    out.push('\n');
    Ok(out)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Navigate a JSON Pointer fragment (e.g., "#/components/schemas/foo").
///
/// The leading `#` is optional. An empty fragment addresses the whole
/// document. `~1` and `~0` escapes are honoured.
pub fn navigate_fragment<'a>(doc: &'a Value, fragment: &str) -> Option<&'a Value> {
    let pointer = fragment.strip_prefix(FRAGMENT_MARKER).unwrap_or(fragment);
    if pointer.is_empty() {
        return Some(doc);
    }
    doc.pointer(pointer)
}
