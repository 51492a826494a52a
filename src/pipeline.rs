//! Load → harvest → merge → dereference for a single document.

use serde_json::Value;
use tracing::debug;

use crate::deref::deref_all;
use crate::error::{ResolveError, ValidateError};
use crate::harvest::harvest_external_refs;
use crate::loader::DocumentLoader;
use crate::merge::merge_external;
use crate::types::DerefOptions;
use crate::validator::check_version;

/// Produce the fully expanded form of the document behind `id`.
///
/// # Errors
///
/// Fails if `id` or any file it references cannot be loaded, or (under
/// `DanglingPolicy::Fail`) if a reference target does not exist.
pub async fn resolve_document(
    loader: &DocumentLoader,
    id: &str,
    options: &DerefOptions,
) -> Result<Value, ResolveError> {
    let doc = loader.load(id).await?;
    let refs = harvest_external_refs(&doc);
    debug!(id, external = refs.len(), "harvested external references");

    let merged = merge_external(loader, id, (*doc).clone(), &refs).await?;
    deref_all(&merged, options)
}

/// Like [`resolve_document`], but first checks `info.version` against
/// `expected_version` and fails before any resolution work on mismatch.
pub async fn resolve_checked(
    loader: &DocumentLoader,
    id: &str,
    options: &DerefOptions,
    expected_version: Option<&str>,
) -> Result<Value, ValidateError> {
    if let Some(expected) = expected_version {
        let doc = loader.load(id).await.map_err(ResolveError::from)?;
        check_version(&doc, expected)?;
    }
    Ok(resolve_document(loader, id, options).await?)
}
