//! OpenRPC reference tooling
//!
//! Resolves `$ref` pointers across a set of OpenRPC / JSON-Schema documents
//! split over several files.
//!
//! This library merges externally referenced components into a host
//! document, expands every reference without looping on recursive schemas,
//! checks that component names are unique across files, and splices
//! resolved fragments into Markdown through comment directives.
//!
//! # Example
//!
//! ```
//! use openrpc_refs::{resolve_document, DerefOptions, DocumentLoader, MemorySource};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = MemorySource::new()
//!     .with_json("api.json", &json!({
//!         "info": { "version": "0.1.0" },
//!         "components": {
//!             "schemas": {
//!                 "FELT": { "$ref": "./common.json#/components/schemas/FELT" }
//!             }
//!         }
//!     }))
//!     .with_json("common.json", &json!({
//!         "components": { "schemas": { "FELT": { "type": "string" } } }
//!     }));
//!
//! let loader = DocumentLoader::new(source);
//! let doc = resolve_document(&loader, "api.json", &DerefOptions::new()).await.unwrap();
//! assert_eq!(doc["components"]["schemas"]["FELT"], json!({ "type": "string" }));
//! # }
//! ```
//!
//! # Embedding directives
//!
//! A Markdown comment of the form
//! ```text
//! <!-- example:api.json:/components/schemas/FELT -->
//! ```
//! is replaced by the compact JSON of the addressed fragment. The file
//! field may be omitted (`<!-- example:/components/schemas/FELT -->`), in
//! which case the default spec file is used.

mod deref;
mod embed;
mod error;
mod harvest;
mod loader;
mod merge;
mod pipeline;
mod types;
mod unique;
mod validator;

pub use deref::{deref_all, deref_with_cache, ResolutionCache};
pub use embed::{
    find_directives, parse_directive_body, Directive, DirectiveKind, EmbedOutcome,
    EmbeddingResolver,
};
pub use error::{
    DuplicateComponent, EmbedError, LoadError, ResolveError, SchemaError, ValidateError,
};
pub use harvest::{collect_external_refs, harvest_external_refs, target_files, HarvestedRef};
pub use loader::{
    format_document, is_url, load_document_str, navigate_fragment, AutoSource, ContentSource,
    DocumentLoader, FileSource, MemorySource,
};
pub use merge::{merge_components, merge_external};
pub use pipeline::{resolve_checked, resolve_document};
pub use types::{
    join_identifier, normalize_identifier, DanglingPolicy, DerefOptions, ExternalRef,
};
pub use unique::{
    check_uniqueness, check_uniqueness_of, collect_spec_files, OriginMap, UniquenessReport,
};
pub use validator::{
    check_version, document_meta_schema, document_version, read_manifest_version,
    validate_document,
};

#[cfg(feature = "remote")]
pub use loader::HttpSource;
