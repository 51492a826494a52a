//! Embedding of resolved spec values into documentation text.
//!
//! Documentation carries directives inside HTML comments:
//!
//! ```text
//! <!-- example:/components/schemas/BLOCK_HASH -->
//! <!-- example:api/starknet_api_openrpc.json:/components/schemas/BLOCK_HASH -->
//! ```
//!
//! The body is `qualifier:pointer` (against the default spec file) or
//! `qualifier:filename:pointer`. Each directive is replaced by the compact
//! JSON of the value the pointer designates in the fully dereferenced spec.
//! Comments that don't parse as directives are left alone.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{EmbedError, ResolveError};
use crate::loader::DocumentLoader;
use crate::pipeline::resolve_document;
use crate::types::DerefOptions;

/// What a directive asks for. Only examples exist today; other qualifiers
/// are carried through unchanged and rendered the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    Example,
    Other(String),
}

impl DirectiveKind {
    pub fn parse(qualifier: &str) -> Self {
        match qualifier {
            "example" => DirectiveKind::Example,
            other => DirectiveKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DirectiveKind::Example => "example",
            DirectiveKind::Other(q) => q,
        }
    }

    /// Text that replaces the directive.
    pub fn render(&self, value: &Value) -> String {
        match self {
            DirectiveKind::Example | DirectiveKind::Other(_) => value.to_string(),
        }
    }
}

/// One directive found in a text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Spec file to resolve against; `None` means the caller's default.
    pub filename: Option<String>,
    /// JSON Pointer into the dereferenced spec.
    pub pointer: String,
    /// The exact matched text, comment delimiters included.
    pub raw_text: String,
    /// Byte offset of `raw_text` in the source.
    pub source_offset: usize,
}

impl Directive {
    /// The file this directive resolves against.
    pub fn file<'a>(&'a self, default_file: &'a str) -> &'a str {
        self.filename.as_deref().unwrap_or(default_file)
    }
}

/// HTML comments, non-greedy so adjacent comments stay separate.
///
/// Compiled once; the pattern is a literal, so the `expect` cannot fire at
/// runtime.
fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // pattern is a literal
        Regex::new(r"(?s)<!--(?P<body>.*?)-->").expect("comment pattern is valid")
    })
}

/// Split a comment body into `(kind, filename, pointer)`.
///
/// Returns `None` for bodies with fewer than two fields or whose pointer is
/// not a JSON Pointer; those are ordinary comments.
pub fn parse_directive_body(body: &str) -> Option<(DirectiveKind, Option<String>, String)> {
    let fields: Vec<&str> = body.trim().split(':').collect();
    let (qualifier, filename, pointer) = match fields.as_slice() {
        [] | [_] => return None,
        [qualifier, pointer] => (*qualifier, None, *pointer),
        [qualifier, middle @ .., pointer] => (*qualifier, Some(middle.join(":")), *pointer),
    };

    let qualifier = qualifier.trim();
    let pointer = pointer.trim();
    if qualifier.is_empty() || !pointer.starts_with('/') {
        return None;
    }
    let filename = filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());

    Some((DirectiveKind::parse(qualifier), filename, pointer.to_string()))
}

/// Every well-formed directive in `text`, in source order.
pub fn find_directives(text: &str) -> Vec<Directive> {
    comment_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.name("body")?.as_str();
            let (kind, filename, pointer) = parse_directive_body(body)?;
            Some(Directive {
                kind,
                filename,
                pointer,
                raw_text: whole.as_str().to_string(),
                source_offset: whole.start(),
            })
        })
        .collect()
}

/// Result of rewriting one text body.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub text: String,
    /// Number of directives substituted.
    pub embedded: usize,
    /// Directives left untouched, with the reason.
    pub failures: Vec<(Directive, EmbedError)>,
}

impl EmbedOutcome {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves directives against dereferenced spec files.
///
/// Each spec file is loaded, merged and dereferenced at most once per
/// resolver, however many directives or texts point at it.
pub struct EmbeddingResolver {
    loader: DocumentLoader,
    options: DerefOptions,
    resolved: Mutex<HashMap<String, Arc<OnceCell<Arc<Value>>>>>,
}

impl EmbeddingResolver {
    pub fn new(loader: DocumentLoader) -> Self {
        Self::with_options(loader, DerefOptions::new())
    }

    pub fn with_options(loader: DocumentLoader, options: DerefOptions) -> Self {
        Self {
            loader,
            options,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Replace every directive in `text` with its resolved value.
    ///
    /// Directives whose file or pointer cannot be resolved keep their
    /// original text and are listed in `failures`; the rest of the text is
    /// still processed.
    pub async fn resolve_embeddings(&self, text: &str, default_file: &str) -> EmbedOutcome {
        let directives = find_directives(text);
        debug!(count = directives.len(), "found embedding directives");

        let files: BTreeSet<String> = directives
            .iter()
            .map(|d| d.file(default_file).to_string())
            .collect();
        let docs = join_all(files.iter().map(|file| self.document(file))).await;
        let docs: HashMap<String, Result<Arc<Value>, Arc<ResolveError>>> =
            files.into_iter().zip(docs).collect();

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut embedded = 0;
        let mut failures = Vec::new();

        for directive in directives {
            let file = directive.file(default_file).to_string();
            let rendered = match docs.get(file.as_str()) {
                Some(Ok(doc)) => match doc.pointer(&directive.pointer) {
                    Some(value) => Ok(directive.kind.render(value)),
                    None => Err(EmbedError::PointerNotFound {
                        file,
                        pointer: directive.pointer.clone(),
                    }),
                },
                Some(Err(e)) => Err(EmbedError::File {
                    file,
                    source: e.clone(),
                }),
                None => continue,
            };

            match rendered {
                Ok(replacement) => {
                    let start = directive.source_offset;
                    out.push_str(&text[cursor..start]);
                    out.push_str(&replacement);
                    cursor = start + directive.raw_text.len();
                    embedded += 1;
                }
                Err(e) => {
                    warn!(directive = %directive.raw_text, error = %e, "directive not embedded");
                    failures.push((directive, e));
                }
            }
        }
        out.push_str(&text[cursor..]);

        EmbedOutcome {
            text: out,
            embedded,
            failures,
        }
    }

    /// The merged and dereferenced document for `file`, memoized.
    async fn document(&self, file: &str) -> Result<Arc<Value>, Arc<ResolveError>> {
        let cell = {
            let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
            resolved.entry(file.to_string()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            resolve_document(&self.loader, file, &self.options)
                .await
                .map(Arc::new)
        })
        .await
        .cloned()
        .map_err(Arc::new)
    }
}

impl std::fmt::Debug for EmbeddingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingResolver")
            .field("loader", &self.loader)
            .field("options", &self.options)
            .finish()
    }
}
