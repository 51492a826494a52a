//! Core types shared by the loader, merger and dereferencer.

use serde_json::{Map, Value};

/// Key carrying a reference target.
pub const REF_KEY: &str = "$ref";

/// Marks a reference target as internal to the current document.
pub const FRAGMENT_MARKER: char = '#';

/// Top-level key holding component buckets (`schemas`, `errors`, ...).
pub const COMPONENTS_KEY: &str = "components";

/// Returns the `$ref` target if `value` is a reference node.
pub fn ref_target(value: &Value) -> Option<&str> {
    value.as_object()?.get(REF_KEY)?.as_str()
}

/// A pure reference entry never claims a component name.
pub fn is_reference(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.contains_key(REF_KEY))
        .unwrap_or(false)
}

/// Returns true for targets that point within the same document.
pub fn is_internal(target: &str) -> bool {
    target.starts_with(FRAGMENT_MARKER)
}

/// The `components` map of a document, if present.
pub fn components(doc: &Value) -> Option<&Map<String, Value>> {
    doc.get(COMPONENTS_KEY)?.as_object()
}

/// Iterate `(component_type, name, value)` over every component bucket.
///
/// Buckets that are not objects are skipped.
pub fn component_entries(doc: &Value) -> impl Iterator<Item = (&str, &str, &Value)> {
    components(doc).into_iter().flat_map(|buckets| {
        buckets.iter().flat_map(|(kind, bucket)| {
            bucket
                .as_object()
                .into_iter()
                .flat_map(move |entries| {
                    entries
                        .iter()
                        .map(move |(name, value)| (kind.as_str(), name.as_str(), value))
                })
        })
    })
}

/// A reference target living in another document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalRef {
    /// File identifier as written in the reference (relative to the referrer).
    pub file: String,
    /// JSON Pointer inside that file, without the leading `#`.
    /// `None` means the whole document.
    pub fragment: Option<String>,
}

impl ExternalRef {
    /// Split an external target into file and fragment.
    ///
    /// Returns `None` for internal targets (starting with `#`).
    pub fn parse(target: &str) -> Option<Self> {
        if is_internal(target) || target.is_empty() {
            return None;
        }
        let (file, fragment) = match target.find(FRAGMENT_MARKER) {
            Some(idx) => (&target[..idx], Some(&target[idx + 1..])),
            None => (target, None),
        };
        Some(Self {
            file: file.to_string(),
            fragment: fragment.filter(|f| !f.is_empty()).map(str::to_string),
        })
    }

    /// The same target rewritten as an internal reference.
    pub fn internal_target(&self) -> Option<String> {
        self.fragment
            .as_ref()
            .map(|f| format!("{}{}", FRAGMENT_MARKER, f))
    }
}

/// Resolve `relative` against the identifier of the document containing it.
///
/// URLs and absolute paths are returned as-is (after dot-segment cleanup);
/// anything else is joined to the directory of `base`.
pub fn join_identifier(base: &str, relative: &str) -> String {
    if crate::loader::is_url(relative) || relative.starts_with('/') {
        return normalize_identifier(relative);
    }
    let dir = match base.rfind('/') {
        Some(idx) => &base[..=idx],
        None => "",
    };
    normalize_identifier(&format!("{}{}", dir, relative))
}

/// Collapse `.` and `..` segments without touching the filesystem.
///
/// Sources may be in-memory, so canonicalization is purely lexical.
pub fn normalize_identifier(id: &str) -> String {
    // Keep "scheme://host" intact for URLs
    let (prefix, path) = match id.find("://") {
        Some(idx) => {
            let after = idx + 3;
            match id[after..].find('/') {
                Some(slash) => id.split_at(after + slash),
                None => return id.to_string(),
            }
        }
        None => ("", id),
    };

    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("{}/{}", prefix, joined)
    } else {
        format!("{}{}", prefix, joined)
    }
}

/// What to do when a `$ref` target does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingPolicy {
    /// Abort the dereferencing pass with `DanglingReference`.
    #[default]
    Fail,
    /// Leave the reference node in place and keep going.
    Skip,
}

/// Options for a dereferencing pass.
#[derive(Debug, Clone, Default)]
pub struct DerefOptions {
    pub dangling: DanglingPolicy,
    /// Fragments known to be self-referential. References to them are kept
    /// as placeholders instead of being expanded.
    pub seeds: Vec<String>,
}

impl DerefOptions {
    /// Fail on dangling references, no seeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip dangling references instead of failing the pass.
    pub fn skip_dangling(mut self, skip: bool) -> Self {
        self.dangling = if skip {
            DanglingPolicy::Skip
        } else {
            DanglingPolicy::Fail
        };
        self
    }

    /// Pre-seed a recursive fragment. Accepts `#/a/b` or `/a/b`.
    pub fn seed(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        let key = if is_internal(&fragment) {
            fragment
        } else {
            format!("{}{}", FRAGMENT_MARKER, fragment)
        };
        self.seeds.push(key);
        self
    }
}
