//! Detection of component names defined in more than one spec file.
//!
//! Component maps of many documents are folded into one [`OriginMap`] per
//! component type. The first document that defines a name (with a
//! non-reference value) owns it; every later definition is reported as a
//! [`DuplicateComponent`]. Pure `$ref` entries neither count as duplicates
//! nor claim a name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{DuplicateComponent, LoadError};
use crate::loader::DocumentLoader;
use crate::types::{component_entries, is_reference};

/// Component type → name → identifier of the first defining document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OriginMap {
    origins: BTreeMap<String, BTreeMap<String, String>>,
}

impl OriginMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the components of `doc`, returning the duplicates it introduced.
    ///
    /// Existing entries are never overwritten.
    pub fn add_components(&mut self, origin: &str, doc: &Value) -> Vec<DuplicateComponent> {
        let mut duplicates = Vec::new();

        for (kind, name, value) in component_entries(doc) {
            if is_reference(value) {
                continue;
            }
            let bucket = self.origins.entry(kind.to_string()).or_default();
            match bucket.get(name) {
                Some(first) => duplicates.push(DuplicateComponent {
                    name: name.to_string(),
                    component_type: kind.to_string(),
                    first_origin: first.clone(),
                    this_origin: origin.to_string(),
                }),
                None => {
                    bucket.insert(name.to_string(), origin.to_string());
                }
            }
        }

        duplicates
    }

    /// The document that first defined `name` under `component_type`.
    pub fn origin(&self, component_type: &str, name: &str) -> Option<&str> {
        self.origins
            .get(component_type)?
            .get(name)
            .map(String::as_str)
    }

    /// Number of claimed names across all component types.
    pub fn len(&self) -> usize {
        self.origins.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a uniqueness scan.
#[derive(Debug, Default)]
pub struct UniquenessReport {
    pub origins: OriginMap,
    pub duplicates: Vec<DuplicateComponent>,
    /// Documents that could not be loaded; the scan continued without them.
    pub failures: Vec<(String, LoadError)>,
}

impl UniquenessReport {
    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }

    /// Duplicates plus unreadable documents.
    pub fn problem_count(&self) -> usize {
        self.duplicates.len() + self.failures.len()
    }

    pub fn is_ok(&self) -> bool {
        self.problem_count() == 0
    }
}

/// Fold already-loaded documents, in the order given.
pub fn check_uniqueness<'a, I>(docs: I) -> UniquenessReport
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut report = UniquenessReport::default();
    for (origin, doc) in docs {
        let found = report.origins.add_components(origin, doc);
        for dup in &found {
            warn!("{}", dup);
        }
        report.duplicates.extend(found);
    }
    report
}

/// Load every identifier concurrently, then fold them in the order given.
///
/// A document that fails to load is recorded in `failures` and skipped.
pub async fn check_uniqueness_of(loader: &DocumentLoader, ids: &[String]) -> UniquenessReport {
    let loads = join_all(ids.iter().map(|id| loader.load(id))).await;

    let mut loaded = Vec::new();
    let mut failures = Vec::new();
    for (id, result) in ids.iter().zip(loads) {
        match result {
            Ok(doc) => loaded.push((id.as_str(), doc)),
            Err(e) => {
                warn!(file = %id, error = %e, "skipping unreadable spec file");
                failures.push((id.clone(), e));
            }
        }
    }

    let mut report = check_uniqueness(loaded.iter().map(|(id, doc)| (*id, doc.as_ref())));
    report.failures = failures;
    report
}

/// JSON files directly inside `dir`, sorted, minus any whose file name is in
/// `exclude`.
pub fn collect_spec_files(dir: &Path, exclude: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }
        let excluded = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| exclude.iter().any(|x| x == n))
            .unwrap_or(false);
        if !excluded {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
