//! Discovery of references that point into other documents.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::types::{component_entries, join_identifier, ref_target, ExternalRef, REF_KEY};

/// A component entry whose whole value is an external reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedRef {
    pub component_type: String,
    pub name: String,
    pub target: ExternalRef,
}

/// Find component entries that are references into other files.
///
/// Only direct entries of each `components.<type>` bucket are examined.
/// Internal targets (`#/...`) are left to the dereferencer. Results are in
/// document order.
pub fn harvest_external_refs(doc: &Value) -> Vec<HarvestedRef> {
    component_entries(doc)
        .filter_map(|(kind, name, value)| {
            let target = ExternalRef::parse(ref_target(value)?)?;
            Some(HarvestedRef {
                component_type: kind.to_string(),
                name: name.to_string(),
                target,
            })
        })
        .collect()
}

/// Every external `$ref` anywhere in `value`, with the JSON Pointer of the
/// node holding it.
pub fn collect_external_refs(value: &Value) -> Vec<(String, ExternalRef)> {
    let mut found = Vec::new();
    collect_inner(value, "", &mut found);
    found
}

fn collect_inner(value: &Value, path: &str, found: &mut Vec<(String, ExternalRef)>) {
    match value {
        Value::Object(map) => {
            if let Some(target) = map.get(REF_KEY).and_then(Value::as_str) {
                if let Some(external) = ExternalRef::parse(target) {
                    found.push((path.to_string(), external));
                }
            }
            for (key, child) in map {
                let child_path = format!("{}/{}", path, escape_token(key));
                collect_inner(child, &child_path, found);
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                let child_path = format!("{}/{}", path, i);
                collect_inner(item, &child_path, found);
            }
        }
        _ => {}
    }
}

/// Distinct file identifiers targeted by `refs`, resolved against `base_id`.
///
/// Sorted lexicographically; this is the merge order.
pub fn target_files<'a>(
    base_id: &str,
    refs: impl IntoIterator<Item = &'a ExternalRef>,
) -> BTreeSet<String> {
    refs.into_iter()
        .map(|r| join_identifier(base_id, &r.file))
        .collect()
}

/// Escape a key for use as a JSON Pointer token (RFC 6901).
pub(crate) fn escape_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
