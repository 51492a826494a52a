//! Cross-file merging of component definitions.
//!
//! Every file reachable through external references is fetched, its
//! `components` buckets are folded into the host document, and references
//! into those files are rewritten so the host is self-contained:
//!
//! | Target | Rewritten to |
//! |--------|--------------|
//! | `file.json#/components/<type>/<name>...` | `#/components/<type>/<name>...` |
//! | `file.json#/anything/else` | inlined value |
//! | `file.json` | inlined document |
//!
//! Merge order is lexicographic by resolved file identifier, breadth-first by
//! discovery depth. On a name collision the file merged last wins.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::harvest::{collect_external_refs, escape_token, target_files, HarvestedRef};
use crate::loader::{navigate_fragment, DocumentLoader};
use crate::types::{
    components, is_internal, is_reference, join_identifier, ref_target, ExternalRef,
    COMPONENTS_KEY, FRAGMENT_MARKER, REF_KEY,
};

/// Merge every externally referenced file into `doc`.
///
/// `host_id` is the identifier `doc` was loaded from; relative file targets
/// resolve against it. `refs` seeds the set of files to fetch (normally the
/// output of [`crate::harvest_external_refs`]); nested references anywhere
/// in the document and in fetched files are followed as well.
///
/// Independent files are fetched concurrently. Any load failure aborts the
/// whole merge.
///
/// # Errors
///
/// Returns `ResolveError::Load` if a referenced file cannot be loaded, or
/// `ResolveError::InvalidDocument` if the host's `components` is not an
/// object.
pub async fn merge_external(
    loader: &DocumentLoader,
    host_id: &str,
    mut doc: Value,
    refs: &[HarvestedRef],
) -> Result<Value, ResolveError> {
    let nested = collect_external_refs(&doc);
    let mut frontier = target_files(
        host_id,
        refs.iter()
            .map(|r| &r.target)
            .chain(nested.iter().map(|(_, r)| r)),
    );
    frontier.remove(host_id);

    if frontier.is_empty() {
        return Ok(doc);
    }

    let mut seen: HashSet<String> = frontier.iter().cloned().collect();
    seen.insert(host_id.to_string());

    let mut files: BTreeMap<String, Arc<Value>> = BTreeMap::new();
    let mut merge_order: Vec<String> = Vec::new();

    while !frontier.is_empty() {
        let batch: Vec<String> = std::mem::take(&mut frontier).into_iter().collect();
        let loads = join_all(batch.iter().map(|id| loader.load(id))).await;

        for (id, loaded) in batch.into_iter().zip(loads) {
            let ext = loaded?;
            let discovered = target_files(
                &id,
                collect_external_refs(&ext).iter().map(|(_, r)| r),
            );
            for file in discovered {
                if seen.insert(file.clone()) {
                    frontier.insert(file);
                }
            }
            files.insert(id.clone(), ext);
            merge_order.push(id);
        }
    }

    files.insert(host_id.to_string(), Arc::new(doc.clone()));
    let localizer = Localizer {
        host_id,
        files: &files,
    };

    localizer.localize(&mut doc, host_id, &mut HashSet::new());

    for id in &merge_order {
        let Some(ext) = files.get(id) else { continue };
        let mut ext = (**ext).clone();
        localizer.localize(&mut ext, id, &mut HashSet::new());
        merge_components(&mut doc, &ext, host_id, id)?;
    }

    Ok(doc)
}

/// Fold every `components.<type>.<name>` of `source` into `host`.
///
/// Existing names are overwritten, except that an internal reference entry
/// (a re-export, after localization) never replaces a definition and is
/// never stored into its own slot.
pub fn merge_components(
    host: &mut Value,
    source: &Value,
    host_id: &str,
    source_id: &str,
) -> Result<(), ResolveError> {
    let Some(buckets) = components(source) else {
        return Ok(());
    };

    let invalid = |message: &str| ResolveError::InvalidDocument {
        id: host_id.to_string(),
        message: message.to_string(),
    };

    let root = host
        .as_object_mut()
        .ok_or_else(|| invalid("document root is not an object"))?;
    let host_buckets = root
        .entry(COMPONENTS_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| invalid("components is not an object"))?;

    for (kind, bucket) in buckets {
        let Some(entries) = bucket.as_object() else {
            continue;
        };
        let host_bucket = host_buckets
            .entry(kind.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| invalid(&format!("components.{} is not an object", kind)))?;

        for (name, value) in entries {
            if let Some(target) = ref_target(value).filter(|t| is_internal(t)) {
                let own = format!(
                    "{}/{}/{}/{}",
                    FRAGMENT_MARKER,
                    COMPONENTS_KEY,
                    escape_token(kind),
                    escape_token(name)
                );
                // A re-export never replaces a definition
                let defined = host_bucket.get(name).is_some_and(|e| !is_reference(e));
                if target == own || defined {
                    debug!(
                        component = %name,
                        kind = %kind,
                        source = source_id,
                        "re-exported component skipped"
                    );
                    continue;
                }
            }
            if host_bucket.insert(name.clone(), value.clone()).is_some() {
                debug!(
                    component = %name,
                    kind = %kind,
                    source = source_id,
                    "component overwritten by merge"
                );
            }
        }
    }

    Ok(())
}

/// True if `pointer` addresses something inside a named component.
fn is_component_pointer(pointer: &str) -> bool {
    pointer
        .strip_prefix("/components/")
        .map(|rest| {
            let mut parts = rest.split('/');
            matches!((parts.next(), parts.next()), (Some(kind), Some(name)) if !kind.is_empty() && !name.is_empty())
        })
        .unwrap_or(false)
}

enum Rewrite {
    Internal(String),
    Inline(Value),
    Keep,
}

struct Localizer<'a> {
    host_id: &'a str,
    files: &'a BTreeMap<String, Arc<Value>>,
}

impl Localizer<'_> {
    /// Where a `$ref` found in `base_id` actually points, as `(file, fragment)`.
    ///
    /// Internal targets in the host are left alone; internal targets in a
    /// merged file still need rewriting relative to that file.
    fn resolve_target(&self, base_id: &str, target: &str) -> Option<(String, Option<String>)> {
        // Self-root refs are recursive type definitions; leave them alone
        if target == "#" {
            return None;
        }
        if is_internal(target) {
            if base_id == self.host_id {
                return None;
            }
            let fragment = &target[FRAGMENT_MARKER.len_utf8()..];
            return Some((base_id.to_string(), Some(fragment.to_string())));
        }
        let external = ExternalRef::parse(target)?;
        Some((join_identifier(base_id, &external.file), external.fragment))
    }

    fn rewrite_for(
        &self,
        base_id: &str,
        target: &str,
        visiting: &mut HashSet<String>,
    ) -> Rewrite {
        let Some((file, fragment)) = self.resolve_target(base_id, target) else {
            return Rewrite::Keep;
        };
        let Some(doc) = self.files.get(&file) else {
            return Rewrite::Keep;
        };
        let pointer = fragment.as_deref().unwrap_or("");
        let Some(found) = navigate_fragment(doc, pointer) else {
            // Left external; the dereferencer reports it as dangling
            return Rewrite::Keep;
        };

        if is_component_pointer(pointer) {
            return Rewrite::Internal(format!("{}{}", FRAGMENT_MARKER, pointer));
        }

        let key = format!("{}{}{}", file, FRAGMENT_MARKER, pointer);
        if !visiting.insert(key.clone()) {
            return Rewrite::Keep;
        }
        let mut inlined = found.clone();
        self.localize(&mut inlined, &file, visiting);
        visiting.remove(&key);
        Rewrite::Inline(inlined)
    }

    fn localize(&self, value: &mut Value, base_id: &str, visiting: &mut HashSet<String>) {
        match value {
            Value::Object(obj) => {
                if let Some(target) = obj.get(REF_KEY).and_then(Value::as_str) {
                    let target = target.to_string();
                    match self.rewrite_for(base_id, &target, visiting) {
                        Rewrite::Internal(internal) => {
                            obj.insert(REF_KEY.to_string(), Value::String(internal));
                        }
                        Rewrite::Inline(Value::Object(inlined)) => {
                            obj.remove(REF_KEY);
                            // Sibling keys of the reference take precedence
                            for (k, v) in inlined {
                                obj.entry(k).or_insert(v);
                            }
                            return;
                        }
                        Rewrite::Inline(other) => {
                            *value = other;
                            return;
                        }
                        Rewrite::Keep => {}
                    }
                }

                for child in obj.values_mut() {
                    self.localize(child, base_id, visiting);
                }
            }
            Value::Array(arr) => {
                for item in arr {
                    self.localize(item, base_id, visiting);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::harvest_external_refs;
    use crate::loader::MemorySource;
    use serde_json::json;

    async fn merged(source: MemorySource, host_id: &str) -> Result<Value, ResolveError> {
        let loader = DocumentLoader::new(source);
        let doc = (*loader.load(host_id).await?).clone();
        let refs = harvest_external_refs(&doc);
        merge_external(&loader, host_id, doc, &refs).await
    }

    #[tokio::test]
    async fn merges_external_component() {
        let source = MemorySource::new()
            .with_json(
                "api/main.json",
                &json!({
                    "components": {
                        "schemas": {
                            "FELT": { "$ref": "./common.json#/components/schemas/FELT" }
                        }
                    }
                }),
            )
            .with_json(
                "api/common.json",
                &json!({
                    "components": {
                        "schemas": {
                            "FELT": { "type": "string", "pattern": "^0x[a-fA-F0-9]+$" },
                            "EXTRA": { "type": "integer" }
                        }
                    }
                }),
            );

        let doc = merged(source, "api/main.json").await.unwrap();
        let schemas = &doc["components"]["schemas"];
        assert_eq!(schemas["FELT"]["type"], "string");
        assert_eq!(schemas["EXTRA"]["type"], "integer");
    }

    #[tokio::test]
    async fn renamed_entry_becomes_internal_ref() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({
                    "components": {
                        "schemas": {
                            "HASH": { "$ref": "b.json#/components/schemas/FELT" }
                        }
                    }
                }),
            )
            .with_json(
                "b.json",
                &json!({ "components": { "schemas": { "FELT": { "type": "string" } } } }),
            );

        let doc = merged(source, "main.json").await.unwrap();
        assert_eq!(
            doc["components"]["schemas"]["HASH"],
            json!({ "$ref": "#/components/schemas/FELT" })
        );
        assert_eq!(doc["components"]["schemas"]["FELT"]["type"], "string");
    }

    #[tokio::test]
    async fn no_external_refs_remain_after_merge() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({
                    "methods": [
                        { "result": { "schema": { "$ref": "b.json#/components/schemas/B" } } }
                    ],
                    "components": {
                        "schemas": { "A": { "$ref": "b.json#/components/schemas/B" } }
                    }
                }),
            )
            .with_json(
                "b.json",
                &json!({
                    "components": {
                        "schemas": {
                            "B": { "properties": { "c": { "$ref": "c.json#/components/schemas/C" } } }
                        }
                    }
                }),
            )
            .with_json(
                "c.json",
                &json!({ "components": { "schemas": { "C": { "type": "boolean" } } } }),
            );

        let doc = merged(source, "main.json").await.unwrap();
        assert!(collect_external_refs(&doc).is_empty());
        assert_eq!(doc["components"]["schemas"]["C"]["type"], "boolean");
        assert_eq!(
            doc["methods"][0]["result"]["schema"],
            json!({ "$ref": "#/components/schemas/B" })
        );
    }

    #[tokio::test]
    async fn last_file_wins_in_lexicographic_order() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({
                    "components": {
                        "schemas": {
                            "X": { "$ref": "z.json#/components/schemas/X" },
                            "Y": { "$ref": "a.json#/components/schemas/Y" }
                        }
                    }
                }),
            )
            .with_json(
                "a.json",
                &json!({ "components": { "schemas": { "Y": {}, "X": { "title": "from a" } } } }),
            )
            .with_json(
                "z.json",
                &json!({ "components": { "schemas": { "X": { "title": "from z" } } } }),
            );

        let doc = merged(source, "main.json").await.unwrap();
        assert_eq!(doc["components"]["schemas"]["X"]["title"], "from z");
    }

    #[tokio::test]
    async fn later_reexport_keeps_earlier_definition() {
        let source = MemorySource::new()
            .with_json(
                "api/ws.json",
                &json!({
                    "components": {
                        "schemas": {
                            "FELT": { "$ref": "./a_api.json#/components/schemas/FELT" },
                            "TRACE": { "$ref": "./b_trace.json#/components/schemas/TRACE" }
                        }
                    }
                }),
            )
            .with_json(
                "api/a_api.json",
                &json!({ "components": { "schemas": { "FELT": { "type": "string", "pattern": "^0x" } } } }),
            )
            .with_json(
                "api/b_trace.json",
                &json!({
                    "components": {
                        "schemas": {
                            "FELT": { "$ref": "./a_api.json#/components/schemas/FELT" },
                            "TRACE": { "properties": { "f": { "$ref": "#/components/schemas/FELT" } } }
                        }
                    }
                }),
            );

        let doc = merged(source, "api/ws.json").await.unwrap();
        assert_eq!(
            doc["components"]["schemas"]["FELT"],
            json!({ "type": "string", "pattern": "^0x" })
        );
        assert_eq!(
            doc["components"]["schemas"]["TRACE"]["properties"]["f"],
            json!({ "$ref": "#/components/schemas/FELT" })
        );
    }

    #[tokio::test]
    async fn reexport_merged_first_is_replaced_by_definition() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({
                    "components": {
                        "schemas": {
                            "X": { "$ref": "./b.json#/components/schemas/X" },
                            "Y": { "$ref": "./a.json#/components/schemas/Y" }
                        }
                    }
                }),
            )
            .with_json(
                "a.json",
                &json!({ "components": { "schemas": { "X": { "$ref": "./b.json#/components/schemas/X" }, "Y": {} } } }),
            )
            .with_json(
                "b.json",
                &json!({ "components": { "schemas": { "X": { "type": "boolean" } } } }),
            );

        let doc = merged(source, "main.json").await.unwrap();
        assert_eq!(doc["components"]["schemas"]["X"], json!({ "type": "boolean" }));
    }

    #[test]
    fn reference_entry_does_not_overwrite_definition() {
        let mut host = json!({ "components": { "errors": { "E": { "code": 24 }, "F": { "code": 25 } } } });
        let source = json!({
            "components": {
                "errors": {
                    "E": { "$ref": "#/components/errors/E" },
                    "F": { "$ref": "#/components/errors/E" },
                    "G": { "$ref": "#/components/errors/E" }
                }
            }
        });
        merge_components(&mut host, &source, "host", "src").unwrap();

        assert_eq!(host["components"]["errors"]["E"], json!({ "code": 24 }));
        assert_eq!(host["components"]["errors"]["F"], json!({ "code": 25 }));
        assert_eq!(
            host["components"]["errors"]["G"],
            json!({ "$ref": "#/components/errors/E" })
        );
    }

    #[tokio::test]
    async fn whole_document_ref_is_inlined() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({ "components": { "schemas": { "Block": { "$ref": "block.json" } } } }),
            )
            .with_json("block.json", &json!({ "type": "object", "title": "Block" }));

        let doc = merged(source, "main.json").await.unwrap();
        assert_eq!(
            doc["components"]["schemas"]["Block"],
            json!({ "type": "object", "title": "Block" })
        );
    }

    #[tokio::test]
    async fn internal_refs_of_merged_file_stay_valid() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({ "components": { "schemas": { "A": { "$ref": "b.json#/components/schemas/A" } } } }),
            )
            .with_json(
                "b.json",
                &json!({
                    "definitions": { "shape": { "type": "number" } },
                    "components": {
                        "schemas": {
                            "A": {
                                "properties": {
                                    "b": { "$ref": "#/components/schemas/B" },
                                    "s": { "$ref": "#/definitions/shape" }
                                }
                            },
                            "B": { "type": "string" }
                        }
                    }
                }),
            );

        let doc = merged(source, "main.json").await.unwrap();
        let a = &doc["components"]["schemas"]["A"]["properties"];
        assert_eq!(a["b"], json!({ "$ref": "#/components/schemas/B" }));
        // Non-component target cannot survive the merge, so it is inlined
        assert_eq!(a["s"], json!({ "type": "number" }));
        assert_eq!(doc["components"]["schemas"]["B"]["type"], "string");
    }

    #[tokio::test]
    async fn missing_external_file_fails_merge() {
        let source = MemorySource::new().with_json(
            "main.json",
            &json!({ "components": { "schemas": { "A": { "$ref": "gone.json#/components/schemas/A" } } } }),
        );

        let result = merged(source, "main.json").await;
        assert!(matches!(
            result,
            Err(ResolveError::Load(crate::error::LoadError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn missing_fragment_is_left_external() {
        let source = MemorySource::new()
            .with_json(
                "main.json",
                &json!({ "components": { "schemas": { "A": { "$ref": "b.json#/components/schemas/NOPE" } } } }),
            )
            .with_json("b.json", &json!({ "components": { "schemas": {} } }));

        let doc = merged(source, "main.json").await.unwrap();
        assert_eq!(
            doc["components"]["schemas"]["A"],
            json!({ "$ref": "b.json#/components/schemas/NOPE" })
        );
    }

    #[tokio::test]
    async fn mutually_referencing_files_load_once() {
        let source = Arc::new(
            MemorySource::new()
                .with_json(
                    "main.json",
                    &json!({ "components": { "schemas": { "A": { "$ref": "b.json#/components/schemas/B" } } } }),
                )
                .with_json(
                    "b.json",
                    &json!({ "components": { "schemas": { "B": { "items": { "$ref": "c.json#/components/schemas/C" } } } } }),
                )
                .with_json(
                    "c.json",
                    &json!({ "components": { "schemas": { "C": { "items": { "$ref": "b.json#/components/schemas/B" } } } } }),
                ),
        );
        let loader = DocumentLoader::with_source(source.clone());
        let doc = (*loader.load("main.json").await.unwrap()).clone();
        let refs = harvest_external_refs(&doc);
        let doc = merge_external(&loader, "main.json", doc, &refs).await.unwrap();

        assert_eq!(source.fetch_count("b.json"), 1);
        assert_eq!(source.fetch_count("c.json"), 1);
        assert_eq!(
            doc["components"]["schemas"]["C"]["items"],
            json!({ "$ref": "#/components/schemas/B" })
        );
    }

    #[test]
    fn merge_components_creates_buckets() {
        let mut host = json!({ "info": { "version": "1" } });
        let source = json!({ "components": { "errors": { "E": { "code": 24 } } } });
        merge_components(&mut host, &source, "host", "src").unwrap();
        assert_eq!(host["components"]["errors"]["E"]["code"], 24);
    }

    #[test]
    fn merge_components_rejects_bad_host() {
        let mut host = json!({ "components": [] });
        let source = json!({ "components": { "errors": { "E": {} } } });
        let result = merge_components(&mut host, &source, "host", "src");
        assert!(matches!(result, Err(ResolveError::InvalidDocument { .. })));
    }

    #[test]
    fn component_pointer_detection() {
        assert!(is_component_pointer("/components/schemas/A"));
        assert!(is_component_pointer("/components/schemas/A/properties/x"));
        assert!(!is_component_pointer("/components/schemas"));
        assert!(!is_component_pointer("/methods/0"));
        assert!(!is_component_pointer(""));
    }
}
