//! Cycle-safe `$ref` expansion within a single document.
//!
//! Every internal reference is replaced by its target, recursively. A
//! [`ResolutionCache`] maps fragment paths to their state:
//!
//! | Slot | Meaning | On encounter |
//! |------|---------|--------------|
//! | `Pending` | being expanded higher up | becomes `Recursive`, ref kept |
//! | `Recursive` | part of a cycle (or seeded) | ref kept as placeholder |
//! | `Resolved` | fully expanded | cached value substituted |
//!
//! References to recursive fragments therefore survive as stable
//! placeholders, which makes expansion terminate and keeps it idempotent.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::harvest::escape_token;
use crate::loader::navigate_fragment;
use crate::types::{is_internal, DanglingPolicy, DerefOptions, COMPONENTS_KEY, REF_KEY};

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Pending,
    Recursive,
    Resolved(Value),
}

/// Fragment path → resolution state for one dereferencing pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    slots: HashMap<String, Slot>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache where every fragment in `fragments` is known to be recursive.
    pub fn seeded<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cache = Self::new();
        for fragment in fragments {
            cache.seed(fragment);
        }
        cache
    }

    /// Mark `fragment` (e.g. `#/components/errors/E`) as recursive.
    pub fn seed(&mut self, fragment: impl Into<String>) {
        self.slots.insert(fragment.into(), Slot::Recursive);
    }

    pub fn is_recursive(&self, fragment: &str) -> bool {
        matches!(self.slots.get(fragment), Some(Slot::Recursive))
    }

    /// The expanded value of `fragment`, if it has been resolved.
    pub fn resolved(&self, fragment: &str) -> Option<&Value> {
        match self.slots.get(fragment) {
            Some(Slot::Resolved(value)) => Some(value),
            _ => None,
        }
    }

    /// Fragments kept as placeholders, sorted.
    pub fn recursive_fragments(&self) -> Vec<&str> {
        let mut fragments: Vec<&str> = self
            .slots
            .iter()
            .filter(|(_, slot)| **slot == Slot::Recursive)
            .map(|(k, _)| k.as_str())
            .collect();
        fragments.sort_unstable();
        fragments
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Replace every reference in `doc` with its target.
///
/// Components are expanded first, in document order, then the rest of the
/// document. The cache is seeded from `options.seeds`.
///
/// # Errors
///
/// Returns `ResolveError::DanglingReference` for a missing target when
/// `options.dangling` is `Fail`.
pub fn deref_all(doc: &Value, options: &DerefOptions) -> Result<Value, ResolveError> {
    let mut cache = ResolutionCache::seeded(options.seeds.iter().cloned());
    deref_with_cache(doc, options.dangling, &mut cache)
}

/// Like [`deref_all`], with a caller-owned cache that outlives the pass.
pub fn deref_with_cache(
    doc: &Value,
    dangling: DanglingPolicy,
    cache: &mut ResolutionCache,
) -> Result<Value, ResolveError> {
    let mut pass = Pass {
        doc,
        dangling,
        cache,
    };
    let mut out = doc.clone();

    if let Some(buckets) = out.get_mut(COMPONENTS_KEY).and_then(Value::as_object_mut) {
        for (kind, bucket) in buckets.iter_mut() {
            let Some(entries) = bucket.as_object_mut() else {
                continue;
            };
            for (name, value) in entries.iter_mut() {
                let fragment = format!(
                    "#/{}/{}/{}",
                    COMPONENTS_KEY,
                    escape_token(kind),
                    escape_token(name)
                );
                let expanded = pass.expand(&fragment, value)?;
                *value = expanded;
            }
        }
    }

    if let Some(root) = out.as_object_mut() {
        for (key, value) in root.iter_mut() {
            if key != COMPONENTS_KEY {
                pass.walk(value)?;
            }
        }
    } else {
        pass.walk(&mut out)?;
    }

    Ok(out)
}

struct Pass<'a> {
    doc: &'a Value,
    dangling: DanglingPolicy,
    cache: &'a mut ResolutionCache,
}

impl Pass<'_> {
    /// Expand the value found at `fragment`, caching the result unless the
    /// fragment turned out to be recursive.
    fn expand(&mut self, fragment: &str, target: &Value) -> Result<Value, ResolveError> {
        if let Some(value) = self.cache.resolved(fragment) {
            return Ok(value.clone());
        }

        let fresh = !self.cache.slots.contains_key(fragment);
        if fresh {
            self.cache.slots.insert(fragment.to_string(), Slot::Pending);
        }

        let mut value = target.clone();
        if let Err(e) = self.walk(&mut value) {
            if fresh {
                self.cache.slots.remove(fragment);
            }
            return Err(e);
        }

        if let Some(slot) = self.cache.slots.get_mut(fragment) {
            if *slot == Slot::Pending {
                *slot = Slot::Resolved(value.clone());
            } else {
                debug!(fragment, "recursive fragment kept as placeholder");
            }
        }
        Ok(value)
    }

    /// The value replacing a reference node, or `None` to keep the node.
    fn resolve_ref(&mut self, target: &str) -> Result<Option<Value>, ResolveError> {
        if target == "#" {
            return Ok(None);
        }
        if !is_internal(target) {
            // Anything external still here was not merged
            return self.dangling(target);
        }

        match self.cache.slots.get(target) {
            Some(Slot::Resolved(value)) => return Ok(Some(value.clone())),
            Some(Slot::Recursive) => return Ok(None),
            Some(Slot::Pending) => {
                self.cache.seed(target);
                return Ok(None);
            }
            None => {}
        }

        let doc = self.doc;
        let Some(found) = navigate_fragment(doc, target) else {
            return self.dangling(target);
        };
        let value = self.expand(target, found)?;
        if self.cache.is_recursive(target) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    fn dangling(&self, target: &str) -> Result<Option<Value>, ResolveError> {
        match self.dangling {
            DanglingPolicy::Fail => Err(ResolveError::DanglingReference {
                reference: target.to_string(),
            }),
            DanglingPolicy::Skip => {
                warn!(reference = target, "skipping dangling reference");
                Ok(None)
            }
        }
    }

    fn walk(&mut self, value: &mut Value) -> Result<(), ResolveError> {
        match value {
            Value::Object(obj) => {
                let Some(target) = obj.get(REF_KEY).and_then(Value::as_str) else {
                    for child in obj.values_mut() {
                        self.walk(child)?;
                    }
                    return Ok(());
                };
                let target = target.to_string();

                for (key, child) in obj.iter_mut() {
                    if key != REF_KEY {
                        self.walk(child)?;
                    }
                }

                match self.resolve_ref(&target)? {
                    None => {}
                    Some(resolved) if obj.len() == 1 => *value = resolved,
                    Some(Value::Object(resolved)) => {
                        obj.remove(REF_KEY);
                        // Sibling keys of the reference take precedence
                        for (k, v) in resolved {
                            obj.entry(k).or_insert(v);
                        }
                    }
                    Some(other) => *value = other,
                }
            }
            Value::Array(arr) => {
                for item in arr {
                    self.walk(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
