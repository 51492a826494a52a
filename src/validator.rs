//! Document validation: version gate and meta-schema check.

use std::path::Path;

use serde_json::{json, Value};

use crate::error::{LoadError, ResolveError, SchemaError, ValidateError};
use crate::loader::load_document_str;

/// Minimal shape every spec document must have.
///
/// Used when no full meta-schema is supplied.
pub fn document_meta_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["info", "components"],
        "properties": {
            "info": {
                "type": "object",
                "required": ["version"],
                "properties": { "version": { "type": "string" } }
            },
            "methods": { "type": "array" },
            "components": {
                "type": "object",
                "additionalProperties": { "type": "object" }
            }
        }
    })
}

/// Validate a resolved document against a meta-schema.
///
/// # Errors
///
/// Returns `ValidateError::InvalidMetaSchema` if `meta_schema` does not
/// compile, or `ValidateError::Invalid` listing every violation.
pub fn validate_document(meta_schema: &Value, doc: &Value) -> Result<(), ValidateError> {
    let validator =
        jsonschema::validator_for(meta_schema).map_err(|e| ValidateError::InvalidMetaSchema {
            message: e.to_string(),
        })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(doc)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

/// The document's `info.version`, if it is a string.
pub fn document_version(doc: &Value) -> Option<&str> {
    doc.get("info")?.get("version")?.as_str()
}

/// Compare `info.version` with the version the manifest expects.
pub fn check_version(doc: &Value, expected: &str) -> Result<(), ValidateError> {
    let actual = document_version(doc).ok_or(ValidateError::MissingVersion)?;
    if actual == expected {
        Ok(())
    } else {
        Err(ValidateError::VersionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Read the `version` field of a JSON manifest (package.json style).
pub fn read_manifest_version(path: &Path) -> Result<String, ValidateError> {
    let id = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| {
        let err = if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::NotFound { id: id.clone() }
        } else {
            LoadError::ReadError {
                id: id.clone(),
                source,
            }
        };
        ResolveError::from(err)
    })?;

    let manifest = load_document_str(&id, &content).map_err(ResolveError::from)?;
    manifest
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ValidateError::InvalidManifest {
            path: id,
            message: "missing string field \"version\"".to_string(),
        })
}
