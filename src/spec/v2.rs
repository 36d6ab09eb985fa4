//! Swagger 2.0 document envelope.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    merge::{merge_into, MergeSource, MergeTarget},
    SpecDocument, SpecVersion,
};
use crate::{Error, Result};

/// A Swagger 2.0 document, typed just enough to merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwaggerSpec {
    /// Always `"2.0"`.
    #[serde(default = "swagger_version")]
    pub swagger: String,
    /// Info block; the merge base's info seeds the aggregate.
    #[serde(default)]
    pub info: Info,
    /// Path items, opaque to the merge beyond their `$ref`s.
    #[serde(default)]
    pub paths: BTreeMap<String, Value>,
    /// Shared schema definitions, renamed on conflict.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, Value>,
    /// Shared parameters, renamed on conflict.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    /// Everything else (securityDefinitions, tags, vendor extensions, ...).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

fn swagger_version() -> String {
    "2.0".to_string()
}

impl Default for SwaggerSpec {
    fn default() -> Self {
        Self {
            swagger: swagger_version(),
            info: Info::default(),
            paths: BTreeMap::new(),
            definitions: BTreeMap::new(),
            parameters: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }
}

/// The `info` block of a spec document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// API title.
    #[serde(default)]
    pub title: String,
    /// API version string.
    #[serde(default)]
    pub version: String,
    /// Remaining info members (description, contact, ...).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl SpecDocument for SwaggerSpec {
    const VERSION: SpecVersion = SpecVersion::V2;

    fn empty() -> Self {
        Self::default()
    }

    fn from_local(local: SwaggerSpec) -> Self {
        local
    }

    fn base(&self) -> Self {
        Self {
            swagger: self.swagger.clone(),
            info: self.info.clone(),
            paths: BTreeMap::new(),
            definitions: BTreeMap::new(),
            parameters: BTreeMap::new(),
            extensions: self.extensions.clone(),
        }
    }

    fn merge_from(&mut self, service: &str, other: &Self) -> Result<()> {
        // a mismatched version marker means the backend served some other
        // flavor at the v2 path; skip it rather than poison the aggregate
        if !other.swagger.starts_with("2.") {
            return Err(Error::MergeSpec {
                name: service.to_string(),
                reason: format!("unsupported swagger version {:?}", other.swagger),
            });
        }
        merge_into(
            service,
            MergeTarget {
                paths: &mut self.paths,
                definitions: &mut self.definitions,
                parameters: &mut self.parameters,
            },
            MergeSource {
                paths: &other.paths,
                definitions: &other.definitions,
                parameters: &other.parameters,
                definition_ref_prefix: "#/definitions/",
                parameter_ref_prefix: "#/parameters/",
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_document_and_preserves_unknown_members() {
        let doc = SwaggerSpec::from_slice(
            json!({
                "swagger": "2.0",
                "info": {"title": "svc-a", "version": "1.0"},
                "paths": {"/x": {"get": {}}},
                "securityDefinitions": {"jwt": {"type": "apiKey"}}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(doc.info.title, "svc-a");
        assert!(doc.paths.contains_key("/x"));
        assert!(doc.extensions.contains_key("securityDefinitions"));

        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(out.pointer("/securityDefinitions/jwt/type").unwrap(), "apiKey");
    }

    #[test]
    fn refuses_to_merge_a_non_v2_document() {
        let mut target = SwaggerSpec::empty();
        let mut wrong = SwaggerSpec::empty();
        wrong.swagger = "3.0.0".into();
        wrong.paths.insert("/x".into(), json!({}));
        let err = target.merge_from("svc", &wrong).unwrap_err();
        assert!(matches!(err, crate::Error::MergeSpec { .. }));
        assert!(target.paths.is_empty());
    }

    #[test]
    fn base_keeps_info_and_clears_content() {
        let mut doc = SwaggerSpec::empty();
        doc.info.title = "aggregated".into();
        doc.paths.insert("/x".into(), json!({}));
        doc.definitions.insert("T".into(), json!({}));
        let base = doc.base();
        assert_eq!(base.info.title, "aggregated");
        assert!(base.paths.is_empty());
        assert!(base.definitions.is_empty());
    }
}
