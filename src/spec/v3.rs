//! OpenAPI 3.x document envelope and the v2 -> v3 structural conversion
//! used for the locally-authored aggregator document.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    merge::{merge_into, replace_ref_prefix, MergeSource, MergeTarget},
    v2::{Info, SwaggerSpec},
    SpecDocument, SpecVersion,
};
use crate::{Error, Result};

/// An OpenAPI 3.x document, typed just enough to merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenApiV3Spec {
    /// OpenAPI version marker.
    #[serde(default = "openapi_version")]
    pub openapi: String,
    /// Info block; the merge base's info seeds the aggregate.
    #[serde(default)]
    pub info: Info,
    /// Path items.
    #[serde(default)]
    pub paths: BTreeMap<String, Value>,
    /// Reusable components (schemas and parameters are merge-managed).
    #[serde(default, skip_serializing_if = "Components::is_empty")]
    pub components: Components,
    /// Everything else (servers, security, vendor extensions, ...).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

fn openapi_version() -> String {
    "3.0.3".to_string()
}

impl Default for OpenApiV3Spec {
    fn default() -> Self {
        Self {
            openapi: openapi_version(),
            info: Info::default(),
            paths: BTreeMap::new(),
            components: Components::default(),
            extensions: BTreeMap::new(),
        }
    }
}

/// The `components` object of an OpenAPI 3.x document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    /// Schema components, renamed on conflict.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, Value>,
    /// Parameter components, renamed on conflict.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    /// Remaining component kinds (responses, securitySchemes, ...).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Components {
    /// True when no component of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.parameters.is_empty() && self.extensions.is_empty()
    }
}

impl SpecDocument for OpenApiV3Spec {
    const VERSION: SpecVersion = SpecVersion::V3;

    fn empty() -> Self {
        Self::default()
    }

    fn from_local(local: SwaggerSpec) -> Self {
        v2_to_v3(&local)
    }

    fn base(&self) -> Self {
        Self {
            openapi: self.openapi.clone(),
            info: self.info.clone(),
            paths: BTreeMap::new(),
            components: Components {
                schemas: BTreeMap::new(),
                parameters: BTreeMap::new(),
                extensions: self.components.extensions.clone(),
            },
            extensions: self.extensions.clone(),
        }
    }

    fn merge_from(&mut self, service: &str, other: &Self) -> Result<()> {
        if !other.openapi.starts_with("3.") {
            return Err(Error::MergeSpec {
                name: service.to_string(),
                reason: format!("unsupported openapi version {:?}", other.openapi),
            });
        }
        merge_into(
            service,
            MergeTarget {
                paths: &mut self.paths,
                definitions: &mut self.components.schemas,
                parameters: &mut self.components.parameters,
            },
            MergeSource {
                paths: &other.paths,
                definitions: &other.components.schemas,
                parameters: &other.components.parameters,
                definition_ref_prefix: "#/components/schemas/",
                parameter_ref_prefix: "#/components/parameters/",
            },
        );
        Ok(())
    }
}

/// Convert a v2-shaped document into the v3 shape.
///
/// Structural conversion only: definitions become component schemas,
/// top-level parameters become component parameters, and every `$ref` is
/// rewritten to the component convention. Path item internals are carried
/// over as-is apart from their references.
pub fn v2_to_v3(spec: &SwaggerSpec) -> OpenApiV3Spec {
    let rewrite = |value: &Value| {
        let mut value = value.clone();
        replace_ref_prefix(&mut value, "#/definitions/", "#/components/schemas/");
        replace_ref_prefix(&mut value, "#/parameters/", "#/components/parameters/");
        value
    };

    OpenApiV3Spec {
        openapi: openapi_version(),
        info: spec.info.clone(),
        paths: spec.paths.iter().map(|(k, v)| (k.clone(), rewrite(v))).collect(),
        components: Components {
            schemas: spec
                .definitions
                .iter()
                .map(|(k, v)| (k.clone(), rewrite(v)))
                .collect(),
            parameters: spec
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), rewrite(v)))
                .collect(),
            extensions: BTreeMap::new(),
        },
        extensions: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_definitions_to_component_schemas() {
        let v2 = SwaggerSpec::from_slice(
            json!({
                "swagger": "2.0",
                "info": {"title": "local", "version": "1.0"},
                "paths": {
                    "/x": {"get": {"responses": {"200": {"schema": {"$ref": "#/definitions/Thing"}}}}}
                },
                "definitions": {"Thing": {"$ref": "#/definitions/Other"}, "Other": {"type": "object"}}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let v3 = v2_to_v3(&v2);
        assert_eq!(v3.openapi, "3.0.3");
        assert_eq!(v3.info.title, "local");
        assert_eq!(
            v3.paths["/x"].pointer("/get/responses/200/schema/$ref").unwrap(),
            "#/components/schemas/Thing"
        );
        assert_eq!(
            v3.components.schemas["Thing"].pointer("/$ref").unwrap(),
            "#/components/schemas/Other"
        );
    }

    #[test]
    fn empty_components_are_omitted_from_serialization() {
        let doc = OpenApiV3Spec::empty();
        let out = serde_json::to_value(&doc).unwrap();
        assert!(out.get("components").is_none());
        assert_eq!(out["openapi"], "3.0.3");
    }
}
