//! OpenAPI document model: lightweight typed envelopes over the parts the
//! merge acts on (paths, definitions/schemas, parameters), with everything
//! else passed through untouched via flattened extension maps.
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::Result;

mod merge;
mod v2;
mod v3;

pub use merge::strip_empty_defaults;
pub use v2::{Info, SwaggerSpec};
pub use v3::{v2_to_v3, Components, OpenApiV3Spec};

/// Which OpenAPI flavor a document (or endpoint) speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecVersion {
    /// Swagger 2.0
    V2,
    /// OpenAPI 3.x
    V3,
}

impl SpecVersion {
    /// Path a service publishes this spec version under, also the default
    /// path the aggregated endpoint is mounted at.
    pub fn default_path(&self) -> &'static str {
        match self {
            SpecVersion::V2 => "/openapi/v2",
            SpecVersion::V3 => "/openapi/v3",
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecVersion::V2 => f.write_str("v2"),
            SpecVersion::V3 => f.write_str("v3"),
        }
    }
}

/// A mergeable OpenAPI document of one version.
///
/// Implemented by [`SwaggerSpec`] and [`OpenApiV3Spec`]; the version services
/// are generic over this so the v2 and v3 pipelines share one implementation.
pub trait SpecDocument:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The flavor this document type models.
    const VERSION: SpecVersion;

    /// An empty-but-valid document, used to seed cache slots.
    fn empty() -> Self;

    /// Parse a downloaded body.
    fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Build this document type from the aggregator's locally-authored
    /// v2-shaped document (the v3 implementation converts it).
    fn from_local(local: SwaggerSpec) -> Self;

    /// Clone with paths/definitions/parameters cleared; the merge base.
    fn base(&self) -> Self;

    /// Fold `other`'s contents into `self`.
    ///
    /// Path collisions are skipped (first writer wins); colliding
    /// definitions/parameters are renamed and all `$ref`s pointing at them
    /// rewritten. `service` is only used for diagnostics.
    fn merge_from(&mut self, service: &str, other: &Self) -> Result<()>;
}
