//! Version-specific aggregation services: per-service caches of parsed spec
//! documents, the merge, and the gzip discovery endpoint.
use std::{collections::HashMap, convert::Infallible, io::Write, sync::Arc, task::Poll};

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use http::{header, Request, Response, StatusCode};
use parking_lot::RwLock;
use tower::util::BoxCloneService;
use tracing::{debug, warn};

use crate::{
    aggregator::OpenApiAggregatorServices,
    cache::Cache,
    resource::ApiService,
    spec::{strip_empty_defaults, SpecDocument, SwaggerSpec},
    Body, Error, Result,
};

/// Name under which the aggregator's own locally-built document is registered.
pub const LOCAL_DELEGATION_NAME: &str = "kubeSphere_internal_local_delegation";

/// Registration surface owned by the embedding API server.
pub trait PathHandler {
    /// Mount `service` at `path`.
    fn handle(&mut self, path: &str, service: RouteService);
}

/// A mountable route: a cloneable tower service over this crate's [`Body`].
pub type RouteService = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Interface the watch controller drives; implemented by both version
/// services.
#[async_trait]
pub trait ApiServiceManager: Send + Sync {
    /// Register or update one service and perform its first spec fetch.
    async fn add_update_api_service(&self, svc: &ApiService) -> Result<()>;

    /// Re-download and re-parse one service's spec.
    async fn update_openapi_spec(&self, name: &str) -> Result<()>;

    /// Deregister one service and drop its cached document.
    async fn remove_api_service(&self, name: &str);
}

/// Aggregation service for one spec version.
///
/// Structurally identical for v2 and v3; only the document type (and with it
/// the merge and the local-document conversion) differs.
pub struct OpenApiVersionedService<D: SpecDocument> {
    aggregator: OpenApiAggregatorServices,
    caches: RwLock<HashMap<String, Arc<Cache<D>>>>,
}

/// Swagger 2.0 aggregation service.
pub type OpenApiV2Service = OpenApiVersionedService<SwaggerSpec>;
/// OpenAPI v3 aggregation service.
pub type OpenApiV3Service = OpenApiVersionedService<crate::spec::OpenApiV3Spec>;

/// Result of folding all cached documents together.
pub struct MergedSpec<D> {
    /// The aggregate; with `error` set this is the best-effort aggregate
    /// built so far (stale data over no data).
    pub document: D,
    /// First error encountered while merging, if any.
    pub error: Option<Error>,
}

impl<D: SpecDocument> Default for OpenApiVersionedService<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SpecDocument> OpenApiVersionedService<D> {
    /// Service with an empty registry.
    pub fn new() -> Self {
        Self {
            aggregator: OpenApiAggregatorServices::new(),
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying registry, exposed for proxy routing by the embedding
    /// server.
    pub fn aggregator(&self) -> &OpenApiAggregatorServices {
        &self.aggregator
    }

    fn cache_slot(&self, name: &str) -> Arc<Cache<D>> {
        self.caches
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Cache::new(D::empty())))
            .clone()
    }

    /// Fold every cached document into one.
    ///
    /// The locally-built aggregator document is the deterministic merge base
    /// (its info block seeds the aggregate); all documents, the base's own
    /// contents included, are folded in sorted-name order. A single service's
    /// merge failure degrades the result instead of discarding it.
    pub fn merge_spec_cache(&self) -> Result<MergedSpec<D>> {
        let mut entries: Vec<(String, Arc<D>)> = self
            .caches
            .read()
            .iter()
            .map(|(name, cache)| (name.clone(), cache.load()))
            .collect();
        if entries.is_empty() {
            return Err(Error::NoSpecsCached);
        }
        // local document first, the rest in name order
        entries.sort_by(|a, b| {
            let a_remote = a.0 != LOCAL_DELEGATION_NAME;
            let b_remote = b.0 != LOCAL_DELEGATION_NAME;
            a_remote.cmp(&b_remote).then_with(|| a.0.cmp(&b.0))
        });

        let mut document = entries[0].1.base();
        let mut error = None;
        for (name, doc) in &entries {
            if let Err(e) = document.merge_from(name, doc) {
                debug!(service = %name, error = %e, "failed to merge openapi spec");
                error.get_or_insert(e);
            }
        }
        Ok(MergedSpec { document, error })
    }

    /// Mount the merged-serving handler at `path`.
    ///
    /// Each request recomputes the merge from the per-service snapshots and
    /// writes gzip-compressed JSON (when the client accepts gzip); 503 is
    /// returned only when no usable document exists or serialization fails.
    pub fn register_openapi_versioned_service(
        self: &Arc<Self>,
        path: &str,
        handler: &mut dyn PathHandler,
    ) {
        handler.handle(path, BoxCloneService::new(MergedSpecService(self.clone())));
    }

    /// Normalize and register the aggregator's own document, then mount the
    /// merged endpoint at `path` (or the version's default path).
    ///
    /// The local document is authored in the v2 shape; the v3 service
    /// converts it. Redundant empty defaults are stripped first so they do
    /// not inflate the merge or cause spurious definition conflicts.
    pub fn build_and_register_aggregator(
        self: &Arc<Self>,
        mut local: SwaggerSpec,
        handler: &mut dyn PathHandler,
        path: Option<&str>,
    ) {
        for definition in local.definitions.values_mut() {
            strip_empty_defaults(definition);
        }
        self.aggregator.add_local_api_service(LOCAL_DELEGATION_NAME);
        self.cache_slot(LOCAL_DELEGATION_NAME).store(D::from_local(local));
        self.register_openapi_versioned_service(path.unwrap_or(D::VERSION.default_path()), handler);
    }

    async fn serve_merged(&self, req: Request<Body>) -> Response<Body> {
        let merged = match self.merge_spec_cache() {
            Ok(merged) => merged,
            Err(error) => {
                warn!(%error, "no aggregated openapi document available");
                return empty_status(StatusCode::SERVICE_UNAVAILABLE);
            }
        };
        if let Some(error) = &merged.error {
            warn!(%error, "serving partially merged openapi document");
        }
        let json = match serde_json::to_vec(&merged.document) {
            Ok(json) => json,
            Err(error) => {
                warn!(error = %Error::SerializeSpec(error), "failed to serialize merged spec");
                return empty_status(StatusCode::SERVICE_UNAVAILABLE);
            }
        };

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::VARY, "Accept-Encoding");
        let res = if accepts_gzip(&req) {
            match gzip(&json) {
                Ok(compressed) => builder
                    .header(header::CONTENT_ENCODING, "gzip")
                    .body(Body::from(compressed)),
                Err(error) => {
                    warn!(%error, "failed to compress merged spec");
                    return empty_status(StatusCode::SERVICE_UNAVAILABLE);
                }
            }
        } else {
            builder.body(Body::from(json))
        };
        res.expect("valid response")
    }
}

#[async_trait]
impl<D: SpecDocument> ApiServiceManager for OpenApiVersionedService<D> {
    async fn add_update_api_service(&self, svc: &ApiService) -> Result<()> {
        // seed the slot before registration so a concurrent merge never
        // observes an uninitialized entry
        self.cache_slot(svc.name());
        self.aggregator.add_update_api_service(svc).await?;
        self.update_openapi_spec(svc.name()).await
    }

    async fn update_openapi_spec(&self, name: &str) -> Result<()> {
        if self.aggregator.is_local(name) {
            // local documents are injected directly, nothing to download
            return Ok(());
        }
        let bytes = match self.aggregator.get_openapi_spec(name, D::VERSION).await? {
            Some(bytes) => bytes,
            // 304: keep the prior cached document
            None => return Ok(()),
        };
        let document = D::from_slice(&bytes).map_err(|e| Error::ParseSpec {
            name: name.to_string(),
            version: D::VERSION,
            source: e,
        })?;
        self.cache_slot(name).store(document);
        Ok(())
    }

    async fn remove_api_service(&self, name: &str) {
        self.aggregator.remove_api_service(name);
        self.caches.write().remove(name);
    }
}

/// Tower adapter serving the merged document; what gets mounted through
/// [`PathHandler`].
struct MergedSpecService<D: SpecDocument>(Arc<OpenApiVersionedService<D>>);

impl<D: SpecDocument> Clone for MergedSpecService<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D: SpecDocument> tower::Service<Request<Body>> for MergedSpecService<D> {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let service = self.0.clone();
        Box::pin(async move { Ok(service.serve_merged(req).await) })
    }
}

fn accepts_gzip<B>(req: &Request<B>) -> bool {
    req.headers()
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().starts_with("gzip"))
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn empty_status(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("valid response")
}
