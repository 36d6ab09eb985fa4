//! Registry of proxy bindings and cacheable downloaders, keyed by service
//! name. The watch controller is the only writer; request handlers read
//! concurrently, so both maps sit behind read-write locks.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    downloader::Downloader,
    proxy::{ApiServiceProxy, ProxyBinding},
    resource::ApiService,
    spec::SpecVersion,
    Error, Result,
};

/// Binds one registered service's proxy to the shared [`Downloader`].
///
/// The proxy can be swapped when the custom resource is updated without
/// disturbing in-flight fetches.
pub struct CacheableDownloader {
    downloader: Downloader,
    proxy: RwLock<Arc<dyn ApiServiceProxy>>,
}

impl CacheableDownloader {
    fn new(downloader: Downloader, proxy: Arc<dyn ApiServiceProxy>) -> Self {
        Self {
            downloader,
            proxy: RwLock::new(proxy),
        }
    }

    /// Rebind to a fresh proxy and rebuild its transport.
    async fn rebind(&self, proxy: Arc<dyn ApiServiceProxy>) -> Result<()> {
        *self.proxy.write() = proxy.clone();
        proxy.refresh().await
    }

    /// Fetch the raw spec bytes of `version` through the current proxy.
    pub async fn get(&self, version: SpecVersion) -> Result<Option<Bytes>> {
        let proxy = self.proxy.read().clone();
        self.downloader.download(&*proxy, version.default_path()).await
    }
}

/// Owns the `{name -> proxy}` and `{name -> downloader}` registries and
/// mediates registration, deregistration and on-demand raw spec fetches.
#[derive(Default)]
pub struct OpenApiAggregatorServices {
    services: RwLock<HashMap<String, Arc<dyn ApiServiceProxy>>>,
    downloaders: RwLock<HashMap<String, Arc<CacheableDownloader>>>,
    locals: RwLock<HashSet<String>>,
}

impl OpenApiAggregatorServices {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update one service from its custom resource.
    ///
    /// A fresh [`ProxyBinding`] always replaces the stored proxy. An existing
    /// downloader is rebound to it; otherwise a new downloader is created and
    /// the binding performs its initial transport build. Transport/TLS errors
    /// are propagated to the caller.
    pub async fn add_update_api_service(&self, svc: &ApiService) -> Result<()> {
        let name = svc.name().to_string();
        let proxy: Arc<dyn ApiServiceProxy> = Arc::new(ProxyBinding::new(svc));
        self.services.write().insert(name.clone(), proxy.clone());

        let existing = self.downloaders.read().get(&name).cloned();
        match existing {
            Some(downloader) => downloader.rebind(proxy).await,
            None => {
                let downloader = Arc::new(CacheableDownloader::new(Downloader::new(), proxy.clone()));
                self.downloaders.write().insert(name.clone(), downloader);
                debug!(%name, "registered api service");
                proxy.refresh().await
            }
        }
    }

    /// Register a pseudo-service with no real endpoint.
    ///
    /// Used for the aggregator's own locally-built document: it participates
    /// in merging like any remote service but is never downloaded; its value
    /// is injected directly into the version caches.
    pub fn add_local_api_service(&self, name: &str) {
        self.locals.write().insert(name.to_string());
    }

    /// Whether `name` is a local pseudo-service.
    pub fn is_local(&self, name: &str) -> bool {
        self.locals.read().contains(name)
    }

    /// Fetch raw spec bytes of `version` for a registered service name.
    pub async fn get_openapi_spec(&self, name: &str, version: SpecVersion) -> Result<Option<Bytes>> {
        let downloader = self
            .downloaders
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServiceNotRegistered {
                name: name.to_string(),
            })?;
        downloader.get(version).await.map_err(|e| Error::FetchSpec {
            name: name.to_string(),
            version,
            source: Box::new(e),
        })
    }

    /// Fetch the raw Swagger 2.0 spec for `name`.
    pub async fn get_openapi_spec_v2(&self, name: &str) -> Result<Option<Bytes>> {
        self.get_openapi_spec(name, SpecVersion::V2).await
    }

    /// Fetch the raw OpenAPI v3 spec for `name`.
    pub async fn get_openapi_spec_v3(&self, name: &str) -> Result<Option<Bytes>> {
        self.get_openapi_spec(name, SpecVersion::V3).await
    }

    /// Deregister a service; idempotent.
    pub fn remove_api_service(&self, name: &str) {
        self.services.write().remove(name);
        self.downloaders.write().remove(name);
        self.locals.write().remove(name);
    }

    /// The proxy currently registered under `name`, if any. The embedding
    /// apiserver uses this to route arbitrary requests to the backend.
    pub fn proxy(&self, name: &str) -> Option<Arc<dyn ApiServiceProxy>> {
        self.services.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::url_backed;

    #[tokio::test]
    async fn unregistered_name_is_a_sentinel() {
        let aggregator = OpenApiAggregatorServices::new();
        let err = aggregator.get_openapi_spec_v2("nope").await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotRegistered { .. }));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let aggregator = OpenApiAggregatorServices::new();
        aggregator.remove_api_service("nope");
        aggregator.remove_api_service("nope");
    }

    #[tokio::test]
    async fn add_registers_proxy_and_downloader() {
        let aggregator = OpenApiAggregatorServices::new();
        let svc = url_backed("svc-a", "http://127.0.0.1:1");
        aggregator.add_update_api_service(&svc).await.unwrap();
        assert!(aggregator.proxy("svc-a").is_some());

        aggregator.remove_api_service("svc-a");
        assert!(aggregator.proxy("svc-a").is_none());
    }

    #[tokio::test]
    async fn fetch_errors_are_wrapped_with_the_service_name() {
        let aggregator = OpenApiAggregatorServices::new();
        // nothing listens on this address, the fetch comes back 502
        let svc = url_backed("svc-a", "http://127.0.0.1:1");
        aggregator.add_update_api_service(&svc).await.unwrap();
        let err = aggregator.get_openapi_spec_v2("svc-a").await.unwrap_err();
        match err {
            Error::FetchSpec { name, version, .. } => {
                assert_eq!(name, "svc-a");
                assert_eq!(version, SpecVersion::V2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn local_services_have_no_downloader() {
        let aggregator = OpenApiAggregatorServices::new();
        aggregator.add_local_api_service("local");
        assert!(aggregator.is_local("local"));
        let err = aggregator.get_openapi_spec_v2("local").await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotRegistered { .. }));
    }
}
