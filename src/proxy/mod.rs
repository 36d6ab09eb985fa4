//! Reverse-proxying of requests to registered extension API services.
//!
//! Each registered service gets one [`ProxyBinding`] owning its resolved
//! target and a TLS-aware transport that is rebuilt whenever the resource's
//! trust material changes. Requests (including protocol upgrades such as
//! WebSocket) are forwarded through the current transport.
use std::{sync::Arc, task::Poll, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use http::{header, uri, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::connect::HttpConnector,
    rt::{TokioExecutor, TokioIo},
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    resource::{ApiService, ApiServiceSpec},
    Body, Error, Result,
};

mod tls;
pub use tls::rustls_client_config;

/// Hard ceiling for discovery-shaped requests, to bound aggregation latency.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

type Transport = hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, Body>;

/// Capability interface over one registered extension API service.
///
/// One production implementation ([`ProxyBinding`]) plus test doubles.
#[async_trait]
pub trait ApiServiceProxy: Send + Sync {
    /// The registered service name.
    fn name(&self) -> &str;

    /// Resolve the backend base URL for this service.
    fn resolve_endpoint(&self) -> Result<Uri>;

    /// Rebuild the TLS transport from the current trust material.
    async fn refresh(&self) -> Result<()>;

    /// Forward one request to the backend, writing error responses inline.
    async fn serve(&self, req: Request<Body>) -> Response<Body>;
}

/// The production [`ApiServiceProxy`]: resolves `service.namespace.svc:port`
/// or a literal URL and forwards through a rebuilt-on-update hyper client.
pub struct ProxyBinding {
    name: String,
    spec: ApiServiceSpec,
    // current round-tripper; kept as-is when a rebuild fails so stale-but-valid
    // transport keeps serving
    transport: RwLock<Option<Transport>>,
}

impl ProxyBinding {
    /// Create a binding for one resource; no transport exists until the first
    /// successful [`refresh`](ApiServiceProxy::refresh).
    pub fn new(svc: &ApiService) -> Self {
        Self {
            name: svc.name().to_string(),
            spec: svc.spec.clone(),
            transport: RwLock::new(None),
        }
    }

    fn build_transport(&self) -> Result<Transport> {
        let spec = &self.spec;
        let ca = spec
            .ca_bundle
            .as_deref()
            .map(|b| BASE64.decode(b).map_err(Error::Base64Decode))
            .transpose()?;
        let cert = spec
            .client_certificate_data
            .as_deref()
            .map(|b| BASE64.decode(b).map_err(Error::Base64Decode))
            .transpose()?;
        let key = spec
            .client_key_data
            .as_deref()
            .map(|b| BASE64.decode(b).map_err(Error::Base64Decode))
            .transpose()?;
        let identity = cert.as_deref().zip(key.as_deref());

        let tls = rustls_client_config(ca.as_deref(), identity, spec.insecure_skip_tls_verify)?;

        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        let mut builder = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http();
        if let Some(svc) = &spec.service {
            // certificates of extension apiservers are issued for the
            // cluster-internal service name
            builder = builder.with_server_name(format!("{}.{}.svc", svc.name, svc.namespace));
        }
        let https = builder.enable_http1().wrap_connector(connector);

        Ok(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https))
    }

    fn current_transport(&self) -> Option<Transport> {
        self.transport.read().clone()
    }

    async fn forward(
        &self,
        transport: Transport,
        target: Uri,
        mut req: Request<Body>,
    ) -> Response<Body> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| uri::PathAndQuery::from_static("/"));
        let rewritten = match rewrite_uri(&target, path_and_query) {
            Ok(uri) => uri,
            Err(error) => {
                warn!(name = %self.name, %error, "failed to rewrite proxied uri");
                return status_response(StatusCode::SERVICE_UNAVAILABLE);
            }
        };
        *req.uri_mut() = rewritten;

        if is_upgrade_request(&req) {
            return self.forward_upgrade(transport, req).await;
        }

        let timeout = is_discovery_request(req.uri().path()).then_some(DISCOVERY_TIMEOUT);
        let fut = transport.request(req);
        let res = match timeout {
            Some(t) => match tokio::time::timeout(t, fut).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(name = %self.name, "discovery request to backend timed out");
                    return status_response(StatusCode::GATEWAY_TIMEOUT);
                }
            },
            None => fut.await,
        };
        match res {
            Ok(res) => res.map(Body::wrap_body),
            Err(error) => {
                warn!(name = %self.name, %error, "request to backend failed");
                status_response(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Forward a protocol-upgrade request and, if the backend switches
    /// protocols, bridge both upgraded connections until either side closes.
    async fn forward_upgrade(&self, transport: Transport, mut req: Request<Body>) -> Response<Body> {
        // take the pending upgrade of the inbound request before handing the
        // headers upstream
        let downstream = hyper::upgrade::on(&mut req);

        let mut upstream_req = Request::builder()
            .method(req.method().clone())
            .uri(req.uri().clone());
        if let Some(headers) = upstream_req.headers_mut() {
            headers.extend(req.headers().clone());
        }
        let upstream_req = match upstream_req.body(Body::empty()) {
            Ok(r) => r,
            Err(error) => {
                warn!(name = %self.name, %error, "failed to build upgrade request");
                return status_response(StatusCode::BAD_GATEWAY);
            }
        };

        let mut upstream_res = match transport.request(upstream_req).await {
            Ok(res) => res,
            Err(error) => {
                warn!(name = %self.name, %error, "upgrade request to backend failed");
                return status_response(StatusCode::BAD_GATEWAY);
            }
        };

        if upstream_res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return upstream_res.map(Body::wrap_body);
        }

        let upstream = hyper::upgrade::on(&mut upstream_res);
        let name = self.name.clone();
        tokio::spawn(async move {
            match tokio::try_join!(downstream, upstream) {
                Ok((downstream, upstream)) => {
                    let mut downstream = TokioIo::new(downstream);
                    let mut upstream = TokioIo::new(upstream);
                    if let Err(error) =
                        tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await
                    {
                        debug!(%name, %error, "upgraded connection closed with error");
                    }
                }
                Err(error) => {
                    warn!(%name, %error, "failed to complete protocol upgrade");
                }
            }
        });

        let mut res = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .body(Body::empty())
            .expect("valid response");
        *res.headers_mut() = upstream_res.headers().clone();
        res
    }
}

#[async_trait]
impl ApiServiceProxy for ProxyBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_endpoint(&self) -> Result<Uri> {
        if let Some(svc) = &self.spec.service {
            if !svc.name.is_empty() && !svc.namespace.is_empty() && svc.port != 0 {
                let url = format!("https://{}.{}.svc:{}", svc.name, svc.namespace, svc.port);
                return url.parse().map_err(Error::InvalidUri);
            }
        }
        if let Some(url) = &self.spec.url {
            let uri: Uri = url.parse().map_err(Error::InvalidUri)?;
            if self.spec.insecure_skip_tls_verify {
                let mut parts = uri.into_parts();
                parts.scheme = Some(uri::Scheme::HTTP);
                if parts.path_and_query.is_none() {
                    parts.path_and_query = Some(uri::PathAndQuery::from_static("/"));
                }
                return Uri::from_parts(parts)
                    .map_err(http::Error::from)
                    .map_err(Error::HttpError);
            }
            return Ok(uri);
        }
        Err(Error::EndpointNotResolvable {
            name: self.name.clone(),
        })
    }

    async fn refresh(&self) -> Result<()> {
        let transport = self.build_transport()?;
        *self.transport.write() = Some(transport);
        Ok(())
    }

    async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let target = match self.resolve_endpoint() {
            Ok(uri) => uri,
            Err(error) => {
                warn!(name = %self.name, %error, "api service unavailable");
                return status_response(StatusCode::SERVICE_UNAVAILABLE);
            }
        };
        let Some(transport) = self.current_transport() else {
            // never successfully refreshed
            return status_response(StatusCode::NOT_FOUND);
        };
        self.forward(transport, target, req).await
    }
}

/// Tower adapter so a [`ProxyBinding`] (or any [`ApiServiceProxy`]) can be
/// mounted directly into the embedding server's handler stack.
#[derive(Clone)]
pub struct ProxyService(Arc<dyn ApiServiceProxy>);

impl ProxyService {
    /// Wrap a proxy implementation.
    pub fn new(proxy: Arc<dyn ApiServiceProxy>) -> Self {
        Self(proxy)
    }
}

impl tower::Service<Request<Body>> for ProxyService {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.0.clone();
        Box::pin(async move { Ok(proxy.serve(req).await) })
    }
}

/// Replace scheme and authority with the target's, keeping path and query.
fn rewrite_uri(target: &Uri, path_and_query: uri::PathAndQuery) -> Result<Uri> {
    let mut parts = uri::Parts::default();
    parts.scheme = target.scheme().cloned();
    parts.authority = target.authority().cloned();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts)
        .map_err(http::Error::from)
        .map_err(Error::HttpError)
}

fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    req.headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Discovery-shaped requests have exactly three path segments,
/// conventionally `/apis/{group}/{version}`.
fn is_discovery_request(path: &str) -> bool {
    let segments: Vec<_> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.len() == 3 && segments[0] == "apis"
}

fn status_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("valid response")
}
