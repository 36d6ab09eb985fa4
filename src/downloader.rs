//! Timeout-bounded, in-memory download of a spec document through a handler.
use std::time::Duration;

use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;

use crate::{proxy::ApiServiceProxy, Body, Error, Result};

/// Shared per-call ceiling for spec downloads, independent of any caller
/// context: a slow backend must not hold a refresh forever.
pub const SPEC_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches spec documents by invoking a handler in memory and classifying
/// the captured response. The handler itself (typically a
/// [`ProxyBinding`](crate::proxy::ProxyBinding)) does any real network I/O.
#[derive(Clone, Debug)]
pub struct Downloader {
    timeout: Duration,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Downloader with the standard spec-download timeout.
    pub fn new() -> Self {
        Self {
            timeout: SPEC_DOWNLOAD_TIMEOUT,
        }
    }

    /// Fetch `path` through `handler`.
    ///
    /// Classification of the captured response:
    /// - `304` => `Ok(None)`: unchanged, keep the prior cached value
    /// - `404` => [`Error::SpecNotFound`] sentinel
    /// - `200` => `Ok(Some(body))`
    /// - anything else => [`Error::Download`] carrying the status and a body
    ///   snapshot for diagnostics
    pub async fn download(&self, handler: &dyn ApiServiceProxy, path: &str) -> Result<Option<Bytes>> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .map_err(Error::HttpError)?;

        let fetch = async {
            let res = handler.serve(req).await;
            let status = res.status();
            let body = res
                .into_body()
                .collect()
                .await
                .map_err(Error::Service)?
                .to_bytes();
            Ok::<_, Error>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| Error::DownloadTimeout {
                path: path.to_string(),
            })??;

        match status {
            StatusCode::NOT_MODIFIED => Ok(None),
            StatusCode::NOT_FOUND => Err(Error::SpecNotFound {
                path: path.to_string(),
            }),
            StatusCode::OK => Ok(Some(body)),
            status => Err(Error::Download {
                path: path.to_string(),
                status,
                snippet: snippet(&body),
            }),
        }
    }
}

/// Truncated lossy body excerpt carried on download errors.
fn snippet(body: &Bytes) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > MAX {
        let truncated: String = text.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        text.into_owned()
    }
}
