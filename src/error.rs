//! Error handling in [`openapi_aggregator`][crate]
use http::StatusCode;
use thiserror::Error;

use crate::spec::SpecVersion;

/// Possible errors when aggregating OpenAPI specs
#[derive(Error, Debug)]
pub enum Error {
    /// The backend's spec endpoint answered 404
    ///
    /// Sentinel for "this service does not publish a spec at this path",
    /// as opposed to a transient fetch failure.
    #[error("openapi spec not found at {path}")]
    SpecNotFound {
        /// Requested spec path, e.g. `/openapi/v2`
        path: String,
    },

    /// A spec was requested for a name that was never registered
    #[error("no api service registered under {name}")]
    ServiceNotRegistered {
        /// The unknown service name
        name: String,
    },

    /// Neither a service reference nor a literal URL resolves to an endpoint
    #[error("cannot resolve endpoint for api service {name}")]
    EndpointNotResolvable {
        /// Name of the misconfigured service
        name: String,
    },

    /// The spec download returned a status other than 200/304/404
    #[error("spec download for {path} failed with status {status}: {snippet}")]
    Download {
        /// Requested spec path
        path: String,
        /// Response status
        status: StatusCode,
        /// Truncated response body for diagnostics
        snippet: String,
    },

    /// The spec download exceeded the shared download timeout
    #[error("spec download for {path} timed out")]
    DownloadTimeout {
        /// Requested spec path
        path: String,
    },

    /// A per-service fetch failed, annotated with the service name
    #[error("failed to fetch openapi {version} spec for {name}: {source}")]
    FetchSpec {
        /// Name of the registered service
        name: String,
        /// Spec version that was requested
        version: SpecVersion,
        /// Underlying download error
        #[source]
        source: Box<Error>,
    },

    /// The downloaded spec body was not a valid document
    #[error("failed to parse openapi {version} spec for {name}: {source}")]
    ParseSpec {
        /// Name of the registered service
        name: String,
        /// Spec version that was parsed
        version: SpecVersion,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// A single service's document could not be folded into the aggregate
    ///
    /// The merge still returns the best-effort aggregate built so far.
    #[error("failed to merge openapi spec from {name}: {reason}")]
    MergeSpec {
        /// Name of the service whose document failed to merge
        name: String,
        /// Why the merge step failed
        reason: String,
    },

    /// No per-service documents have been cached yet
    #[error("no openapi specs cached yet")]
    NoSpecsCached,

    /// Failed to decode base64 trust material
    #[error("failed to decode base64: {0}")]
    Base64Decode(#[source] base64::DecodeError),

    /// An error with configuring TLS occured
    #[error("SslError: {0}")]
    SslError(String),

    /// Http based error
    #[error("HttpError: {0}")]
    HttpError(#[source] http::Error),

    /// Failed to construct a URI
    #[error("InvalidUri: {0}")]
    InvalidUri(#[source] http::uri::InvalidUri),

    /// Service error from the handler stack
    #[error("ServiceError: {0}")]
    Service(#[source] tower::BoxError),

    /// The merged document could not be serialized
    #[error("error serializing merged spec: {0}")]
    SerializeSpec(#[source] serde_json::Error),
}

/// Convenience alias over [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
