//! Aggregation of OpenAPI documents from extension API services.
//!
//! Extension backends register themselves through an `APIService` custom
//! resource carrying either an in-cluster service reference or a literal
//! URL, plus TLS trust material. This crate watches those registrations,
//! proxies spec downloads to each backend over a TLS-aware, upgrade-capable
//! reverse proxy, caches the parsed documents per service, and serves the
//! merged result (together with a locally-built document) on the standard
//! discovery paths, one service per spec version:
//!
//! - [`service::OpenApiV2Service`] for Swagger 2.0 at `/openapi/v2`
//! - [`service::OpenApiV3Service`] for OpenAPI v3 at `/openapi/v3`
//!
//! Both are driven by a [`controller::Controller`] consuming watch
//! [`controller::Event`]s. The merge is deterministic and degrades
//! gracefully: a backend that goes away or serves garbage keeps its last
//! good document in the aggregate until it is deregistered.

pub mod aggregator;
mod body;
pub mod cache;
pub mod controller;
pub mod downloader;
mod error;
pub mod proxy;
pub mod resource;
pub mod service;
pub mod spec;

pub use body::Body;
pub use error::{Error, Result};
