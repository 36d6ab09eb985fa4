//! End-to-end aggregation over live http backends: register two services,
//! serve the merged document, degrade to stale data when a backend fails,
//! and drop the contribution on removal.
use std::{
    convert::Infallible,
    io::Read,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tower::ServiceExt;

use openapi_aggregator::{
    resource::{ApiService, ApiServiceSpec, ApiServiceStatus, Metadata},
    service::{ApiServiceManager, OpenApiV2Service, PathHandler, RouteService},
    spec::{Info, SwaggerSpec},
    Body,
};

/// Backend serving a fixed swagger document until told to start failing.
async fn spawn_backend(doc: serde_json::Value) -> (SocketAddr, Arc<AtomicBool>) {
    let failing = Arc::new(AtomicBool::new(false));
    let state = failing.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let doc = doc.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req| {
                    let doc = doc.clone();
                    let state = state.clone();
                    async move {
                        let res = if state.load(Ordering::SeqCst) {
                            Response::builder()
                                .status(StatusCode::INTERNAL_SERVER_ERROR)
                                .body(Full::new(Bytes::from_static(b"backend down")))
                        } else {
                            Response::builder()
                                .header(header::CONTENT_TYPE, "application/json")
                                .body(Full::new(Bytes::from(doc.to_string())))
                        };
                        Ok::<_, Infallible>(res.unwrap())
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    (addr, failing)
}

fn api_service(name: &str, addr: SocketAddr) -> ApiService {
    ApiService {
        metadata: Metadata { name: name.into() },
        spec: ApiServiceSpec {
            url: Some(format!("http://{addr}")),
            insecure_skip_tls_verify: true,
            ..ApiServiceSpec::default()
        },
        status: ApiServiceStatus::default(),
    }
}

fn swagger_doc(title: &str, path: &str) -> serde_json::Value {
    serde_json::json!({
        "swagger": "2.0",
        "info": {"title": title, "version": "1.0"},
        "paths": {path: {"get": {"responses": {"200": {"description": "OK"}}}}}
    })
}

#[derive(Default)]
struct Routes(std::collections::HashMap<String, RouteService>);

impl PathHandler for Routes {
    fn handle(&mut self, path: &str, service: RouteService) {
        self.0.insert(path.to_string(), service);
    }
}

async fn fetch_merged(route: &RouteService) -> serde_json::Value {
    let res = route
        .clone()
        .oneshot(
            Request::builder()
                .uri("/openapi/v2")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_ENCODING], "gzip");
    let compressed = res.into_body().collect().await.unwrap().to_bytes();
    let mut json = Vec::new();
    flate2::read::GzDecoder::new(compressed.as_ref())
        .read_to_end(&mut json)
        .unwrap();
    serde_json::from_slice(&json).unwrap()
}

#[tokio::test]
async fn aggregates_degrades_and_removes() {
    let (addr_a, _) = spawn_backend(swagger_doc("service-a", "/x")).await;
    let (addr_b, fail_b) = spawn_backend(swagger_doc("service-b", "/y")).await;

    let service = Arc::new(OpenApiV2Service::new());
    let mut routes = Routes::default();
    let local = SwaggerSpec {
        info: Info {
            title: "aggregator".into(),
            version: "v1".into(),
            ..Info::default()
        },
        paths: [(
            "/local".to_string(),
            serde_json::json!({"get": {"responses": {"200": {"description": "OK"}}}}),
        )]
        .into(),
        ..SwaggerSpec::default()
    };
    service.build_and_register_aggregator(local, &mut routes, None);
    let route = routes.0["/openapi/v2"].clone();

    service
        .add_update_api_service(&api_service("service-a", addr_a))
        .await
        .unwrap();
    service
        .add_update_api_service(&api_service("service-b", addr_b))
        .await
        .unwrap();

    let doc = fetch_merged(&route).await;
    assert_eq!(doc["info"]["title"], "aggregator");
    assert!(doc.pointer("/paths/~1local").is_some());
    assert!(doc.pointer("/paths/~1x").is_some());
    assert!(doc.pointer("/paths/~1y").is_some());

    // backend b starts failing, the refresh errors but the last good
    // document keeps being served
    fail_b.store(true, Ordering::SeqCst);
    assert!(service.update_openapi_spec("service-b").await.is_err());
    let doc = fetch_merged(&route).await;
    assert!(doc.pointer("/paths/~1y").is_some());

    // deregistration drops the contribution entirely
    service.remove_api_service("service-b").await;
    let doc = fetch_merged(&route).await;
    assert!(doc.pointer("/paths/~1x").is_some());
    assert!(doc.pointer("/paths/~1y").is_none());
}

#[tokio::test]
async fn colliding_definitions_are_renamed_with_refs_rewritten() {
    let doc_a = serde_json::json!({
        "swagger": "2.0",
        "info": {"title": "a", "version": "1.0"},
        "paths": {"/x": {"get": {"responses": {"200": {
            "schema": {"$ref": "#/definitions/Result"}
        }}}}},
        "definitions": {"Result": {"type": "object", "properties": {"a": {"type": "string"}}}}
    });
    let doc_b = serde_json::json!({
        "swagger": "2.0",
        "info": {"title": "b", "version": "1.0"},
        "paths": {"/y": {"get": {"responses": {"200": {
            "schema": {"$ref": "#/definitions/Result"}
        }}}}},
        "definitions": {"Result": {"type": "object", "properties": {"b": {"type": "integer"}}}}
    });
    let (addr_a, _) = spawn_backend(doc_a).await;
    let (addr_b, _) = spawn_backend(doc_b).await;

    let service = Arc::new(OpenApiV2Service::new());
    let mut routes = Routes::default();
    service.build_and_register_aggregator(SwaggerSpec::default(), &mut routes, None);
    let route = routes.0["/openapi/v2"].clone();

    service
        .add_update_api_service(&api_service("a", addr_a))
        .await
        .unwrap();
    service
        .add_update_api_service(&api_service("b", addr_b))
        .await
        .unwrap();

    let doc = fetch_merged(&route).await;
    assert!(doc.pointer("/definitions/Result").is_some());
    assert!(doc.pointer("/definitions/Result_2").is_some());
    // the renamed definition's referrer was rewritten along with it
    let refs: Vec<&str> = [
        doc.pointer("/paths/~1x/get/responses/200/schema/$ref"),
        doc.pointer("/paths/~1y/get/responses/200/schema/$ref"),
    ]
    .into_iter()
    .map(|r| r.unwrap().as_str().unwrap())
    .collect();
    assert!(refs.contains(&"#/definitions/Result"));
    assert!(refs.contains(&"#/definitions/Result_2"));
}
