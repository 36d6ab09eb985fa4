//! The `APIService` custom-resource shape consumed from the cluster.
//!
//! The watch controller receives these objects from an informer owned by the
//! embedding apiserver. Only the fields the aggregator acts on are modeled;
//! everything else on the resource is irrelevant here.
use serde::{Deserialize, Serialize};

/// One extension backend whose OpenAPI spec should be aggregated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiService {
    /// Object metadata; the resource name is the registry key.
    pub metadata: Metadata,
    /// Endpoint descriptor and TLS trust material.
    pub spec: ApiServiceSpec,
    /// Availability state reported by the availability controller.
    #[serde(default)]
    pub status: ApiServiceStatus,
}

impl ApiService {
    /// The unique service name (the custom-resource name).
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether the backend is currently marked available.
    ///
    /// Only available services are registered; a transition away from
    /// `Available` deregisters the service.
    pub fn is_available(&self) -> bool {
        self.status.state == ApiServiceState::Available
    }
}

/// Minimal object metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique name of the registered service.
    pub name: String,
}

/// Endpoint and trust configuration for one extension API service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceSpec {
    /// In-cluster service reference; preferred over `url` when fully specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,
    /// Literal endpoint URL, used when no service reference resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64-encoded PEM CA bundle used to verify the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// Skip server certificate verification (and force plain http for
    /// literal URLs).
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Base64-encoded PEM client certificate presented to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Base64-encoded PEM client key paired with the certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

/// Reference to an in-cluster `Service` backing the extension API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceReference {
    /// Service name.
    pub name: String,
    /// Service namespace.
    pub namespace: String,
    /// Service port; `0` means "not specified".
    #[serde(default)]
    pub port: u16,
}

/// Observed status of the registered service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceStatus {
    /// Current availability state.
    #[serde(default)]
    pub state: ApiServiceState,
}

/// Availability state reported on the resource status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiServiceState {
    /// The backend passed its availability probe.
    Available,
    /// The backend is known but failing its probe.
    Unavailable,
    /// No state has been reported yet.
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_service_backed_resource() {
        let svc: ApiService = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "v1alpha1.devops.example.io" },
            "spec": {
                "service": { "name": "devops", "namespace": "tools", "port": 8443 },
                "caBundle": "Zm9v",
            },
            "status": { "state": "Available" }
        }))
        .unwrap();
        assert_eq!(svc.name(), "v1alpha1.devops.example.io");
        assert!(svc.is_available());
        assert_eq!(svc.spec.service.unwrap().port, 8443);
    }

    #[test]
    fn defaults_to_unknown_state() {
        let svc: ApiService = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "x" },
            "spec": { "url": "http://x/y" }
        }))
        .unwrap();
        assert!(!svc.is_available());
        assert_eq!(svc.status.state, ApiServiceState::Unknown);
    }
}
