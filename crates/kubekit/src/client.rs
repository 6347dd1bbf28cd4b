//! Blocking connection to an API server
//!
//! Every object is resolved through API discovery (plural and scope), read
//! back, and only applied with server-side apply when the live object
//! differs. kube-rs is async; [`KubeClient`] owns a small tokio runtime and
//! blocks on it so the engine's worker threads can call it directly.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Scope};
use kube::{Client, Config};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

use provision::resource::{CERT_MANAGER_GROUP, CERT_MANAGER_VERSION};
use provision::{
    ClusterConnection, ConnectionError, ResourceDocument, ResourceRef, SubmitOutcome,
};

use crate::error::{Error, Result};

/// Field manager recorded on every server-side apply
pub const FIELD_MANAGER: &str = "certprov";

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An API resource as discovery reported it
#[derive(Debug, Clone)]
struct Resolved {
    resource: ApiResource,
    namespaced: bool,
}

/// A connection to one API server
pub struct KubeClient {
    runtime: Runtime,
    client: Client,
    server: String,
    namespace: String,
    discovered: Mutex<HashMap<(String, String), Resolved>>,
}

impl KubeClient {
    /// Connect using `kubeconfig`, or the inferred environment when `None`
    ///
    /// Inference follows kube-rs: `KUBECONFIG`, then `~/.kube/config`, then
    /// the in-cluster service account. Every request is bounded by `timeout`.
    pub fn connect(kubeconfig: Option<&Path>, timeout: Duration) -> Result<Self> {
        let runtime = runtime()?;
        let config = runtime.block_on(load_config(kubeconfig))?;
        Self::build(runtime, config, timeout)
    }

    /// Connect with an already built config
    pub fn from_config(config: Config, timeout: Duration) -> Result<Self> {
        Self::build(runtime()?, config, timeout)
    }

    fn build(runtime: Runtime, mut config: Config, timeout: Duration) -> Result<Self> {
        config.connect_timeout = Some(timeout);
        config.read_timeout = Some(timeout);

        let server = config.cluster_url.to_string().trim_end_matches('/').to_string();
        let namespace = config.default_namespace.clone();
        let client = {
            // The client's request buffer spawns onto the current runtime
            let _guard = runtime.enter();
            Client::try_from(config)?
        };

        Ok(Self {
            runtime,
            client,
            server,
            namespace,
            discovered: Mutex::new(HashMap::new()),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Namespace of the kubeconfig context, `default` when it names none
    pub fn default_namespace(&self) -> &str {
        &self.namespace
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn lock_discovered(&self) -> MutexGuard<'_, HashMap<(String, String), Resolved>> {
        self.discovered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discover the plural and scope of `kind` in `api_version`, once per client
    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> std::result::Result<Resolved, ConnectionError> {
        let key = (api_version.to_string(), kind.to_string());
        let cached = self.lock_discovered().get(&key).cloned();
        if let Some(found) = cached {
            return Ok(found);
        }

        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (resource, capabilities) = kube::discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(connection_error)?;
        let resolved = Resolved {
            resource,
            namespaced: capabilities.scope == Scope::Namespaced,
        };
        log::debug!(
            "Discovered {kind} in {api_version} as {} ({})",
            resolved.resource.plural,
            if resolved.namespaced { "namespaced" } else { "cluster" }
        );

        self.lock_discovered().insert(key, resolved.clone());
        Ok(resolved)
    }

    fn api(&self, resolved: &Resolved, namespace: Option<&str>) -> Api<DynamicObject> {
        if resolved.namespaced {
            let namespace = namespace.unwrap_or(&self.namespace);
            Api::namespaced_with(self.client.clone(), namespace, &resolved.resource)
        } else {
            Api::all_with(self.client.clone(), &resolved.resource)
        }
    }

    /// Apply one object unless the live copy already carries every field
    async fn apply_object(
        &self,
        manifest: &Value,
    ) -> std::result::Result<SubmitOutcome, ConnectionError> {
        let field = |pointer: &str| manifest.pointer(pointer).and_then(Value::as_str);
        let (Some(api_version), Some(kind), Some(name)) =
            (field("/apiVersion"), field("/kind"), field("/metadata/name"))
        else {
            return Err(ConnectionError::Rejected(
                "manifest is missing apiVersion, kind or metadata.name".into(),
            ));
        };

        let resolved = self.resolve(api_version, kind).await?;
        let api = self.api(&resolved, field("/metadata/namespace"));

        if let Some(live) = api.get_opt(name).await.map_err(connection_error)? {
            let live = serde_json::to_value(&live)
                .map_err(|e| ConnectionError::Unreachable(format!("{kind} {name}: {e}")))?;
            if is_subset(manifest, &live) {
                log::debug!("{kind} {name} is up to date");
                return Ok(SubmitOutcome::AlreadyExists);
            }
        }

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(manifest))
            .await
            .map_err(connection_error)?;
        log::debug!("Applied {kind} {name}");
        Ok(SubmitOutcome::Applied)
    }

    async fn wait_available(
        &self,
        name: &str,
        namespace: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> std::result::Result<(), ConnectionError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        loop {
            match deployments.get_opt(name).await.map_err(connection_error)? {
                Some(deployment) if deployment_available(&deployment) => break,
                Some(_) => {}
                None => log::trace!("Deployment {namespace}/{name} not found yet"),
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::Unreachable(format!(
                    "timed out after {}s waiting for deployment {namespace}/{name}",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        log::info!("Deployment {namespace}/{name} is available");
        Ok(())
    }
}

impl ClusterConnection for KubeClient {
    fn submit(
        &self,
        document: &ResourceDocument,
    ) -> std::result::Result<SubmitOutcome, ConnectionError> {
        self.block_on(async {
            let mut outcome = SubmitOutcome::AlreadyExists;
            for manifest in document.to_manifests() {
                if self.apply_object(&manifest).await? == SubmitOutcome::Applied {
                    outcome = SubmitOutcome::Applied;
                }
            }
            Ok(outcome)
        })
    }

    fn get(
        &self,
        reference: &ResourceRef,
    ) -> std::result::Result<Option<ResourceDocument>, ConnectionError> {
        if reference.group != CERT_MANAGER_GROUP
            || !matches!(reference.kind.as_str(), "Issuer" | "ClusterIssuer" | "Certificate")
        {
            return Err(ConnectionError::Rejected(format!(
                "cannot look up {reference}: unsupported kind"
            )));
        }

        self.block_on(async {
            let api_version = format!("{CERT_MANAGER_GROUP}/{CERT_MANAGER_VERSION}");
            let resolved = self.resolve(&api_version, &reference.kind).await?;
            let api = self.api(&resolved, reference.namespace.as_deref());
            let Some(object) = api.get_opt(&reference.name).await.map_err(connection_error)?
            else {
                return Ok(None);
            };
            let object = serde_json::to_value(&object)
                .map_err(|e| ConnectionError::Unreachable(format!("{reference}: {e}")))?;
            Ok(ResourceDocument::from_object(&object))
        })
    }

    fn watch_ready(
        &self,
        document: &ResourceDocument,
        timeout: Duration,
    ) -> std::result::Result<(), ConnectionError> {
        let deadline = Instant::now() + timeout;
        let deployments = document
            .manifests()
            .iter()
            .filter(|m| m.get("kind").and_then(Value::as_str) == Some("Deployment"));

        for manifest in deployments {
            let Some(name) = manifest.pointer("/metadata/name").and_then(Value::as_str) else {
                continue;
            };
            let namespace = manifest
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or(&self.namespace);
            self.block_on(self.wait_available(name, namespace, deadline, timeout))?;
        }
        Ok(())
    }
}

fn runtime() -> Result<Runtime> {
    // Both ring and aws-lc may be linked; pick one explicitly
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("kubekit")
        .enable_all()
        .build()
        .map_err(Error::Runtime)
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| Error::kubeconfig(path, e))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::kubeconfig(path, e))
        }
        None => Ok(Config::infer().await?),
    }
}

/// Split `group/version`; the core group has no slash
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Map a kube-rs error onto the provisioning error categories
pub fn connection_error(err: kube::Error) -> ConnectionError {
    match err {
        kube::Error::Api(response) => {
            let message = if response.message.is_empty() {
                format!("HTTP {}", response.code)
            } else {
                format!("HTTP {}: {}", response.code, response.message)
            };
            match response.code {
                401 | 403 => ConnectionError::AuthenticationFailure(message),
                408 | 429 | 500..=599 => ConnectionError::Unreachable(message),
                _ => ConnectionError::Rejected(message),
            }
        }
        kube::Error::Auth(e) => ConnectionError::AuthenticationFailure(e.to_string()),
        kube::Error::Discovery(e) => ConnectionError::Rejected(e.to_string()),
        kube::Error::BuildRequest(e) => ConnectionError::Rejected(e.to_string()),
        // Transport failures, timeouts and bodies that fail to decode
        other => ConnectionError::Unreachable(other.to_string()),
    }
}

/// Whether every field of `desired` is present with the same value in `live`
///
/// Server-populated fields missing from `desired` are ignored; lists must
/// match element by element.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(key, value)| l.get(key).map_or(value.is_null(), |lv| is_subset(value, lv))),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(a, b)| is_subset(a, b))
        }
        _ => desired == live,
    }
}

fn deployment_available(deployment: &Deployment) -> bool {
    let wanted = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    available >= wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use provision::ApiKind;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;

    const ISSUER_RESOURCES: &str = r#"{
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": "cert-manager.io/v1alpha2",
        "resources": [{
            "name": "issuers",
            "singularName": "issuer",
            "namespaced": true,
            "kind": "Issuer",
            "verbs": ["get", "list", "patch"]
        }]
    }"#;

    /// Read one request: headers, then as much body as `Content-Length` announces
    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break end + 4;
            }
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return String::from_utf8_lossy(&data).to_string(),
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        };
        let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
        let length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while data.len() < header_end + length {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    /// Answer each connection once with what `route` returns for its request line
    fn serve(route: impl Fn(&str) -> String + Send + 'static) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                let request = read_request(&mut stream);
                let line = request.lines().next().unwrap_or_default().to_string();
                let _ = stream.write_all(route(&line).as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn not_found(name: &str) -> String {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": format!("{name:?} not found"),
            "reason": "NotFound",
            "code": 404,
        })
        .to_string();
        format!(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn response(body: &str, content_length: usize) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
             Content-Length: {content_length}\r\nConnection: close\r\n\r\n{body}"
        )
    }

    fn client_for(server: &str) -> KubeClient {
        let config = Config::new(server.parse().unwrap());
        KubeClient::from_config(config, Duration::from_secs(2)).unwrap()
    }

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_connection_error_categories() {
        assert!(matches!(
            connection_error(api_error(401, "")),
            ConnectionError::AuthenticationFailure(_)
        ));
        assert!(matches!(
            connection_error(api_error(403, "forbidden")),
            ConnectionError::AuthenticationFailure(_)
        ));
        assert!(matches!(connection_error(api_error(503, "")), ConnectionError::Unreachable(_)));
        assert!(matches!(connection_error(api_error(429, "")), ConnectionError::Unreachable(_)));
        assert_eq!(
            connection_error(api_error(422, "certificates.cert-manager.io \"x\" is invalid")),
            ConnectionError::Rejected(
                "HTTP 422: certificates.cert-manager.io \"x\" is invalid".into()
            )
        );
        assert_eq!(
            connection_error(api_error(404, "")),
            ConnectionError::Rejected("HTTP 404".into())
        );
    }

    #[test]
    fn test_undecodable_body_is_unreachable() {
        let truncated = serde_json::from_str::<Value>(r#"{"kind":"Issuer","#).unwrap_err();
        assert!(matches!(
            connection_error(kube::Error::SerdeError(truncated)),
            ConnectionError::Unreachable(_)
        ));
    }

    #[test]
    fn test_truncated_lookup_is_unreachable() {
        let server = serve(|line| {
            if line.starts_with("GET /apis/cert-manager.io/v1alpha2 ") {
                response(ISSUER_RESOURCES, ISSUER_RESOURCES.len())
            } else {
                response(r#"{"kind":"Issuer","#, 200)
            }
        });
        let client = client_for(&server);

        let reference = ResourceRef::to(ApiKind::Issuer, "ca-issuer");
        assert!(matches!(client.get(&reference), Err(ConnectionError::Unreachable(_))));
    }

    #[test]
    fn test_lookup_returns_live_issuer() {
        let server = serve(|line| {
            if line.starts_with("GET /apis/cert-manager.io/v1alpha2 ") {
                response(ISSUER_RESOURCES, ISSUER_RESOURCES.len())
            } else if line.contains("/namespaces/default/issuers/ca-issuer ") {
                let body = json!({
                    "apiVersion": "cert-manager.io/v1alpha2",
                    "kind": "Issuer",
                    "metadata": { "name": "ca-issuer", "namespace": "default" },
                    "spec": { "ca": { "secretName": "ca-key-pair" } },
                })
                .to_string();
                response(&body, body.len())
            } else {
                not_found("other")
            }
        });
        let client = client_for(&server);
        assert_eq!(client.default_namespace(), "default");

        let issuer = client
            .get(&ResourceRef::to(ApiKind::Issuer, "ca-issuer"))
            .unwrap()
            .unwrap();
        assert_eq!(issuer.name(), "ca-issuer");
        assert_eq!(issuer.spec()["ca"]["secretName"], "ca-key-pair");

        let missing = client.get(&ResourceRef::to(ApiKind::Issuer, "other")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_cluster_scoped_kind_applied_without_namespace() {
        const NETWORKING_RESOURCES: &str = r#"{
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "networking.k8s.io/v1",
            "resources": [{
                "name": "ingressclasses",
                "singularName": "ingressclass",
                "namespaced": false,
                "kind": "IngressClass",
                "verbs": ["get", "patch"]
            }]
        }"#;
        let ingress_class = json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "IngressClass",
            "metadata": { "name": "nginx" },
            "spec": { "controller": "k8s.io/ingress-nginx" },
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let server = {
            let seen = Arc::clone(&seen);
            let applied = ingress_class.to_string();
            serve(move |line| {
                seen.lock().unwrap().push(line.to_string());
                if line.starts_with("GET /apis/networking.k8s.io/v1 ") {
                    response(NETWORKING_RESOURCES, NETWORKING_RESOURCES.len())
                } else if line.starts_with("PATCH ") {
                    response(&applied, applied.len())
                } else {
                    not_found("nginx")
                }
            })
        };
        let client = client_for(&server);

        let bundle = ResourceDocument::controller_bundle("cert-manager", vec![ingress_class]);
        assert_eq!(client.submit(&bundle).unwrap(), SubmitOutcome::Applied);

        let seen = seen.lock().unwrap();
        assert!(
            seen.iter()
                .any(|l| l.starts_with("PATCH /apis/networking.k8s.io/v1/ingressclasses/nginx?")),
            "{seen:?}"
        );
        assert!(seen.iter().all(|l| !l.contains("/namespaces/")), "{seen:?}");
    }

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("cert-manager.io/v1alpha2"), ("cert-manager.io", "v1alpha2"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn test_is_subset_ignores_server_fields() {
        let desired = json!({
            "apiVersion": "cert-manager.io/v1alpha2",
            "kind": "Issuer",
            "metadata": { "name": "selfsigned-issuer", "namespace": "default" },
            "spec": { "selfSigned": {} },
        });
        let live = json!({
            "apiVersion": "cert-manager.io/v1alpha2",
            "kind": "Issuer",
            "metadata": {
                "name": "selfsigned-issuer",
                "namespace": "default",
                "resourceVersion": "1234",
                "uid": "5f1c",
            },
            "spec": { "selfSigned": {} },
            "status": { "conditions": [{ "type": "Ready", "status": "True" }] },
        });
        assert!(is_subset(&desired, &live));

        let changed = json!({ "spec": { "ca": { "secretName": "ca" } } });
        assert!(!is_subset(&changed, &live));
    }

    #[test]
    fn test_is_subset_lists_match_exactly() {
        let live = json!({ "dnsNames": ["a.example.com", "b.example.com"] });
        assert!(is_subset(&json!({ "dnsNames": ["a.example.com", "b.example.com"] }), &live));
        assert!(!is_subset(&json!({ "dnsNames": ["a.example.com"] }), &live));
        assert!(is_subset(&json!({ "commonName": null }), &live));
    }

    #[test]
    fn test_deployment_available() {
        let deployment = |available: Option<i32>| -> Deployment {
            let mut value = json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": "cert-manager", "namespace": "cert-manager" },
                "spec": { "replicas": 2, "selector": {}, "template": {} },
            });
            if let Some(n) = available {
                value["status"] = json!({ "availableReplicas": n });
            }
            serde_json::from_value(value).unwrap()
        };
        assert!(!deployment_available(&deployment(Some(1))));
        assert!(deployment_available(&deployment(Some(2))));
        assert!(!deployment_available(&deployment(None)));
    }

    #[test]
    fn test_unsupported_lookup_is_rejected() {
        let client = client_for("http://127.0.0.1:1");
        let reference = ResourceRef::new("cert-manager", "ControllerBundle", "bundle.certprov.dev");
        assert!(matches!(client.get(&reference), Err(ConnectionError::Rejected(_))));
    }

    #[test]
    fn test_closed_port_is_unreachable() {
        let client = client_for("http://127.0.0.1:1/");
        assert_eq!(client.server(), "http://127.0.0.1:1");
        let spec = json!({ "selfSigned": {} }).as_object().cloned().unwrap();
        let doc = ResourceDocument::issuer("selfsigned-issuer", spec);
        assert!(matches!(client.submit(&doc), Err(ConnectionError::Unreachable(_))));
    }

    #[test]
    fn test_missing_kubeconfig_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = KubeClient::connect(Some(&dir.path().join("config")), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Kubeconfig { .. })));
    }
}
