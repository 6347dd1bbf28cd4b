//! Resource documents and the references between them
//!
//! A [`ResourceDocument`] is one unit of provisioning work: either a bundle of
//! opaque manifests (CRDs, the controller) or a single cert-manager custom
//! resource. Documents are immutable once built and are identified by
//! `(kind, name)`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::fmt;

/// API group of cert-manager custom resources
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// API version the bundled cert-manager CRDs serve
pub const CERT_MANAGER_VERSION: &str = "v1alpha2";

/// Pseudo group used to reference bundles from `depends_on`
pub const BUNDLE_GROUP: &str = "bundle.certprov.dev";

/// Namespace used for namespaced resources that don't name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kinds of documents the engine knows how to order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApiKind {
    /// Custom resource definitions, applied as one unit
    #[serde(rename = "CRDBundle")]
    CrdBundle,
    /// The controller deployment and its supporting objects
    ControllerBundle,
    /// A cert-manager Issuer
    Issuer,
    /// A cert-manager Certificate
    Certificate,
}

impl ApiKind {
    /// Kind string as it appears in references
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrdBundle => "CRDBundle",
            Self::ControllerBundle => "ControllerBundle",
            Self::Issuer => "Issuer",
            Self::Certificate => "Certificate",
        }
    }

    /// API group this kind lives in
    pub fn group(&self) -> &'static str {
        if self.is_bundle() {
            BUNDLE_GROUP
        } else {
            CERT_MANAGER_GROUP
        }
    }

    /// Whether documents of this kind carry opaque manifests
    pub fn is_bundle(&self) -> bool {
        matches!(self, Self::CrdBundle | Self::ControllerBundle)
    }

    /// Whether the resource lives in a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::Issuer | Self::Certificate)
    }

    /// Kinds that must be applied before this one when present in the same plan
    ///
    /// Custom resources need their definitions registered and the controller's
    /// admission webhook running before the API server accepts them.
    pub fn prerequisites(&self) -> &'static [ApiKind] {
        match self {
            Self::CrdBundle => &[],
            Self::ControllerBundle => &[Self::CrdBundle],
            Self::Issuer | Self::Certificate => &[Self::CrdBundle, Self::ControllerBundle],
        }
    }

    /// Look up a kind from a reference's `kind` and `group`
    pub fn from_kind(kind: &str, group: &str) -> Option<Self> {
        [
            Self::CrdBundle,
            Self::ControllerBundle,
            Self::Issuer,
            Self::Certificate,
        ]
        .into_iter()
        .find(|k| k.as_str() == kind && k.group() == group)
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a document within a plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ApiKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ApiKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A weak reference to another resource by name, kind and group
///
/// References never own their target. They are resolved against the documents
/// of the current plan first and, failing that, looked up in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub name: String,
    pub kind: String,
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            group: group.into(),
            namespace: None,
        }
    }

    /// Reference a document kind the engine knows about
    pub fn to(kind: ApiKind, name: impl Into<String>) -> Self {
        Self::new(name, kind.as_str(), kind.group())
    }

    /// Same reference, scoped to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The engine kind this reference points at, if it is one
    pub fn api_kind(&self) -> Option<ApiKind> {
        ApiKind::from_kind(&self.kind, &self.group)
    }

    /// Whether `document` is the target of this reference
    pub fn matches(&self, document: &ResourceDocument) -> bool {
        self.api_kind() == Some(document.kind()) && self.name == document.name()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/", self.kind, self.group)?;
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}/")?;
        }
        f.write_str(&self.name)
    }
}

/// One unit of provisioning work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDocument {
    kind: ApiKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default)]
    spec: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    depends_on: BTreeSet<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    manifests: Vec<Value>,
}

impl ResourceDocument {
    /// Create a custom resource document from its spec
    pub fn new(kind: ApiKind, name: impl Into<String>, spec: Map<String, Value>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
            spec,
            depends_on: BTreeSet::new(),
            manifests: Vec::new(),
        }
    }

    pub fn issuer(name: impl Into<String>, spec: Map<String, Value>) -> Self {
        Self::new(ApiKind::Issuer, name, spec)
    }

    pub fn certificate(name: impl Into<String>, spec: Map<String, Value>) -> Self {
        Self::new(ApiKind::Certificate, name, spec)
    }

    /// Bundle of CRD manifests, forwarded to the cluster as-is
    pub fn crd_bundle(name: impl Into<String>, manifests: Vec<Value>) -> Self {
        Self::bundle(ApiKind::CrdBundle, name, manifests)
    }

    /// Bundle of controller manifests, forwarded to the cluster as-is
    pub fn controller_bundle(name: impl Into<String>, manifests: Vec<Value>) -> Self {
        Self::bundle(ApiKind::ControllerBundle, name, manifests)
    }

    fn bundle(kind: ApiKind, name: impl Into<String>, manifests: Vec<Value>) -> Self {
        Self {
            manifests,
            ..Self::new(kind, name, Map::new())
        }
    }

    /// Rebuild a document from a live cert-manager object
    ///
    /// `ClusterIssuer` objects map onto [`ApiKind::Issuer`]; their spec shape
    /// is identical. Returns `None` for any other kind.
    pub fn from_object(object: &Value) -> Option<Self> {
        let kind = match object.get("kind")?.as_str()? {
            "Issuer" | "ClusterIssuer" => ApiKind::Issuer,
            "Certificate" => ApiKind::Certificate,
            _ => return None,
        };
        let metadata = object.get("metadata")?;
        let name = metadata.get("name")?.as_str()?;
        let spec = object
            .get("spec")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut document = Self::new(kind, name, spec);
        document.namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(document)
    }

    /// Same document placed in a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Same document with an explicit dependency added
    pub fn with_dependency(mut self, reference: ResourceRef) -> Self {
        self.depends_on.insert(reference);
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }

    pub fn kind(&self) -> ApiKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace as declared
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Namespace the resource will be created in
    ///
    /// Namespaced kinds fall back to [`DEFAULT_NAMESPACE`]; bundles and
    /// cluster-scoped objects have none.
    pub fn effective_namespace(&self) -> Option<&str> {
        match (&self.namespace, self.kind.is_namespaced()) {
            (Some(ns), true) => Some(ns),
            (None, true) => Some(DEFAULT_NAMESPACE),
            (_, false) => None,
        }
    }

    pub fn spec(&self) -> &Map<String, Value> {
        &self.spec
    }

    pub fn depends_on(&self) -> &BTreeSet<ResourceRef> {
        &self.depends_on
    }

    pub fn manifests(&self) -> &[Value] {
        &self.manifests
    }

    /// The Certificate's `issuerRef`, if the spec carries one as an object
    ///
    /// Missing members come back empty; the field validator reports them.
    pub fn issuer_ref(&self) -> Option<ResourceRef> {
        if self.kind != ApiKind::Certificate {
            return None;
        }
        let issuer_ref = self.spec.get("issuerRef")?.as_object()?;
        let member = |key: &str| {
            issuer_ref
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(ResourceRef::new(member("name"), member("kind"), member("group")))
    }

    /// Every reference this document makes, explicit dependencies first
    ///
    /// References without a namespace inherit the document's own.
    pub fn references(&self) -> Vec<ResourceRef> {
        let namespace = self.effective_namespace();
        self.depends_on
            .iter()
            .cloned()
            .chain(self.issuer_ref())
            .map(|mut r| {
                if r.namespace.is_none()
                    && let Some(ns) = namespace
                {
                    r.namespace = Some(ns.to_string());
                }
                r
            })
            .collect()
    }

    /// Objects to send to the API server for this document
    pub fn to_manifests(&self) -> Vec<Value> {
        if self.kind.is_bundle() {
            return self.manifests.clone();
        }

        let mut metadata = Map::new();
        metadata.insert("name".into(), Value::String(self.name.clone()));
        if let Some(ns) = self.effective_namespace() {
            metadata.insert("namespace".into(), Value::String(ns.to_string()));
        }

        vec![json!({
            "apiVersion": format!("{CERT_MANAGER_GROUP}/{CERT_MANAGER_VERSION}"),
            "kind": self.kind.as_str(),
            "metadata": metadata,
            "spec": self.spec,
        })]
    }
}
