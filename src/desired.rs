//! Desired issuers and certificates
//!
//! A plan file lists `[[issuer]]` and `[[certificate]]` tables. Apart from
//! `name` and `namespace`, every key is copied verbatim into the resource's
//! spec so the field validator sees exactly what was written:
//!
//! ```toml
//! [[issuer]]
//! name = "selfsigned-issuer"
//! selfSigned = {}
//!
//! [[certificate]]
//! name = "example-com"
//! secretName = "example-com-tls"
//! dnsNames = ["example.com"]
//! issuerRef = { name = "selfsigned-issuer", kind = "Issuer", group = "cert-manager.io" }
//! ```

use anyhow::{Context, Result};
use provision::{
    ApiKind, CertificateSpec, IssuerSpec, KeyAlgorithm, KeyEncoding, ResourceDocument, ResourceRef,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    #[serde(default, rename = "issuer")]
    issuers: Vec<Entry>,
    #[serde(default, rename = "certificate")]
    certificates: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(flatten)]
    spec: Map<String, Value>,
}

impl Entry {
    fn into_document(self, kind: ApiKind) -> ResourceDocument {
        let document = ResourceDocument::new(kind, self.name, self.spec);
        match self.namespace {
            Some(ns) => document.in_namespace(ns),
            None => document,
        }
    }
}

/// Load issuers then certificates from a plan file
pub fn load_plan(path: &Path) -> Result<Vec<ResourceDocument>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    parse_plan(&content).with_context(|| format!("Invalid plan file {}", path.display()))
}

pub fn parse_plan(content: &str) -> Result<Vec<ResourceDocument>> {
    let plan: PlanFile = toml::from_str(content)?;
    let issuers = plan
        .issuers
        .into_iter()
        .map(|e| e.into_document(ApiKind::Issuer));
    let certificates = plan
        .certificates
        .into_iter()
        .map(|e| e.into_document(ApiKind::Certificate));
    Ok(issuers.chain(certificates).collect())
}

/// The stock example: a self-signed issuer and a certificate for example.com
///
/// The certificate points at `ca-issuer`, which this set doesn't declare, so it
/// only succeeds against a cluster that already has that issuer.
pub fn builtin() -> Vec<ResourceDocument> {
    let issuer = IssuerSpec::SelfSigned.into_document("selfsigned-issuer");

    let mut certificate = CertificateSpec::new(
        "example-com-tls",
        ResourceRef::to(ApiKind::Issuer, "ca-issuer"),
    );
    certificate.duration = Some("2160h".into());
    certificate.renew_before = Some("360h".into());
    certificate.organization = vec!["jetstack".into()];
    certificate.common_name = Some("example.com".into());
    certificate.is_ca = false;
    certificate.key_algorithm = Some(KeyAlgorithm::Rsa);
    certificate.key_size = Some(2048);
    certificate.key_encoding = Some(KeyEncoding::Pkcs1);
    certificate.usages = vec!["server auth".into(), "client auth".into()];
    certificate.dns_names = vec!["example.com".into(), "www.example.com".into()];
    certificate.uri_sans = vec!["spiffe://cluster.local/ns/default/sa/example".into()];
    certificate.ip_addresses = vec!["192.168.0.5".into()];

    vec![issuer, certificate.into_document("example-com")]
}
