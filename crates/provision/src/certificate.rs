//! Typed views of cert-manager Issuer and Certificate specs
//!
//! Documents loaded from files keep their spec as a raw map; these types are
//! the programmatic way to build one. Both end up as the same
//! [`ResourceDocument`], and both go through the same field validator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

use crate::resource::{ApiKind, ResourceDocument, ResourceRef};

/// Key usages cert-manager understands
pub const KNOWN_USAGES: &[&str] = &[
    "signing",
    "digital signature",
    "content commitment",
    "key encipherment",
    "key agreement",
    "data encipherment",
    "cert sign",
    "crl sign",
    "encipher only",
    "decipher only",
    "any",
    "server auth",
    "client auth",
    "code signing",
    "email protection",
    "s/mime",
    "ipsec end system",
    "ipsec tunnel",
    "ipsec user",
    "timestamping",
    "ocsp signing",
    "microsoft sgc",
    "netscape sgc",
];

/// Issuer strategy fields, exactly one of which an Issuer populates
pub const ISSUER_STRATEGIES: &[&str] = &["selfSigned", "ca", "vault", "acme"];

/// Private key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

impl KeyAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rsa" => Some(Self::Rsa),
            "ecdsa" => Some(Self::Ecdsa),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ecdsa => "ecdsa",
        }
    }

    /// Whether `size` is a valid key size for this algorithm
    pub fn accepts_key_size(&self, size: u64) -> bool {
        match self {
            Self::Rsa => (2048..=8192).contains(&size),
            Self::Ecdsa => matches!(size, 256 | 384 | 521),
        }
    }

    /// Human-readable description of the allowed sizes
    pub fn allowed_sizes(&self) -> &'static str {
        match self {
            Self::Rsa => "2048 to 8192",
            Self::Ecdsa => "256, 384 or 521",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEncoding {
    Pkcs1,
    Pkcs8,
}

impl KeyEncoding {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pkcs1" => Some(Self::Pkcs1),
            "pkcs8" => Some(Self::Pkcs8),
            _ => None,
        }
    }
}

/// Spec of a cert-manager Certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organization: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_algorithm: Option<KeyAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_encoding: Option<KeyEncoding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(default, rename = "uriSANs", skip_serializing_if = "Vec::is_empty")]
    pub uri_sans: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    pub issuer_ref: ResourceRef,
}

impl CertificateSpec {
    /// Start a spec with the two required fields
    pub fn new(secret_name: impl Into<String>, issuer_ref: ResourceRef) -> Self {
        Self {
            secret_name: secret_name.into(),
            duration: None,
            renew_before: None,
            organization: Vec::new(),
            common_name: None,
            is_ca: false,
            key_algorithm: None,
            key_size: None,
            key_encoding: None,
            usages: Vec::new(),
            dns_names: Vec::new(),
            uri_sans: Vec::new(),
            ip_addresses: Vec::new(),
            issuer_ref,
        }
    }

    /// The spec as the raw map a document carries
    pub fn to_spec(&self) -> Map<String, Value> {
        to_map(self)
    }

    pub fn into_document(self, name: impl Into<String>) -> ResourceDocument {
        ResourceDocument::new(ApiKind::Certificate, name, self.to_spec())
    }
}

/// Spec of a cert-manager Issuer
///
/// The enum makes "exactly one strategy" structural for documents built in
/// code; loaded documents are checked by the field validator instead.
#[derive(Debug, Clone, PartialEq)]
pub enum IssuerSpec {
    SelfSigned,
    Ca {
        secret_name: String,
    },
    Vault {
        server: String,
        path: String,
        auth: Value,
    },
    Acme {
        server: String,
        email: Option<String>,
        private_key_secret: String,
        solvers: Vec<Value>,
    },
}

impl IssuerSpec {
    /// Name of the spec field this strategy populates
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::SelfSigned => "selfSigned",
            Self::Ca { .. } => "ca",
            Self::Vault { .. } => "vault",
            Self::Acme { .. } => "acme",
        }
    }

    pub fn to_spec(&self) -> Map<String, Value> {
        let body = match self {
            Self::SelfSigned => json!({}),
            Self::Ca { secret_name } => json!({ "secretName": secret_name }),
            Self::Vault { server, path, auth } => json!({
                "server": server,
                "path": path,
                "auth": auth,
            }),
            Self::Acme {
                server,
                email,
                private_key_secret,
                solvers,
            } => {
                let mut acme = json!({
                    "server": server,
                    "privateKeySecretRef": { "name": private_key_secret },
                });
                if let Some(email) = email {
                    acme["email"] = Value::String(email.clone());
                }
                if !solvers.is_empty() {
                    acme["solvers"] = Value::Array(solvers.clone());
                }
                acme
            }
        };

        let mut spec = Map::new();
        spec.insert(self.strategy().to_string(), body);
        spec
    }

    pub fn into_document(self, name: impl Into<String>) -> ResourceDocument {
        ResourceDocument::new(ApiKind::Issuer, name, self.to_spec())
    }
}

fn to_map<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
