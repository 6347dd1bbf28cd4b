//! Field validation for documents before they are sent anywhere
//!
//! Validation is pure and offline. It never stops at the first problem: every
//! field error in a document is collected so one run reports all of them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::certificate::{ISSUER_STRATEGIES, KNOWN_USAGES, KeyAlgorithm, KeyEncoding};
use crate::duration::parse_duration;
use crate::resource::{ApiKind, ResourceDocument};

/// Duration cert-manager assumes when a Certificate doesn't set one
pub const DEFAULT_DURATION: Duration = Duration::from_secs(2160 * 3600);

/// Renewal window cert-manager assumes when a Certificate doesn't set one
pub const DEFAULT_RENEW_BEFORE: Duration = Duration::from_secs(720 * 3600);

/// Shortest certificate lifetime cert-manager accepts
pub const MIN_DURATION: Duration = Duration::from_secs(3600);

/// Shortest renewal window cert-manager accepts
pub const MIN_RENEW_BEFORE: Duration = Duration::from_secs(5 * 60);

/// X.509 upper bound on the common name
const MAX_COMMON_NAME_LEN: usize = 64;

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
        .expect("DNS label pattern is valid")
});

static OBJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("object name pattern is valid")
});

/// A problem with one field of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FieldError {
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error(
        "issuer must populate exactly one of selfSigned, ca, vault, acme (populated: [{}])",
        .populated.join(", ")
    )]
    InvalidIssuerStrategy { populated: Vec<String> },

    #[error("keySize: {size} is not a valid {algorithm} key size (allowed: {allowed})")]
    IncompatibleKeySize {
        algorithm: KeyAlgorithm,
        size: u64,
        allowed: String,
    },
}

impl FieldError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Path of the offending field
    pub fn field(&self) -> &str {
        match self {
            Self::Invalid { field, .. } => field,
            Self::InvalidIssuerStrategy { .. } => "spec",
            Self::IncompatibleKeySize { .. } => "keySize",
        }
    }
}

/// Validate a document against the rules for its kind
pub fn validate(document: &ResourceDocument) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if document.kind().is_bundle() {
        if document.name().trim().is_empty() {
            errors.push(FieldError::invalid("name", "must not be empty"));
        }
        errors.extend(validate_bundle(document.manifests()));
    } else {
        check_object_name(document.name(), &mut errors);
        errors.extend(match document.kind() {
            ApiKind::Certificate => validate_certificate(document.spec()),
            ApiKind::Issuer => validate_issuer(document.spec()),
            ApiKind::CrdBundle | ApiKind::ControllerBundle => Vec::new(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a Certificate spec
pub fn validate_certificate(spec: &Map<String, Value>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    match string_field(spec, "secretName", &mut errors) {
        Some(name) if !name.trim().is_empty() => {}
        Some(_) | None if !has_type_error(&errors, "secretName") => {
            errors.push(FieldError::invalid("secretName", "must be a non-empty string"));
        }
        _ => {}
    }

    check_durations(spec, &mut errors);
    check_key(spec, &mut errors);
    check_subject(spec, &mut errors);
    check_usages(spec, &mut errors);
    check_sans(spec, &mut errors);
    check_issuer_ref(spec, &mut errors);

    errors
}

/// Validate an Issuer spec
pub fn validate_issuer(spec: &Map<String, Value>) -> Vec<FieldError> {
    let populated: Vec<&str> = ISSUER_STRATEGIES
        .iter()
        .copied()
        .filter(|key| spec.get(*key).is_some_and(|v| !v.is_null()))
        .collect();

    let [strategy] = populated.as_slice() else {
        return vec![FieldError::InvalidIssuerStrategy {
            populated: populated.iter().map(ToString::to_string).collect(),
        }];
    };

    let Some(body) = spec.get(*strategy).and_then(Value::as_object) else {
        return vec![FieldError::invalid(*strategy, "must be an object")];
    };

    let mut errors = Vec::new();
    match *strategy {
        "ca" => require_string(body, "ca.secretName", "secretName", &mut errors),
        "vault" => {
            require_string(body, "vault.server", "server", &mut errors);
            require_string(body, "vault.path", "path", &mut errors);
            if !body.get("auth").is_some_and(Value::is_object) {
                errors.push(FieldError::invalid("vault.auth", "must be an object"));
            }
        }
        "acme" => {
            match body.get("server").and_then(Value::as_str) {
                Some(server) if url::Url::parse(server).is_ok() => {}
                _ => errors.push(FieldError::invalid(
                    "acme.server",
                    "must be an absolute URL of an ACME directory",
                )),
            }
            let key_ref = body.get("privateKeySecretRef").and_then(Value::as_object);
            match key_ref.and_then(|r| r.get("name")).and_then(Value::as_str) {
                Some(name) if !name.trim().is_empty() => {}
                _ => errors.push(FieldError::invalid(
                    "acme.privateKeySecretRef.name",
                    "must be a non-empty string",
                )),
            }
        }
        _ => {}
    }
    errors
}

/// Validate the opaque manifests of a bundle
///
/// Only the fields needed to address each object on the API server are checked.
pub fn validate_bundle(manifests: &[Value]) -> Vec<FieldError> {
    if manifests.is_empty() {
        return vec![FieldError::invalid("manifests", "bundle contains no manifests")];
    }

    let mut errors = Vec::new();
    for (i, manifest) in manifests.iter().enumerate() {
        let Some(object) = manifest.as_object() else {
            errors.push(FieldError::invalid(format!("manifests[{i}]"), "must be an object"));
            continue;
        };
        for key in ["apiVersion", "kind"] {
            if !object
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty())
            {
                errors.push(FieldError::invalid(
                    format!("manifests[{i}].{key}"),
                    "must be a non-empty string",
                ));
            }
        }
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str);
        if !name.is_some_and(|s| !s.is_empty()) {
            errors.push(FieldError::invalid(
                format!("manifests[{i}].metadata.name"),
                "must be a non-empty string",
            ));
        }
    }
    errors
}

/// Whether `name` is a valid DNS name for a certificate SAN
///
/// A wildcard is only allowed as the whole first label.
pub fn is_valid_dns_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    let name = name.strip_prefix("*.").unwrap_or(name);
    !name.is_empty() && name.split('.').all(|label| DNS_LABEL.is_match(label))
}

fn check_object_name(name: &str, errors: &mut Vec<FieldError>) {
    if name.is_empty() || name.len() > 253 || !OBJECT_NAME.is_match(name) {
        errors.push(FieldError::invalid(
            "metadata.name",
            format!("{name:?} must be a lowercase RFC 1123 subdomain"),
        ));
    }
}

fn check_durations(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    let duration = string_field(spec, "duration", errors);
    let renew_before = string_field(spec, "renewBefore", errors);
    if duration.is_none() && renew_before.is_none() {
        return;
    }

    let parse = |field: &str, raw: Option<&str>, default: Duration, errors: &mut Vec<FieldError>| {
        match raw {
            None => Some(default),
            Some(raw) => match parse_duration(raw) {
                Ok(d) => Some(d),
                Err(e) => {
                    errors.push(FieldError::invalid(field, e.to_string()));
                    None
                }
            },
        }
    };
    let parsed_duration = parse("duration", duration, DEFAULT_DURATION, errors);
    let parsed_renew = parse("renewBefore", renew_before, DEFAULT_RENEW_BEFORE, errors);

    if let Some(d) = parsed_duration
        && d < MIN_DURATION
    {
        errors.push(FieldError::invalid("duration", "must be at least 1h"));
    }
    if let Some(r) = parsed_renew
        && r < MIN_RENEW_BEFORE
    {
        errors.push(FieldError::invalid("renewBefore", "must be at least 5m"));
    }
    if let (Some(d), Some(r)) = (parsed_duration, parsed_renew)
        && r >= d
    {
        errors.push(FieldError::invalid(
            "renewBefore",
            format!(
                "renewBefore ({}) must be shorter than duration ({})",
                renew_before.unwrap_or("720h"),
                duration.unwrap_or("2160h"),
            ),
        ));
    }
}

fn check_key(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    let algorithm = match string_field(spec, "keyAlgorithm", errors) {
        None if has_type_error(errors, "keyAlgorithm") => None,
        None => Some(KeyAlgorithm::Rsa),
        Some(raw) => {
            let parsed = KeyAlgorithm::parse(raw);
            if parsed.is_none() {
                errors.push(FieldError::invalid(
                    "keyAlgorithm",
                    format!("unsupported algorithm {raw:?}, expected rsa or ecdsa"),
                ));
            }
            parsed
        }
    };

    match spec.get("keySize") {
        None | Some(Value::Null) => {}
        Some(value) => match value.as_u64() {
            Some(size) => {
                if let Some(algorithm) = algorithm
                    && !algorithm.accepts_key_size(size)
                {
                    errors.push(FieldError::IncompatibleKeySize {
                        algorithm,
                        size,
                        allowed: algorithm.allowed_sizes().to_string(),
                    });
                }
            }
            None => errors.push(FieldError::invalid("keySize", "must be a positive integer")),
        },
    }

    if let Some(raw) = string_field(spec, "keyEncoding", errors) {
        match KeyEncoding::parse(raw) {
            None => errors.push(FieldError::invalid(
                "keyEncoding",
                format!("unsupported encoding {raw:?}, expected pkcs1 or pkcs8"),
            )),
            Some(KeyEncoding::Pkcs1) if algorithm == Some(KeyAlgorithm::Ecdsa) => {
                errors.push(FieldError::invalid(
                    "keyEncoding",
                    "pkcs1 is only valid for rsa keys",
                ));
            }
            Some(_) => {}
        }
    }
}

fn check_subject(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    let common_name = string_field(spec, "commonName", errors).unwrap_or_default();
    if common_name.len() > MAX_COMMON_NAME_LEN {
        errors.push(FieldError::invalid(
            "commonName",
            format!("must be at most {MAX_COMMON_NAME_LEN} characters"),
        ));
    }

    string_list(spec, "organization", errors);

    if spec.get("isCA").is_some_and(|v| !v.is_boolean() && !v.is_null()) {
        errors.push(FieldError::invalid("isCA", "must be a boolean"));
    }

    let has_identity = !common_name.trim().is_empty()
        || ["dnsNames", "uriSANs", "ipAddresses"]
            .iter()
            .any(|key| spec.get(*key).and_then(Value::as_array).is_some_and(|a| !a.is_empty()));
    if !has_identity {
        errors.push(FieldError::invalid(
            "commonName",
            "at least one of commonName, dnsNames, uriSANs or ipAddresses must be set",
        ));
    }
}

fn check_usages(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    let mut seen = HashSet::new();
    for (i, usage) in string_list(spec, "usages", errors) {
        if !KNOWN_USAGES.contains(&usage) {
            errors.push(FieldError::invalid(
                format!("usages[{i}]"),
                format!("unknown key usage {usage:?}"),
            ));
        } else if !seen.insert(usage) {
            errors.push(FieldError::invalid(
                format!("usages[{i}]"),
                format!("{usage:?} is listed more than once"),
            ));
        }
    }
}

fn check_sans(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    for (i, name) in string_list(spec, "dnsNames", errors) {
        if !is_valid_dns_name(name) {
            errors.push(FieldError::invalid(
                format!("dnsNames[{i}]"),
                format!("{name:?} is not a valid DNS name"),
            ));
        }
    }

    for (i, uri) in string_list(spec, "uriSANs", errors) {
        if let Err(e) = url::Url::parse(uri) {
            errors.push(FieldError::invalid(
                format!("uriSANs[{i}]"),
                format!("{uri:?} is not an absolute URI: {e}"),
            ));
        }
    }

    for (i, ip) in string_list(spec, "ipAddresses", errors) {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(FieldError::invalid(
                format!("ipAddresses[{i}]"),
                format!("{ip:?} is not a valid IPv4 or IPv6 address"),
            ));
        }
    }
}

fn check_issuer_ref(spec: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    match spec.get("issuerRef") {
        None | Some(Value::Null) => errors.push(FieldError::invalid("issuerRef", "must be set")),
        Some(Value::Object(issuer_ref)) => {
            for key in ["name", "kind", "group"] {
                match issuer_ref.get(key).and_then(Value::as_str) {
                    Some(s) if !s.trim().is_empty() => {}
                    _ => errors.push(FieldError::invalid(
                        format!("issuerRef.{key}"),
                        "must be a non-empty string",
                    )),
                }
            }
        }
        Some(_) => errors.push(FieldError::invalid("issuerRef", "must be an object")),
    }
}

/// Read an optional string field, recording a type error if it isn't one
fn string_field<'a>(
    spec: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    match spec.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.push(FieldError::invalid(field, "must be a string"));
            None
        }
    }
}

/// Read an optional list of strings, recording type errors per entry
fn string_list<'a>(
    spec: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Vec<(usize, &'a str)> {
    match spec.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item.as_str() {
                Some(s) => Some((i, s)),
                None => {
                    errors.push(FieldError::invalid(format!("{field}[{i}]"), "must be a string"));
                    None
                }
            })
            .collect(),
        Some(_) => {
            errors.push(FieldError::invalid(field, "must be a list of strings"));
            Vec::new()
        }
    }
}

fn require_string(body: &Map<String, Value>, path: &str, key: &str, errors: &mut Vec<FieldError>) {
    match body.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => {}
        _ => errors.push(FieldError::invalid(path, "must be a non-empty string")),
    }
}

fn has_type_error(errors: &[FieldError], field: &str) -> bool {
    errors.iter().any(|e| e.field() == field)
}
