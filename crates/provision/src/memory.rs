//! Deterministic in-process cluster
//!
//! Stores submitted objects in memory and replays scripted faults. Used by the
//! test suite and by the CLI's simulate mode.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::connection::{ClusterConnection, ConnectionError, SubmitOutcome};
use crate::resource::{CERT_MANAGER_GROUP, ResourceDocument, ResourceId, ResourceRef};

/// A scripted failure for calls naming a given document or reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The next `times` calls fail as unreachable, later ones succeed
    Unreachable { times: u32 },
    /// Every submission is rejected with this message
    Reject { message: String },
    /// Every call fails authentication
    AuthenticationFailure,
    /// Submissions succeed but readiness never arrives
    NeverReady,
}

/// `(apiVersion, kind, namespace, name)`
type ObjectKey = (String, String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, Value>,
    faults: HashMap<String, Fault>,
    submissions: Vec<ResourceId>,
    submit_calls: usize,
    get_calls: usize,
}

/// Cluster connection backed by a map
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a fault for calls naming `name`
    pub fn with_fault(self, name: impl Into<String>, fault: Fault) -> Self {
        self.lock().faults.insert(name.into(), fault);
        self
    }

    /// Seed an object as if it had been created outside this run
    pub fn insert(&self, object: Value) -> bool {
        let Some(key) = object_key(&object) else {
            return false;
        };
        self.lock().objects.insert(key, object);
        true
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Documents whose submission reached the store, in completion order
    pub fn submissions(&self) -> Vec<ResourceId> {
        self.lock().submissions.clone()
    }

    /// Calls to `submit`, including failed ones
    pub fn submit_calls(&self) -> usize {
        self.lock().submit_calls
    }

    /// Calls to `get`, including failed ones
    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    /// Apply the scripted fault for `name`, consuming one unreachable count
    fn check_fault(&mut self, name: &str, submitting: bool) -> Result<(), ConnectionError> {
        let Some(fault) = self.faults.get_mut(name) else {
            return Ok(());
        };
        match fault {
            Fault::Unreachable { times } if *times > 0 => {
                *times -= 1;
                Err(ConnectionError::Unreachable(format!(
                    "connection to {name} timed out"
                )))
            }
            Fault::Reject { message } if submitting => {
                Err(ConnectionError::Rejected(message.clone()))
            }
            Fault::AuthenticationFailure => Err(ConnectionError::AuthenticationFailure(
                "Unauthorized".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl ClusterConnection for InMemoryCluster {
    fn submit(&self, document: &ResourceDocument) -> Result<SubmitOutcome, ConnectionError> {
        let mut state = self.lock();
        state.submit_calls += 1;
        state.check_fault(document.name(), true)?;

        let mut changed = false;
        for manifest in document.to_manifests() {
            let key = object_key(&manifest).ok_or_else(|| {
                ConnectionError::Rejected(format!(
                    "object in {} is missing apiVersion, kind or metadata.name",
                    document.id()
                ))
            })?;
            if state.objects.get(&key) != Some(&manifest) {
                state.objects.insert(key, manifest);
                changed = true;
            }
        }

        state.submissions.push(document.id());
        Ok(if changed {
            SubmitOutcome::Applied
        } else {
            SubmitOutcome::AlreadyExists
        })
    }

    fn get(&self, reference: &ResourceRef) -> Result<Option<ResourceDocument>, ConnectionError> {
        let mut state = self.lock();
        state.get_calls += 1;
        state.check_fault(&reference.name, false)?;

        if reference.group != CERT_MANAGER_GROUP {
            return Ok(None);
        }
        let cluster_scoped = reference.kind == "ClusterIssuer";
        let found = state.objects.iter().find(|((api_version, kind, namespace, name), _)| {
            api_version.split('/').next() == Some(reference.group.as_str())
                && *kind == reference.kind
                && *name == reference.name
                && (cluster_scoped
                    || reference.namespace.as_deref().is_none_or(|ns| ns == namespace))
        });

        Ok(found.and_then(|(_, object)| ResourceDocument::from_object(object)))
    }

    fn watch_ready(
        &self,
        document: &ResourceDocument,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let state = self.lock();
        if state.faults.get(document.name()) == Some(&Fault::NeverReady) {
            return Err(ConnectionError::Unreachable(format!(
                "{} not ready after {}s",
                document.id(),
                timeout.as_secs()
            )));
        }
        Ok(())
    }
}

fn object_key(object: &Value) -> Option<ObjectKey> {
    let field = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let metadata = object.get("metadata");
    Some((
        field(object.get("apiVersion"))?,
        field(object.get("kind"))?,
        field(metadata.and_then(|m| m.get("namespace"))).unwrap_or_default(),
        field(metadata.and_then(|m| m.get("name")))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ApiKind;
    use serde_json::json;

    fn issuer(name: &str) -> ResourceDocument {
        ResourceDocument::issuer(name, json!({ "selfSigned": {} }).as_object().cloned().unwrap())
    }

    #[test]
    fn test_submit_is_idempotent() {
        let cluster = InMemoryCluster::new();
        let doc = issuer("selfsigned-issuer");
        assert_eq!(cluster.submit(&doc).unwrap(), SubmitOutcome::Applied);
        assert_eq!(cluster.submit(&doc).unwrap(), SubmitOutcome::AlreadyExists);
        assert_eq!(cluster.len(), 1);
    }

    #[test]
    fn test_changed_spec_is_applied() {
        let cluster = InMemoryCluster::new();
        cluster.submit(&issuer("ca")).unwrap();
        let spec = json!({ "ca": { "secretName": "ca-key" } }).as_object().cloned().unwrap();
        let changed = ResourceDocument::issuer("ca", spec);
        assert_eq!(cluster.submit(&changed).unwrap(), SubmitOutcome::Applied);
        assert_eq!(cluster.len(), 1);
    }

    #[test]
    fn test_get_finds_submitted_and_seeded_objects() {
        let cluster = InMemoryCluster::new();
        cluster.submit(&issuer("selfsigned-issuer")).unwrap();
        cluster.insert(json!({
            "apiVersion": "cert-manager.io/v1alpha2",
            "kind": "ClusterIssuer",
            "metadata": { "name": "letsencrypt" },
            "spec": { "acme": {} },
        }));

        let local = ResourceRef::to(ApiKind::Issuer, "selfsigned-issuer").in_namespace("default");
        assert!(cluster.get(&local).unwrap().is_some());

        let other_ns = ResourceRef::to(ApiKind::Issuer, "selfsigned-issuer").in_namespace("certs");
        assert!(cluster.get(&other_ns).unwrap().is_none());

        let cluster_issuer = ResourceRef::new("letsencrypt", "ClusterIssuer", CERT_MANAGER_GROUP)
            .in_namespace("default");
        let found = cluster.get(&cluster_issuer).unwrap().unwrap();
        assert_eq!(found.kind(), ApiKind::Issuer);

        assert_eq!(cluster.get_calls(), 3);
    }

    #[test]
    fn test_unreachable_fault_is_consumed() {
        let cluster = InMemoryCluster::new().with_fault("flaky", Fault::Unreachable { times: 2 });
        let doc = issuer("flaky");
        assert!(matches!(cluster.submit(&doc), Err(ConnectionError::Unreachable(_))));
        assert!(matches!(cluster.submit(&doc), Err(ConnectionError::Unreachable(_))));
        assert_eq!(cluster.submit(&doc).unwrap(), SubmitOutcome::Applied);
        assert_eq!(cluster.submit_calls(), 3);
        assert_eq!(cluster.submissions().len(), 1);
    }

    #[test]
    fn test_reject_fault_only_affects_submit() {
        let cluster = InMemoryCluster::new().with_fault(
            "bad",
            Fault::Reject {
                message: "admission webhook denied the request".into(),
            },
        );
        assert_eq!(
            cluster.submit(&issuer("bad")),
            Err(ConnectionError::Rejected("admission webhook denied the request".into()))
        );
        assert!(cluster.get(&ResourceRef::to(ApiKind::Issuer, "bad")).unwrap().is_none());
    }

    #[test]
    fn test_never_ready() {
        let cluster = InMemoryCluster::new().with_fault("cert-manager", Fault::NeverReady);
        let bundle = ResourceDocument::controller_bundle("cert-manager", vec![]);
        assert!(cluster.watch_ready(&bundle, Duration::from_secs(1)).is_err());
        assert!(cluster.watch_ready(&issuer("x"), Duration::from_secs(1)).is_ok());
    }
}
