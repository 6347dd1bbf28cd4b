//! Execution engine: applies a staged plan against a cluster
//!
//! Every resource moves through
//! `Pending -> Validated -> Resolved -> Submitted -> Applied | AlreadyExists | Failed`,
//! or is `Skipped` when the run is cancelled or aborted before it starts.
//! Stages run strictly one after another; resources inside a stage go through
//! a rayon pool in parallel.

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::{ClusterConnection, ConnectionError, SubmitOutcome};
use crate::context::{CancelToken, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::{self, PlannedResource, ProvisioningPlan};
use crate::resource::{ResourceDocument, ResourceId, ResourceRef};
use crate::retry::{LogRetry, with_retry};
use crate::types::{
    AbortReason, ExecuteOptions, FailureKind, Outcome, ProvisioningResult, ResourceOutcome,
};
use crate::validate::validate;

/// Drives documents into a cluster in dependency order
pub struct ProvisioningEngine<'c> {
    connection: &'c dyn ClusterConnection,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl<'c> ProvisioningEngine<'c> {
    pub fn new(connection: &'c dyn ClusterConnection, options: ExecuteOptions) -> Self {
        Self {
            connection,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Plan and apply a set of documents
    ///
    /// Fails without touching the cluster when no valid order exists.
    pub fn provision<P: ProgressCallback>(
        &self,
        documents: Vec<ResourceDocument>,
        progress: &mut P,
    ) -> Result<ProvisioningResult> {
        let plan = planner::plan(documents)?;
        self.execute(&plan, progress)
    }

    /// Apply a plan stage by stage
    ///
    /// Per-resource failures are recorded in the result; only a worker pool
    /// that cannot be started is returned as an error.
    pub fn execute<P: ProgressCallback>(
        &self,
        plan: &ProvisioningPlan,
        progress: &mut P,
    ) -> Result<ProvisioningResult> {
        let mut outcomes: HashMap<ResourceId, Outcome> = HashMap::new();

        // Pre-flight: nothing is sent until every document has been checked
        for resource in plan.resources() {
            let id = resource.id();
            match validate(&resource.document) {
                Ok(()) => log::debug!("{id}: pending -> validated"),
                Err(errors) => {
                    log::debug!("{id}: pending -> failed ({} field errors)", errors.len());
                    let outcome = Outcome::failed(FailureKind::Validation { errors });
                    outcomes.insert(id.clone(), outcome);
                    fail_dependents(plan, &id, &mut outcomes);
                }
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("provision-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let abort = AtomicBool::new(false);
        let mut aborted: Option<AbortReason> = None;

        for stage in plan.stages() {
            if aborted.is_none() && self.cancel.is_cancelled() {
                aborted = Some(AbortReason::Cancelled);
            }
            // Stages that are only being skipped are reported without a start
            let started = aborted.is_none();
            if started {
                progress.on_stage_start(stage);
            }

            let runnable: Vec<&PlannedResource> = stage
                .resources
                .iter()
                .filter(|r| !outcomes.contains_key(&r.id()))
                .collect();

            if aborted.is_none() && !runnable.is_empty() {
                log::info!(
                    "Stage {}: applying {} resource(s)",
                    stage.index + 1,
                    runnable.len()
                );
                let results: Vec<(ResourceId, Outcome)> = pool.install(|| {
                    runnable
                        .par_iter()
                        .map(|resource| (resource.id(), self.run_resource(resource, &abort)))
                        .collect()
                });

                for (id, outcome) in results {
                    if outcome.is_failure() {
                        fail_dependents(plan, &id, &mut outcomes);
                    }
                    outcomes.insert(id, outcome);
                }

                if abort.load(Ordering::SeqCst) {
                    aborted = Some(AbortReason::AuthenticationFailure);
                } else if self.cancel.is_cancelled() {
                    aborted = Some(AbortReason::Cancelled);
                }
            }

            for resource in &stage.resources {
                let id = resource.id();
                let outcome = outcomes
                    .entry(id.clone())
                    .or_insert_with(|| Outcome::skipped(skip_reason(aborted)))
                    .clone();
                progress.on_resource_complete(&ResourceOutcome {
                    id,
                    stage: stage.index,
                    outcome,
                });
            }
            if started {
                progress.on_stage_complete(stage);
            }
        }

        if let Some(reason) = aborted {
            log::warn!("Run aborted: {reason}");
        }

        let mut ordered = Vec::with_capacity(plan.total_resources());
        for stage in plan.stages() {
            for resource in &stage.resources {
                let id = resource.id();
                let outcome = outcomes
                    .remove(&id)
                    .unwrap_or_else(|| Outcome::skipped(skip_reason(aborted)));
                ordered.push(ResourceOutcome {
                    id,
                    stage: stage.index,
                    outcome,
                });
            }
        }

        Ok(ProvisioningResult {
            outcomes: ordered,
            aborted,
        })
    }

    /// Resolve, submit and optionally wait for one resource
    fn run_resource(&self, resource: &PlannedResource, abort: &AtomicBool) -> Outcome {
        let id = resource.id();
        if self.cancel.is_cancelled() {
            log::debug!("{id}: validated -> skipped (cancelled)");
            return Outcome::skipped(skip_reason(Some(AbortReason::Cancelled)));
        }
        if abort.load(Ordering::SeqCst) {
            log::debug!("{id}: validated -> skipped (aborted)");
            return Outcome::skipped(skip_reason(Some(AbortReason::AuthenticationFailure)));
        }

        let label = id.to_string();
        let retry_log = LogRetry(&label);

        for reference in &resource.deferred {
            match self.lookup(reference, &retry_log) {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("{id}: validated -> failed (dangling {reference})");
                    return Outcome::failed(FailureKind::DanglingReference {
                        reference: reference.clone(),
                    });
                }
                Err(e) => return self.connection_failure(&id, e, abort),
            }
        }
        log::debug!("{id}: validated -> resolved");

        // A failed attempt may still have created objects before the retry found them
        let mut partially_applied = false;
        let submitted = with_retry(&self.options.retry, Some(&retry_log), || {
            let attempt = self.connection.submit(&resource.document);
            partially_applied |= attempt.is_err();
            attempt
        });
        let outcome = match submitted {
            Ok(SubmitOutcome::AlreadyExists) if partially_applied => SubmitOutcome::Applied,
            Ok(outcome) => outcome,
            Err(e) => return self.connection_failure(&id, e, abort),
        };
        log::debug!("{id}: resolved -> submitted");

        if self.options.wait_ready && resource.document.kind().is_bundle() {
            log::debug!("{id}: waiting up to {:?} for readiness", self.options.ready_timeout);
            if let Err(e) = self
                .connection
                .watch_ready(&resource.document, self.options.ready_timeout)
            {
                return self.connection_failure(&id, e, abort);
            }
        }

        match outcome {
            SubmitOutcome::Applied => log::debug!("{id}: submitted -> applied"),
            SubmitOutcome::AlreadyExists => log::debug!("{id}: submitted -> already exists"),
        }
        outcome.into()
    }

    /// Whether a deferred reference exists in the cluster
    ///
    /// Bundles never exist as cluster objects, so references to them can only
    /// be satisfied locally.
    fn lookup(
        &self,
        reference: &ResourceRef,
        retry_log: &LogRetry<'_>,
    ) -> std::result::Result<bool, ConnectionError> {
        if reference.api_kind().is_some_and(|k| k.is_bundle()) {
            return Ok(false);
        }
        let found = with_retry(&self.options.retry, Some(retry_log), || {
            self.connection.get(reference)
        })?;
        Ok(found.is_some())
    }

    fn connection_failure(
        &self,
        id: &ResourceId,
        error: ConnectionError,
        abort: &AtomicBool,
    ) -> Outcome {
        if error.is_fatal() {
            abort.store(true, Ordering::SeqCst);
        }
        log::debug!("{id}: failed ({error})");
        Outcome::failed(error)
    }
}

/// Mark everything downstream of a failed resource, keeping earlier outcomes
fn fail_dependents(
    plan: &ProvisioningPlan,
    failed: &ResourceId,
    outcomes: &mut HashMap<ResourceId, Outcome>,
) {
    for dependent in plan.transitive_dependents(failed) {
        outcomes.entry(dependent).or_insert_with(|| {
            Outcome::failed(FailureKind::UpstreamFailed {
                upstream: failed.clone(),
            })
        });
    }
}

fn skip_reason(aborted: Option<AbortReason>) -> String {
    match aborted {
        Some(AbortReason::AuthenticationFailure) => {
            "run aborted after an authentication failure".into()
        }
        Some(AbortReason::Cancelled) => "run cancelled".into(),
        None => "not started".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::memory::{Fault, InMemoryCluster};
    use crate::planner::Stage;
    use crate::resource::ApiKind;
    use crate::retry::RetryConfig;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 4,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: Duration::from_millis(5),
            },
            wait_ready: false,
            ready_timeout: Duration::from_secs(1),
        }
    }

    fn spec(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn crds() -> ResourceDocument {
        ResourceDocument::crd_bundle(
            "cert-manager-crds",
            vec![json!({
                "apiVersion": "apiextensions.k8s.io/v1beta1",
                "kind": "CustomResourceDefinition",
                "metadata": { "name": "certificates.cert-manager.io" },
            })],
        )
    }

    fn controller() -> ResourceDocument {
        ResourceDocument::controller_bundle(
            "cert-manager",
            vec![
                json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": "cert-manager" },
                }),
                json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": { "name": "cert-manager", "namespace": "cert-manager" },
                    "spec": { "replicas": 1 },
                }),
            ],
        )
    }

    fn issuer(name: &str) -> ResourceDocument {
        ResourceDocument::issuer(name, spec(json!({ "selfSigned": {} })))
    }

    fn certificate(name: &str, issuer: &str) -> ResourceDocument {
        ResourceDocument::certificate(
            name,
            spec(json!({
                "secretName": format!("{name}-tls"),
                "duration": "2160h",
                "renewBefore": "360h",
                "commonName": "example.com",
                "keyAlgorithm": "rsa",
                "keySize": 2048,
                "keyEncoding": "pkcs1",
                "dnsNames": ["example.com", "www.example.com"],
                "issuerRef": { "name": issuer, "kind": "Issuer", "group": "cert-manager.io" },
            })),
        )
    }

    fn four_documents() -> Vec<ResourceDocument> {
        vec![
            crds(),
            controller(),
            issuer("selfsigned-issuer"),
            certificate("example-com", "selfsigned-issuer"),
        ]
    }

    fn id(kind: ApiKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn run(cluster: &InMemoryCluster, docs: Vec<ResourceDocument>) -> ProvisioningResult {
        ProvisioningEngine::new(cluster, options())
            .provision(docs, &mut NoProgress)
            .unwrap()
    }

    #[test]
    fn test_end_to_end_four_stages_applied() {
        let cluster = InMemoryCluster::new();
        let result = run(&cluster, four_documents());

        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.aborted, None);
        let stages: Vec<usize> = result.outcomes.iter().map(|o| o.stage).collect();
        assert_eq!(stages, vec![0, 1, 2, 3]);
        assert!(result.outcomes.iter().all(|o| o.outcome == Outcome::Applied));
        assert_eq!(
            cluster.submissions(),
            vec![
                id(ApiKind::CrdBundle, "cert-manager-crds"),
                id(ApiKind::ControllerBundle, "cert-manager"),
                id(ApiKind::Issuer, "selfsigned-issuer"),
                id(ApiKind::Certificate, "example-com"),
            ]
        );
        // crd + namespace + deployment + issuer + certificate
        assert_eq!(cluster.len(), 5);
    }

    #[test]
    fn test_second_run_reports_already_exists() {
        let cluster = InMemoryCluster::new();
        run(&cluster, four_documents());
        let second = run(&cluster, four_documents());

        assert!(second.is_success());
        assert!(second.outcomes.iter().all(|o| o.outcome == Outcome::AlreadyExists));
        assert_eq!(second.summary().already_exists, 4);
    }

    #[test]
    fn test_dangling_reference() {
        let cluster = InMemoryCluster::new();
        let mut docs = four_documents();
        docs.pop();
        docs.push(certificate("example-com", "ca-issuer"));
        let result = run(&cluster, docs);

        let outcome = result.get(&id(ApiKind::Certificate, "example-com")).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failed { reason: FailureKind::DanglingReference { reference } }
                if reference.name == "ca-issuer"
        ));
        assert_eq!(result.get(&id(ApiKind::Issuer, "selfsigned-issuer")), Some(&Outcome::Applied));
        assert_eq!(result.exit_code(), 3);
        assert_eq!(cluster.get_calls(), 1);
        assert!(!cluster.submissions().contains(&id(ApiKind::Certificate, "example-com")));
    }

    #[test]
    fn test_deferred_reference_found_in_cluster() {
        let cluster = InMemoryCluster::new();
        cluster.insert(json!({
            "apiVersion": "cert-manager.io/v1alpha2",
            "kind": "Issuer",
            "metadata": { "name": "ca-issuer", "namespace": "default" },
            "spec": { "ca": { "secretName": "ca-key-pair" } },
        }));
        let docs = vec![crds(), controller(), certificate("example-com", "ca-issuer")];
        let result = run(&cluster, docs);
        assert!(result.is_success(), "{result:?}");
    }

    #[test]
    fn test_reference_to_missing_bundle_is_dangling_without_lookup() {
        let cluster = InMemoryCluster::new();
        let doc = issuer("selfsigned-issuer")
            .with_dependency(ResourceRef::to(ApiKind::ControllerBundle, "cert-manager"));
        let result = run(&cluster, vec![doc]);
        assert_eq!(result.exit_code(), 3);
        assert_eq!(cluster.get_calls(), 0);
    }

    #[test]
    fn test_validation_failure_propagates_upstream() {
        let cluster = InMemoryCluster::new();
        let broken = ResourceDocument::issuer("selfsigned-issuer", spec(json!({})));
        let result = run(
            &cluster,
            vec![crds(), controller(), broken, certificate("example-com", "selfsigned-issuer")],
        );

        assert!(matches!(
            result.get(&id(ApiKind::Issuer, "selfsigned-issuer")),
            Some(Outcome::Failed { reason: FailureKind::Validation { .. } })
        ));
        assert_eq!(
            result.get(&id(ApiKind::Certificate, "example-com")),
            Some(&Outcome::failed(FailureKind::UpstreamFailed {
                upstream: id(ApiKind::Issuer, "selfsigned-issuer"),
            }))
        );
        assert_eq!(
            result.get(&id(ApiKind::CrdBundle, "cert-manager-crds")),
            Some(&Outcome::Applied)
        );
        assert_eq!(result.exit_code(), 2);
        assert_eq!(cluster.submit_calls(), 2);
    }

    #[test]
    fn test_rejection_not_retried_and_propagates() {
        let cluster = InMemoryCluster::new().with_fault(
            "cert-manager",
            Fault::Reject {
                message: "namespaces \"cert-manager\" is forbidden".into(),
            },
        );
        let result = run(&cluster, four_documents());

        assert!(matches!(
            result.get(&id(ApiKind::ControllerBundle, "cert-manager")),
            Some(Outcome::Failed { reason: FailureKind::Rejected { .. } })
        ));
        for name in ["selfsigned-issuer", "example-com"] {
            let outcome = result
                .outcomes
                .iter()
                .find(|o| o.id.name == name)
                .map(|o| &o.outcome);
            assert!(matches!(
                outcome,
                Some(Outcome::Failed { reason: FailureKind::UpstreamFailed { upstream } })
                    if upstream.name == "cert-manager"
            ));
        }
        // crds once, controller once
        assert_eq!(cluster.submit_calls(), 2);
        assert_eq!(result.exit_code(), 4);
    }

    #[test]
    fn test_unreachable_retried_until_success() {
        let cluster =
            InMemoryCluster::new().with_fault("selfsigned-issuer", Fault::Unreachable { times: 2 });
        let result = run(&cluster, four_documents());
        assert!(result.is_success());
        assert_eq!(cluster.submit_calls(), 6);
    }

    #[test]
    fn test_unreachable_exhausts_attempts() {
        let cluster = InMemoryCluster::new()
            .with_fault("selfsigned-issuer", Fault::Unreachable { times: 10 });
        let result = run(&cluster, four_documents());
        assert!(matches!(
            result.get(&id(ApiKind::Issuer, "selfsigned-issuer")),
            Some(Outcome::Failed { reason: FailureKind::Unreachable { .. } })
        ));
        // crds, controller, three issuer attempts; the certificate is never sent
        assert_eq!(cluster.submit_calls(), 5);
        assert_eq!(result.exit_code(), 5);
    }

    #[test]
    fn test_authentication_failure_aborts_run() {
        let cluster =
            InMemoryCluster::new().with_fault("selfsigned-issuer", Fault::AuthenticationFailure);
        let mut docs = four_documents();
        docs.push(issuer("other-issuer"));
        docs.push(certificate("other", "other-issuer"));
        let result = run(&cluster, docs);

        assert_eq!(result.aborted, Some(AbortReason::AuthenticationFailure));
        assert!(matches!(
            result.get(&id(ApiKind::Issuer, "selfsigned-issuer")),
            Some(Outcome::Failed { reason: FailureKind::AuthenticationFailure { .. } })
        ));
        assert!(matches!(
            result.get(&id(ApiKind::Certificate, "example-com")),
            Some(Outcome::Failed { reason: FailureKind::UpstreamFailed { .. } })
        ));
        assert!(matches!(
            result.get(&id(ApiKind::Certificate, "other")),
            Some(Outcome::Skipped { .. })
        ));
        assert_eq!(result.outcomes.len(), 6);
        assert_eq!(result.exit_code(), 6);
    }

    #[test]
    fn test_cancelled_before_start_skips_everything() {
        let cluster = InMemoryCluster::new();
        let engine = ProvisioningEngine::new(&cluster, options());
        engine.cancel_token().cancel();
        let result = engine.provision(four_documents(), &mut NoProgress).unwrap();

        assert_eq!(result.aborted, Some(AbortReason::Cancelled));
        assert!(result.outcomes.iter().all(|o| matches!(o.outcome, Outcome::Skipped { .. })));
        assert_eq!(cluster.submit_calls(), 0);
        assert_eq!(result.exit_code(), 8);
    }

    #[test]
    fn test_wait_ready_timeout_fails_bundle() {
        let cluster = InMemoryCluster::new().with_fault("cert-manager", Fault::NeverReady);
        let engine = ProvisioningEngine::new(
            &cluster,
            ExecuteOptions {
                wait_ready: true,
                ..options()
            },
        );
        let result = engine.provision(four_documents(), &mut NoProgress).unwrap();

        assert!(matches!(
            result.get(&id(ApiKind::ControllerBundle, "cert-manager")),
            Some(Outcome::Failed { reason: FailureKind::Unreachable { .. } })
        ));
        assert_eq!(result.summary().failed, 3);
    }

    #[test]
    fn test_cycle_submits_nothing() {
        let cluster = InMemoryCluster::new();
        let a = issuer("a").with_dependency(ResourceRef::to(ApiKind::Issuer, "b"));
        let b = issuer("b").with_dependency(ResourceRef::to(ApiKind::Issuer, "a"));
        let err = ProvisioningEngine::new(&cluster, options())
            .provision(vec![a, b], &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert_eq!(cluster.submit_calls(), 0);
    }

    #[test]
    fn test_progress_sees_every_resource() {
        #[derive(Default)]
        struct Recorder {
            stages: Vec<usize>,
            completed: Vec<String>,
            closed: usize,
        }

        impl ProgressCallback for Recorder {
            fn on_stage_start(&mut self, stage: &Stage) {
                self.stages.push(stage.index);
            }
            fn on_resource_complete(&mut self, outcome: &ResourceOutcome) {
                self.completed.push(outcome.id.name.clone());
            }
            fn on_stage_complete(&mut self, _stage: &Stage) {
                self.closed += 1;
            }
        }

        let cluster = InMemoryCluster::new();
        let mut recorder = Recorder::default();
        ProvisioningEngine::new(&cluster, options())
            .provision(four_documents(), &mut recorder)
            .unwrap();

        assert_eq!(recorder.stages, vec![0, 1, 2, 3]);
        assert_eq!(
            recorder.completed,
            vec!["cert-manager-crds", "cert-manager", "selfsigned-issuer", "example-com"]
        );
        assert_eq!(recorder.closed, 4);
    }

    /// Delegates to an in-memory cluster, with a hook run inside every submit
    type SubmitResult = std::result::Result<SubmitOutcome, ConnectionError>;

    struct Hooked<F> {
        inner: InMemoryCluster,
        on_submit: F,
    }

    impl<F> ClusterConnection for Hooked<F>
    where
        F: Fn(&InMemoryCluster, &ResourceDocument) -> SubmitResult + Send + Sync,
    {
        fn submit(&self, document: &ResourceDocument) -> SubmitResult {
            (self.on_submit)(&self.inner, document)
        }

        fn get(
            &self,
            reference: &ResourceRef,
        ) -> std::result::Result<Option<ResourceDocument>, ConnectionError> {
            self.inner.get(reference)
        }
    }

    #[test]
    fn test_cancel_mid_run_finishes_stage_and_skips_rest() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let connection = Hooked {
            inner: InMemoryCluster::new(),
            on_submit: move |inner: &InMemoryCluster, doc: &ResourceDocument| {
                let outcome = inner.submit(doc);
                if doc.kind() == ApiKind::CrdBundle {
                    trigger.cancel();
                }
                outcome
            },
        };
        let engine = ProvisioningEngine::new(&connection, options()).with_cancel_token(cancel);
        let result = engine.provision(four_documents(), &mut NoProgress).unwrap();

        assert_eq!(result.aborted, Some(AbortReason::Cancelled));
        assert_eq!(
            result.get(&id(ApiKind::CrdBundle, "cert-manager-crds")),
            Some(&Outcome::Applied)
        );
        for o in &result.outcomes[1..] {
            assert_eq!(o.outcome, Outcome::skipped("run cancelled"), "{}", o.id);
        }
        assert_eq!(connection.inner.submit_calls(), 1);
        assert_eq!(result.exit_code(), 8);
    }

    #[test]
    fn test_stage_parallelism_bounded_by_jobs() {
        use std::sync::atomic::AtomicUsize;
        use std::thread;

        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let connection = Hooked {
            inner: InMemoryCluster::new(),
            on_submit: |inner: &InMemoryCluster, doc: &ResourceDocument| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                inner.submit(doc)
            },
        };
        let docs: Vec<ResourceDocument> = (0..8).map(|i| issuer(&format!("issuer-{i}"))).collect();
        let engine = ProvisioningEngine::new(&connection, ExecuteOptions { jobs: 2, ..options() });
        let result = engine.provision(docs, &mut NoProgress).unwrap();

        assert!(result.is_success());
        assert_eq!(connection.inner.submit_calls(), 8);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "{peak} submissions ran at once");
        assert!(peak >= 1);
    }

    #[test]
    fn test_retry_after_partial_apply_reports_applied() {
        let failed_once = AtomicBool::new(false);
        let connection = Hooked {
            inner: InMemoryCluster::new(),
            on_submit: |inner: &InMemoryCluster, doc: &ResourceDocument| {
                let outcome = inner.submit(doc);
                if !failed_once.swap(true, Ordering::SeqCst) {
                    // objects were written but the response was lost
                    return Err(ConnectionError::Unreachable("connection reset".into()));
                }
                outcome
            },
        };
        let engine = ProvisioningEngine::new(&connection, options());
        let result = engine.provision(vec![crds()], &mut NoProgress).unwrap();

        assert_eq!(
            result.get(&id(ApiKind::CrdBundle, "cert-manager-crds")),
            Some(&Outcome::Applied)
        );
        assert_eq!(connection.inner.submit_calls(), 2);
    }

    #[test]
    fn test_skipped_stages_are_not_started() {
        #[derive(Default)]
        struct Recorder {
            started: Vec<usize>,
            completed: usize,
        }

        impl ProgressCallback for Recorder {
            fn on_stage_start(&mut self, stage: &Stage) {
                self.started.push(stage.index);
            }
            fn on_resource_complete(&mut self, _outcome: &ResourceOutcome) {
                self.completed += 1;
            }
            fn on_stage_complete(&mut self, _stage: &Stage) {}
        }

        let cluster = InMemoryCluster::new();
        let engine = ProvisioningEngine::new(&cluster, options());
        engine.cancel_token().cancel();
        let mut recorder = Recorder::default();
        engine.provision(four_documents(), &mut recorder).unwrap();

        assert!(recorder.started.is_empty());
        assert_eq!(recorder.completed, 4);
    }
}
