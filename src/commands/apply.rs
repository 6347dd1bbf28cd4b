//! `certprov apply`

use anyhow::{Context as _, Result};
use colored::Colorize;
use kubekit::KubeClient;
use provision::{ClusterConnection, InMemoryCluster, ProvisioningEngine, ResourceDocument};

use super::{load_documents, plan_failed, print_plan, print_result, print_validation};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::Settings;
use crate::progress::StageProgress;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<u8> {
    let settings = Settings::load()?;
    let options = settings.execute_options(args);
    let mut documents = load_documents(&args.source, &settings)?;

    // Connect before planning so namespaced resources pick up the context's namespace
    let connection: Option<Box<dyn ClusterConnection>> = if args.dry_run {
        None
    } else if args.simulate {
        ui::info("Simulating against an in-memory cluster");
        Some(Box::new(InMemoryCluster::new()) as Box<dyn ClusterConnection>)
    } else {
        let kubeconfig = settings.kubeconfig(args.kubeconfig.as_deref());
        let client = KubeClient::connect(kubeconfig.as_deref(), settings.request_timeout())
            .context("Could not connect to the cluster")?;
        documents = with_default_namespace(documents, client.default_namespace());
        ui::kv("cluster", client.server());
        Some(Box::new(client) as Box<dyn ClusterConnection>)
    };

    let plan = match provision::plan(documents) {
        Ok(plan) => plan,
        Err(e) => return Ok(plan_failed(&e)),
    };
    print_plan(&plan);

    if ctx.verbose > 0 {
        ui::section("Options");
        ui::kv("jobs", &options.jobs.to_string());
        ui::kv("attempts", &options.retry.max_attempts.to_string());
        ui::kv("wait for bundles", &options.wait_ready.to_string());
    }

    let Some(connection) = connection else {
        let documents: Vec<ResourceDocument> =
            plan.resources().map(|r| r.document.clone()).collect();
        let invalid = print_validation(&documents);
        println!();
        ui::info("Dry run - no changes made");
        return Ok(if invalid == 0 { 0 } else { 2 });
    };

    if !args.yes && !args.simulate && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(0);
    }

    let engine = ProvisioningEngine::new(&*connection, options);
    let mut progress = StageProgress::new(plan.stages().len(), ctx.quiet);
    let result = engine.execute(&plan, &mut progress)?;

    print_result(&result);
    Ok(result.exit_code())
}

/// Place namespaced resources that don't name a namespace into `namespace`
fn with_default_namespace(
    documents: Vec<ResourceDocument>,
    namespace: &str,
) -> Vec<ResourceDocument> {
    documents
        .into_iter()
        .map(|d| {
            if d.kind().is_namespaced() && d.namespace().is_none() {
                d.in_namespace(namespace)
            } else {
                d
            }
        })
        .collect()
}

fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}
