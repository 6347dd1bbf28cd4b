//! Command implementations
//!
//! Each command returns the process exit code; `Err` is reserved for
//! problems outside the provisioning model (unreadable files, bad kubeconfig).

pub mod apply;
pub mod plan;
pub mod validate;

use anyhow::Result;
use colored::Colorize;
use provision::{FieldError, ProvisioningPlan, ProvisioningResult, ResourceDocument};

use crate::bundle;
use crate::cli::SourceArgs;
use crate::config::Settings;
use crate::desired;
use crate::ui;

/// Bundles followed by the desired issuers and certificates
pub fn load_documents(source: &SourceArgs, settings: &Settings) -> Result<Vec<ResourceDocument>> {
    let manifests_dir = settings.manifests_dir(source.manifests.as_deref());
    let mut documents = bundle::load_bundles(&manifests_dir)?;
    if documents.is_empty() {
        ui::warn(&format!(
            "No manifest bundles found in {}",
            manifests_dir.display()
        ));
    }

    match &source.plan {
        Some(path) => documents.extend(desired::load_plan(path)?),
        None => {
            log::info!("No plan file given, using the built-in example");
            documents.extend(desired::builtin());
        }
    }
    Ok(documents)
}

/// Print each stage and the resources in it
pub fn print_plan(plan: &ProvisioningPlan) {
    ui::header(&format!(
        "Provisioning plan: {} resource(s) in {} stage(s)",
        plan.total_resources(),
        plan.stages().len()
    ));
    for stage in plan.stages() {
        ui::section(&format!("Stage {}", stage.index + 1));
        for resource in &stage.resources {
            println!("  {} {}", "•".blue(), resource.id());
            if !resource.dependencies.is_empty() {
                let after: Vec<String> =
                    resource.dependencies.iter().map(ToString::to_string).collect();
                ui::dim(&format!("  after {}", after.join(", ")));
            }
            for reference in &resource.deferred {
                ui::dim(&format!("  expects {reference} in the cluster"));
            }
        }
    }
}

/// Validate every document and print a report; returns the number of invalid ones
pub fn print_validation(documents: &[ResourceDocument]) -> usize {
    ui::section("Validation");
    let mut invalid = 0;
    for document in documents {
        match provision::validate(document) {
            Ok(()) => println!("  {} {}", "✓".green(), document.id()),
            Err(errors) => {
                invalid += 1;
                println!("  {} {}", "✗".red(), document.id());
                print_field_errors(&errors);
            }
        }
    }
    invalid
}

fn print_field_errors(errors: &[FieldError]) {
    for error in errors {
        println!("      {}", error.to_string().red());
    }
}

/// Outcome table followed by summary counts
pub fn print_result(result: &ProvisioningResult) {
    ui::section("Results");
    let width = result
        .outcomes
        .iter()
        .map(|o| o.id.to_string().chars().count())
        .max()
        .unwrap_or(0);

    for o in &result.outcomes {
        let id = ui::pad(&o.id.to_string(), width);
        let symbol = ui::outcome_symbol(&o.outcome);
        let label = ui::outcome_label(&o.outcome);
        match &o.outcome {
            provision::Outcome::Failed { reason } => {
                println!("  {symbol} {id}  {label}");
                println!("      {}", reason.to_string().red());
            }
            provision::Outcome::Skipped { reason } => {
                println!("  {symbol} {id}  {label} {}", format!("({reason})").dimmed());
            }
            _ => println!("  {symbol} {id}  {label}"),
        }
    }

    let summary = result.summary();
    println!();
    if result.is_success() {
        ui::success(&format!("{} resource(s) provisioned", summary.total()));
    } else {
        ui::error(&format!("Provisioning finished with errors (exit code {})", result.exit_code()));
    }
    if summary.applied > 0 {
        println!("    • {} applied", summary.applied);
    }
    if summary.already_exists > 0 {
        println!("    • {} already up to date", summary.already_exists);
    }
    if summary.failed > 0 {
        println!("    • {} failed", summary.failed);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if let Some(reason) = result.aborted {
        ui::kv("aborted", &reason.to_string());
    }
}

/// Report a planning error and return its exit code
pub fn plan_failed(error: &provision::Error) -> u8 {
    ui::error(&format!("Cannot build a provisioning plan: {error}"));
    error.exit_code()
}
