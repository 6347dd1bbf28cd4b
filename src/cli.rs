use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "certprov")]
#[command(author = "certprov contributors")]
#[command(version)]
#[command(
    about = "Provision cert-manager and its certificates in dependency order",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate, order and apply every resource
    Apply(ApplyArgs),

    /// Show the staged provisioning plan
    Plan(SourceArgs),

    /// Check resource fields without contacting the cluster
    Validate(SourceArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Where the desired resources come from
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// TOML file declaring issuers and certificates (built-in example if omitted)
    #[arg(long, value_name = "FILE", env = "CERTPROV_PLAN")]
    pub plan: Option<PathBuf>,

    /// Directory holding crds/*.yaml and cert-manager.yaml
    #[arg(long, value_name = "DIR", env = "CERTPROV_MANIFESTS")]
    pub manifests: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Print the plan and validation report without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Apply against an in-memory cluster
    #[arg(long, conflicts_with = "dry_run")]
    pub simulate: bool,

    /// Parallel submissions per stage
    #[arg(short, long, env = "CERTPROV_JOBS")]
    pub jobs: Option<usize>,

    /// Attempts per request for transient failures
    #[arg(long, env = "CERTPROV_RETRIES")]
    pub retries: Option<u32>,

    /// Kubeconfig to use (KUBECONFIG or ~/.kube/config if omitted)
    #[arg(long, value_name = "FILE", env = "CERTPROV_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Wait for bundled deployments to become available
    #[arg(long)]
    pub wait_ready: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}
