//! # idprov
//!
//! Operator CLI for the provisioning workflows.
//!
//! ## Usage
//!
//! ```bash
//! export IDPROV_GRAPH_TOKEN=...   # Microsoft Graph access token
//! export IDPROV_ARM_TOKEN=...     # Azure Resource Manager access token
//!
//! idprov rbac --name sub-work-dev-01 --scope /subscriptions/<id>
//! idprov vm --name vm-webapp-01 --scope /subscriptions/<id>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachines/vm-webapp-01
//! idprov enrollment
//! idprov enrollment-import --csv members.csv
//! idprov hr-sync --csv workers.csv
//! ```
//!
//! `--dry-run` runs the workflow against an empty in-memory directory and
//! writes no artifacts.
//!
//! ## Exit Codes
//!
//! - `0`: every step succeeded (findings may still have been flagged)
//! - `1`: one or more steps failed; see the findings CSV
//! - `2`: the run was halted by a fatal error such as a missing prerequisite

use clap::{Parser, Subcommand};
use identity_provisioner::config::{ARM_TOKEN_ENV, Config, GRAPH_TOKEN_ENV};
use identity_provisioner::confirm::{
    AutoApprove, AutoDecline, ConfirmationProvider, TerminalConfirmation,
};
use identity_provisioner::directory::graph::tenant_from_token;
use identity_provisioner::directory::{DirectoryProvider, GraphDirectory, InMemoryDirectory};
use identity_provisioner::enrollment::read_membership_csv;
use identity_provisioner::hr_sync::read_workers_csv;
use identity_provisioner::{
    Orchestrator, ProvisionContext, ProvisionError, ProvisionReport, ProvisionResult,
};
use log::{error, info};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "idprov", version, about = "Identity-platform provisioning workflows", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "IDPROV_CONFIG")]
    config: Option<PathBuf>,

    /// Run against an in-memory directory; nothing reaches the tenant
    #[arg(long)]
    dry_run: bool,

    /// Approve every confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Directory for the mapping and findings CSV files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Group whose members approve the second stage of VM access requests
    #[arg(long, env = "IDPROV_VM_TEAM_APPROVER")]
    vm_team_approver: Option<String>,

    #[arg(long, env = GRAPH_TOKEN_ENV, hide_env_values = true)]
    graph_token: Option<String>,

    #[arg(long, env = ARM_TOKEN_ENV, hide_env_values = true)]
    arm_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision Reader/Contributor/Owner groups and packages for a subscription
    Rbac {
        /// Subscription name carrying an environment token, e.g. sub-work-dev-01
        #[arg(long)]
        name: String,
        /// Subscription scope, e.g. /subscriptions/<id>
        #[arg(long)]
        scope: String,
    },
    /// Provision Users/Admins login groups and packages for a virtual machine
    Vm {
        #[arg(long)]
        name: String,
        /// Resource ID of the virtual machine
        #[arg(long)]
        scope: String,
    },
    /// Create enrollment groups and report-only conditional-access policies
    Enrollment,
    /// Add users from a `upn,platform` CSV to the enrollment groups
    EnrollmentImport {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Onboard and offboard accounts from an HR export
    HrSync {
        #[arg(long)]
        csv: PathBuf,
    },
}

impl Command {
    fn needs_arm(&self) -> bool {
        matches!(self, Command::Rbac { .. } | Command::Vm { .. })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli).await {
        Ok(report) => {
            println!("{}", report.summary());
            if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("Run halted: {}", e);
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

async fn run(cli: &Cli) -> ProvisionResult<ProvisionReport> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(team) = &cli.vm_team_approver {
        config.vm_team_approver_group_id = Some(team.clone());
    }

    let context = ProvisionContext::from_config(&config);
    match &context.tenant_id {
        Some(tenant) => info!("Starting run {} for tenant {}", context.run_id, tenant),
        None => info!("Starting run {}", context.run_id),
    }

    let confirmation: Box<dyn ConfirmationProvider> = if cli.yes {
        Box::new(AutoApprove)
    } else if std::io::stdin().is_terminal() {
        Box::new(TerminalConfirmation)
    } else {
        Box::new(AutoDecline)
    };

    if cli.dry_run {
        let directory = InMemoryDirectory::new();
        directory
            .seed_authentication_strength(&config.authentication_strength)
            .await;
        let report = execute(Orchestrator::new(directory, confirmation, context), &cli.command).await?;
        info!("Dry run: no artifacts written");
        return Ok(report);
    }

    let graph_token = cli.graph_token.clone().ok_or_else(|| {
        ProvisionError::prerequisite(
            format!("{} is not set", GRAPH_TOKEN_ENV),
            "Export a Microsoft Graph access token or pass --graph-token.",
        )
    })?;
    let token_tenant = tenant_from_token(&graph_token)
        .map_err(|e| ProvisionError::remote("read Graph token", e))?;
    context.check_tenant(token_tenant.as_deref())?;
    let arm_token = match (&cli.arm_token, cli.command.needs_arm()) {
        (Some(token), _) => token.clone(),
        (None, false) => String::new(),
        (None, true) => {
            return Err(ProvisionError::prerequisite(
                format!("{} is not set", ARM_TOKEN_ENV),
                "Export an Azure Resource Manager access token or pass --arm-token.",
            ));
        }
    };

    let mut directory = GraphDirectory::new(config.endpoints(), graph_token, arm_token);
    if let Some(scopes) = &config.granted_scopes {
        directory = directory.with_granted_scopes(scopes.clone());
    }

    let report = execute(Orchestrator::new(directory, confirmation, context), &cli.command).await?;
    report.write_artifacts(&config.output_dir)?;
    Ok(report)
}

async fn execute<D, C>(
    orchestrator: Orchestrator<D, C>,
    command: &Command,
) -> ProvisionResult<ProvisionReport>
where
    D: DirectoryProvider,
    C: ConfirmationProvider,
{
    match command {
        Command::Rbac { name, scope } => orchestrator.provision_subscription(name, scope).await,
        Command::Vm { name, scope } => orchestrator.provision_virtual_machine(name, scope).await,
        Command::Enrollment => orchestrator.provision_enrollment().await,
        Command::EnrollmentImport { csv } => {
            let import = read_membership_csv(csv)?;
            orchestrator.import_enrollment_membership(&import).await
        }
        Command::HrSync { csv } => {
            let workers = read_workers_csv(csv)?;
            info!("Read {} worker record(s)", workers.len());
            orchestrator.sync_hr(&workers).await
        }
    }
}
