//! Rights CLI
//!

#![deny(missing_docs)]

use std::{fs::File, io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use rights_core::{
    listing,
    logging::{self, error, info, LevelFilter},
    reconcile::{self, ReconcileError, ReconcileReport},
    store::PolicyStore,
    types::{Principal, Privilege},
    validate::{PrincipalOps, PrivilegeOps},
};

/// Rights CLI: idempotent management of the User Rights Assignment policy
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    #[clap(subcommand)]
    command: RightsCommand,
    #[clap(short, long)]
    log_level: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
enum RightsCommand {
    /// List every (privilege, principal) assignment on the target machine.
    List {
        /// Emit indented JSON instead of CSV.
        #[clap(long, value_parser, default_value = "false")]
        json: bool,
        /// Write the listing to this file instead of stdout.
        #[clap(long)]
        path: Option<PathBuf>,
        /// Target machine (local machine when omitted).
        #[clap(short, long)]
        system_name: Option<String>,
    },
    /// Reconcile the privileges held by one principal.
    Principal {
        /// The principal, as an account name or SID string.
        name: String,
        /// Privilege to grant. Repeatable.
        #[clap(long = "grant")]
        grants: Vec<String>,
        /// Privilege to revoke. Repeatable.
        #[clap(long = "revoke")]
        revocations: Vec<String>,
        /// Revoke every currently held privilege.
        #[clap(long)]
        revoke_all: bool,
        /// Revoke every currently held privilege not also being granted.
        #[clap(long)]
        revoke_others: bool,
        /// Report the delta without applying it.
        #[clap(long)]
        dry_run: bool,
        /// Target machine (local machine when omitted).
        #[clap(short, long)]
        system_name: Option<String>,
    },
    /// Reconcile the principals holding one privilege.
    Privilege {
        /// The privilege, e.g. SeServiceLogonRight.
        name: String,
        /// Principal to grant it to. Repeatable.
        #[clap(long = "grant")]
        grants: Vec<String>,
        /// Principal to revoke it from. Repeatable.
        #[clap(long = "revoke")]
        revocations: Vec<String>,
        /// Revoke from every current holder.
        #[clap(long)]
        revoke_all: bool,
        /// Revoke from every current holder not also being granted.
        #[clap(long)]
        revoke_others: bool,
        /// Revoke from current holders whose SID string matches this regex.
        #[clap(long)]
        revoke_pattern: Option<String>,
        /// Report the delta without applying it.
        #[clap(long)]
        dry_run: bool,
        /// Target machine (local machine when omitted).
        #[clap(short, long)]
        system_name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::setup(args.log_level);

    // Every error has produced its one logged event by the time run
    // returns; all that is left is the exit code.
    if run(args.command).await.is_err() {
        std::process::exit(1);
    }
}

async fn run(command: RightsCommand) -> Result<()> {
    match command {
        RightsCommand::List {
            json,
            path,
            system_name,
        } => {
            let target = system_name.clone().unwrap_or_else(|| "localhost".to_owned());
            list(json, &path, &system_name)
                .await
                .map_err(|e| fatal("list", &target, e))
        }
        RightsCommand::Principal {
            name,
            grants,
            revocations,
            revoke_all,
            revoke_others,
            dry_run,
            system_name,
        } => {
            let ops = PrincipalOps {
                principal: Principal(name),
                grants: grants.into_iter().map(Privilege).collect(),
                revocations: revocations.into_iter().map(Privilege).collect(),
                revoke_all,
                revoke_others,
                dry_run,
            };
            let subject = ops.principal.to_string();
            principal(ops, &system_name)
                .await
                .map_err(|e| fatal("principal", &subject, e))
        }
        RightsCommand::Privilege {
            name,
            grants,
            revocations,
            revoke_all,
            revoke_others,
            revoke_pattern,
            dry_run,
            system_name,
        } => {
            let ops = PrivilegeOps {
                privilege: Privilege(name),
                grants: grants.into_iter().map(Principal).collect(),
                revocations: revocations.into_iter().map(Principal).collect(),
                revoke_all,
                revoke_others,
                revoke_pattern,
                dry_run,
            };
            let subject = ops.privilege.to_string();
            privilege(ops, &system_name)
                .await
                .map_err(|e| fatal("privilege", &subject, e))
        }
    }
}

async fn principal(ops: PrincipalOps, system_name: &Option<String>) -> Result<()> {
    let mut store = connect_store(system_name)?;
    let report = reconcile::reconcile_principal(store.as_mut(), &ops).await?;
    finish(report)
}

async fn privilege(ops: PrivilegeOps, system_name: &Option<String>) -> Result<()> {
    let mut store = connect_store(system_name)?;
    let report = reconcile::reconcile_privilege(store.as_mut(), &ops).await?;
    finish(report)
}

async fn list(json: bool, path: &Option<PathBuf>, system_name: &Option<String>) -> Result<()> {
    info!(mode = "list", json, "listing assignments");
    let store = connect_store(system_name)?;
    let rows = listing::project(store.as_ref()).await?;

    let mut sink: Box<dyn Write> = match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("unable to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    if json {
        listing::write_json(&rows, &mut sink)?;
    } else {
        listing::write_csv(&rows, &mut sink)?;
    }
    Ok(())
}

/// Print every outcome, then fold the report into the process result.
fn finish(report: ReconcileReport) -> Result<()> {
    for outcome in &report.outcomes {
        println!("{outcome}");
    }
    if report.outcomes.is_empty() {
        info!("nothing to do");
    }
    if !report.succeeded() {
        bail!(
            "{} of {} operations failed",
            report.failed_count(),
            report.outcomes.len()
        );
    }
    Ok(())
}

/// Emit the one logged event for a fatal error, then hand it back for the
/// exit code. Validation rejections already got their event at the
/// rejection site and are not logged again.
fn fatal(mode: &str, subject: &str, e: anyhow::Error) -> anyhow::Error {
    if !already_logged(&e) {
        error!(mode, subject, error = %e, "fatal error");
    }
    e
}

fn already_logged(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::Validation(_))
    )
}

#[cfg(windows)]
fn connect_store(system_name: &Option<String>) -> Result<Box<dyn PolicyStore + Send>> {
    Ok(Box::new(rights_lsa::LsaPolicyStore::connect(
        system_name.as_deref(),
    )?))
}

#[cfg(not(windows))]
fn connect_store(_system_name: &Option<String>) -> Result<Box<dyn PolicyStore + Send>> {
    bail!("the security policy store is only available on Windows")
}
