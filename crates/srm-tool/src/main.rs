// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// srm — operator tool for a device's security resources.
//
// Entry point. Initialises logging, brings a `SecurityContext` up against the
// data directory, runs one command and shuts the context down again.

mod cli;
mod data_dir;

use std::path::Path;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use srm_core::config::CONFIG_FILE;
use srm_core::error::Result;
use srm_core::provisioning::DeviceState;
use srm_core::request::Method;
use srm_core::SrmConfig;
use srm_security::{SecurityContext, generate_default_acl};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cli::{CheckArgs, Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(match cli.log_level.as_deref() {
            Some(filter) => EnvFilter::new(filter),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        })
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "srm failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let dir = data_dir::resolve(cli.data_dir.as_deref());
    match cli.command {
        Commands::Init { force } => init(&dir, force),
        Commands::DefaultAcl => print_json(&generate_default_acl()),
        Commands::Inspect => with_context(&dir, |context| print_json(&context.snapshot())),
        Commands::Transition { state } => with_context(&dir, |context| transition(context, state)),
        Commands::Reset => with_context(&dir, |context| transition(context, DeviceState::Reset)),
        Commands::Check(args) => with_context(&dir, |context| check(context, &args)),
    }
}

fn init(dir: &Path, force: bool) -> Result<ExitCode> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        warn!(path = %path.display(), "configuration already exists; pass --force to replace it");
        return Ok(ExitCode::FAILURE);
    }
    std::fs::create_dir_all(dir)?;
    let config = SrmConfig {
        device_id: Uuid::new_v4(),
        storage_dir: dir.to_path_buf(),
        ..SrmConfig::default()
    };
    config.save(&path)?;
    info!(path = %path.display(), device = %config.device_id, "configuration written");
    print_json(&config)
}

fn with_context(dir: &Path, command: impl FnOnce(&SecurityContext) -> Result<ExitCode>) -> Result<ExitCode> {
    let config = SrmConfig::load_or_default(dir);
    let (context, outcome) = SecurityContext::bring_up(&config)?;
    if outcome.is_degraded() {
        warn!(?outcome, "running on default security resources");
    }
    let code = command(&context)?;
    context.shutdown()?;
    Ok(code)
}

fn transition(context: &SecurityContext, target: DeviceState) -> Result<ExitCode> {
    let response = context.request_transition(target)?;
    let report = json!({
        "result": response.result.to_string(),
        "status": response.result.coap_status(Method::Post).to_string(),
        "pstat": context.pstat(),
    });
    print_json(&report)?;
    Ok(if response.result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(context: &SecurityContext, args: &CheckArgs) -> Result<ExitCode> {
    let allowed = context.check_access(&args.subject, &args.href, args.permission, Utc::now());
    print_json(&json!({
        "subject": args.subject.to_string(),
        "href": args.href,
        "permission": args.permission,
        "allowed": allowed,
    }))?;
    Ok(if allowed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_json(value: &impl Serialize) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}
