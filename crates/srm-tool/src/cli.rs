// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line arguments for the `srm` operator tool.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use srm_core::provisioning::DeviceState;
use srm_core::types::{Permission, Subject, WILDCARD};
use uuid::Uuid;

/// Inspect and drive a device's security resources (ACL, SVC, PSTAT).
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding `srm.json` and the persisted resource blob.
    ///
    /// Defaults to `$XDG_DATA_HOME/srm`.
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `srm_security=trace`. Overrides `RUST_LOG`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a fresh `srm.json` with a new device id.
    Init {
        /// Overwrite an existing configuration.
        #[arg(long)]
        force: bool,
    },
    /// Print ACL, SVC and PSTAT as JSON.
    Inspect,
    /// Request a PSTAT transition (RESET, RFOTM, RFPRO, RFNOP or 0-3).
    Transition {
        #[arg(value_name = "STATE")]
        state: DeviceState,
    },
    /// Hard reset: default ACL, empty SVC, PSTAT in RESET.
    Reset,
    /// Decide whether a subject may access a resource.
    Check(CheckArgs),
    /// Print the compiled-in default ACL as JSON.
    DefaultAcl,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Requester UUID, or `*` for an unauthenticated peer.
    #[arg(long, value_parser = parse_subject)]
    pub subject: Subject,

    /// Resource href, e.g. `/light`.
    #[arg(long)]
    pub href: String,

    /// Requested permission in `crudn` letters, e.g. `ru`.
    #[arg(long = "perm", value_parser = parse_permission)]
    pub permission: Permission,
}

fn parse_subject(s: &str) -> Result<Subject, String> {
    if s == WILDCARD {
        return Ok(Subject::Anyone);
    }
    Uuid::parse_str(s)
        .map(Subject::Uuid)
        .map_err(|e| format!("`{s}` is neither `*` nor a UUID: {e}"))
}

fn parse_permission(s: &str) -> Result<Permission, String> {
    match Permission::from_letters(s) {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(format!("`{s}` is not a non-empty combination of c, r, u, d, n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_transition_by_short_name() {
        let cli = Cli::try_parse_from(["srm", "transition", "rfpro"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Transition {
                state: DeviceState::ReadyForProvisioning
            }
        ));
    }

    #[test]
    fn parses_access_check() {
        let cli = Cli::try_parse_from([
            "srm", "--data-dir", "/tmp/x", "check", "--subject", "*", "--href", "/light", "--perm", "ru",
        ])
        .unwrap();
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.subject, Subject::Anyone);
        assert_eq!(args.permission, Permission::RETRIEVE | Permission::UPDATE);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn rejects_bad_permission_letters() {
        assert!(Cli::try_parse_from(["srm", "check", "--subject", "*", "--href", "/x", "--perm", "q"]).is_err());
        assert!(Cli::try_parse_from(["srm", "check", "--subject", "*", "--href", "/x", "--perm", ""]).is_err());
    }
}
