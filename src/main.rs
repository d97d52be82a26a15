//! `capcheck` — parse, format, and evaluate capability grammar strings
//! offline, without a running metadata service.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use nscap::cli::{Cli, Command};
use nscap::config::{ConfigSource, FigmentConfig};
use nscap::idmap;
use nscap::policy::{Mask, Policy, Request};
use nscap::setup_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match FigmentConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Format { caps } => run_format(&caps),
        Command::Check {
            caps,
            path,
            caller_uid,
            caller_gid,
            caller_gids,
            inode_uid,
            inode_gid,
            inode_mode,
            read,
            write,
            execute,
            chown,
            chgrp,
            set_vxattr,
            snapshot,
        } => run_check(
            &caps,
            &path,
            caller_uid,
            caller_gid,
            &caller_gids,
            inode_uid,
            inode_gid,
            &inode_mode,
            read,
            write,
            execute,
            chown,
            chgrp,
            set_vxattr,
            snapshot,
        ),
        Command::Idmap { caps, name } => run_idmap(&caps, &name, config).await,
    }
}

fn run_format(caps: &str) -> ExitCode {
    match Policy::parse(caps) {
        Ok(policy) => {
            println!("{}", policy.to_cap_string());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_check(
    caps: &str,
    path: &str,
    caller_uid: i64,
    caller_gid: u64,
    caller_gids: &[u64],
    inode_uid: i64,
    inode_gid: u64,
    inode_mode: &str,
    read: bool,
    write: bool,
    execute: bool,
    chown: Option<i64>,
    chgrp: Option<u64>,
    set_vxattr: bool,
    snapshot: bool,
) -> ExitCode {
    let policy = match Policy::parse(caps) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let mode = match u32::from_str_radix(inode_mode.trim_start_matches("0o"), 8) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("invalid --inode-mode `{inode_mode}`: {e}");
            return ExitCode::from(2);
        }
    };

    let mut mask = Mask::empty();
    if read {
        mask |= Mask::MAY_READ;
    }
    if write {
        mask |= Mask::MAY_WRITE;
    }
    if execute {
        mask |= Mask::MAY_EXECUTE;
    }
    if set_vxattr {
        mask |= Mask::MAY_SET_VXATTR;
    }
    if snapshot {
        mask |= Mask::MAY_SNAPSHOT;
    }
    if chown.is_some() {
        mask |= Mask::MAY_CHOWN;
    }
    if chgrp.is_some() {
        mask |= Mask::MAY_CHGRP;
    }

    let req = Request {
        inode_path: path,
        inode_uid,
        inode_gid,
        inode_mode: mode,
        caller_uid,
        caller_gid,
        caller_gid_list: Some(caller_gids),
        mask,
        new_uid: chown.unwrap_or(caller_uid),
        new_gid: chgrp.unwrap_or(caller_gid),
    };

    if policy.is_capable(&req) {
        println!("ALLOW");
        ExitCode::SUCCESS
    } else {
        println!("DENY");
        ExitCode::from(1)
    }
}

async fn run_idmap(caps: &str, name: &str, config: FigmentConfig) -> ExitCode {
    let mut policy = match Policy::parse(caps) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let config: Arc<dyn ConfigSource> = Arc::new(config);
    policy.attach_config(config);

    let (ids, valid) = idmap::update_ids(&mut policy, name).await;
    if !valid {
        eprintln!("identity remap failed for `{name}`");
        return ExitCode::from(1);
    }

    info!(caller = name, ids = ?ids, "resolved identity");
    println!("{}", policy.to_cap_string());
    ExitCode::SUCCESS
}
