//! Command-line interface for `capcheck`, an administrator tool for
//! inspecting and testing capability strings offline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parse, format, and evaluate capability grammar strings.
#[derive(Parser, Debug)]
#[command(name = "capcheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML), used by `idmap` for backend/LDAP
    /// parameters.
    #[arg(short, long, env = "NSCAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "NSCAP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json).
    #[arg(long, env = "NSCAP_LOG_FORMAT")]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a capability string and print its canonical re-parseable form.
    Format {
        /// The capability string to parse.
        caps: String,
    },

    /// Parse a capability string and evaluate `is_capable` against a
    /// synthetic request described by the remaining flags.
    Check {
        /// The capability string to parse.
        caps: String,

        /// Path of the inode being accessed (no leading `/`).
        #[arg(long, default_value = "")]
        path: String,

        /// The caller's uid.
        #[arg(long)]
        caller_uid: i64,

        /// The caller's primary gid.
        #[arg(long)]
        caller_gid: u64,

        /// The caller's supplementary gids, comma-separated.
        #[arg(long, value_delimiter = ',')]
        caller_gids: Vec<u64>,

        /// The inode's owning uid.
        #[arg(long)]
        inode_uid: i64,

        /// The inode's owning gid.
        #[arg(long)]
        inode_gid: u64,

        /// The inode's POSIX mode bits, octal (e.g. `0644`).
        #[arg(long, default_value = "0644")]
        inode_mode: String,

        /// Request read access.
        #[arg(long)]
        read: bool,

        /// Request write access.
        #[arg(long)]
        write: bool,

        /// Request execute/traverse access.
        #[arg(long)]
        execute: bool,

        /// Request a chown to this uid.
        #[arg(long)]
        chown: Option<i64>,

        /// Request a chgrp to this gid.
        #[arg(long)]
        chgrp: Option<u64>,

        /// Request permission to set a virtual xattr.
        #[arg(long)]
        set_vxattr: bool,

        /// Request permission to create/delete a snapshot.
        #[arg(long)]
        snapshot: bool,
    },

    /// Resolve a caller's identity through the configured `mds_idmap_backend`
    /// chain and print the result.
    Idmap {
        /// The capability string to attach the resolved identity to.
        caps: String,

        /// The caller name to resolve.
        name: String,
    },
}
