//! Clap CLI definitions for netproxy.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  netproxy resolve printer.local        Resolve over mDNS
  netproxy resolve example.com          Resolve with the system resolver
  netproxy resolve nas.local --timeout-ms 2000
  netproxy interfaces                   List interfaces an mDNS query would use";

/// netproxy: resolve hostnames the way proxied sockets do.
#[derive(Parser)]
#[command(name = "netproxy", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a hostname (`.local` names over mDNS) and print `address family`.
    Resolve {
        /// Hostname to resolve.
        hostname: String,
        /// Override the mDNS session timeout.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List the IPv4 interface addresses an mDNS query is sent from.
    Interfaces,
}
