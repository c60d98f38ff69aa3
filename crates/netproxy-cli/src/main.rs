//! netproxy CLI: resolve hostnames through the same dispatcher proxied
//! sockets use, and inspect which interfaces mDNS queries go out on.

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::Context;
use clap::Parser;
use netproxy_resolve::{LookupOptions, ResolutionDispatcher};
use netproxy_types::config::load_config;
use netproxy_types::ProxyConfig;
use std::time::Duration;

fn init_tracing(config: &ProxyConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing(&config);

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let dispatcher = ResolutionDispatcher::from_config(&config.mdns);

    match cli.command {
        Commands::Resolve {
            hostname,
            timeout_ms,
        } => {
            let options = LookupOptions {
                family: None,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            let resolved = rt
                .block_on(dispatcher.lookup(&hostname, &options))
                .with_context(|| format!("Failed to resolve {hostname}"))?;
            println!("{} {}", resolved.address, resolved.family.number());
        }
        Commands::Interfaces => {
            let interfaces = dispatcher
                .mdns()
                .interfaces()
                .context("Failed to enumerate network interfaces")?;
            if interfaces.is_empty() {
                eprintln!("No IPv4 interfaces available for mDNS");
            }
            for iface in interfaces {
                println!("{iface}");
            }
        }
    }

    Ok(())
}
